//! Custom error types for the application.
//!
//! This module defines the primary error type, `RigError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure modes of a recording session, from
//! configuration and I/O issues to instrument-specific problems.
//!
//! Two variants aggregate instead of short-circuiting:
//!
//! - **`Capacity`** carries one entry per failing data root, because a
//!   session must be abandoned if *any* destination volume will fill up, but
//!   diagnosing *all* bad volumes in one pass is operationally necessary.
//! - **`Validation`** collects post-hoc failures across every validatable
//!   service rather than stopping at the first.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type RigResult<T> = std::result::Result<T, RigError>;

#[derive(Error, Debug)]
pub enum RigError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Instrument unreachable: {0}")]
    Connectivity(String),

    #[error("Unexpected instrument response: {0}")]
    Protocol(String),

    #[error("Recording name set to {sent:?} but instrument shows {echoed:?}")]
    ConfigMismatch { sent: String, echoed: String },

    #[error("Insufficient recording capacity on {} data root(s)", .0.len())]
    Capacity(Vec<CapacityProblem>),

    #[error("Data file(s) not increasing in size in {root}")]
    DataNotFlowing { root: PathBuf },

    #[error("{service} readiness check failed: {reason}")]
    TestFailure { service: String, reason: String },

    #[error("Validation failed for {} service(s)", .0.len())]
    Validation(Vec<ValidationProblem>),
}

/// One data root's contribution to an aggregated [`RigError::Capacity`].
#[derive(Debug)]
pub enum CapacityProblem {
    /// The root could not be probed at all.
    Inaccessible { root: PathBuf, reason: String },
    /// The root is reachable but below the required free space.
    BelowMinimum {
        root: PathBuf,
        free_gb: f64,
        required_gb: f64,
    },
}

impl std::fmt::Display for CapacityProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapacityProblem::Inaccessible { root, reason } => {
                write!(f, "data root not accessible: {}: {}", root.display(), reason)
            }
            CapacityProblem::BelowMinimum {
                root,
                free_gb,
                required_gb,
            } => write!(
                f,
                "free space on {} is {:.1} GB, below the {:.1} GB minimum",
                root.display(),
                free_gb,
                required_gb
            ),
        }
    }
}

/// One service's contribution to an aggregated [`RigError::Validation`].
#[derive(Debug)]
pub struct ValidationProblem {
    pub service: String,
    pub reason: String,
}

impl std::fmt::Display for ValidationProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.service, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RigError::Connectivity("no response from acq-host".to_string());
        assert_eq!(
            err.to_string(),
            "Instrument unreachable: no response from acq-host"
        );
    }

    #[test]
    fn test_capacity_aggregates_counts() {
        let err = RigError::Capacity(vec![
            CapacityProblem::Inaccessible {
                root: PathBuf::from("//acq/A"),
                reason: "not found".into(),
            },
            CapacityProblem::BelowMinimum {
                root: PathBuf::from("//acq/B"),
                free_gb: 120.0,
                required_gb: 500.0,
            },
        ]);
        assert!(err.to_string().contains("2 data root(s)"));
    }

    #[test]
    fn test_config_mismatch_display() {
        let err = RigError::ConfigMismatch {
            sent: "mouse_366122".into(),
            echoed: "_temp_".into(),
        };
        assert!(err.to_string().contains("mouse_366122"));
        assert!(err.to_string().contains("_temp_"));
    }
}
