//! Core traits and data types for session orchestration.
//!
//! This module defines the foundational abstractions for one experiment
//! session: the lifecycle capabilities a participating service may implement,
//! the base [`Service`] trait the orchestrator dispatches through, and the
//! collaborator interfaces consumed at the boundary of this crate.
//!
//! # Architecture Overview
//!
//! Services are capability-based:
//!
//! - [`Initializable`], [`Testable`], [`Startable`], [`Stoppable`],
//!   [`Verifiable`], [`Finalizable`], [`Validatable`]: orthogonal lifecycle
//!   roles, implemented in any combination
//! - [`Service`]: base trait with capability accessors; the orchestrator
//!   never assumes a concrete service's identity
//! - [`SyncSource`], [`Validator`], [`AppLauncher`]: external collaborators
//!   specified only at their interface boundary
//!
//! # Control Flow
//!
//! ```text
//! SessionRunner --(capability accessors)--> Service impls
//!                                           └── EphysRecorder → ControlTransport
//! ```
//!
//! Execution is sequential: the orchestrator awaits every lifecycle call
//! before issuing the next, so no two services run concurrently.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// Instrument Mode
// =============================================================================

/// Recording mode reported by the remote instrument.
///
/// Mirrors the instrument's actual mode. It is fetched lazily and never
/// cached across calls that might have changed it externally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Not acquiring; configuration changes are accepted in this mode
    #[serde(rename = "IDLE")]
    Idle,
    /// Acquiring signal but not writing to disk
    #[serde(rename = "ACQUIRE")]
    Acquire,
    /// Acquiring and writing to disk
    #[serde(rename = "RECORD")]
    Record,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Idle => write!(f, "IDLE"),
            Mode::Acquire => write!(f, "ACQUIRE"),
            Mode::Record => write!(f, "RECORD"),
        }
    }
}

// =============================================================================
// Lifecycle Capabilities
// =============================================================================

/// Capability for services that prepare per-session state.
#[async_trait]
pub trait Initializable: Send {
    /// Reset accumulated state and prepare for a new session.
    async fn initialize(&mut self) -> Result<()>;
}

/// Capability for services with a pre-flight readiness check.
///
/// A failed check surfaces as [`RigError::TestFailure`](crate::error::RigError)
/// naming the specific cause. Readiness failures abort the session before
/// anything is started, so there is nothing to roll back.
#[async_trait]
pub trait Testable: Send {
    async fn test(&mut self) -> Result<()>;
}

/// Capability for services that begin producing data or behavior.
#[async_trait]
pub trait Startable: Send {
    async fn start(&mut self) -> Result<()>;
}

/// Capability for services that end production.
///
/// `stop` must be safe to call even if the service was never started.
#[async_trait]
pub trait Stoppable: Send {
    async fn stop(&mut self) -> Result<()>;
}

/// Capability for services that can confirm they are producing data
/// mid-session, not merely reporting a running state while stalled.
#[async_trait]
pub trait Verifiable: Send {
    async fn verify(&mut self) -> Result<()>;
}

/// Capability for services that collect their outputs and close out the
/// session. Collected outputs are only available after `finalize` has run.
#[async_trait]
pub trait Finalizable: Send {
    async fn finalize(&mut self) -> Result<()>;
}

/// Capability for services with a post-hoc correctness check over collected
/// outputs. Failures are collected across services, not short-circuited.
#[async_trait]
pub trait Validatable: Send {
    async fn validate(&mut self) -> Result<()>;
}

// =============================================================================
// Service Base Trait
// =============================================================================

/// Base trait for every session participant.
///
/// The orchestrator dispatches purely on capability presence via the
/// `as_*` accessors; a service implements only the subsets it supports and
/// the defaults advertise nothing.
pub trait Service: Send {
    /// Service name used in logs and aggregated error reports.
    fn name(&self) -> &str;

    fn as_initializable(&mut self) -> Option<&mut dyn Initializable> {
        None
    }

    fn as_testable(&mut self) -> Option<&mut dyn Testable> {
        None
    }

    fn as_startable(&mut self) -> Option<&mut dyn Startable> {
        None
    }

    fn as_stoppable(&mut self) -> Option<&mut dyn Stoppable> {
        None
    }

    fn as_verifiable(&mut self) -> Option<&mut dyn Verifiable> {
        None
    }

    fn as_finalizable(&mut self) -> Option<&mut dyn Finalizable> {
        None
    }

    fn as_validatable(&mut self) -> Option<&mut dyn Validatable> {
        None
    }

    /// Present when this service can designate the shared synchronization
    /// reference for the session.
    fn as_sync_source(&mut self) -> Option<&mut dyn SyncSource> {
        None
    }

    /// Receive the shared synchronization reference.
    ///
    /// Default is a no-op; services that consume the reference during
    /// validation override this.
    fn set_sync_reference(&mut self, _path: &Path) {}
}

// =============================================================================
// Collaborator Interfaces
// =============================================================================

/// Synchronization service boundary: yields the most recent output produced
/// by the sync recorder, used as the session-wide reference signal.
#[async_trait]
pub trait SyncSource: Send {
    async fn latest_data(&mut self) -> Result<PathBuf>;
}

/// Opaque post-session validator consuming collected output roots plus an
/// optional synchronization reference. Raises on inconsistency; the
/// algorithm itself is outside this crate.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, root_paths: &[PathBuf], sync_reference: Option<&Path>) -> Result<()>;
}

/// Boundary for launching the remote acquisition application on a host,
/// given its application identifier.
#[async_trait]
pub trait AppLauncher: Send + Sync {
    async fn launch(&self, host: &str, app_id: &str) -> Result<()>;
}
