//! Readiness checks: connectivity, capacity, and write progress.
//!
//! Connectivity and capacity run before a session starts (the `test`
//! phase); the write-progress check runs mid-session to confirm the
//! instrument is actually writing, not merely reporting `RECORD`.
//!
//! The capacity check deliberately keeps probing after the first failure:
//! a session must be abandoned if *any* destination volume will fill up,
//! but diagnosing *all* bad volumes in one pass is more useful than
//! stopping at the first.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::core::Testable;
use crate::error::{CapacityProblem, RigError, RigResult};
use crate::fsutil;

use super::EphysRecorder;

/// Glob locating the instrument's per-stream sample index files below an
/// output directory: `{node}/{experiment}/{recording}/continuous/{stream}/`.
pub const OUTPUT_PATTERN: &str = "*/*/*/continuous/*/sample_numbers.npy";

/// Non-data folders that show up at the root of Windows volumes.
pub const SYSTEM_DIRS: &[&str] = &["System Volume Information", "$RECYCLE.BIN"];

/// Interval across which a candidate output file must grow.
pub const GROWTH_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

impl EphysRecorder {
    /// Full connectivity check: host reachable at the network layer, control
    /// channel responding, reported mode recognizable. Returns the specific
    /// cause; callers decide whether to treat it as fatal.
    pub async fn check_connectivity(&self) -> RigResult<()> {
        if !self.transport.reachable().await {
            return Err(RigError::Connectivity(format!(
                "no response from {}: may be offline or unreachable",
                self.transport.host()
            )));
        }
        // A transport error here means the host is up but the recording
        // software is not answering; an unknown mode string means something
        // is answering that we don't understand.
        self.mode().await?;
        Ok(())
    }

    /// Convenience form of [`check_connectivity`](Self::check_connectivity)
    /// that logs the cause instead of returning it.
    pub async fn is_connected(&self) -> bool {
        match self.check_connectivity().await {
            Ok(()) => true,
            Err(cause) => {
                warn!("{} | not connected: {}", self.name, cause);
                false
            }
        }
    }

    /// Minimum free disk space required to start recording, in GB. Pure
    /// function of the configured data rate and minimum session length.
    pub fn required_capacity_gb(&self) -> f64 {
        self.config.gb_per_hour * self.config.min_recording_hours
    }

    /// Probe free space on every discovered data root. Inaccessible roots
    /// and roots below the required capacity are both collected; errors do
    /// not short-circuit the remaining roots.
    pub async fn check_disk_space(&self) -> RigResult<()> {
        let required = self.required_capacity_gb();
        let mut problems = Vec::new();
        for root in self.data_roots().await? {
            match fsutil::free_gb(&root) {
                Err(err) => {
                    error!("{} | data path not accessible: {}", self.name, root.display());
                    problems.push(CapacityProblem::Inaccessible {
                        root,
                        reason: err.to_string(),
                    });
                }
                Ok(free) => {
                    info!(
                        "{} | free disk space on {}: {:.0} GB",
                        self.name,
                        root.display(),
                        free
                    );
                    if free < required {
                        problems.push(CapacityProblem::BelowMinimum {
                            root,
                            free_gb: free,
                            required_gb: required,
                        });
                    }
                }
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(RigError::Capacity(problems))
        }
    }

    pub async fn is_disk_space_ok(&self) -> bool {
        match self.check_disk_space().await {
            Ok(()) => true,
            Err(cause) => {
                warn!("{} | {}", self.name, cause);
                false
            }
        }
    }

    /// Require evidence of active writing under every data root: in each
    /// root's newest output directory, at least one sample index file
    /// created at or after `since` must grow across the sampling interval.
    /// Candidates are tried newest first.
    pub async fn check_files_growing(&self, since: DateTime<Utc>) -> RigResult<()> {
        for data_dir in self.latest_data_dirs().await? {
            let candidates = fsutil::files_created_since(&data_dir, OUTPUT_PATTERN, since.into())?;
            let mut growing = false;
            for file in candidates.iter().rev() {
                if fsutil::is_file_growing(file, GROWTH_SAMPLE_INTERVAL).await? {
                    growing = true;
                    break;
                }
            }
            if !growing {
                return Err(RigError::DataNotFlowing { root: data_dir });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Testable for EphysRecorder {
    /// Pre-flight readiness: connectivity, capacity, then the proactive
    /// recovery sequence. The stale-lock condition is not reliably
    /// observable beforehand, so recovery runs on every test rather than
    /// only on observed failure.
    async fn test(&mut self) -> Result<()> {
        info!("{} | testing", self.name);
        if let Err(cause) = self.check_connectivity().await {
            return Err(RigError::TestFailure {
                service: self.name.clone(),
                reason: format!(
                    "acquisition host {} isn't responding, or the recording software isn't open: {}",
                    self.transport.host(),
                    cause
                ),
            }
            .into());
        }
        if let Err(cause) = self.check_disk_space().await {
            let detail = match &cause {
                RigError::Capacity(problems) => problems
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
                other => other.to_string(),
            };
            return Err(RigError::TestFailure {
                service: self.name.clone(),
                reason: format!(
                    "free disk space doesn't meet the {:.0} GB minimum: {}",
                    self.required_capacity_gb(),
                    detail
                ),
            }
            .into());
        }
        self.unlock_previous_recording().await?;
        Ok(())
    }
}
