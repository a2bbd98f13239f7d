//! Recording device client.
//!
//! [`EphysRecorder`] drives one remote electrophysiology instrument through
//! its recording state machine (`IDLE → ACQUIRE → RECORD`) over the control
//! channel, and owns the per-session state that accumulates around it:
//! the intended recording name, the output directories collected at
//! finalize, and the synchronization reference used during validation.
//!
//! The instrument's firmware applies state-changing requests
//! asynchronously, so every mutating operation is followed by a fixed
//! settle delay before the new state can be relied on. The delays are
//! named constants per operation; they are firmware characteristics, not
//! deployment knobs.
//!
//! Readiness checks live in [`readiness`], the stuck-state recovery
//! sequence in [`recovery`].

pub mod readiness;
pub mod recovery;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::config::EphysConfig;
use crate::control::{ControlTransport, RecordNode, StatusBody};
use crate::core::{
    AppLauncher, Finalizable, Initializable, Mode, Service, Startable, Stoppable, Testable,
    Validatable, Validator, Verifiable,
};
use crate::error::{RigError, RigResult};

/// Settle delay after a mode-change request.
pub const MODE_SETTLE: Duration = Duration::from_millis(500);

/// Settle delay between writing the recording name and reading it back.
pub const NAME_ECHO_SETTLE: Duration = Duration::from_millis(100);

/// Settle delay between the steps of the recovery sequence.
pub const UNLOCK_STEP_SETTLE: Duration = Duration::from_millis(500);

/// Substituted for empty or otherwise unusable recording names.
const FALLBACK_NAME: &str = "_";

/// The delimiter the instrument reserves; recording names must not carry it.
const NAME_DELIMITER: char = '.';

/// Client for one remote recording instrument plus its per-session state.
pub struct EphysRecorder {
    name: String,
    transport: Box<dyn ControlTransport>,
    config: EphysConfig,
    launcher: Option<Box<dyn AppLauncher>>,
    validator: Option<Box<dyn Validator>>,
    /// Recording name this session intends to use. Shared with other
    /// services so their outputs co-locate.
    folder: String,
    /// Output directories accumulated across the session; appended only
    /// during finalize.
    collected_dirs: Vec<PathBuf>,
    /// Stamped when the `RECORD` transition is issued, not when the
    /// firmware confirms it. Lower bound for write-progress checks.
    session_start: Option<DateTime<Utc>>,
    initialized_at: Option<DateTime<Utc>>,
    /// External reference supplied by the synchronization service; consumed
    /// only during validation.
    sync_reference: Option<PathBuf>,
}

impl EphysRecorder {
    pub fn new(transport: Box<dyn ControlTransport>, config: EphysConfig) -> Self {
        let folder = config.folder.clone();
        Self {
            name: "ephys".to_string(),
            transport,
            config,
            launcher: None,
            validator: None,
            folder,
            collected_dirs: Vec::new(),
            session_start: None,
            initialized_at: None,
            sync_reference: None,
        }
    }

    /// Attach the launcher collaborator for starting the remote application.
    pub fn with_launcher(mut self, launcher: Box<dyn AppLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Attach the post-session validator. Without one, the recorder does not
    /// advertise the validatable capability.
    pub fn with_validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Start the remote acquisition application on the instrument host.
    pub async fn launch(&self) -> Result<()> {
        match &self.launcher {
            Some(launcher) => {
                launcher
                    .launch(self.transport.host(), &self.config.app_id)
                    .await
            }
            None => Err(anyhow::anyhow!("no launcher configured for {}", self.name)),
        }
    }

    /// Recording name this session intends to use.
    pub fn intended_folder(&self) -> &str {
        &self.folder
    }

    /// Replace the intended recording name for this session.
    pub fn set_intended_folder(&mut self, name: impl Into<String>) {
        self.folder = name.into();
    }

    /// Output directories collected so far. Non-empty only after finalize
    /// has run at least once since the last initialize.
    pub fn collected_dirs(&self) -> &[PathBuf] {
        &self.collected_dirs
    }

    pub fn session_start(&self) -> Option<DateTime<Utc>> {
        self.session_start
    }

    pub fn initialized_at(&self) -> Option<DateTime<Utc>> {
        self.initialized_at
    }

    // -------------------------------------------------------------------------
    // State machine operations
    // -------------------------------------------------------------------------

    /// Query the instrument's current mode. Never cached: the mode can be
    /// changed from outside this process between calls.
    pub async fn mode(&self) -> RigResult<Mode> {
        self.transport.get_status().await?.parse_mode()
    }

    /// Issue a mode-change request. Does not block until the firmware
    /// confirms the change; callers insert a settle delay before relying on
    /// the new mode.
    pub async fn set_mode(&self, target: Mode) -> RigResult<()> {
        self.transport.put_status(&StatusBody::new(target)).await
    }

    pub async fn is_started(&self) -> RigResult<bool> {
        Ok(self.mode().await? == Mode::Record)
    }

    pub async fn is_ready_to_start(&self) -> RigResult<bool> {
        Ok(self.mode().await? == Mode::Acquire)
    }

    /// Begin recording. Idempotent when already recording; otherwise routes
    /// through `ACQUIRE` with a settle pause before entering `RECORD`.
    pub async fn start(&mut self) -> RigResult<()> {
        info!("{} | starting recording", self.name);
        if self.is_started().await? {
            warn!("{} is already recording", self.name);
            return Ok(());
        }
        if !self.is_ready_to_start().await? {
            self.set_mode(Mode::Acquire).await?;
            tokio::time::sleep(MODE_SETTLE).await;
        }
        self.session_start = Some(Utc::now());
        self.set_mode(Mode::Record).await
    }

    /// End recording. There is no direct `RECORD → IDLE` edge in normal
    /// operation; stopping always lands in `ACQUIRE`.
    pub async fn stop(&mut self) -> RigResult<()> {
        info!("{} | stopping recording", self.name);
        self.set_mode(Mode::Acquire).await
    }

    // -------------------------------------------------------------------------
    // Recording name configuration
    // -------------------------------------------------------------------------

    /// Write the recording name plus optional decorations, then read the
    /// configuration back and verify the echo. Partial application is fatal
    /// rather than retried. Unspecified fields of the `recording` resource
    /// are preserved by read-modify-write.
    ///
    /// Does not change the session's intended name; the recovery sequence
    /// uses this to write a disposable placeholder.
    pub async fn set_folder(
        &mut self,
        name: &str,
        prepend_text: &str,
        append_text: &str,
    ) -> RigResult<()> {
        let name = normalize_folder_name(name);

        let mut recording = self.transport.get_recording().await?;
        recording.base_text = name.clone();
        recording.prepend_text = prepend_text.to_string();
        recording.append_text = append_text.to_string();
        debug!(
            "{} | setting recording directory to: {}{}{}",
            self.name, prepend_text, name, append_text
        );
        self.transport.put_recording(&recording).await?;
        tokio::time::sleep(NAME_ECHO_SETTLE).await;

        let echoed = self.transport.get_recording().await?.base_text;
        if echoed != name {
            return Err(RigError::ConfigMismatch { sent: name, echoed });
        }
        Ok(())
    }

    /// Read back the currently configured recording name.
    pub async fn folder(&self) -> RigResult<String> {
        Ok(self.transport.get_recording().await?.base_text)
    }

    // -------------------------------------------------------------------------
    // Output discovery
    // -------------------------------------------------------------------------

    /// Record node descriptors reported by the instrument.
    pub async fn record_nodes(&self) -> RigResult<Vec<RecordNode>> {
        Ok(self.transport.get_recording().await?.record_nodes)
    }

    /// Filesystem locations the instrument writes to, discovered from the
    /// record nodes rather than configured statically. Drive-letter paths
    /// are reinterpreted as network shares rooted at the instrument host;
    /// already-rooted paths are taken as-is.
    pub async fn data_roots(&self) -> RigResult<Vec<PathBuf>> {
        let host = self.transport.host().to_string();
        Ok(self
            .record_nodes()
            .await?
            .iter()
            .map(|node| to_network_root(&host, &node.parent_directory))
            .collect())
    }

    /// Newest output directory under each data root, skipping known
    /// non-data system folders.
    pub async fn latest_data_dirs(&self) -> RigResult<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for root in self.data_roots().await? {
            if let Some(dir) = crate::fsutil::latest_subdir(&root, readiness::SYSTEM_DIRS)? {
                dirs.push(dir);
            }
        }
        Ok(dirs)
    }

    // -------------------------------------------------------------------------
    // Pretest
    // -------------------------------------------------------------------------

    /// Self-contained smoke sequence with a disposable recording name:
    /// initialize, test, record briefly, verify data is flowing, stop
    /// (even if the recording window failed), finalize, validate.
    pub async fn pretest(&mut self, recording_window: Duration) -> Result<()> {
        info!("{} | starting pretest", self.name);
        self.set_intended_folder("_pretest_");
        self.initialize().await?;
        self.test().await?;

        let window = self.pretest_window(recording_window).await;
        let stopped = self.stop().await;
        window?;
        stopped?;

        self.finalize().await?;
        if self.validator.is_some() {
            self.validate().await?;
        }
        info!("{} | pretest passed", self.name);
        Ok(())
    }

    async fn pretest_window(&mut self, recording_window: Duration) -> Result<()> {
        self.start().await?;
        tokio::time::sleep(recording_window).await;
        self.verify().await
    }
}

/// Substitute a safe name for empty or delimiter-carrying names, so the
/// instrument's naming configuration is never left empty.
fn normalize_folder_name(name: &str) -> String {
    if name.is_empty() {
        warn!(
            "recording directory cannot be empty, replaced with underscore: {}",
            FALLBACK_NAME
        );
        return FALLBACK_NAME.to_string();
    }
    if name.contains(NAME_DELIMITER) {
        let replaced = name.replace(NAME_DELIMITER, "_");
        warn!(
            "recording directory cannot contain periods, replaced with underscores: {}",
            replaced
        );
        return replaced;
    }
    name.to_string()
}

/// Reinterpret an instrument-local directory as a path this process can
/// reach. `A:\` on host `acq` becomes `//acq/A`.
fn to_network_root(host: &str, parent_directory: &str) -> PathBuf {
    if parent_directory.contains(':') {
        let cleaned = parent_directory.replace(':', "").replace('\\', "/");
        PathBuf::from(format!("//{}/{}", host, cleaned.trim_matches('/')))
    } else {
        PathBuf::from(parent_directory)
    }
}

// -------------------------------------------------------------------------
// Lifecycle capabilities
// -------------------------------------------------------------------------

#[async_trait]
impl Initializable for EphysRecorder {
    /// Reset accumulated session state and push the intended recording name
    /// to the instrument.
    async fn initialize(&mut self) -> Result<()> {
        info!("{} | initializing", self.name);
        self.collected_dirs.clear();
        self.sync_reference = None;
        self.initialized_at = Some(Utc::now());
        self.session_start = None;
        let folder = self.folder.clone();
        self.set_folder(&folder, "", "").await?;
        Ok(())
    }
}

#[async_trait]
impl Startable for EphysRecorder {
    async fn start(&mut self) -> Result<()> {
        EphysRecorder::start(self).await?;
        Ok(())
    }
}

#[async_trait]
impl Stoppable for EphysRecorder {
    async fn stop(&mut self) -> Result<()> {
        EphysRecorder::stop(self).await?;
        Ok(())
    }
}

#[async_trait]
impl Verifiable for EphysRecorder {
    /// Confirm the instrument is truly writing data, not merely reporting
    /// `RECORD` while stalled.
    async fn verify(&mut self) -> Result<()> {
        debug!("{} | verifying", self.name);
        let since = self
            .session_start
            .ok_or_else(|| anyhow::anyhow!("{} was never started this session", self.name))?;
        self.check_files_growing(since).await?;
        info!(
            "{} | verified files are increasing in size for all record nodes",
            self.name
        );
        Ok(())
    }
}

#[async_trait]
impl Finalizable for EphysRecorder {
    /// Collect the newest output directory per data root, then run the
    /// recovery sequence so the instrument is left reconfigurable.
    async fn finalize(&mut self) -> Result<()> {
        info!("{} | finalizing", self.name);
        let dirs = self.latest_data_dirs().await?;
        self.collected_dirs.extend(dirs);
        self.unlock_previous_recording().await?;
        Ok(())
    }
}

#[async_trait]
impl Validatable for EphysRecorder {
    async fn validate(&mut self) -> Result<()> {
        info!("{} | validating", self.name);
        let validator = self
            .validator
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no validator configured for {}", self.name))?;
        validator
            .validate(&self.collected_dirs, self.sync_reference.as_deref())
            .await?;
        info!(
            "{} | validated data {} sync",
            self.name,
            if self.sync_reference.is_some() {
                "with"
            } else {
                "without"
            }
        );
        Ok(())
    }
}

impl Service for EphysRecorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_initializable(&mut self) -> Option<&mut dyn Initializable> {
        Some(self)
    }

    fn as_testable(&mut self) -> Option<&mut dyn Testable> {
        Some(self)
    }

    fn as_startable(&mut self) -> Option<&mut dyn Startable> {
        Some(self)
    }

    fn as_stoppable(&mut self) -> Option<&mut dyn Stoppable> {
        Some(self)
    }

    fn as_verifiable(&mut self) -> Option<&mut dyn Verifiable> {
        Some(self)
    }

    fn as_finalizable(&mut self) -> Option<&mut dyn Finalizable> {
        Some(self)
    }

    fn as_validatable(&mut self) -> Option<&mut dyn Validatable> {
        if self.validator.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn set_sync_reference(&mut self, path: &Path) {
        self.sync_reference = Some(path.to_path_buf());
    }
}
