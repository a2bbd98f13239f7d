//! An in-memory instrument implementing the control channel.
//!
//! Behaves like the real firmware in the ways the client code cares about.
//! Mode changes are accepted unconditionally. A stale session can leave the
//! instrument *locked* on a previous recording name: the `recording`
//! resource still echoes whatever is written (the lock is not observable
//! through the control channel), but the name the instrument would actually
//! use for output stays stale until the instrument cycles through `RECORD`.
//! Fault injection covers an unreachable host, a dead control channel, and
//! an unrecognized mode string.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::Mode;
use crate::error::{RigError, RigResult};

use super::{ControlTransport, RecordNode, RecordingBody, StatusBody};

#[derive(Debug)]
struct MockState {
    mode: Mode,
    recording: RecordingBody,
    /// Name the instrument would actually stamp on output directories.
    /// Tracks `base_text` except while locked.
    effective_name: String,
    locked: bool,
    /// Visibly refuse `base_text` writes, as an instrument stuck in a mode
    /// that rejects new configuration does.
    reject_name_writes: bool,
    offline: bool,
    channel_down: bool,
    reported_mode: Option<String>,
    transitions: Vec<Mode>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            mode: Mode::Idle,
            recording: RecordingBody::default(),
            effective_name: String::new(),
            locked: false,
            reject_name_writes: false,
            offline: false,
            channel_down: false,
            reported_mode: None,
            transitions: Vec::new(),
        }
    }
}

/// Shared-handle mock instrument. Clones address the same instrument, so a
/// test can keep a handle for assertions while the recorder owns another.
#[derive(Clone, Default)]
pub struct MockInstrument {
    state: Arc<Mutex<MockState>>,
}

impl MockInstrument {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Point the instrument's record nodes at the given directories.
    pub fn set_record_nodes(&self, parent_directories: &[&str]) {
        let mut state = self.state();
        state.recording.record_nodes = parent_directories
            .iter()
            .enumerate()
            .map(|(i, dir)| RecordNode {
                node_id: 100 + i as i64,
                parent_directory: (*dir).to_string(),
                extra: serde_json::Map::new(),
            })
            .collect();
    }

    /// Emulate a stale session holding the output name: `base_text` writes
    /// are echoed back but do not take effect until the instrument next
    /// enters `RECORD`.
    pub fn lock_previous_name(&self, stale: impl Into<String>) {
        let mut state = self.state();
        state.locked = true;
        state.effective_name = stale.into();
    }

    pub fn is_locked(&self) -> bool {
        self.state().locked
    }

    /// Name the instrument would stamp on new output directories.
    pub fn effective_output_name(&self) -> String {
        self.state().effective_name.clone()
    }

    /// Refuse `base_text` writes in a way the echo check can see.
    pub fn set_reject_name_writes(&self, reject: bool) {
        self.state().reject_name_writes = reject;
    }

    /// Take the host off the network entirely.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Host reachable, but the control channel does not respond.
    pub fn set_channel_down(&self, down: bool) {
        self.state().channel_down = down;
    }

    /// Report a raw mode string instead of the actual mode.
    pub fn report_mode_string(&self, mode: impl Into<String>) {
        self.state().reported_mode = Some(mode.into());
    }

    pub fn mode(&self) -> Mode {
        self.state().mode
    }

    /// Every mode the instrument was put into, in order.
    pub fn transitions(&self) -> Vec<Mode> {
        self.state().transitions.clone()
    }

    pub fn recording_snapshot(&self) -> RecordingBody {
        self.state().recording.clone()
    }

    fn check_channel(&self) -> RigResult<()> {
        let state = self.state();
        if state.offline {
            return Err(RigError::Connectivity(
                "no response from mock-host: may be offline or unreachable".into(),
            ));
        }
        if state.channel_down {
            return Err(RigError::Connectivity(
                "no response from the instrument's control channel".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlTransport for MockInstrument {
    async fn reachable(&self) -> bool {
        !self.state().offline
    }

    async fn get_status(&self) -> RigResult<StatusBody> {
        self.check_channel()?;
        let state = self.state();
        let mode = state
            .reported_mode
            .clone()
            .unwrap_or_else(|| state.mode.to_string());
        Ok(StatusBody { mode })
    }

    async fn put_status(&self, status: &StatusBody) -> RigResult<()> {
        self.check_channel()?;
        let target = status.parse_mode()?;
        let mut state = self.state();
        state.mode = target;
        state.transitions.push(target);
        if target == Mode::Record {
            // Cycling through RECORD is what releases a stale name lock.
            state.locked = false;
            state.effective_name = state.recording.base_text.clone();
        }
        Ok(())
    }

    async fn get_recording(&self) -> RigResult<RecordingBody> {
        self.check_channel()?;
        Ok(self.state().recording.clone())
    }

    async fn put_recording(&self, recording: &RecordingBody) -> RigResult<()> {
        self.check_channel()?;
        let mut state = self.state();
        let stale_base = state.recording.base_text.clone();
        state.recording = recording.clone();
        if state.reject_name_writes {
            state.recording.base_text = stale_base;
            return Ok(());
        }
        if !state.locked {
            state.effective_name = state.recording.base_text.clone();
        }
        Ok(())
    }

    fn host(&self) -> &str {
        "mock-host"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn set_name(mock: &MockInstrument, name: &str) {
        let mut recording = mock.get_recording().await.unwrap();
        recording.base_text = name.to_string();
        mock.put_recording(&recording).await.unwrap();
    }

    #[tokio::test]
    async fn test_locked_instrument_echoes_but_ignores_base_text() {
        let mock = MockInstrument::new();
        mock.lock_previous_name("previous");

        set_name(&mock, "intended").await;

        // The control channel echoes the write, the output name is stale.
        assert_eq!(mock.get_recording().await.unwrap().base_text, "intended");
        assert_eq!(mock.effective_output_name(), "previous");
    }

    #[tokio::test]
    async fn test_record_cycle_releases_lock() {
        let mock = MockInstrument::new();
        mock.lock_previous_name("previous");

        set_name(&mock, "_temp_").await;
        mock.put_status(&StatusBody::new(Mode::Record)).await.unwrap();
        assert!(!mock.is_locked());
        assert_eq!(mock.effective_output_name(), "_temp_");

        set_name(&mock, "intended").await;
        assert_eq!(mock.effective_output_name(), "intended");
    }

    #[tokio::test]
    async fn test_offline_instrument_reports_connectivity() {
        let mock = MockInstrument::new();
        mock.set_offline(true);
        assert!(!mock.reachable().await);
        assert!(matches!(
            mock.get_status().await.unwrap_err(),
            RigError::Connectivity(_)
        ));
    }
}
