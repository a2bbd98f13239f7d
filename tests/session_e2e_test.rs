//! End-to-end session: the orchestrator drives the ephys recorder (against
//! the in-memory instrument), a stimulus driver, and a sync participant
//! through the full lifecycle, then hands the collected outputs to the
//! validator.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use rig_daq::config::EphysConfig;
use rig_daq::control::mock::MockInstrument;
use rig_daq::core::{Mode, Validator};
use rig_daq::instrument::EphysRecorder;
use rig_daq::services::{LatestFileSyncSource, StimulusBackend, StimulusDriver, SyncRecorder};
use rig_daq::session::{SessionRunner, SessionState};

const FOLDER: &str = "0123456789_366122_20220807";

type ValidatorCalls = Arc<Mutex<Vec<(Vec<PathBuf>, Option<PathBuf>)>>>;

struct CollectingValidator {
    calls: ValidatorCalls,
}

#[async_trait]
impl Validator for CollectingValidator {
    async fn validate(&self, root_paths: &[PathBuf], sync_reference: Option<&Path>) -> Result<()> {
        self.calls.lock().unwrap().push((
            root_paths.to_vec(),
            sync_reference.map(Path::to_path_buf),
        ));
        Ok(())
    }
}

/// Stands in for the instrument's disk writer: when the stimulus starts,
/// one output directory appears under each data root.
struct OutputWriter {
    dirs: Vec<PathBuf>,
}

#[async_trait]
impl StimulusBackend for OutputWriter {
    async fn run(&mut self) -> Result<()> {
        for dir in &self.dirs {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_full_session_collects_one_output_dir_per_root() {
    let root_a = tempfile::tempdir().unwrap();
    let root_b = tempfile::tempdir().unwrap();
    let sync_root = tempfile::tempdir().unwrap();
    std::fs::write(sync_root.path().join("sync_20220807.h5"), b"barcodes").unwrap();

    let mock = MockInstrument::new();
    let path_a = root_a.path().to_string_lossy().to_string();
    let path_b = root_b.path().to_string_lossy().to_string();
    mock.set_record_nodes(&[path_a.as_str(), path_b.as_str()]);
    // A previous session left the instrument holding its old name.
    mock.lock_previous_name("stale_previous");

    let config = EphysConfig {
        host: "mock-host".into(),
        port: 37497,
        app_id: "open-ephys".into(),
        gb_per_hour: 1e-6,
        min_recording_hours: 1.0,
        folder: FOLDER.into(),
    };
    let calls: ValidatorCalls = Default::default();
    let recorder = EphysRecorder::new(Box::new(mock.clone()), config)
        .with_validator(Box::new(CollectingValidator {
            calls: calls.clone(),
        }));

    let stimulus = StimulusDriver::new(Box::new(OutputWriter {
        dirs: vec![
            root_a.path().join(format!("{FOLDER}_2022-08-07_12-00-00")),
            root_b.path().join(format!("{FOLDER}_2022-08-07_12-00-00")),
        ],
    }));
    let sync = SyncRecorder::new(Box::new(LatestFileSyncSource::new(sync_root.path())));

    let mut session = SessionRunner::new(
        vec![Box::new(recorder)],
        Some(Box::new(stimulus)),
        vec![Box::new(sync)],
        Duration::from_millis(50),
    );
    session.run().await.unwrap();
    assert_eq!(session.state(), SessionState::Validated);

    // The recorder ends the session stopped and reconfigurable, with the
    // stale lock long gone and the intended name in effect.
    assert_eq!(mock.mode(), Mode::Acquire);
    assert!(!mock.is_locked());
    assert_eq!(mock.effective_output_name(), FOLDER);

    // Exactly one validation call: one collected dir per data root, plus
    // the sync reference designated from the sync participant.
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let (collected, sync_reference) = &calls[0];
    assert_eq!(collected.len(), 2);
    assert!(collected
        .iter()
        .all(|dir| dir.ends_with(format!("{FOLDER}_2022-08-07_12-00-00"))));
    assert!(sync_reference
        .as_ref()
        .is_some_and(|path| path.ends_with("sync_20220807.h5")));
}

#[tokio::test]
async fn test_unreachable_instrument_aborts_before_recording() {
    let mock = MockInstrument::new();
    mock.set_offline(true);

    let config = EphysConfig {
        host: "mock-host".into(),
        port: 37497,
        app_id: "open-ephys".into(),
        gb_per_hour: 1e-6,
        min_recording_hours: 1.0,
        folder: FOLDER.into(),
    };
    let recorder = EphysRecorder::new(Box::new(mock.clone()), config);

    let mut session = SessionRunner::new(
        vec![Box::new(recorder)],
        None,
        Vec::new(),
        Duration::from_millis(50),
    );
    // Initialization already talks to the instrument; the session never
    // gets anywhere near recording and the instrument is never started.
    session.run().await.unwrap_err();
    assert!(mock.transitions().is_empty());
}
