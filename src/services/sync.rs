//! Synchronization service participant.
//!
//! The sync box records a timing signal alongside every other recorder;
//! its most recent output becomes the session-wide synchronization
//! reference the orchestrator hands to the services that validate against
//! it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::core::{Service, SyncSource};
use crate::fsutil;

/// [`SyncSource`] backed by a directory the sync hardware writes into:
/// the latest data is simply the newest file under its output root.
pub struct LatestFileSyncSource {
    root: PathBuf,
}

impl LatestFileSyncSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SyncSource for LatestFileSyncSource {
    async fn latest_data(&mut self) -> Result<PathBuf> {
        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("reading sync output root {}", self.root.display()))?
        {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let ctime = fsutil::created(&path)?;
            match &newest {
                Some((t, _)) if *t >= ctime => {}
                _ => newest = Some((ctime, path)),
            }
        }
        newest
            .map(|(_, path)| path)
            .with_context(|| format!("no sync output found under {}", self.root.display()))
    }
}

/// Participant wrapping a [`SyncSource`]; advertises only the designation
/// capability, leaving control of the sync hardware to its own service.
pub struct SyncRecorder {
    name: String,
    source: Box<dyn SyncSource>,
}

impl SyncRecorder {
    pub fn new(source: Box<dyn SyncSource>) -> Self {
        Self {
            name: "sync".to_string(),
            source,
        }
    }
}

impl Service for SyncRecorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_sync_source(&mut self) -> Option<&mut dyn SyncSource> {
        Some(self.source.as_mut())
    }

    fn set_sync_reference(&mut self, _path: &Path) {
        // The sync recorder is the origin of the reference.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20220618T1201.h5"), b"a").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(dir.path().join("20220618T1459.h5"), b"b").unwrap();

        let mut source = LatestFileSyncSource::new(dir.path());
        let latest = source.latest_data().await.unwrap();
        assert!(latest.ends_with("20220618T1459.h5"));
    }

    #[tokio::test]
    async fn test_empty_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = LatestFileSyncSource::new(dir.path());
        assert!(source.latest_data().await.is_err());
    }
}
