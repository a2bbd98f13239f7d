//! Stuck-state recovery ("unlock previous recording").
//!
//! The instrument can retain a reference to a folder name from a stale
//! session, or sit in a mode that rejects new configuration. This sequence
//! deterministically returns it to a known-good, reconfigurable state
//! without losing the caller's intended recording name. Each step is
//! separated by a fixed settle delay because the firmware applies requests
//! asynchronously.

use log::debug;

use crate::core::Mode;
use crate::error::RigResult;

use super::{EphysRecorder, MODE_SETTLE, UNLOCK_STEP_SETTLE};

/// Disposable name written while cycling the instrument; the previous
/// name's lock releases onto this value, never onto real session output.
pub const PLACEHOLDER_NAME: &str = "_temp_";

impl EphysRecorder {
    /// Force the instrument to `IDLE`, stopping first if it is recording.
    /// Configuration should only be pushed from `IDLE`.
    pub async fn set_idle(&mut self) -> RigResult<()> {
        if self.is_started().await? {
            self.stop().await?;
        }
        tokio::time::sleep(MODE_SETTLE).await;
        self.set_mode(Mode::Idle).await
    }

    /// Clear a stale session's hold on the recording name:
    ///
    /// 1. force `IDLE`
    /// 2. set the name to a disposable placeholder
    /// 3. cycle briefly through `RECORD`; the instrument only releases its
    ///    lock on the previous name while cycling through a recording
    /// 4. restore the intended name
    pub async fn unlock_previous_recording(&mut self) -> RigResult<()> {
        debug!("{} | unlocking previous recording", self.name);
        self.set_idle().await?;
        tokio::time::sleep(UNLOCK_STEP_SETTLE).await;
        self.set_folder(PLACEHOLDER_NAME, "", "").await?;
        tokio::time::sleep(UNLOCK_STEP_SETTLE).await;
        self.start().await?;
        tokio::time::sleep(UNLOCK_STEP_SETTLE).await;
        self.stop().await?;
        tokio::time::sleep(UNLOCK_STEP_SETTLE).await;
        let folder = self.folder.clone();
        self.set_folder(&folder, "", "").await
    }
}
