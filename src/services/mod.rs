//! Session participants other than the recording instrument.
//!
//! These are thin boundary objects: the real synchronization hardware and
//! stimulus software live outside this crate, and the participants here
//! adapt their collaborator interfaces onto the capability model so the
//! orchestrator can treat them like any other service.

pub mod stim;
pub mod sync;

pub use stim::{StimulusBackend, StimulusDriver};
pub use sync::{LatestFileSyncSource, SyncRecorder};
