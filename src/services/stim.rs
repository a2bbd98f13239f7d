//! Stimulus driver participant.
//!
//! The stimulus software runs outside this crate; [`StimulusBackend`] is
//! the boundary through which it is told to begin. The orchestrator only
//! starts the stimulus once every recorder is running.

use anyhow::Result;
use async_trait::async_trait;
use log::info;

use crate::core::{Service, Startable};

/// Boundary to the external stimulus software.
#[async_trait]
pub trait StimulusBackend: Send {
    /// Begin presenting the stimulus.
    async fn run(&mut self) -> Result<()>;
}

/// Participant driving the stimulus through its backend.
pub struct StimulusDriver {
    name: String,
    backend: Box<dyn StimulusBackend>,
}

impl StimulusDriver {
    pub fn new(backend: Box<dyn StimulusBackend>) -> Self {
        Self {
            name: "stimulus".to_string(),
            backend,
        }
    }
}

#[async_trait]
impl Startable for StimulusDriver {
    async fn start(&mut self) -> Result<()> {
        info!("{} | starting", self.name);
        self.backend.run().await
    }
}

impl Service for StimulusDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_startable(&mut self) -> Option<&mut dyn Startable> {
        Some(self)
    }
}
