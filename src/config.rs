//! Configuration system using Figment.
//!
//! Configuration is loaded from:
//! 1. `rig.toml` file (base configuration)
//! 2. Environment variables (prefixed with `RIG_DAQ_`)
//!
//! Every participating service gets an explicit, named configuration
//! structure, validated after loading rather than injected reflectively.
//!
//! # Environment Variable Overrides
//!
//! Nesting is separated with a double underscore:
//!
//! ```text
//! RIG_DAQ_EPHYS__HOST=W10DT713842
//! RIG_DAQ_EPHYS__GB_PER_HOUR=250
//! RIG_DAQ_SESSION__DURATION="30s"
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{RigError, RigResult};

/// Top-level rig configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    /// Rig identifier used in logs and recording names
    pub rig_id: String,
    /// Recording instrument settings
    pub ephys: EphysConfig,
    /// Session timing settings
    #[serde(default)]
    pub session: SessionConfig,
}

/// Settings for the remote recording instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphysConfig {
    /// Hostname of the acquisition computer
    pub host: String,
    /// Control channel port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Identifier handed to the launcher to start the remote application
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// Data written per hour of recording, per drive (GB)
    #[serde(default = "default_gb_per_hour")]
    pub gb_per_hour: f64,
    /// Minimum recording duration a session must have room for (hours)
    #[serde(default = "default_min_recording_hours")]
    pub min_recording_hours: f64,
    /// Recording folder name sent to the instrument, typically
    /// `{session}_{mouse}_{date}`
    pub folder: String,
}

/// Session timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long recorders run before being stopped. Must be long enough to
    /// capture one set of barcodes on the synchronization reference.
    #[serde(with = "humantime_serde", default = "default_session_duration")]
    pub duration: Duration,
    /// Recording window used by the self-contained pretest sequence
    #[serde(with = "humantime_serde", default = "default_pretest_duration")]
    pub pretest_duration: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration: default_session_duration(),
            pretest_duration: default_pretest_duration(),
        }
    }
}

fn default_port() -> u16 {
    // 1-800-EPHYS
    37497
}

fn default_app_id() -> String {
    "open-ephys".to_string()
}

fn default_gb_per_hour() -> f64 {
    250.0
}

fn default_min_recording_hours() -> f64 {
    2.0
}

fn default_session_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_pretest_duration() -> Duration {
    Duration::from_millis(500)
}

impl RigConfig {
    /// Load configuration from the given TOML file plus `RIG_DAQ_` prefixed
    /// environment overrides, then validate it.
    pub fn load(path: &Path) -> RigResult<Self> {
        let config: RigConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RIG_DAQ_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation of values that parse but are logically invalid.
    pub fn validate(&self) -> RigResult<()> {
        if self.rig_id.is_empty() {
            return Err(RigError::Configuration("rig_id must not be empty".into()));
        }
        self.ephys.validate()?;
        if self.session.duration.is_zero() {
            return Err(RigError::Configuration(
                "session.duration must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl EphysConfig {
    pub fn validate(&self) -> RigResult<()> {
        if self.host.is_empty() {
            return Err(RigError::Configuration(
                "ephys.host must not be empty".into(),
            ));
        }
        if self.gb_per_hour <= 0.0 {
            return Err(RigError::Configuration(format!(
                "ephys.gb_per_hour must be positive: {}",
                self.gb_per_hour
            )));
        }
        if self.min_recording_hours <= 0.0 {
            return Err(RigError::Configuration(format!(
                "ephys.min_recording_hours must be positive: {}",
                self.min_recording_hours
            )));
        }
        if self.folder.is_empty() {
            return Err(RigError::Configuration(
                "ephys.folder must not be empty".into(),
            ));
        }
        if self.folder.contains('.') {
            return Err(RigError::Configuration(format!(
                "ephys.folder must not contain periods: {}",
                self.folder
            )));
        }
        Ok(())
    }
}
