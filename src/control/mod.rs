//! Instrument control channel.
//!
//! The remote instrument exposes one JSON resource per concern over a
//! request/response channel at `http://{host}:{port}/api/...`:
//!
//! - `status`: `{"mode": "IDLE" | "ACQUIRE" | "RECORD"}`, read via GET,
//!   written via PUT
//! - `recording`: the whole naming/output configuration object, read and
//!   written as a unit. Partial updates preserve unspecified fields by
//!   reading, modifying, and writing the whole object back.
//!
//! [`ControlTransport`] is the seam between the recording device client and
//! the wire: production code uses [`HttpControl`], tests use the in-tree
//! [`mock::MockInstrument`].

pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::Mode;
use crate::error::{RigError, RigResult};

/// Body of the `status` resource.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusBody {
    /// Mode string as reported by the instrument. Kept as a raw string so an
    /// unrecognized value surfaces as a [`RigError::Protocol`] naming it,
    /// rather than an opaque decode failure.
    pub mode: String,
}

impl StatusBody {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode: mode.to_string(),
        }
    }

    /// Parse the reported mode, failing on anything but the three known
    /// states.
    pub fn parse_mode(&self) -> RigResult<Mode> {
        match self.mode.as_str() {
            "IDLE" => Ok(Mode::Idle),
            "ACQUIRE" => Ok(Mode::Acquire),
            "RECORD" => Ok(Mode::Record),
            other => Err(RigError::Protocol(format!("unexpected mode: {other:?}"))),
        }
    }
}

/// One record node entry in the `recording` resource.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordNode {
    pub node_id: i64,
    /// Directory the node writes to, as seen from the instrument host
    /// (e.g. `A:\\`)
    pub parent_directory: String,
    /// Fields this crate does not interpret, preserved across
    /// read-modify-write cycles
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Body of the `recording` resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecordingBody {
    #[serde(default)]
    pub base_text: String,
    #[serde(default)]
    pub prepend_text: String,
    #[serde(default)]
    pub append_text: String,
    #[serde(default)]
    pub record_nodes: Vec<RecordNode>,
    /// Fields this crate does not interpret, preserved across
    /// read-modify-write cycles
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Request/response seam to one remote instrument.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Network-level reachability probe. Does not error; an unreachable host
    /// is an expected answer during readiness checks.
    async fn reachable(&self) -> bool;

    async fn get_status(&self) -> RigResult<StatusBody>;

    async fn put_status(&self, status: &StatusBody) -> RigResult<()>;

    async fn get_recording(&self) -> RigResult<RecordingBody>;

    async fn put_recording(&self, recording: &RecordingBody) -> RigResult<()>;

    /// Hostname the instrument's data roots are shared from.
    fn host(&self) -> &str;
}

/// Timeout applied to every control channel request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the network-level reachability probe.
const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP implementation of [`ControlTransport`].
pub struct HttpControl {
    host: String,
    port: u16,
    client: reqwest::Client,
}

impl HttpControl {
    pub fn new(host: impl Into<String>, port: u16) -> RigResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RigError::Connectivity(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            host: host.into(),
            port,
            client,
        })
    }

    fn url(&self, resource: &str) -> String {
        format!("http://{}:{}/api/{}", self.host, self.port, resource)
    }

    /// Map transport-level failures to [`RigError::Connectivity`] and
    /// everything else (bad status, undecodable body) to
    /// [`RigError::Protocol`].
    fn request_error(&self, err: reqwest::Error) -> RigError {
        if err.is_connect() || err.is_timeout() {
            RigError::Connectivity(format!(
                "no response from {}:{}: {err}",
                self.host, self.port
            ))
        } else {
            RigError::Protocol(err.to_string())
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, resource: &str) -> RigResult<T> {
        let url = self.url(resource);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?
            .error_for_status()
            .map_err(|e| self.request_error(e))?;
        response.json().await.map_err(|e| self.request_error(e))
    }

    async fn put_json<T: Serialize>(&self, resource: &str, body: &T) -> RigResult<()> {
        let url = self.url(resource);
        self.client
            .put(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?
            .error_for_status()
            .map_err(|e| self.request_error(e))?;
        Ok(())
    }
}

#[async_trait]
impl ControlTransport for HttpControl {
    async fn reachable(&self) -> bool {
        let addr = format!("{}:{}", self.host, self.port);
        tokio::time::timeout(REACHABILITY_TIMEOUT, tokio::net::TcpStream::connect(&addr))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    async fn get_status(&self) -> RigResult<StatusBody> {
        let status: StatusBody = self.get_json("status").await?;
        debug!("{} -> get mode: {}", self.url("status"), status.mode);
        Ok(status)
    }

    async fn put_status(&self, status: &StatusBody) -> RigResult<()> {
        debug!("{} <- set mode: {}", self.url("status"), status.mode);
        self.put_json("status", status).await
    }

    async fn get_recording(&self) -> RigResult<RecordingBody> {
        self.get_json("recording").await
    }

    async fn put_recording(&self, recording: &RecordingBody) -> RigResult<()> {
        self.put_json("recording", recording).await
    }

    fn host(&self) -> &str {
        &self.host
    }
}
