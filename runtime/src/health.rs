//! Container-runtime health probe.
//!
//! A single `GET` against a local endpoint, classified as [`HealthState::Up`]
//! on HTTP 200 and [`HealthState::Down`] on anything else. Failures never
//! reach the caller, they are folded into `Down` and retried on the next tick.

use core::{fmt, time::Duration};

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tracing::{debug, warn};

/// The docker engine's ping path on its default unencrypted port.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:2375/_ping";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Health of the probed dependency, as shown by the status indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// No probe has completed yet.
    #[default]
    Unknown,
    Up,
    Down,
}

impl HealthState {
    /// Indicator color the host paints for this state.
    #[must_use]
    pub const fn indicator_color(self) -> &'static str {
        match self {
            Self::Unknown => "grey",
            Self::Up => "green",
            Self::Down => "red",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Unknown => "unknown",
            Self::Up => "up",
            Self::Down => "down",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Why a probe classified the endpoint as down.
#[derive(Debug, ThisError)]
pub enum ProbeFailure {
    #[error("endpoint answered with {0}")]
    Status(StatusCode),
    #[error("request failed")]
    Transport(#[from] reqwest::Error),
}

/// A reusable probe against one endpoint.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: Client,
    endpoint: String,
}

impl HealthProbe {
    /// Builds the probe's HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(endpoint: impl Into<String>, timeouts: ProbeTimeouts) -> Result<Self, ProbeFailure> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read)
            // bounds a server that trickles bytes and keeps resetting the read timer
            .timeout(timeouts.connect.saturating_add(timeouts.read))
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn request(&self) -> Result<(), ProbeFailure> {
        let response = self.client.get(&self.endpoint).send().await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            other => Err(ProbeFailure::Status(other)),
        }
    }

    /// Performs one probe.
    pub async fn check(&self) -> HealthState {
        match self.request().await {
            Ok(()) => {
                debug!(endpoint = %self.endpoint, "Health probe succeeded");
                HealthState::Up
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = ?e, "Health probe failed");
                HealthState::Down
            }
        }
    }
}

/// One-shot probe with a freshly built client.
pub async fn check_health(endpoint: &str, timeouts: ProbeTimeouts) -> HealthState {
    match HealthProbe::new(endpoint, timeouts) {
        Ok(probe) => probe.check().await,
        Err(e) => {
            warn!(endpoint, error = ?e, "Failed to build health probe client");
            HealthState::Down
        }
    }
}
