//! Scanner, retry and transport configuration.
//!
//! Every struct deserializes from JSON with missing fields taking their defaults, so a partial
//! config file only needs the values it overrides.

use serde::Deserialize;
use std::time::Duration;

use crate::error::ScanError;

/// Tuning for the iterative and progressive scanners.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Max blocks per `eth_getLogs` sub-window. 0 disables iterative scanning.
    pub step_size: u64,
    /// Ceiling on sub-windows for a full-history scan. 0 disables iterative scanning.
    pub max_steps: u64,
    /// Try recent windows (day, week, ...) before the entire history.
    pub progressive: bool,
    /// Block production estimate used to size progressive windows.
    pub blocks_per_minute: u64,
    /// Half-width of the window searched around a known transaction block.
    pub correlation_window: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            step_size: 1000,
            max_steps: 5000,
            progressive: true,
            blocks_per_minute: 6,
            correlation_window: 10,
        }
    }
}

impl ScanConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ScanError> {
        serde_json::from_str(s).map_err(|e| ScanError::Decode(e.to_string()))
    }

    /// Iterative mode needs both a step size and a step ceiling.
    pub fn iterative_enabled(&self) -> bool {
        self.step_size > 0 && self.max_steps > 0
    }
}

/// Attempt budget and liveness-probe settings for one resilient call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    /// Fail with `EndpointOffline` when the probe fails; otherwise return the fallback value.
    pub throw_if_offline: bool,
    pub probe_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            throw_if_offline: true,
            probe_timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn throw_if_offline(mut self, throw: bool) -> Self {
        self.throw_if_offline = throw;
        self
    }
}

/// Options for creating a transport handle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// PEM client certificate; used together with `client_key_pem`.
    pub client_cert_pem: Option<String>,
    /// PEM (PKCS#8) private key for the client certificate.
    pub client_key_pem: Option<String>,
    /// Extra PEM root certificate to trust.
    pub ca_cert_pem: Option<String>,
    pub auto_reconnect: bool,
    /// Skip server certificate verification (self-signed node endpoints).
    pub accept_invalid_certs: bool,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub reconnection: ReconnectionConfig,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            client_cert_pem: None,
            client_key_pem: None,
            ca_cert_pem: None,
            auto_reconnect: false,
            accept_invalid_certs: false,
            connect_timeout_secs: 60,
            request_timeout_secs: 200,
            reconnection: ReconnectionConfig::default(),
        }
    }
}

impl TransportOptions {
    pub fn from_json_str(s: &str) -> Result<Self, ScanError> {
        serde_json::from_str(s).map_err(|e| ScanError::Decode(e.to_string()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Both halves of a client identity are present.
    pub fn has_client_identity(&self) -> bool {
        matches!(
            (&self.client_cert_pem, &self.client_key_pem),
            (Some(cert), Some(key)) if !cert.is_empty() && !key.is_empty()
        )
    }
}

/// Reconnection backoff.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
        }
    }
}

impl ReconnectionConfig {
    /// Backoff before reconnect attempt `attempt` (1-based), doubling up to the max.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let secs = self
            .initial_backoff_secs
            .saturating_mul(factor)
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }
}
