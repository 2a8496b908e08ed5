use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{FleetError, Result};

/// Path of the device-status push endpoint, relative to the socket base URL.
pub const DEVICE_STATUS_PATH: &str = "ws/device-status/";

/// Upper bound on the backoff multiplier applied to the base delay.
const MAX_BACKOFF_FACTOR: u64 = 5;

/// # Reconnect Policy
///
/// Bounds the push channel's reconnect loop. A failure schedules another
/// attempt only while fewer than `max_attempts` retries have been made since
/// the last successful open or message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// Retries allowed after consecutive failures.
    pub max_attempts: u32,
    /// Base delay in milliseconds; scaled by `min(5, 2^attempts)`.
    pub base_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 5000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry scheduled when `attempts` retries have already
    /// been made.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempts).min(MAX_BACKOFF_FACTOR);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// # Stream Configuration
///
/// Everything the push channel and the tracking session need to know. All
/// fields have defaults, so a JSON file only has to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamConfig {
    /// Base URL of the socket server, e.g. `ws://localhost:8000`.
    /// `http`/`https` bases are accepted and rewritten to `ws`/`wss`.
    pub ws_base_url: String,
    /// Retries allowed after consecutive failures.
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay in milliseconds.
    pub reconnect_base_delay_ms: u64,
    /// Device mode whose samples form trajectory segments.
    pub tracked_mode: String,
    /// Per-subscriber buffer of the fan-out.
    pub fanout_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_base_url: "ws://localhost:8000".to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 5000,
            tracked_mode: "Professional".to_string(),
            fanout_capacity: 1000,
        }
    }
}

impl StreamConfig {
    /// Reads a JSON config file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// The reconnect policy described by this config.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay_ms: self.reconnect_base_delay_ms,
        }
    }

    /// Full URL of the device-status endpoint.
    pub fn endpoint(&self) -> Result<Url> {
        let mut base = Url::parse(&self.ws_base_url)?;
        let scheme = match base.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => {
                return Err(FleetError::Config(format!(
                    "unsupported socket scheme '{other}'"
                )))
            }
        };
        if base.scheme() != scheme && base.set_scheme(scheme).is_err() {
            return Err(FleetError::Config(format!(
                "cannot rewrite '{}' to {scheme}",
                self.ws_base_url
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(DEVICE_STATUS_PATH)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn backoff_doubles_then_caps_at_five_times_base() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (0..6).map(|a| policy.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![5000, 10000, 20000, 25000, 25000, 25000]);
    }

    #[test]
    fn endpoint_rewrites_http_bases() {
        let mut cfg = StreamConfig::default();
        cfg.ws_base_url = "http://localhost:8000".into();
        assert_eq!(
            cfg.endpoint().unwrap().as_str(),
            "ws://localhost:8000/ws/device-status/"
        );

        cfg.ws_base_url = "https://fleet.example.com/backend".into();
        assert_eq!(
            cfg.endpoint().unwrap().as_str(),
            "wss://fleet.example.com/backend/ws/device-status/"
        );
    }

    #[test]
    fn endpoint_rejects_other_schemes() {
        let mut cfg = StreamConfig::default();
        cfg.ws_base_url = "ftp://localhost".into();
        assert!(matches!(cfg.endpoint(), Err(FleetError::Config(_))));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"maxReconnectAttempts": 2, "trackedMode": "Private"}}"#).unwrap();

        let cfg = StreamConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.max_reconnect_attempts, 2);
        assert_eq!(cfg.tracked_mode, "Private");
        assert_eq!(cfg.reconnect_base_delay_ms, 5000);
        assert_eq!(cfg.fanout_capacity, 1000);
    }
}
