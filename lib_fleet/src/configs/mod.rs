//! # Configuration Modules
//!
//! Settings for the live device-status stream: where the push endpoint lives,
//! how hard to try reconnecting, and which device mode the trajectory view
//! records.

/// Stream endpoint, reconnect policy and trajectory settings.
pub mod config_stream;

pub use config_stream::{ReconnectPolicy, StreamConfig, DEVICE_STATUS_PATH};
