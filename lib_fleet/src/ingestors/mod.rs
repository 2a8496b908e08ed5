//! # Ingestors Module
//!
//! Clients that bring external data into the crate.
//!
//! - **`device_status_wss`**: the reconnecting WebSocket push channel for
//!   `ws/device-status/`. It decodes each frame into a `DeviceStatusMessage`
//!   and publishes it through the `Dispatcher`.

/// Reconnecting push channel for device status messages.
pub mod device_status_wss;

pub use device_status_wss::{
    DeviceStatusIngestor, FrameStream, PushFrame, PushTransport, ReconnectState, WsTransport,
};
