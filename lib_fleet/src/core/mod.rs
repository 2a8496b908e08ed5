//! # Core Module
//!
//! The fan-out sitting between the push channel and its consumers.
//!
//! - **`dispatcher`**: republishes each decoded `DeviceStatusMessage` to every
//!   live subscription and tracks the push channel's `LinkState` so that late
//!   subscribers can still see whether the feed is alive.

/// Status fan-out and link state.
pub mod dispatcher;

pub use dispatcher::{clamp_capacity, Dispatcher, LinkState, StatusSubscription, MAX_FANOUT_CAPACITY};
