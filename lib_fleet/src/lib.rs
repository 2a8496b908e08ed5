//! # lib_fleet
//!
//! Live device-position plumbing for the fleet console: a reconnecting push
//! channel for device status messages, a fan-out so several views can consume
//! the same feed, and the session-scoped state that turns the feed into map
//! markers and trajectory polylines.
//!
//! Each top-level folder is gated behind a cargo feature of the same name;
//! `full` (the default) enables all of them.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Crate-wide error type.
pub mod error;

/// Stream configuration and reconnect policy.
#[cfg(feature = "configs")]
pub mod configs;

/// The status fan-out.
#[cfg(feature = "tracking")]
pub mod core;

/// Push-channel ingestors.
#[cfg(feature = "ingestors")]
pub mod ingestors;

/// Markers, trajectories and the tracking session.
#[cfg(feature = "tracking")]
pub mod tracking;

/// REST collaborators.
#[cfg(feature = "retrieve")]
pub mod retrieve;

pub use error::{FleetError, Result};
