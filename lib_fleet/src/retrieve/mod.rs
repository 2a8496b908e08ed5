//! # Data Retrieval Module
//!
//! REST collaborators of the live console.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: a generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, with automatic retries and exponential backoff.
//! - **`devices_api`**: the device endpoints used to seed the roster and the
//!   initial markers.

/// Generic HTTP API client with retry middleware.
pub mod ky_http;

/// Device roster and last-known-position endpoints.
pub mod devices_api;

pub use devices_api::DeviceApi;
pub use ky_http::{ApiClient, ApiResponse};
