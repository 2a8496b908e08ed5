//! # Fleet Errors
//!
//! A single error enum shared by every folder of the crate. Variants that wrap
//! a third-party error only exist when the feature pulling that crate in is on.

use thiserror::Error;

/// Result alias used across `lib_fleet`.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Everything that can go wrong while streaming, reconciling or fetching
/// device data.
#[derive(Debug, Error)]
pub enum FleetError {
    /// The WebSocket layer failed (handshake, TLS, protocol, I/O).
    #[cfg(feature = "ingestors")]
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The push channel went away without a clean close.
    #[error("push channel disconnected: {0}")]
    Disconnected(String),

    /// Reconnecting gave up after the configured number of attempts.
    #[error("reconnect attempts exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// A payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The HTTP client failed to execute a request.
    #[cfg(feature = "retrieve")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The retry middleware gave up or failed.
    #[cfg(feature = "retrieve")]
    #[error("http middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    /// The API answered with a non-2xx status.
    #[error("api returned {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body, possibly empty.
        body: String,
    },

    /// A URL could not be parsed or joined.
    #[cfg(any(feature = "configs", feature = "retrieve"))]
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration is present but unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem access failed.
    #[error("I/O error occurred: {0}")]
    Io(#[from] std::io::Error),
}
