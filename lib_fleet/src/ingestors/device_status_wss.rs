//! # Device Status WSS Ingestor
//!
//! Keeps a receive-only WebSocket open to the device-status endpoint and feeds
//! the `Dispatcher`.
//!
//! Failure handling:
//! - a transport error, an abnormal close, or the socket ending without a
//!   close frame counts as a failure and schedules a reconnect after
//!   `base * min(5, 2^attempts)` ms, while fewer than `max_attempts`
//!   retries have been made;
//! - the next failure after that is terminal: the link state becomes
//!   `Exhausted` and `run` returns `ReconnectExhausted`;
//! - a clean close (code 1000, or no code) ends the loop without a reconnect;
//! - a successful open and every decoded message reset the attempt counter;
//! - undecodable payloads are dropped and leave the counter alone.
//!
//! Duplicates or out-of-order messages right after a reconnect are passed on
//! as they come.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

use crate::configs::{ReconnectPolicy, StreamConfig};
use crate::core::{Dispatcher, LinkState};
use crate::error::{FleetError, Result};
use crate::tracking::model::DeviceStatusMessage;

/// A transport-neutral view of one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushFrame {
    /// Text payload.
    Text(String),
    /// Binary payload.
    Binary(Vec<u8>),
    /// Ping/pong or any other control traffic.
    Heartbeat,
    /// Close frame. `clean` is false for any code other than normal closure.
    Close {
        /// Whether the peer closed normally.
        clean: bool,
    },
}

/// Frames of one open connection.
pub type FrameStream = BoxStream<'static, Result<PushFrame>>;

/// Opens push connections. The WebSocket implementation is `WsTransport`;
/// tests substitute scripted transports.
pub trait PushTransport: Send + Sync {
    /// Opens a connection to `url`.
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FrameStream>>;
}

/// `PushTransport` over tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl PushTransport for WsTransport {
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FrameStream>> {
        async move {
            let (ws_stream, _) = connect_async(url).await?;
            let frames = ws_stream.map(|msg| match msg {
                Ok(Message::Text(text)) => Ok(PushFrame::Text(text.as_str().to_owned())),
                Ok(Message::Binary(bin)) => Ok(PushFrame::Binary(bin.to_vec())),
                Ok(Message::Close(frame)) => Ok(PushFrame::Close {
                    clean: frame.map_or(true, |f| f.code == CloseCode::Normal),
                }),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                    Ok(PushFrame::Heartbeat)
                }
                Err(e) => Err(FleetError::from(e)),
            });
            Ok(frames.boxed())
        }
        .boxed()
    }
}

/// Attempt bookkeeping for the reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    attempts: u32,
    policy: ReconnectPolicy,
}

impl ReconnectState {
    /// Fresh state, zero attempts.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { attempts: 0, policy }
    }

    /// Retries made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A connection opened.
    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// A message decoded successfully.
    pub fn on_message(&mut self) {
        self.attempts = 0;
    }

    /// A failure happened. Returns the delay before the next attempt, or
    /// `None` once the retry budget is spent.
    pub fn on_failure(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }
}

/// How one connection ended.
enum SessionEnd {
    Cancelled,
    CleanClose,
    Failed(FleetError),
}

/// # Device Status Ingestor
///
/// Owns the reconnect loop for one push endpoint.
pub struct DeviceStatusIngestor<T: PushTransport = WsTransport> {
    url: String,
    policy: ReconnectPolicy,
    transport: T,
    dispatcher: Arc<Dispatcher>,
}

impl DeviceStatusIngestor<WsTransport> {
    /// An ingestor over WebSocket for the endpoint described by `config`.
    pub fn from_config(config: &StreamConfig, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        Ok(Self::new(
            config.endpoint()?.to_string(),
            config.reconnect_policy(),
            WsTransport,
            dispatcher,
        ))
    }
}

impl<T: PushTransport> DeviceStatusIngestor<T> {
    /// An ingestor over an arbitrary transport.
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy, transport: T, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            url: url.into(),
            policy,
            transport,
            dispatcher,
        }
    }

    /// The endpoint this ingestor connects to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Runs until the channel closes cleanly, `cancel` fires, or the retry
    /// budget is spent. Only the last case is an error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut state = ReconnectState::new(self.policy);

        loop {
            self.dispatcher.set_link_state(LinkState::Connecting);
            log::info!("Connecting to device status stream: {}", self.url);

            let opened = tokio::select! {
                _ = cancel.cancelled() => return self.closed("cancelled while connecting"),
                opened = self.transport.open(&self.url) => opened,
            };

            let failure = match opened {
                Ok(mut frames) => {
                    state.on_open();
                    self.dispatcher.set_link_state(LinkState::Connected);
                    log::info!("Device status stream connected.");
                    match self.pump(&mut frames, &mut state, &cancel).await {
                        SessionEnd::Cancelled => return self.closed("cancelled"),
                        SessionEnd::CleanClose => return self.closed("closed by server"),
                        SessionEnd::Failed(e) => e,
                    }
                }
                Err(e) => e,
            };

            match state.on_failure() {
                Some(delay) => {
                    let attempt = state.attempts();
                    log::warn!(
                        "Device status stream failed: {}. Reconnect {}/{} in {}ms",
                        failure,
                        attempt,
                        self.policy.max_attempts,
                        delay.as_millis()
                    );
                    self.dispatcher.set_link_state(LinkState::Reconnecting {
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    });
                    tokio::select! {
                        _ = cancel.cancelled() => return self.closed("cancelled while waiting to reconnect"),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    let attempts = state.attempts();
                    log::error!(
                        "Device status stream failed: {}. Max reconnection attempts ({}) reached, giving up.",
                        failure,
                        attempts
                    );
                    self.dispatcher.set_link_state(LinkState::Exhausted { attempts });
                    return Err(FleetError::ReconnectExhausted { attempts });
                }
            }
        }
    }

    async fn pump(&self, frames: &mut FrameStream, state: &mut ReconnectState, cancel: &CancellationToken) -> SessionEnd {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                next = frames.next() => next,
            };
            match next {
                Some(Ok(PushFrame::Text(text))) => self.handle_payload(text.as_bytes(), state),
                Some(Ok(PushFrame::Binary(bin))) => self.handle_payload(&bin, state),
                Some(Ok(PushFrame::Heartbeat)) => {}
                Some(Ok(PushFrame::Close { clean: true })) => return SessionEnd::CleanClose,
                Some(Ok(PushFrame::Close { clean: false })) => {
                    return SessionEnd::Failed(FleetError::Disconnected("abnormal close".to_string()))
                }
                Some(Err(e)) => return SessionEnd::Failed(e),
                None => {
                    return SessionEnd::Failed(FleetError::Disconnected(
                        "stream ended without a close frame".to_string(),
                    ))
                }
            }
        }
    }

    fn handle_payload(&self, payload: &[u8], state: &mut ReconnectState) {
        match DeviceStatusMessage::from_json_slice(payload) {
            Ok(message) => {
                state.on_message();
                log::trace!("Status for device {}", message.device_id);
                self.dispatcher.publish(message);
            }
            Err(e) => log::debug!("Dropping undecodable status payload: {}", e),
        }
    }

    fn closed(&self, why: &str) -> Result<()> {
        log::info!("Device status stream {}.", why);
        self.dispatcher.set_link_state(LinkState::Closed);
        Ok(())
    }
}
