//! # Status Dispatcher
//!
//! Wraps a `tokio::sync::broadcast` channel. Every subscriber receives every
//! message published after it subscribed; nothing is replayed to late
//! subscribers. Messages are shared as `Arc`s, so a fan-out to N views costs
//! N pointer copies rather than N clones of the payload.
//!
//! Alongside the data channel the dispatcher owns a `watch` of the push
//! channel's `LinkState`. The watch always holds the latest state, which is
//! how a subscriber that arrives after the channel gave up learns about it.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::tracking::model::DeviceStatusMessage;

/// Largest per-subscriber buffer a dispatcher will allocate. Larger requests
/// are clamped to it.
pub const MAX_FANOUT_CAPACITY: usize = 1 << 16;

/// Connection state of the upstream push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LinkState {
    /// Opening a connection.
    Connecting,
    /// Connection is open and delivering.
    Connected,
    /// Waiting before the next attempt.
    Reconnecting {
        /// Retry number being waited for (1-based).
        attempt: u32,
        /// Scheduled delay in milliseconds.
        delay_ms: u64,
    },
    /// Closed cleanly or cancelled; no reconnect will follow.
    Closed,
    /// Gave up after too many consecutive failures.
    Exhausted {
        /// Retries made before giving up.
        attempts: u32,
    },
}

impl LinkState {
    /// True once the channel will never deliver again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Closed | LinkState::Exhausted { .. })
    }
}

/// Multicasts device status messages to any number of subscribers.
pub struct Dispatcher {
    data_tx: broadcast::Sender<Arc<DeviceStatusMessage>>,
    link_tx: watch::Sender<LinkState>,
}

impl Dispatcher {
    /// Creates a dispatcher buffering at most `capacity` messages per
    /// subscriber. A subscriber that falls further behind skips ahead.
    pub fn new(capacity: usize) -> Self {
        let capacity = clamp_capacity(capacity);
        let (data_tx, _) = broadcast::channel(capacity);
        let (link_tx, _) = watch::channel(LinkState::Connecting);
        Self { data_tx, link_tx }
    }

    /// Publishes a message to every current subscriber and returns how many
    /// received it. Zero subscribers is not an error.
    pub fn publish(&self, message: DeviceStatusMessage) -> usize {
        self.data_tx.send(Arc::new(message)).unwrap_or(0)
    }

    /// Opens a subscription that ends when `cancel` fires or the dispatcher
    /// is dropped.
    pub fn subscribe(&self, cancel: CancellationToken) -> StatusSubscription {
        StatusSubscription {
            rx: self.data_tx.subscribe(),
            cancel,
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.data_tx.receiver_count()
    }

    /// Records a new link state.
    pub fn set_link_state(&self, state: LinkState) {
        let previous = self.link_tx.send_replace(state);
        if previous != state {
            log::debug!("Link state {:?} -> {:?}", previous, state);
        }
    }

    /// The most recent link state.
    pub fn link_state(&self) -> LinkState {
        *self.link_tx.borrow()
    }

    /// A receiver that is notified on every link state change.
    pub fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.link_tx.subscribe()
    }
}

/// Bounds a requested fan-out buffer to `1..=MAX_FANOUT_CAPACITY`.
pub fn clamp_capacity(requested: usize) -> usize {
    let capacity = requested.clamp(1, MAX_FANOUT_CAPACITY);
    if capacity != requested {
        log::warn!("Fan-out capacity {} out of range, using {}", requested, capacity);
    }
    capacity
}

/// One consumer's view of the fan-out.
///
/// Dropping the subscription (or cancelling its token) unsubscribes. A
/// cancelled subscription never yields another message, even one that was
/// already buffered.
pub struct StatusSubscription {
    rx: broadcast::Receiver<Arc<DeviceStatusMessage>>,
    cancel: CancellationToken,
}

impl StatusSubscription {
    /// Waits for the next message. `None` means the subscription is over.
    pub async fn recv(&mut self) -> Option<Arc<DeviceStatusMessage>> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                received = self.rx.recv() => match received {
                    Ok(message) => {
                        if self.cancel.is_cancelled() {
                            return None;
                        }
                        return Some(message);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Status subscriber lagged, skipped {} messages", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }

    /// Cancels this subscription.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    /// The token that ends this subscription.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::model::PowerStatus;

    fn status(id: &str) -> DeviceStatusMessage {
        DeviceStatusMessage::new(id, PowerStatus::On)
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_message() {
        let dispatcher = Dispatcher::new(16);
        let mut map_view = dispatcher.subscribe(CancellationToken::new());
        let mut report_view = dispatcher.subscribe(CancellationToken::new());

        assert_eq!(dispatcher.publish(status("a")), 2);
        assert_eq!(dispatcher.publish(status("b")), 2);

        for sub in [&mut map_view, &mut report_view] {
            assert_eq!(sub.recv().await.unwrap().device_id, "a");
            assert_eq!(sub.recv().await.unwrap().device_id, "b");
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_history() {
        let dispatcher = Dispatcher::new(16);
        let _early = dispatcher.subscribe(CancellationToken::new());
        dispatcher.publish(status("old"));

        let mut late = dispatcher.subscribe(CancellationToken::new());
        dispatcher.publish(status("new"));
        assert_eq!(late.recv().await.unwrap().device_id, "new");
    }

    #[tokio::test]
    async fn unsubscribed_handler_never_sees_pending_message() {
        let dispatcher = Dispatcher::new(16);
        let mut sub = dispatcher.subscribe(CancellationToken::new());

        sub.unsubscribe();
        dispatcher.publish(status("a"));

        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let dispatcher = Dispatcher::new(4);
        assert_eq!(dispatcher.publish(status("a")), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() {
        let dispatcher = Dispatcher::new(2);
        let mut slow = dispatcher.subscribe(CancellationToken::new());
        for id in ["1", "2", "3", "4"] {
            dispatcher.publish(status(id));
        }
        assert_eq!(slow.recv().await.unwrap().device_id, "3");
        assert_eq!(slow.recv().await.unwrap().device_id, "4");
    }

    #[tokio::test]
    async fn oversized_capacity_is_clamped() {
        assert_eq!(clamp_capacity(0), 1);
        assert_eq!(clamp_capacity(usize::MAX), MAX_FANOUT_CAPACITY);

        let dispatcher = Dispatcher::new(usize::MAX);
        let mut sub = dispatcher.subscribe(CancellationToken::new());
        assert_eq!(dispatcher.publish(status("a")), 1);
        assert_eq!(sub.recv().await.unwrap().device_id, "a");
    }

    #[test]
    fn late_watchers_see_terminal_state() {
        let dispatcher = Dispatcher::new(4);
        dispatcher.set_link_state(LinkState::Exhausted { attempts: 5 });

        let watcher = dispatcher.watch_link();
        assert_eq!(*watcher.borrow(), LinkState::Exhausted { attempts: 5 });
        assert!(dispatcher.link_state().is_terminal());
    }
}
