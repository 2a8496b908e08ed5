use crate::live_logic::model::LiveEvent;
use lib_fleet::core::{clamp_capacity, Dispatcher};
use lib_fleet::tracking::TrackingSession;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

#[derive(Clone)]
pub struct AppState {
    // Fan-out of decoded status messages and the push channel state
    pub dispatcher: Arc<Dispatcher>,
    // Reconciled map state shared by every map client
    pub session: Arc<RwLock<TrackingSession>>,
    // One event per status message applied to the session
    pub events_tx: broadcast::Sender<Arc<LiveEvent>>,
}

impl AppState {
    pub fn new(session: TrackingSession, fanout_capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel(clamp_capacity(fanout_capacity));
        Self {
            dispatcher: Arc::new(Dispatcher::new(fanout_capacity)),
            session: Arc::new(RwLock::new(session)),
            events_tx,
        }
    }

    pub fn notify(&self, event: LiveEvent) {
        // No map clients connected is not an error
        let _ = self.events_tx.send(Arc::new(event));
    }

    pub async fn track(&self, device_id: String) {
        self.session.write().await.track(device_id);
    }

    pub async fn untrack(&self) {
        self.session.write().await.untrack();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_fanout_capacity_does_not_panic() {
        let state = AppState::new(TrackingSession::new("Professional"), usize::MAX);
        let mut events = state.events_tx.subscribe();
        state.notify(LiveEvent { device_id: "van".into(), marker: None, trajectory: None });
        assert_eq!(events.try_recv().unwrap().device_id, "van");
    }
}
