//! # Tracking Session
//!
//! The explicit, session-scoped context that owns all live map state: the
//! marker layer for the fleet view and, while a live report is open, the
//! trajectory segmenter for its device. Views hold a session instead of
//! keeping markers and segments in ambient fields, which also makes the
//! whole pipeline testable without a rendering surface.

use std::sync::Arc;

use tokio::sync::RwLock;

use super::markers::{MarkerChange, MarkerLayer};
use super::model::{Device, DeviceStatusMessage, LastKnownLocation};
use super::trajectory::{Absorbed, TrajectorySegmenter};
use crate::configs::StreamConfig;
use crate::core::StatusSubscription;

/// What one status message changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionUpdate {
    /// Marker effect, if the marker layer took the message.
    pub marker: Option<MarkerChange>,
    /// Trajectory effect, if a device is being tracked.
    pub trajectory: Option<Absorbed>,
}

impl SessionUpdate {
    /// True if any map state changed.
    pub fn changed(&self) -> bool {
        self.marker.is_some() || matches!(self.trajectory, Some(a) if a != Absorbed::Ignored)
    }
}

/// Live map state for one console session.
#[derive(Debug)]
pub struct TrackingSession {
    tracked_mode: String,
    markers: MarkerLayer,
    trajectory: Option<TrajectorySegmenter>,
}

impl TrackingSession {
    /// A session whose trajectories record `tracked_mode` samples.
    pub fn new(tracked_mode: impl Into<String>) -> Self {
        Self {
            tracked_mode: tracked_mode.into(),
            markers: MarkerLayer::new(),
            trajectory: None,
        }
    }

    /// A session configured from a `StreamConfig`.
    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.tracked_mode.clone())
    }

    /// The fleet marker layer.
    pub fn markers(&self) -> &MarkerLayer {
        &self.markers
    }

    /// Mutable access for direct upserts.
    pub fn markers_mut(&mut self) -> &mut MarkerLayer {
        &mut self.markers
    }

    /// Replaces the roster and places each device at its last known location,
    /// when one is given.
    pub fn seed(&mut self, devices: Vec<Device>, locations: &[(String, LastKnownLocation)]) {
        self.markers.seed_roster(devices);
        for (uid, location) in locations {
            if let Some(device) = self.markers.roster_device(uid).cloned() {
                self.markers.seed_last_known(&device, location);
            }
        }
    }

    /// Opens a live report for `device_id`, discarding any previous one.
    pub fn track(&mut self, device_id: impl Into<String>) {
        let device_id = device_id.into();
        log::info!("Tracking trajectory of device {}", device_id);
        self.trajectory = Some(TrajectorySegmenter::new(device_id, self.tracked_mode.clone()));
    }

    /// Closes the live report, if any.
    pub fn untrack(&mut self) {
        if let Some(previous) = self.trajectory.take() {
            log::info!("Stopped tracking device {}", previous.device_id());
        }
    }

    /// The open live report.
    pub fn trajectory(&self) -> Option<&TrajectorySegmenter> {
        self.trajectory.as_ref()
    }

    /// Routes one message to the marker layer and the trajectory view.
    pub fn handle(&mut self, message: &DeviceStatusMessage) -> SessionUpdate {
        SessionUpdate {
            marker: self.markers.apply_status(message),
            trajectory: self.trajectory.as_mut().map(|t| t.absorb(message)),
        }
    }
}

/// Drains `subscription` into a shared session until the subscription ends,
/// calling `on_update` after each message has been applied. Returns the
/// number of messages handled.
///
/// The write lock is held only while a single message is applied, so readers
/// always observe the state between two whole messages.
pub async fn follow<F>(
    session: Arc<RwLock<TrackingSession>>,
    mut subscription: StatusSubscription,
    mut on_update: F,
) -> usize
where
    F: FnMut(&DeviceStatusMessage, SessionUpdate),
{
    let mut handled = 0;
    while let Some(message) = subscription.recv().await {
        let update = session.write().await.handle(&message);
        on_update(message.as_ref(), update);
        handled += 1;
    }
    log::info!("Tracking session stopped after {} messages", handled);
    handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Dispatcher;
    use crate::tracking::model::{CompanyManager, PowerStatus};
    use tokio_util::sync::CancellationToken;

    fn roster() -> Vec<Device> {
        vec![Device {
            uid: "van".into(),
            name: "Van 7".into(),
            company_manager: CompanyManager { uid: None, name: "Acme".into() },
            ..Default::default()
        }]
    }

    fn pro(lat: f64, lng: f64) -> DeviceStatusMessage {
        DeviceStatusMessage::new("van", PowerStatus::On).with_position(lat, lng, "Professional")
    }

    #[test]
    fn message_reaches_markers_and_trajectory() {
        let mut session = TrackingSession::new("Professional");
        session.seed(roster(), &[]);
        session.track("van");

        let first = session.handle(&pro(1.0, 1.0));
        assert_eq!(first.marker, Some(MarkerChange::Created));
        assert_eq!(first.trajectory, Some(Absorbed::Appended));

        let second = session.handle(&pro(1.1, 1.0));
        assert_eq!(second.marker, Some(MarkerChange::Updated));
        assert_eq!(session.trajectory().unwrap().rendered().len(), 1);
        assert_eq!(session.markers().len(), 1);
    }

    #[test]
    fn tracking_again_starts_a_fresh_trajectory() {
        let mut session = TrackingSession::new("Professional");
        session.track("van");
        session.handle(&pro(1.0, 1.0));
        session.handle(&pro(1.1, 1.0));
        session.track("van");
        assert!(session.trajectory().unwrap().current().is_empty());

        session.untrack();
        assert!(session.handle(&pro(1.2, 1.0)).trajectory.is_none());
    }

    #[test]
    fn seeding_places_rostered_devices_only() {
        let mut session = TrackingSession::new("Professional");
        let fix = LastKnownLocation { lat: 1.0, lng: 2.0, city: "Nice".into(), name: None, status: PowerStatus::Off };
        session.seed(roster(), &[("van".into(), fix.clone()), ("ghost".into(), fix)]);
        assert_eq!(session.markers().len(), 1);
        assert_eq!(session.markers().get("van").unwrap().address, "Nice");
    }

    #[tokio::test]
    async fn follow_applies_until_cancelled() {
        let dispatcher = Dispatcher::new(16);
        let session = Arc::new(RwLock::new(TrackingSession::new("Professional")));
        session.write().await.seed(roster(), &[]);

        let cancel = CancellationToken::new();
        let subscription = dispatcher.subscribe(cancel.clone());
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        let task = tokio::spawn(follow(session.clone(), subscription, move |msg, update| {
            let _ = seen_tx.send((msg.device_id.clone(), update));
        }));

        dispatcher.publish(pro(1.0, 1.0));
        let (id, update) = seen_rx.recv().await.unwrap();
        assert_eq!(id, "van");
        assert!(update.changed());

        cancel.cancel();
        assert_eq!(task.await.unwrap(), 1);
        assert_eq!(session.read().await.markers().len(), 1);
    }
}
