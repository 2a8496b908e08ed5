//! # Tracking Module
//!
//! Turns the device-status feed into map state.
//!
//! - **`model`**: wire types for status messages and the REST roster.
//! - **`projection`**: WGS84 <-> Web-Mercator conversion for map geometry.
//! - **`markers`**: one marker per device, updated in place.
//! - **`trajectory`**: live polyline segments for the tracked device.
//! - **`session`**: the session-scoped context owning all of the above.

/// Status messages, roster devices and last known locations.
pub mod model;
/// EPSG:4326 <-> EPSG:3857 conversion.
pub mod projection;
/// Marker reconciliation.
pub mod markers;
/// Trajectory segmentation.
pub mod trajectory;
/// Session-scoped tracking context.
pub mod session;

pub use markers::{MarkerChange, MarkerEntry, MarkerLayer, MarkerPopup, MarkerStyle, MarkerUpdate};
pub use model::{CompanyManager, Device, DeviceStatusMessage, LastKnownLocation, Position, PowerStatus};
pub use session::{SessionUpdate, TrackingSession};
pub use trajectory::{Absorbed, SegmentState, TrajectoryLine, TrajectorySegmenter};
