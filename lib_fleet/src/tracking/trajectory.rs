//! # Trajectory Segmentation
//!
//! Builds the live trajectory of one tracked device out of its status
//! messages. Consecutive samples taken in the tracked mode extend the
//! in-progress segment; a sample in any other mode closes it. A closed
//! segment is kept only if it has more than one point.
//!
//! ```text
//! NoSegment --tracked--> InSegment      (point appended)
//! InSegment --tracked--> InSegment      (point appended)
//! InSegment --other----> NoSegment      (finalised if len > 1, else dropped)
//! NoSegment --other----> NoSegment
//! ```
//!
//! After every absorbed sample the rendered lines are rebuilt from scratch:
//! one line per finalised segment plus the in-progress segment once it has
//! two points.

use serde_json::{json, Value};

use super::model::DeviceStatusMessage;
use super::projection::from_lon_lat;

/// A sequence of `[lng, lat]` samples.
pub type Segment = Vec<[f64; 2]>;

/// Where the segmenter is in its two-state cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// No samples are being accumulated.
    NoSegment,
    /// The in-progress segment has at least one sample.
    InSegment,
}

/// Effect of one `absorb` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absorbed {
    /// Another device, or no position: nothing changed.
    Ignored,
    /// The sample extended the in-progress segment.
    Appended,
    /// The in-progress segment was closed and kept.
    Finalized,
    /// The in-progress segment was closed and dropped (one point or none).
    Discarded,
}

/// A rendered polyline in projected EPSG:3857 coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryLine {
    /// Projected points, in sample order.
    pub coordinates: Vec<[f64; 2]>,
}

impl TrajectoryLine {
    fn from_segment(segment: &[[f64; 2]]) -> Self {
        Self {
            coordinates: segment.iter().copied().map(from_lon_lat).collect(),
        }
    }
}

/// # Trajectory Segmenter
///
/// Per-view state for the one device a live report is following.
#[derive(Debug, Clone)]
pub struct TrajectorySegmenter {
    device_id: String,
    tracked_mode: String,
    finalized: Vec<Segment>,
    current: Segment,
    last_position: Option<[f64; 2]>,
    rendered: Vec<TrajectoryLine>,
}

impl TrajectorySegmenter {
    /// Follows `device_id`, recording samples reported in `tracked_mode`.
    pub fn new(device_id: impl Into<String>, tracked_mode: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            tracked_mode: tracked_mode.into(),
            finalized: Vec::new(),
            current: Vec::new(),
            last_position: None,
            rendered: Vec::new(),
        }
    }

    /// The tracked device.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Feeds one status message through the state machine and re-renders.
    pub fn absorb(&mut self, message: &DeviceStatusMessage) -> Absorbed {
        if message.device_id != self.device_id {
            return Absorbed::Ignored;
        }
        let Some(position) = message.position.as_ref() else {
            return Absorbed::Ignored;
        };

        let sample = [position.lng, position.lat];
        self.last_position = Some(sample);

        let outcome = if position.device_mode == self.tracked_mode {
            self.current.push(sample);
            Absorbed::Appended
        } else if self.current.len() > 1 {
            self.finalized.push(std::mem::take(&mut self.current));
            log::debug!(
                "Trajectory segment {} finalised for device {}",
                self.finalized.len(),
                self.device_id
            );
            Absorbed::Finalized
        } else {
            self.current.clear();
            Absorbed::Discarded
        };

        self.render();
        outcome
    }

    fn render(&mut self) {
        self.rendered.clear();
        self.rendered
            .extend(self.finalized.iter().map(|s| TrajectoryLine::from_segment(s)));
        if self.current.len() > 1 {
            self.rendered.push(TrajectoryLine::from_segment(&self.current));
        }
    }

    /// Current state of the cycle.
    pub fn state(&self) -> SegmentState {
        if self.current.is_empty() {
            SegmentState::NoSegment
        } else {
            SegmentState::InSegment
        }
    }

    /// Closed segments, oldest first.
    pub fn finalized(&self) -> &[Segment] {
        &self.finalized
    }

    /// The segment still being extended.
    pub fn current(&self) -> &[[f64; 2]] {
        &self.current
    }

    /// Latest `[lng, lat]` of the tracked device, whatever its mode. This is
    /// where the view draws its single end-of-trajectory marker.
    pub fn last_position(&self) -> Option<[f64; 2]> {
        self.last_position
    }

    /// Lines produced by the last render pass.
    pub fn rendered(&self) -> &[TrajectoryLine] {
        &self.rendered
    }

    /// Rendered lines plus the end marker as a GeoJSON `FeatureCollection`.
    pub fn to_geojson(&self) -> Value {
        let mut features: Vec<Value> = self
            .rendered
            .iter()
            .enumerate()
            .map(|(index, line)| {
                json!({
                    "type": "Feature",
                    "geometry": { "type": "LineString", "coordinates": line.coordinates },
                    "properties": { "deviceId": self.device_id, "segment": index },
                })
            })
            .collect();
        if let Some(end) = self.last_position {
            features.push(json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": from_lon_lat(end) },
                "properties": { "deviceId": self.device_id, "marker": "end", "position": end },
            }));
        }
        json!({ "type": "FeatureCollection", "features": features })
    }
}
