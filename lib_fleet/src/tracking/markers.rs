//! # Marker Reconciliation
//!
//! Keeps at most one marker per device id. A device's first sighting creates
//! its marker; every later sighting moves and re-tags that same marker and
//! recomputes its colour. Markers are never removed for the lifetime of the
//! layer.
//!
//! The layer also holds the device roster fetched over REST. The roster
//! supplies display names and decides which devices of the shared push feed
//! belong on this user's map.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::{json, Value};

use super::model::{Device, DeviceStatusMessage, LastKnownLocation, PowerStatus};
use super::projection::from_lon_lat;

/// Outer/inner fill colours of a marker pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerStyle {
    /// Pin body colour.
    pub outer: &'static str,
    /// Centre dot colour.
    pub inner: &'static str,
}

impl MarkerStyle {
    /// Style of a reporting device.
    pub const ONLINE: MarkerStyle = MarkerStyle { outer: "#00FF00", inner: "#00CC00" };
    /// Style of a silent device.
    pub const OFFLINE: MarkerStyle = MarkerStyle { outer: "#FF0000", inner: "#CC0000" };

    /// `On` is online, everything else is offline.
    pub fn for_status(status: PowerStatus) -> Self {
        if status.is_on() {
            Self::ONLINE
        } else {
            Self::OFFLINE
        }
    }

    /// The 36x36 pin icon in this style's colours, anchored at bottom centre.
    pub fn svg_icon(&self) -> String {
        format!(
            concat!(
                r#"<svg width="36px" height="36px" viewBox="0 0 36.00 36.00" version="1.1" xmlns="http://www.w3.org/2000/svg">"#,
                r#"<g stroke-width="0.36" fill="none" fill-rule="evenodd"><g transform="translate(-3.000000, 0.000000)">"#,
                r#"<path d="M14,0 C21.732,0 28,5.641 28,12.6 C28,23.963 14,36 14,36 C14,36 0,24.064 0,12.6 C0,5.641 6.268,0 14,0 Z" fill="{outer}"></path>"#,
                r#"<circle cx="14" cy="14" r="7" fill="{inner}" fill-rule="nonzero"></circle>"#,
                r#"</g></g></svg>"#
            ),
            outer = self.outer,
            inner = self.inner
        )
    }
}

/// Arguments of one marker upsert. Unset tags fall back to their defaults
/// (speed `"0"`, empty strings, status `Off`) on every upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerUpdate {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Display name; only used when the marker is created.
    pub name: Option<String>,
    /// Speed in km/h.
    pub speed: Option<String>,
    /// Owning company.
    pub company_name: Option<String>,
    /// Power status driving the colour.
    pub status: Option<PowerStatus>,
    /// Vehicle name.
    pub car_name: Option<String>,
    /// Address line.
    pub address: Option<String>,
}

impl MarkerUpdate {
    /// An update carrying only coordinates.
    pub fn at(lat: f64, lng: f64) -> Self {
        Self { lat, lng, ..Default::default() }
    }
}

/// Whether an upsert created a marker or touched an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerChange {
    /// First sighting of the device.
    Created,
    /// Existing marker moved and re-tagged.
    Updated,
}

/// A device's marker: geometry plus the tags shown in its popup.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerEntry {
    /// Device identifier.
    pub device_id: String,
    /// Name fixed at creation.
    pub device_name: String,
    /// Projected EPSG:3857 point.
    pub coordinates: [f64; 2],
    /// `[lng, lat]` in degrees.
    pub lon_lat: [f64; 2],
    /// Current colours.
    pub style: MarkerStyle,
    /// Current power status.
    pub status: PowerStatus,
    /// Speed in km/h.
    pub speed: String,
    /// Owning company.
    pub company_name: String,
    /// Vehicle name.
    pub car_name: String,
    /// Address line.
    pub address: String,
}

impl MarkerEntry {
    fn apply(&mut self, update: MarkerUpdate) {
        let lon_lat = [update.lng, update.lat];
        let status = update.status.unwrap_or_default();
        self.coordinates = from_lon_lat(lon_lat);
        self.lon_lat = lon_lat;
        self.status = status;
        self.style = MarkerStyle::for_status(status);
        self.speed = update.speed.unwrap_or_else(|| "0".to_string());
        self.company_name = update.company_name.unwrap_or_default();
        self.car_name = update.car_name.unwrap_or_default();
        self.address = update.address.unwrap_or_default();
    }

    /// Popup contents for this marker.
    pub fn popup(&self) -> MarkerPopup {
        MarkerPopup {
            company_name: self.company_name.clone(),
            device_name: self.device_name.clone(),
            car_name: self.car_name.clone(),
            speed: self.speed.clone(),
            address: self.address.clone(),
            position: self.lon_lat,
        }
    }

    /// GeoJSON `Feature` with a projected `Point` geometry.
    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "Feature",
            "id": self.device_id,
            "geometry": { "type": "Point", "coordinates": self.coordinates },
            "properties": {
                "deviceId": self.device_id,
                "deviceName": self.device_name,
                "status": self.status,
                "outerColor": self.style.outer,
                "innerColor": self.style.inner,
                "speed": self.speed,
                "companyName": self.company_name,
                "carName": self.car_name,
                "address": self.address,
                "position": self.lon_lat,
            }
        })
    }
}

/// What the map shows when a marker is selected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerPopup {
    /// Owning company.
    pub company_name: String,
    /// Device name.
    pub device_name: String,
    /// Vehicle name.
    pub car_name: String,
    /// Speed in km/h.
    pub speed: String,
    /// Address line.
    pub address: String,
    /// `[lng, lat]` in degrees.
    pub position: [f64; 2],
}

impl fmt::Display for MarkerPopup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Company: {}", self.company_name)?;
        writeln!(f, "Device: {}", self.device_name)?;
        writeln!(f, "Vehicle: {}", self.car_name)?;
        writeln!(f, "Speed: {} km/h", self.speed)?;
        writeln!(f, "Address: {}", self.address)?;
        write!(f, "Position: {:.2}, {:.2}", self.position[0], self.position[1])
    }
}

/// # Marker Layer
///
/// Device id -> marker, plus the roster that filters and names them.
#[derive(Debug, Default)]
pub struct MarkerLayer {
    markers: HashMap<String, MarkerEntry>,
    roster: HashMap<String, Device>,
}

impl MarkerLayer {
    /// An empty layer with no roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the roster. Existing markers are kept.
    pub fn seed_roster(&mut self, devices: Vec<Device>) {
        self.roster.clear();
        for device in devices.into_iter().filter(|d| !d.uid.is_empty()) {
            self.roster.insert(device.uid.clone(), device);
        }
        log::info!("Roster seeded with {} devices", self.roster.len());
    }

    /// A roster entry by id.
    pub fn roster_device(&self, device_id: &str) -> Option<&Device> {
        self.roster.get(device_id)
    }

    /// Number of roster entries.
    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }

    /// Places a device at its last known location before any push arrives.
    pub fn seed_last_known(&mut self, device: &Device, location: &LastKnownLocation) -> MarkerChange {
        self.upsert_marker(
            &device.uid,
            MarkerUpdate {
                lat: location.lat,
                lng: location.lng,
                name: location.name.clone(),
                speed: Some("0".to_string()),
                company_name: Some(device.company_manager.name.clone()),
                status: Some(location.status),
                car_name: Some(device.car_name.clone()),
                address: Some(location.city.clone()),
            },
        )
    }

    /// Reconciles one status message. Messages without a position, or for a
    /// device outside the roster, leave the layer untouched.
    pub fn apply_status(&mut self, message: &DeviceStatusMessage) -> Option<MarkerChange> {
        let position = message.position.as_ref()?;
        let device = self.roster.get(&message.device_id)?;
        let update = MarkerUpdate {
            lat: position.lat,
            lng: position.lng,
            name: Some(device.name.clone()),
            speed: message.speed.clone(),
            company_name: message.company_name.clone(),
            status: Some(position.status),
            car_name: message.car_name.clone(),
            address: message.address.clone(),
        };
        Some(self.upsert_marker(&message.device_id, update))
    }

    /// Creates the device's marker or updates it in place.
    pub fn upsert_marker(&mut self, device_id: &str, update: MarkerUpdate) -> MarkerChange {
        if let Some(marker) = self.markers.get_mut(device_id) {
            marker.apply(update);
            return MarkerChange::Updated;
        }

        let device_name = update
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.roster.get(device_id).map(|d| d.name.clone()))
            .unwrap_or_default();
        let mut marker = MarkerEntry {
            device_id: device_id.to_string(),
            device_name,
            coordinates: [0.0, 0.0],
            lon_lat: [0.0, 0.0],
            style: MarkerStyle::OFFLINE,
            status: PowerStatus::Off,
            speed: String::new(),
            company_name: String::new(),
            car_name: String::new(),
            address: String::new(),
        };
        marker.apply(update);
        log::debug!("Marker created for device {}", device_id);
        self.markers.insert(device_id.to_string(), marker);
        MarkerChange::Created
    }

    /// A marker by device id.
    pub fn get(&self, device_id: &str) -> Option<&MarkerEntry> {
        self.markers.get(device_id)
    }

    /// Popup contents for a marker.
    pub fn popup(&self, device_id: &str) -> Option<MarkerPopup> {
        self.markers.get(device_id).map(MarkerEntry::popup)
    }

    /// Number of markers.
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// True when no device has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// All markers, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &MarkerEntry> {
        self.markers.values()
    }

    /// The whole layer as a GeoJSON `FeatureCollection`, ordered by device id.
    pub fn to_geojson(&self) -> Value {
        let mut markers: Vec<&MarkerEntry> = self.markers.values().collect();
        markers.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        json!({
            "type": "FeatureCollection",
            "features": markers.iter().map(|m| m.to_geojson()).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::model::CompanyManager;

    fn device(uid: &str, name: &str) -> Device {
        Device {
            uid: uid.to_string(),
            name: name.to_string(),
            car_name: "Clio".to_string(),
            company_manager: CompanyManager { uid: None, name: "Acme".to_string() },
            ..Default::default()
        }
    }

    fn status(id: &str, on: bool, lat: f64, lng: f64) -> DeviceStatusMessage {
        let power = if on { PowerStatus::On } else { PowerStatus::Off };
        DeviceStatusMessage::new(id, power).with_position(lat, lng, "Professional")
    }

    #[test]
    fn repeated_upserts_keep_one_marker_per_device() {
        let mut layer = MarkerLayer::new();
        assert_eq!(layer.upsert_marker("d1", MarkerUpdate::at(1.0, 1.0)), MarkerChange::Created);
        for i in 0..20 {
            assert_eq!(
                layer.upsert_marker("d1", MarkerUpdate::at(1.0 + i as f64, 2.0)),
                MarkerChange::Updated
            );
        }
        assert_eq!(layer.len(), 1);
        assert_eq!(layer.get("d1").unwrap().lon_lat, [2.0, 20.0]);
    }

    #[test]
    fn colour_follows_status_on_every_update() {
        let mut layer = MarkerLayer::new();
        let on = MarkerUpdate { status: Some(PowerStatus::On), ..MarkerUpdate::at(0.0, 0.0) };
        let off = MarkerUpdate { status: Some(PowerStatus::Off), ..MarkerUpdate::at(0.0, 0.0) };

        layer.upsert_marker("d", on.clone());
        assert_eq!(layer.get("d").unwrap().style, MarkerStyle::ONLINE);
        layer.upsert_marker("d", off);
        assert_eq!(layer.get("d").unwrap().style, MarkerStyle::OFFLINE);
        layer.upsert_marker("d", on);
        assert_eq!(layer.get("d").unwrap().style, MarkerStyle::ONLINE);
        layer.upsert_marker("d", MarkerUpdate::at(0.0, 0.0));
        assert_eq!(layer.get("d").unwrap().style, MarkerStyle::OFFLINE);
    }

    #[test]
    fn missing_tags_fall_back_to_defaults() {
        let mut layer = MarkerLayer::new();
        layer.upsert_marker(
            "d",
            MarkerUpdate { speed: Some("80".into()), address: Some("A1".into()), ..MarkerUpdate::at(1.0, 1.0) },
        );
        layer.upsert_marker("d", MarkerUpdate::at(1.0, 1.0));
        let marker = layer.get("d").unwrap();
        assert_eq!(marker.speed, "0");
        assert_eq!(marker.address, "");
    }

    #[test]
    fn name_is_fixed_at_creation() {
        let mut layer = MarkerLayer::new();
        layer.seed_roster(vec![device("d", "Roster name")]);
        layer.upsert_marker("d", MarkerUpdate::at(0.0, 0.0));
        layer.upsert_marker("d", MarkerUpdate { name: Some("Other".into()), ..MarkerUpdate::at(0.0, 0.0) });
        assert_eq!(layer.get("d").unwrap().device_name, "Roster name");
    }

    #[test]
    fn status_messages_need_position_and_roster_membership() {
        let mut layer = MarkerLayer::new();
        layer.seed_roster(vec![device("mine", "Van")]);

        assert_eq!(layer.apply_status(&DeviceStatusMessage::new("mine", PowerStatus::On)), None);
        assert_eq!(layer.apply_status(&status("theirs", true, 1.0, 1.0)), None);
        assert_eq!(layer.apply_status(&status("mine", true, 1.0, 1.0)), Some(MarkerChange::Created));
        assert_eq!(layer.apply_status(&status("mine", false, 1.5, 1.0)), Some(MarkerChange::Updated));

        let marker = layer.get("mine").unwrap();
        assert_eq!(marker.device_name, "Van");
        assert_eq!(marker.style, MarkerStyle::OFFLINE);
        assert_eq!(layer.len(), 1);
    }

    #[test]
    fn last_known_location_seeds_marker() {
        let mut layer = MarkerLayer::new();
        let van = device("d", "Van");
        layer.seed_roster(vec![van.clone()]);
        let loc = LastKnownLocation {
            lat: 45.76,
            lng: 4.83,
            city: "Lyon".into(),
            name: None,
            status: PowerStatus::On,
        };
        assert_eq!(layer.seed_last_known(&van, &loc), MarkerChange::Created);

        let popup = layer.popup("d").unwrap();
        assert_eq!(popup.company_name, "Acme");
        assert_eq!(popup.device_name, "Van");
        assert_eq!(popup.speed, "0");
        assert_eq!(popup.address, "Lyon");
        assert!(popup.to_string().ends_with("Position: 4.83, 45.76"));
    }

    #[test]
    fn geojson_is_sorted_and_tagged() {
        let mut layer = MarkerLayer::new();
        layer.upsert_marker("b", MarkerUpdate::at(0.0, 0.0));
        layer.upsert_marker("a", MarkerUpdate { status: Some(PowerStatus::On), ..MarkerUpdate::at(0.0, 0.0) });

        let collection = layer.to_geojson();
        let features = collection["features"].as_array().unwrap();
        assert_eq!(features[0]["id"], "a");
        assert_eq!(features[0]["properties"]["outerColor"], "#00FF00");
        assert_eq!(features[1]["properties"]["status"], "Off");
    }

    #[test]
    fn svg_icon_uses_style_colours() {
        let icon = MarkerStyle::ONLINE.svg_icon();
        assert!(icon.contains(r##"fill="#00FF00""##));
        assert!(icon.contains(r##"fill="#00CC00""##));
    }
}
