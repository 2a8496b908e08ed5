//! Wire types shared by the push channel and the REST collaborators.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Online/offline flag carried by status messages. Anything other than
/// `"On"` reads as `Off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PowerStatus {
    /// Device is reporting.
    On,
    /// Device is silent, or reported something unrecognised.
    #[default]
    #[serde(other)]
    Off,
}

impl PowerStatus {
    /// True for `On`.
    pub fn is_on(self) -> bool {
        self == PowerStatus::On
    }
}

/// Position sample attached to a status message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Operating mode reported by the device, e.g. `"Professional"`.
    #[serde(default)]
    pub device_mode: String,
    /// Power status at the time of the sample.
    #[serde(default)]
    pub status: PowerStatus,
    /// Device name as known to the backend.
    #[serde(default)]
    pub name: String,
}

/// # Device Status Message
///
/// One push from `ws/device-status/`. Transient: consumed by the marker layer
/// and the trajectory segmenter, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatusMessage {
    /// Identifier of the device (the roster `uid`).
    pub device_id: String,
    /// Overall power status.
    #[serde(default)]
    pub status: PowerStatus,
    /// Optional message kind.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Latest position, when the device reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Speed in km/h, sent as text (numbers are accepted too).
    #[serde(default, deserialize_with = "de_opt_text", skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    /// Vehicle the device is fitted to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub car_name: Option<String>,
    /// Owning company.
    #[serde(default, rename = "companyName", skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    /// Reverse-geocoded address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl DeviceStatusMessage {
    /// A message with no position or metadata.
    pub fn new(device_id: impl Into<String>, status: PowerStatus) -> Self {
        Self {
            device_id: device_id.into(),
            status,
            kind: None,
            position: None,
            speed: None,
            car_name: None,
            company_name: None,
            address: None,
        }
    }

    /// Attaches a position sample.
    pub fn with_position(mut self, lat: f64, lng: f64, device_mode: impl Into<String>) -> Self {
        self.position = Some(Position {
            lat,
            lng,
            device_mode: device_mode.into(),
            status: self.status,
            name: String::new(),
        });
        self
    }

    /// Decodes one JSON payload.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Decodes one JSON payload from bytes.
    pub fn from_json_slice(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }
}

fn de_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Company that manages a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyManager {
    /// Company identifier.
    #[serde(default)]
    pub uid: Option<String>,
    /// Company display name.
    #[serde(default)]
    pub name: String,
}

/// # Device
///
/// A roster entry from `api/devices/get-device-user/`. Only the fields the
/// live map needs are modelled; the rest of the payload is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Device identifier, matching `DeviceStatusMessage::device_id`.
    #[serde(default)]
    pub uid: String,
    /// Tracker IMEI.
    #[serde(default)]
    pub imei: String,
    /// Device display name.
    #[serde(default)]
    pub name: String,
    /// Vehicle the device is fitted to.
    #[serde(default)]
    pub car_name: String,
    /// Owning company.
    #[serde(default)]
    pub company_manager: CompanyManager,
    /// Last mode reported by the backend.
    #[serde(default)]
    pub mode_status: Option<String>,
}

/// Last known location from `api/devices/get-position/<uid>/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastKnownLocation {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// City or address line.
    #[serde(default)]
    pub city: String,
    /// Device name, if the backend includes it.
    #[serde(default)]
    pub name: Option<String>,
    /// Power status at the time of the fix.
    #[serde(default)]
    pub status: PowerStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_status_message() {
        let raw = r#"{
            "device_id": "dev-1",
            "status": "On",
            "position": {"lat": 48.85, "lng": 2.35, "device_mode": "Professional", "status": "On", "name": "Van 1"},
            "speed": "42",
            "car_name": "Kangoo",
            "companyName": "Acme",
            "address": "1 rue de Rivoli"
        }"#;
        let msg = DeviceStatusMessage::from_json(raw).unwrap();
        assert_eq!(msg.device_id, "dev-1");
        assert!(msg.status.is_on());
        let pos = msg.position.unwrap();
        assert_eq!(pos.device_mode, "Professional");
        assert_eq!(pos.name, "Van 1");
        assert_eq!(msg.speed.as_deref(), Some("42"));
        assert_eq!(msg.company_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn unknown_status_reads_as_off_and_numeric_speed_is_text() {
        let raw = r#"{"device_id": "d", "status": "Sleeping", "speed": 12.5}"#;
        let msg = DeviceStatusMessage::from_json(raw).unwrap();
        assert_eq!(msg.status, PowerStatus::Off);
        assert_eq!(msg.speed.as_deref(), Some("12.5"));
        assert!(msg.position.is_none());
    }

    #[test]
    fn missing_device_id_is_rejected() {
        assert!(DeviceStatusMessage::from_json(r#"{"status": "On"}"#).is_err());
        assert!(DeviceStatusMessage::from_json("not json").is_err());
    }

    #[test]
    fn roster_device_ignores_unmodelled_fields() {
        let raw = r#"{
            "uid": "u1", "imei": "356", "name": "Tracker", "car_name": "Clio",
            "sim_number": "0600", "status": true,
            "company_manager": {"uid": "c1", "name": "Acme", "region": "IDF"},
            "speed_limit": 90, "engine_lock": false
        }"#;
        let device: Device = serde_json::from_str(raw).unwrap();
        assert_eq!(device.uid, "u1");
        assert_eq!(device.company_manager.name, "Acme");
    }
}
