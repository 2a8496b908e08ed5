//! # Devices API
//!
//! The two device endpoints the live map seeds itself from.

use futures_util::{stream, FutureExt, StreamExt};

use crate::error::Result;
use crate::tracking::model::{Device, LastKnownLocation};

use super::ky_http::ApiClient;

/// Roster of the authenticated user.
pub const DEVICES_FOR_USER_PATH: &str = "api/devices/get-device-user/";
/// Position lookups in flight at once while loading the roster.
const POSITION_CONCURRENCY: usize = 8;

/// Prefix of the last-known-position endpoint; the device uid and a slash follow.
pub const DEVICE_POSITION_PATH: &str = "api/devices/get-position/";

/// Client for the device endpoints.
pub struct DeviceApi {
    client: ApiClient,
}

impl DeviceApi {
    /// Wraps an existing client.
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Builds a client for `base_url` with an optional bearer token.
    pub fn connect(base_url: &str, auth_token: Option<String>) -> Result<Self> {
        Ok(Self::new(ApiClient::new(base_url, auth_token)?))
    }

    /// Devices visible to the authenticated user.
    pub async fn get_devices_for_authenticated_user(&self) -> Result<Vec<Device>> {
        self.client.get(DEVICES_FOR_USER_PATH, &[]).await
    }

    /// Last known location of `uid`. `date` narrows the lookup to one day
    /// (`YYYY-MM-DD`); without it the backend returns the latest fix.
    pub async fn get_device_position(&self, uid: &str, date: Option<&str>) -> Result<LastKnownLocation> {
        let path = Self::position_path(uid);
        self.client.get(&path, &[("date", date.unwrap_or(""))]).await
    }

    /// Fetches the roster and the last known location of each device.
    /// Position lookups run concurrently; results keep roster order.
    /// Devices whose location lookup fails are kept in the roster without a
    /// seeded marker.
    pub async fn load_roster(&self) -> Result<(Vec<Device>, Vec<(String, LastKnownLocation)>)> {
        let devices = self.get_devices_for_authenticated_user().await?;
        let locations: Vec<(String, LastKnownLocation)> = stream::iter(devices.iter().filter(|d| !d.uid.is_empty()))
            .map(|device| async move {
                match self.get_device_position(&device.uid, None).await {
                    Ok(location) => Some((device.uid.clone(), location)),
                    Err(e) => {
                        log::warn!("No last known position for device {}: {}", device.uid, e);
                        None
                    }
                }
            })
            .buffered(POSITION_CONCURRENCY)
            .filter_map(|found| async move { found })
            .collect()
            .boxed()
            .await;
        log::info!(
            "Loaded {} devices, {} with a last known position",
            devices.len(),
            locations.len()
        );
        Ok((devices, locations))
    }

    fn position_path(uid: &str) -> String {
        format!("{}{}/", DEVICE_POSITION_PATH, uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_path_ends_with_slash() {
        assert_eq!(DeviceApi::position_path("abc-1"), "api/devices/get-position/abc-1/");
    }

    #[test]
    fn roster_payload_decodes_into_devices() {
        let raw = r#"[
            {"uid": "d1", "imei": "35000", "name": "Van 1", "car_name": "Kangoo",
             "company_manager": {"uid": "c1", "name": "Acme"}, "mode_status": "Professional", "extra": 1},
            {"uid": "d2", "name": "Van 2"}
        ]"#;
        let devices: Vec<Device> = serde_json::from_str(raw).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].company_manager.name, "Acme");
        assert_eq!(devices[1].car_name, "");
    }
}
