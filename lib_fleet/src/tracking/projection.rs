//! Spherical Web-Mercator (EPSG:3857), the projection map views render in.

use std::f64::consts::PI;

/// Earth radius used by EPSG:3857, in metres.
pub const RADIUS: f64 = 6_378_137.0;
/// Half the width of the projected world, in metres.
pub const HALF_SIZE: f64 = PI * RADIUS;

/// `[lng, lat]` degrees to projected `[x, y]` metres. `y` is clamped to the
/// square world extent, which cuts latitudes beyond roughly +/-85.05 degrees.
pub fn from_lon_lat(lon_lat: [f64; 2]) -> [f64; 2] {
    let [lng, lat] = lon_lat;
    let x = RADIUS * lng.to_radians();
    let y = RADIUS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
    [x, y.clamp(-HALF_SIZE, HALF_SIZE)]
}

/// Projected `[x, y]` metres back to `[lng, lat]` degrees.
pub fn to_lon_lat(coordinates: [f64; 2]) -> [f64; 2] {
    let [x, y] = coordinates;
    let lng = (x / RADIUS).to_degrees();
    let lat = (2.0 * (y / RADIUS).exp().atan() - PI / 2.0).to_degrees();
    [lng, lat]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn origin_maps_to_origin() {
        let [x, y] = from_lon_lat([0.0, 0.0]);
        assert!(close(x, 0.0, 1e-9) && close(y, 0.0, 1e-9));
    }

    #[test]
    fn paris_projects_to_known_metres() {
        let [x, y] = from_lon_lat([2.3522, 48.8566]);
        assert!(close(x, 261_845.7, 1.0), "x = {x}");
        assert!(close(y, 6_250_564.3, 1.0), "y = {y}");

        let [lng, lat] = to_lon_lat([x, y]);
        assert!(close(lng, 2.3522, 1e-9) && close(lat, 48.8566, 1e-9));
    }

    #[test]
    fn poles_are_clamped() {
        let [_, y] = from_lon_lat([0.0, 90.0]);
        assert!(close(y, HALF_SIZE, 1e-6));
    }
}
