use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Geographic position. Latitude/longitude in degrees * 1e7, altitude
/// above mean sea level in centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    pub lat: i32,
    pub lon: i32,
    pub alt_cm: i32,
}

impl Location {
    pub fn new(lat: i32, lon: i32, alt_cm: i32) -> Self {
        Self { lat, lon, alt_cm }
    }

    /// Builds a location from degrees and metres. Returns `None` when the
    /// coordinates are not finite or out of range.
    pub fn from_degrees(lat: f64, lon: f64, alt_m: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() || !alt_m.is_finite() {
            return None;
        }
        if lat.abs() > 90.0 || lon.abs() > 180.0 {
            return None;
        }
        let alt_cm = (alt_m * 100.0).round();
        if alt_cm.abs() > i32::MAX as f64 {
            return None;
        }
        Some(Self {
            lat: (lat * 1e7).round() as i32,
            lon: (lon * 1e7).round() as i32,
            alt_cm: alt_cm as i32,
        })
    }

    pub fn lat_deg(&self) -> f64 {
        self.lat as f64 * 1e-7
    }

    pub fn lon_deg(&self) -> f64 {
        self.lon as f64 * 1e-7
    }

    pub fn alt_m(&self) -> f64 {
        self.alt_cm as f64 * 0.01
    }

    /// North/east offset in metres from `self` to `other`. Equirectangular
    /// projection, fine at the ranges a camera points over.
    pub fn offset_ne_m(&self, other: &Location) -> (f64, f64) {
        let north = (other.lat_deg() - self.lat_deg()).to_radians() * EARTH_RADIUS_M;
        let east = (other.lon_deg() - self.lon_deg()).to_radians()
            * EARTH_RADIUS_M
            * self.lat_deg().to_radians().cos();
        (north, east)
    }

    /// Bearing to `other` in degrees, 0 = north, clockwise, in [0, 360).
    pub fn bearing_deg(&self, other: &Location) -> f64 {
        let (n, e) = self.offset_ne_m(other);
        e.atan2(n).to_degrees().rem_euclid(360.0)
    }

    /// Elevation angle to `other` in degrees, positive up.
    pub fn elevation_deg(&self, other: &Location) -> f64 {
        let (n, e) = self.offset_ne_m(other);
        let horizontal = (n * n + e * e).sqrt();
        (other.alt_m() - self.alt_m()).atan2(horizontal).to_degrees()
    }
}
