//! Geographic positions and great-circle distance

/// Mean radius of the earth in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A position in degrees with an altitude in meters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl Location {
    pub const fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }

    /// Distance to `other` in meters, ignoring altitude
    pub fn distance(&self, other: &Location) -> f64 {
        haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Same position at a different altitude
    pub fn with_altitude(&self, altitude: f64) -> Self {
        Self { altitude, ..*self }
    }
}

/// Calculate distance between two points in meters using the haversine formula.
///
/// Coordinates are decimal degrees.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Meters covered by one degree of latitude (spherical approximation)
pub fn meters_per_deg_lat() -> f64 {
    EARTH_RADIUS_M.to_radians()
}

/// Meters covered by one degree of longitude at `lat_deg`
pub fn meters_per_deg_lon(lat_deg: f64) -> f64 {
    EARTH_RADIUS_M.to_radians() * lat_deg.to_radians().cos()
}

/// Move `from` towards `to` by at most `step_m` meters on the ground plane.
///
/// Returns the target itself once it is within reach.
pub fn step_towards(from: &Location, to: &Location, step_m: f64) -> Location {
    let remaining = from.distance(to);
    if remaining <= step_m || remaining == 0.0 {
        return Location::new(to.latitude, to.longitude, from.altitude);
    }
    let ratio = step_m / remaining;
    Location::new(
        from.latitude + (to.latitude - from.latitude) * ratio,
        from.longitude + (to.longitude - from.longitude) * ratio,
        from.altitude,
    )
}
