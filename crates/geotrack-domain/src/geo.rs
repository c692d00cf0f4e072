//! Great-circle math on a spherical earth.
//!
//! All functions are pure and allocation free, so simulators running on
//! different tasks can call them concurrently.

use crate::Position;

/// Mean earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two positions in meters (haversine).
#[must_use]
pub fn distance(a: &Position, b: &Position) -> f64 {
    if a == b {
        return 0.0;
    }

    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial bearing from `a` towards `b` in degrees, in `[0, 360)`.
#[must_use]
pub fn bearing(a: &Position, b: &Position) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();

    let deg = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if deg >= 360.0 { 0.0 } else { deg }
}

/// Project a new position `distance_m` meters from `origin` along
/// `bearing_deg`. Longitude is normalized into `(-180, 180]`.
#[must_use]
pub fn destination(origin: &Position, distance_m: f64, bearing_deg: f64) -> Position {
    let lat1 = origin.latitude.to_radians();
    let lon1 = origin.longitude.to_radians();
    let theta = bearing_deg.to_radians();
    let delta = distance_m / EARTH_RADIUS_M;

    let sin_lat2 = lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

    let y = theta.sin() * delta.sin() * lat1.cos();
    let x = delta.cos() - lat1.sin() * lat2.sin();
    let lon2 = lon1 + y.atan2(x);

    Position::new(lat2.to_degrees(), normalize_longitude(lon2.to_degrees()))
}

/// Wrap a longitude in degrees into `(-180, 180]`.
#[must_use]
pub fn normalize_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped <= -180.0 { 180.0 } else { wrapped }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_one_millidegree_at_equator() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(0.0, 0.001);
        let d = distance(&a, &b);
        assert!((d - 111.195).abs() < 0.01, "got {d}");
    }

    #[test]
    fn test_distance_symmetric_and_zero() {
        let bonn = Position::new(50.7374, 7.0982);
        let cologne = Position::new(50.9375, 6.9603);
        assert!((distance(&bonn, &cologne) - distance(&cologne, &bonn)).abs() < 1e-9);
        assert!(distance(&bonn, &bonn).abs() < f64::EPSILON);
        assert!((distance(&bonn, &cologne) - 24_300.0).abs() < 300.0);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = Position::new(0.0, 0.0);
        assert!(bearing(&origin, &Position::new(1.0, 0.0)).abs() < 1e-9);
        assert!((bearing(&origin, &Position::new(0.0, 1.0)) - 90.0).abs() < 1e-9);
        assert!((bearing(&origin, &Position::new(-1.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!((bearing(&origin, &Position::new(0.0, -1.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_destination_round_trips_distance_and_bearing() {
        let origin = Position::new(50.7374, 7.0982);
        let target = destination(&origin, 1_000.0, 45.0);
        assert!((distance(&origin, &target) - 1_000.0).abs() < 0.01);
        assert!((bearing(&origin, &target) - 45.0).abs() < 0.01);
    }

    #[test]
    fn test_destination_wraps_antimeridian() {
        let origin = Position::new(0.0, 179.9995);
        let east = destination(&origin, 200.0, 90.0);
        assert!(east.longitude < -179.0, "got {}", east.longitude);
        assert!(east.longitude > -180.0);
    }

    #[test]
    fn test_normalize_longitude_range() {
        assert!((normalize_longitude(180.0) - 180.0).abs() < f64::EPSILON);
        assert!((normalize_longitude(-180.0) - 180.0).abs() < f64::EPSILON);
        assert!((normalize_longitude(190.0) + 170.0).abs() < 1e-9);
        assert!((normalize_longitude(-190.0) - 170.0).abs() < 1e-9);
        assert!((normalize_longitude(7.1) - 7.1).abs() < 1e-9);
    }
}
