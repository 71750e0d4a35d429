//! Great-circle distance used by delivery geofencing
use crate::types::GeoPoint;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two coordinates in kilometres.
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Inclusive: a distance equal to the radius is inside.
pub fn within_geofence(distance_km: f64, radius_km: f64) -> bool {
    distance_km <= radius_km
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_is_zero() {
        let p = GeoPoint::new(18.5204, 73.8567);
        assert_eq!(distance_km(p, p), 0.0);
    }

    #[test]
    fn known_city_pair() {
        // Mumbai to Pune, roughly 120 km
        let mumbai = GeoPoint::new(19.0760, 72.8777);
        let pune = GeoPoint::new(18.5204, 73.8567);
        let d = distance_km(mumbai, pune);
        assert!((115.0..125.0).contains(&d), "got {d}");
    }

    #[test]
    fn geofence_boundary_is_inclusive() {
        assert!(within_geofence(0.5, 0.5));
        assert!(!within_geofence(0.501, 0.5));
    }
}
