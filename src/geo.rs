//! Geographic distance helpers.

use crate::reports::GeoPoint;

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates in meters (haversine).
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Arithmetic centroid of a set of coordinates. Adequate at hotspot
/// scale; not meaningful across the antimeridian.
pub fn centroid(points: &[GeoPoint]) -> GeoPoint {
    if points.is_empty() {
        return GeoPoint { lat: 0.0, lng: 0.0 };
    }
    let n = points.len() as f64;
    GeoPoint {
        lat: points.iter().map(|p| p.lat).sum::<f64>() / n,
        lng: points.iter().map(|p| p.lng).sum::<f64>() / n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: -1.9441,
            lng: 30.0619,
        };
        assert_eq!(haversine_meters(p, p), 0.0);
    }

    #[test]
    fn one_degree_latitude_is_about_111_km() {
        let a = GeoPoint { lat: 0.0, lng: 0.0 };
        let b = GeoPoint { lat: 1.0, lng: 0.0 };
        let d = haversine_meters(a, b);
        assert!((d - 111_195.0).abs() < 200.0, "got {d}");
    }

    #[test]
    fn tiny_longitude_step_is_about_one_meter() {
        let a = GeoPoint { lat: 0.0, lng: 0.0 };
        let b = GeoPoint {
            lat: 0.0,
            lng: 0.00001,
        };
        let d = haversine_meters(a, b);
        assert!((0.5..2.0).contains(&d), "got {d}");
    }

    #[test]
    fn symmetric() {
        let a = GeoPoint {
            lat: -1.95,
            lng: 30.06,
        };
        let b = GeoPoint {
            lat: -1.94,
            lng: 30.07,
        };
        assert!((haversine_meters(a, b) - haversine_meters(b, a)).abs() < 1e-9);
    }

    #[test]
    fn centroid_of_symmetric_points_is_middle() {
        let points = [
            GeoPoint { lat: 0.0, lng: 0.0 },
            GeoPoint { lat: 2.0, lng: 4.0 },
        ];
        let c = centroid(&points);
        assert!((c.lat - 1.0).abs() < 1e-12);
        assert!((c.lng - 2.0).abs() < 1e-12);
    }
}
