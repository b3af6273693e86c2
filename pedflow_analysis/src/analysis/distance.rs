/// Great-circle distance between sensor positions.

use crate::model::GeoPoint;

/// Mean Earth radius used by the haversine formula, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters between two `(lat, lon)` pairs in degrees.
///
/// The intermediate term `a` is clamped to `[0, 1]`: rounding can push it
/// a hair past 1 for near-antipodal points, and `sqrt(1 - a)` must never
/// see a negative argument.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let a = a.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// `haversine_m` over two `GeoPoint`s.
pub fn distance_between(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_m(a.latitude, a.longitude, b.latitude, b.longitude)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TOKYO: GeoPoint = GeoPoint {
        latitude: 35.6895,
        longitude: 139.6917,
    };
    const OSAKA: GeoPoint = GeoPoint {
        latitude: 34.6937,
        longitude: 135.5023,
    };

    #[test]
    fn test_identical_points_are_zero_apart() {
        for p in [TOKYO, OSAKA, GeoPoint::new(0.0, 0.0), GeoPoint::new(-89.9, 179.9)] {
            assert_eq!(distance_between(&p, &p), 0.0);
        }
    }

    #[test]
    fn test_distance_is_symmetric() {
        let pairs = [
            (TOKYO, OSAKA),
            (GeoPoint::new(38.261976, 140.880226), GeoPoint::new(38.268649, 140.870504)),
            (GeoPoint::new(-33.86, 151.21), GeoPoint::new(51.5, -0.12)),
        ];
        for (a, b) in pairs {
            assert_eq!(distance_between(&a, &b), distance_between(&b, &a));
        }
    }

    #[test]
    fn test_tokyo_osaka_fixture() {
        let d = distance_between(&TOKYO, &OSAKA);
        assert!(
            (d - 402_000.0).abs() <= 5_000.0,
            "Tokyo–Osaka should be about 402 km, got {:.0} m",
            d
        );
    }

    #[test]
    fn test_antipodal_points_are_half_circumference() {
        let d = haversine_m(0.0, 0.0, 0.0, 180.0);
        let half = std::f64::consts::PI * EARTH_RADIUS_M;
        assert!(d.is_finite());
        assert!((d - half).abs() < 1.0, "expected {}, got {}", half, d);

        let pole_to_pole = haversine_m(90.0, 0.0, -90.0, 0.0);
        assert!((pole_to_pole - half).abs() < 1.0);
    }

    #[test]
    fn test_short_arcade_segment_is_a_few_hundred_meters() {
        // Hapina Nakakecho to the Jozenji-dori statue, central Sendai.
        let d = haversine_m(38.261976, 140.880226, 38.268649, 140.870504);
        assert!(d > 900.0 && d < 1_300.0, "got {:.1} m", d);
    }
}
