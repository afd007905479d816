//! Geographic math: great-circle distance, spherical centroids, and spread.
//!
//! All distances are meters on a spherical Earth model. Centroid math runs
//! in 3-D cartesian space so clusters straddling the antimeridian average
//! correctly.

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle (haversine) distance in meters between two coordinates.
#[must_use]
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Convert a (lat, lon) pair in degrees to a unit vector on the sphere.
#[must_use]
pub fn to_cartesian(lat: f64, lon: f64) -> [f64; 3] {
    let phi = lat.to_radians();
    let lambda = lon.to_radians();
    [
        phi.cos() * lambda.cos(),
        phi.cos() * lambda.sin(),
        phi.sin(),
    ]
}

/// Convert a cartesian point back to (lat, lon) in degrees.
///
/// The input need not be unit length; only its direction matters.
#[must_use]
pub fn from_cartesian(p: [f64; 3]) -> (f64, f64) {
    let norm = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
    if norm <= f64::EPSILON {
        return (0.0, 0.0);
    }
    let x = p[0] / norm;
    let y = p[1] / norm;
    let z = p[2] / norm;
    (z.asin().to_degrees(), y.atan2(x).to_degrees())
}

/// Weighted spherical centroid of coordinate/weight pairs.
///
/// Returns `None` when the input is empty or all weights are non-positive.
#[must_use]
pub fn weighted_centroid(points: &[(f64, f64)], weights: &[f64]) -> Option<(f64, f64)> {
    if points.is_empty() || points.len() != weights.len() {
        return None;
    }

    let mut acc = [0.0_f64; 3];
    let mut total = 0.0_f64;
    for (&(lat, lon), &w) in points.iter().zip(weights.iter()) {
        if w <= 0.0 {
            continue;
        }
        let p = to_cartesian(lat, lon);
        acc[0] += p[0] * w;
        acc[1] += p[1] * w;
        acc[2] += p[2] * w;
        total += w;
    }

    if total <= 0.0 {
        return None;
    }
    Some(from_cartesian(acc))
}

/// Maximum great-circle distance from a center point to any of `points`.
#[must_use]
pub fn max_distance_m(center: (f64, f64), points: &[(f64, f64)]) -> f64 {
    points
        .iter()
        .map(|&(lat, lon)| haversine_m(center.0, center.1, lat, lon))
        .fold(0.0, f64::max)
}

/// Maximum pairwise great-circle distance among `points` — the geographic
/// spread of a hit set.
#[must_use]
pub fn max_pairwise_distance_m(points: &[(f64, f64)]) -> f64 {
    let mut max = 0.0_f64;
    for (i, &(lat1, lon1)) in points.iter().enumerate() {
        for &(lat2, lon2) in &points[i + 1..] {
            let d = haversine_m(lat1, lon1, lat2, lon2);
            if d > max {
                max = d;
            }
        }
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_for_same_point() {
        assert!(haversine_m(48.8584, 2.2945, 48.8584, 2.2945) < 1e-6);
    }

    #[test]
    fn test_haversine_paris_london() {
        // Eiffel Tower to Trafalgar Square is roughly 340 km.
        let d = haversine_m(48.8584, 2.2945, 51.5080, -0.1281);
        assert!((d - 340_000.0).abs() < 10_000.0, "got {d}");
    }

    #[test]
    fn test_cartesian_round_trip() {
        for &(lat, lon) in &[(0.0, 0.0), (48.85, 2.29), (-33.86, 151.21), (89.0, -179.5)] {
            let (lat2, lon2) = from_cartesian(to_cartesian(lat, lon));
            assert!((lat - lat2).abs() < 1e-9);
            assert!((lon - lon2).abs() < 1e-9);
        }
    }

    #[test]
    fn test_weighted_centroid_of_single_point() {
        let c = weighted_centroid(&[(10.0, 20.0)], &[1.0]);
        let (lat, lon) = c.expect("centroid");
        assert!((lat - 10.0).abs() < 1e-9);
        assert!((lon - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_centroid_across_antimeridian() {
        // Two points straddling the date line must average near it, not at 0.
        let c = weighted_centroid(&[(0.0, 179.0), (0.0, -179.0)], &[1.0, 1.0]);
        let (lat, lon) = c.expect("centroid");
        assert!(lat.abs() < 1e-9);
        assert!(lon.abs() > 178.9, "got {lon}");
    }

    #[test]
    fn test_weighted_centroid_empty_is_none() {
        assert!(weighted_centroid(&[], &[]).is_none());
        assert!(weighted_centroid(&[(0.0, 0.0)], &[0.0]).is_none());
    }

    #[test]
    fn test_weighted_centroid_pulls_toward_heavier_point() {
        let c = weighted_centroid(&[(0.0, 0.0), (0.0, 10.0)], &[3.0, 1.0]);
        let (_, lon) = c.expect("centroid");
        assert!(lon > 0.0 && lon < 5.0, "got {lon}");
    }

    #[test]
    fn test_max_pairwise_distance() {
        let points = [(0.0, 0.0), (0.0, 1.0), (0.0, 3.0)];
        let spread = max_pairwise_distance_m(&points);
        let direct = haversine_m(0.0, 0.0, 0.0, 3.0);
        assert!((spread - direct).abs() < 1.0);
    }
}
