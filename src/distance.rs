//! Geodesic distance on the WGS-84 mean sphere.

const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Haversine great-circle distance in kilometres, rounded to 3 decimals.
///
/// Returns `None` when any coordinate is not finite, matching the policy
/// of skipping rows with unusable coordinates instead of failing.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Option<f64> {
    if ![lat1, lon1, lat2, lon2].iter().all(|v| v.is_finite()) {
        return None;
    }

    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    Some((EARTH_RADIUS_KM * c * 1000.0).round() / 1000.0)
}
