//! Spherical geometry on a spherical Earth
//!
//! Distances are great-circle arcs in degrees, azimuths are clockwise from
//! north in degrees in `[0, 360)`.

/// Kilometers per degree of great-circle arc
pub const KM_PER_DEG: f64 = 111.195;

pub fn km2deg(km: f64) -> f64 {
    km / KM_PER_DEG
}

pub fn deg2km(deg: f64) -> f64 {
    deg * KM_PER_DEG
}

/// Distance, azimuth and backazimuth between two points
///
/// Returns `(delta, az, baz)` where `az` is measured at point 1 toward
/// point 2 and `baz` at point 2 toward point 1.
pub fn delazi(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> (f64, f64, f64) {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dlon = (lon2 - lon1).to_radians();

    let cos_d = phi1.sin() * phi2.sin() + phi1.cos() * phi2.cos() * dlon.cos();
    let delta = cos_d.clamp(-1.0, 1.0).acos().to_degrees();

    let az = bearing(phi1, phi2, dlon);
    let baz = bearing(phi2, phi1, -dlon);
    (delta, az, baz)
}

fn bearing(phi1: f64, phi2: f64, dlon: f64) -> f64 {
    let y = dlon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlon.cos();
    normalize_azimuth(y.atan2(x).to_degrees())
}

/// Map any angle into `[0, 360)`
pub fn normalize_azimuth(az: f64) -> f64 {
    let a = az % 360.0;
    if a < 0.0 {
        a + 360.0
    } else {
        a
    }
}

/// Point reached by travelling `delta` degrees from `(lat, lon)` along `az`
pub fn destination(lat: f64, lon: f64, delta: f64, az: f64) -> (f64, f64) {
    let (phi1, lam1) = (lat.to_radians(), lon.to_radians());
    let (d, theta) = (delta.to_radians(), az.to_radians());

    let phi2 = (phi1.sin() * d.cos() + phi1.cos() * d.sin() * theta.cos()).asin();
    let lam2 = lam1
        + (theta.sin() * d.sin() * phi1.cos()).atan2(d.cos() - phi1.sin() * phi2.sin());

    (phi2.to_degrees(), normalize_longitude(lam2.to_degrees()))
}

/// Map a longitude into `[-180, 180)`
pub fn normalize_longitude(lon: f64) -> f64 {
    let l = normalize_azimuth(lon + 180.0) - 180.0;
    if l >= 180.0 {
        l - 360.0
    } else {
        l
    }
}

/// Primary and secondary azimuthal gap of a set of station azimuths
///
/// The secondary gap is the largest gap left when any single station is
/// removed. Fewer than two azimuths leave the source unconstrained and both
/// gaps are 360.
pub fn azimuthal_gaps(azimuths: &[f64]) -> (f64, f64) {
    if azimuths.len() < 2 {
        return (360.0, 360.0);
    }
    let mut az: Vec<f64> = azimuths.iter().map(|a| normalize_azimuth(*a)).collect();
    az.sort_by(|a, b| a.total_cmp(b));
    let n = az.len();

    let span = |i: usize, k: usize| -> f64 {
        // arc from az[i] to az[(i + k) % n], going clockwise
        let j = (i + k) % n;
        let d = az[j] - az[i];
        if i + k >= n {
            d + 360.0
        } else {
            d
        }
    };

    let mut primary: f64 = 0.0;
    let mut secondary: f64 = 0.0;
    for i in 0..n {
        primary = primary.max(span(i, 1));
        secondary = secondary.max(if n > 2 { span(i, 2) } else { 360.0 });
    }
    (primary, secondary)
}
