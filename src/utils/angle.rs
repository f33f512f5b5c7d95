use std::f64::consts::PI;

/// Wraps an angle into `(-π, π]`.
///
pub fn normalize_theta(theta: f64) -> f64 {
    if !theta.is_finite() {
        return theta;
    }
    let mut t = theta % (2.0 * PI);
    if t > PI {
        t -= 2.0 * PI;
    } else if t <= -PI {
        t += 2.0 * PI;
    }
    t
}

/// Signed smallest difference `a - b`.
pub fn angle_diff(a: f64, b: f64) -> f64 {
    normalize_theta(a - b)
}
