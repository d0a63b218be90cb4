//! Snell's law and the characteristic angles of a dielectric interface.
//!
//! Angles are in radians, measured from the surface normal. Indices are real
//! and positive. Total internal reflection is reported as a sentinel (`None`
//! or NaN), never as an error.

use nalgebra::Complex;

#[cfg(test)]
mod tests {

    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn normal_incidence_same_media() {
        let theta_t = get_theta_t(0.0, 1.0, 1.0).unwrap();
        assert!(theta_t.abs() < 1e-12)
    }

    #[test]
    fn angle30_incidence() {
        let theta_i = 30.0 * PI / 180.0;
        let theta_t = get_theta_t(theta_i, 1.0, 1.31).unwrap();
        let abs_difference = (theta_t - 0.3916126).abs();
        assert!(abs_difference < 1e-6, "theta_t: {}", theta_t)
    }

    #[test]
    fn total_internal_reflection() {
        assert!(get_theta_t(1.0, 1.5, 1.0).is_none());
        assert!(is_total_internal_reflection(1.0, 1.5, 1.0));
        assert!(!is_total_internal_reflection(1.0, 1.0, 1.5));
        let critical = critical_angle(1.5, 1.0);
        assert!(is_total_internal_reflection(critical + 1e-9, 1.5, 1.0));
        assert!(!is_total_internal_reflection(critical - 1e-6, 1.5, 1.0));
    }

    #[test]
    fn characteristic_angles() {
        assert!((brewster_angle(1.0, 1.5) - 1.5f64.atan()).abs() < 1e-12);
        assert!((critical_angle(1.5, 1.0) - (1.0f64 / 1.5).asin()).abs() < 1e-12);
        assert!(critical_angle(1.0, 1.5).is_nan());
        assert!(critical_angle(1.5, 1.5).is_nan());
    }

    #[test]
    fn evanescent_cosine_is_imaginary() {
        let cos_t = complex_cos_theta_t(1.2, 1.5, 1.0);
        assert!(cos_t.re.abs() < 1e-12);
        assert!(cos_t.im > 0.0);
        let cos_t = complex_cos_theta_t(0.3, 1.0, 1.5);
        let theta_t = get_theta_t(0.3, 1.0, 1.5).unwrap();
        assert!((cos_t.re - theta_t.cos()).abs() < 1e-12);
        assert!(cos_t.im.abs() < 1e-12);
    }

    #[test]
    fn malus() {
        assert!((malus_law(1.0, 0.0) - 1.0).abs() < 1e-12);
        assert!((malus_law(2.0, PI / 4.0) - 1.0).abs() < 1e-12);
        assert!(malus_law(1.0, PI / 2.0).abs() < 1e-12);
    }

    #[test]
    fn birefringent_retardance() {
        // quartz-like Δn = 0.009 over a quarter-wave thickness at 550 nm
        let d = 550.0 / (4.0 * 0.009);
        let delta = retardance_from_birefringence(0.009, d, 550.0);
        assert!((delta - PI / 2.0).abs() < 1e-12);
    }
}

/// `(n1/n2)·sin θi`, the sine of the transmitted angle (may exceed 1).
fn sin_theta_t(theta_i: f64, n1: f64, n2: f64) -> f64 {
    n1 / n2 * theta_i.sin()
}

/// True when the incident angle is at or beyond the critical angle.
pub fn is_total_internal_reflection(theta_i: f64, n1: f64, n2: f64) -> bool {
    sin_theta_t(theta_i, n1, n2).abs() >= 1.0
}

/// Transmitted angle `θt = asin((n1/n2)·sin θi)`, or `None` under total
/// internal reflection.
pub fn get_theta_t(theta_i: f64, n1: f64, n2: f64) -> Option<f64> {
    if n1 == n2 {
        return Some(theta_i);
    }
    if is_total_internal_reflection(theta_i, n1, n2) {
        return None;
    }
    Some(sin_theta_t(theta_i, n1, n2).asin())
}

/// `cos θt` continued into the complex plane. Beyond the critical angle the
/// transmitted wave is evanescent and `cos θt = +iκ` with `κ = √(sin²θt − 1)`.
pub fn complex_cos_theta_t(theta_i: f64, n1: f64, n2: f64) -> Complex<f64> {
    let sin_t = sin_theta_t(theta_i, n1, n2);
    let arg = 1.0 - sin_t * sin_t;
    if arg >= 0.0 {
        Complex::new(arg.sqrt(), 0.0)
    } else {
        Complex::new(0.0, (-arg).sqrt())
    }
}

/// Angle at which p-polarized light is not reflected.
pub fn brewster_angle(n1: f64, n2: f64) -> f64 {
    (n2 / n1).atan()
}

/// Onset of total internal reflection; NaN when `n1 ≤ n2` (no TIR possible).
pub fn critical_angle(n1: f64, n2: f64) -> f64 {
    if n1 <= n2 {
        return f64::NAN;
    }
    (n2 / n1).asin()
}

/// Transmitted intensity of linearly polarized light through an analyzer at
/// relative angle `theta`: `I·cos²θ`.
pub fn malus_law(intensity: f64, theta: f64) -> f64 {
    intensity * theta.cos().powi(2)
}

/// Phase retardance `δ = 2π·Δn·d/λ` of a birefringent plate. `thickness` and
/// `wavelength` must share units.
pub fn retardance_from_birefringence(birefringence: f64, thickness: f64, wavelength: f64) -> f64 {
    2.0 * std::f64::consts::PI * birefringence * thickness / wavelength
}
