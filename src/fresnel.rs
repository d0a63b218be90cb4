//! Fresnel equations at a planar dielectric interface.
//!
//! Coefficients are complex so that the phase acquired under total internal
//! reflection is carried through. In Jones form the p component lies along x
//! and the s component along y, so an interface acts as `diag(rp, rs)` on
//! reflection and `diag(tp, ts)` on transmission.

use num_complex::Complex;
use serde::Serialize;

use crate::jones;
use crate::mueller::MuellerMatrix;
use crate::snell;

#[cfg(test)]
mod tests {

    use super::*;
    use crate::stokes::StokesVector;
    use std::f64::consts::PI;

    #[test]
    fn normal_incidence_glass() {
        let c = fresnel_coefficients(1.0, 1.5, 0.0);
        assert!((c.reflectance_s - 0.04).abs() < 1e-12, "{:?}", c);
        assert!((c.reflectance_p - 0.04).abs() < 1e-12, "{:?}", c);
        assert!((c.transmittance_s - 0.96).abs() < 1e-12, "{:?}", c);
        assert!(!c.is_tir);
    }

    #[test]
    fn brewster_kills_p_reflection() {
        let theta_b = snell::brewster_angle(1.0, 1.5);
        let c = fresnel_coefficients(1.0, 1.5, theta_b);
        assert!(c.reflectance_p < 1e-20, "Rp: {}", c.reflectance_p);
        assert!(c.reflectance_s > 0.1);

        let reflected = MuellerMatrix::fresnel_reflect(1.0, 1.5, theta_b)
            .apply(&StokesVector::unpolarized(1.0));
        // only s (vertical, S1 < 0) survives
        assert!((reflected.degree_of_polarization() - 1.0).abs() < 1e-9);
        assert!(reflected.s1() < 0.0);
    }

    #[test]
    fn energy_is_conserved() {
        for (n1, n2) in [(1.0, 1.5), (1.5, 1.0), (1.33, 2.4)] {
            for k in 0..90 {
                let theta_i = k as f64 * PI / 180.0;
                if snell::is_total_internal_reflection(theta_i, n1, n2) {
                    continue;
                }
                let c = fresnel_coefficients(n1, n2, theta_i);
                assert!(
                    (c.reflectance_s + c.transmittance_s - 1.0).abs() < 1e-9,
                    "s: n1={} n2={} theta={} {:?}",
                    n1,
                    n2,
                    theta_i,
                    c
                );
                assert!((c.reflectance_p + c.transmittance_p - 1.0).abs() < 1e-9);

                let input = StokesVector::new(1.0, 0.3, -0.4, 0.5);
                let r = MuellerMatrix::fresnel_reflect(n1, n2, theta_i).apply(&input);
                let t = MuellerMatrix::fresnel_transmit(n1, n2, theta_i)
                    .unwrap()
                    .apply(&input);
                assert!((r.s0() + t.s0() - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn total_internal_reflection() {
        let theta_i = 60f64.to_radians();
        let c = fresnel_coefficients(1.5, 1.0, theta_i);
        assert!(c.is_tir);
        assert!(c.theta_t.is_nan());
        assert_eq!(c.reflectance_s, 1.0);
        assert_eq!(c.reflectance_p, 1.0);
        assert_eq!(c.transmittance_s, 0.0);
        assert!((c.rs.norm() - 1.0).abs() < 1e-12);
        assert!((c.rp.norm() - 1.0).abs() < 1e-12);
        assert!(MuellerMatrix::fresnel_transmit(1.5, 1.0, theta_i).is_none());

        // TIR phase difference turns diagonal light elliptical
        let out = MuellerMatrix::fresnel_reflect(1.5, 1.0, theta_i)
            .apply(&StokesVector::diagonal(1.0));
        assert!((out.s0() - 1.0).abs() < 1e-12);
        assert!(out.s3().abs() > 0.1);
        assert!((out.degree_of_polarization() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn grazing_incidence_transmits_nothing() {
        let t = MuellerMatrix::fresnel_transmit(1.0, 1.5, PI / 2.0).unwrap();
        assert!(t.get(0, 0).abs() < 1e-12);
        let c = fresnel_coefficients(1.0, 1.5, PI / 2.0);
        assert!((c.reflectance_s - 1.0).abs() < 1e-12);
    }
}

/// Complex amplitude and real intensity coefficients for one interface and angle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FresnelCoefficients {
    #[serde(skip)]
    pub rs: Complex<f64>,
    #[serde(skip)]
    pub rp: Complex<f64>,
    #[serde(skip)]
    pub ts: Complex<f64>,
    #[serde(skip)]
    pub tp: Complex<f64>,
    pub reflectance_s: f64,
    pub reflectance_p: f64,
    pub transmittance_s: f64,
    pub transmittance_p: f64,
    /// Transmitted angle; NaN under total internal reflection.
    pub theta_t: f64,
    pub is_tir: bool,
}

impl FresnelCoefficients {
    pub fn reflectance(&self) -> f64 {
        0.5 * (self.reflectance_s + self.reflectance_p)
    }

    pub fn transmittance(&self) -> f64 {
        0.5 * (self.transmittance_s + self.transmittance_p)
    }
}

/// Amplitude reflection coefficients `(rs, rp)` for a given complex `cos θt`.
pub fn refl(n1: f64, n2: f64, cos_i: f64, cos_t: Complex<f64>) -> (Complex<f64>, Complex<f64>) {
    let rs = (n1 * cos_i - n2 * cos_t) / (n1 * cos_i + n2 * cos_t);
    let rp = (n2 * cos_i - n1 * cos_t) / (n2 * cos_i + n1 * cos_t);
    (rs, rp)
}

/// Amplitude transmission coefficients `(ts, tp)` for a given complex `cos θt`.
pub fn refr(n1: f64, n2: f64, cos_i: f64, cos_t: Complex<f64>) -> (Complex<f64>, Complex<f64>) {
    let ts = (2.0 * n1 * cos_i) / (n1 * cos_i + n2 * cos_t);
    let tp = (2.0 * n1 * cos_i) / (n2 * cos_i + n1 * cos_t);
    (ts, tp)
}

/// Fresnel coefficients for light going from index `n1` into `n2` at `theta_i`.
pub fn fresnel_coefficients(n1: f64, n2: f64, theta_i: f64) -> FresnelCoefficients {
    let cos_i = theta_i.cos();
    let cos_t = snell::complex_cos_theta_t(theta_i, n1, n2);
    let theta_t = snell::get_theta_t(theta_i, n1, n2);

    let (rs, rp) = refl(n1, n2, cos_i, cos_t);
    let (ts, tp) = refr(n1, n2, cos_i, cos_t);

    let Some(theta_t) = theta_t else {
        return FresnelCoefficients {
            rs,
            rp,
            ts,
            tp,
            reflectance_s: 1.0,
            reflectance_p: 1.0,
            transmittance_s: 0.0,
            transmittance_p: 0.0,
            theta_t: f64::NAN,
            is_tir: true,
        };
    };

    let factor = transmission_factor(n1, n2, cos_i, cos_t.re);
    FresnelCoefficients {
        rs,
        rp,
        ts,
        tp,
        reflectance_s: rs.norm_sqr(),
        reflectance_p: rp.norm_sqr(),
        transmittance_s: factor * ts.norm_sqr(),
        transmittance_p: factor * tp.norm_sqr(),
        theta_t,
        is_tir: false,
    }
}

/// Intensity normalization `n2·cos θt / (n1·cos θi)` for transmitted
/// amplitudes. Zero at grazing incidence.
fn transmission_factor(n1: f64, n2: f64, cos_i: f64, cos_t: f64) -> f64 {
    let denominator = n1 * cos_i;
    if denominator.abs() < crate::config::INTENSITY_EPSILON {
        return 0.0;
    }
    n2 * cos_t / denominator
}

impl MuellerMatrix {
    /// Reflection off an `n1 → n2` interface at `theta_i`. Under total internal
    /// reflection the result is a pure retarder carrying the TIR phase.
    pub fn fresnel_reflect(n1: f64, n2: f64, theta_i: f64) -> MuellerMatrix {
        let c = fresnel_coefficients(n1, n2, theta_i);
        jones::mueller_from_jones(&jones::diagonal(c.rp, c.rs))
    }

    /// Transmission through an `n1 → n2` interface at `theta_i`, normalized to
    /// intensity. `None` under total internal reflection.
    pub fn fresnel_transmit(n1: f64, n2: f64, theta_i: f64) -> Option<MuellerMatrix> {
        let c = fresnel_coefficients(n1, n2, theta_i);
        if c.is_tir {
            return None;
        }
        let cos_t = snell::complex_cos_theta_t(theta_i, n1, n2);
        let factor = transmission_factor(n1, n2, theta_i.cos(), cos_t.re);
        Some(jones::mueller_from_jones(&jones::diagonal(c.tp, c.ts)).scale(factor))
    }
}
