//! Stokes vector representation of partially polarized light.
//!
//! A Stokes vector `(S0, S1, S2, S3)` describes the intensity and polarization
//! state of a beam with four real numbers that are directly measurable:
//! - `S0`: total intensity
//! - `S1`: horizontal minus vertical preference
//! - `S2`: +45° minus -45° preference
//! - `S3`: right minus left circular preference
//!
//! The physical realizability condition is `S1² + S2² + S3² ≤ S0²`. Validation
//! and clamping are kept as separate pure functions so that a composition bug
//! can be detected before it is silently corrected.
//!
//! All angles are in radians.

use std::fmt;
use std::ops;

use nalgebra::Vector4;
use serde::{Deserialize, Serialize};

use crate::config;

#[cfg(test)]
mod tests {

    use super::*;
    use std::f64::consts::PI;

    const TOL: f64 = 1e-12;

    #[test]
    fn named_states_are_fully_polarized() {
        for s in [
            StokesVector::horizontal(1.0),
            StokesVector::vertical(1.0),
            StokesVector::diagonal(1.0),
            StokesVector::anti_diagonal(1.0),
            StokesVector::right_circular(1.0),
            StokesVector::left_circular(1.0),
            StokesVector::elliptical(2.0, 0.3, 0.2),
        ] {
            assert!((s.degree_of_polarization() - 1.0).abs() < TOL, "{}", s);
            assert!(s.validate(config::PHYSICAL_TOLERANCE));
        }
        assert_eq!(StokesVector::unpolarized(1.0).degree_of_polarization(), 0.0);
    }

    #[test]
    fn zero_intensity_has_zero_dop() {
        let s = StokesVector::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(s.degree_of_polarization(), 0.0);
        assert_eq!(s.degree_of_linear_polarization(), 0.0);
        assert_eq!(s.degree_of_circular_polarization(), 0.0);
    }

    #[test]
    fn angle_of_linear_polarization_is_normalized() {
        let s = StokesVector::linear(1.0, -PI / 8.0);
        let aolp = s.angle_of_linear_polarization();
        assert!((aolp - 7.0 * PI / 8.0).abs() < 1e-12, "aolp: {}", aolp);
        assert!((StokesVector::vertical(1.0).angle_of_linear_polarization() - PI / 2.0).abs() < TOL);
    }

    #[test]
    fn handedness_follows_s3_sign() {
        assert_eq!(StokesVector::right_circular(1.0).handedness(), Handedness::Right);
        assert_eq!(StokesVector::left_circular(1.0).handedness(), Handedness::Left);
        assert_eq!(StokesVector::horizontal(1.0).handedness(), Handedness::None);
    }

    #[test]
    fn ellipticity_angle_of_circular_light() {
        let s = StokesVector::right_circular(3.0);
        assert!((s.ellipticity_angle() - PI / 4.0).abs() < TOL);
    }

    #[test]
    fn clamp_rescales_polarized_part() {
        let bad = StokesVector::new(1.0, 2.0, 0.0, 0.0);
        assert!(!bad.validate(config::PHYSICAL_TOLERANCE));
        let clamped = bad.clamp_to_physical();
        assert!(clamped.validate(config::PHYSICAL_TOLERANCE));
        assert!(clamped.approx_eq(&StokesVector::new(1.0, 1.0, 0.0, 0.0), TOL));
    }

    #[test]
    fn clamp_negative_intensity() {
        let bad = StokesVector::new(-0.5, 0.1, 0.0, 0.0);
        let clamped = bad.clamp_to_physical();
        assert_eq!(clamped, StokesVector::new(0.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn decompose_sums_to_original() {
        let s = StokesVector::partially_polarized(2.0, 0.4, 0.3, -0.1);
        let (pol, unpol) = s.decompose();
        assert!((pol + unpol).approx_eq(&s, 1e-12));
        assert!((pol.degree_of_polarization() - 1.0).abs() < 1e-12);
        assert!(unpol.degree_of_polarization() < 1e-12);
    }

    #[test]
    fn from_intensities_recovers_horizontal() {
        let s = StokesVector::from_intensities(1.0, 0.0, 0.5, 0.5, 0.5, 0.5);
        assert!(s.approx_eq(&StokesVector::horizontal(1.0), TOL));
    }

    #[test]
    fn to_jones_rejects_partial_polarization() {
        assert!(StokesVector::partially_polarized(1.0, 0.5, 0.0, 0.0).to_jones().is_none());
        let jones = StokesVector::diagonal(1.0).to_jones().unwrap();
        let back = StokesVector::from_jones(&jones);
        assert!(back.approx_eq(&StokesVector::diagonal(1.0), 1e-12));
    }

    #[test]
    fn serializes_as_tuple() {
        let s = StokesVector::new(1.0, 0.5, 0.0, -0.5);
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "[1.0,0.5,0.0,-0.5]");
        let back: StokesVector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}

/// Circular handedness of a polarization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handedness {
    Right,
    Left,
    None,
}

/// A Stokes vector `(S0, S1, S2, S3)`.
///
/// Immutable value type: every operation returns a new vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct StokesVector {
    inner: Vector4<f64>,
}

impl From<[f64; 4]> for StokesVector {
    fn from(s: [f64; 4]) -> Self {
        Self::new(s[0], s[1], s[2], s[3])
    }
}

impl From<StokesVector> for [f64; 4] {
    fn from(s: StokesVector) -> Self {
        s.to_array()
    }
}

impl From<Vector4<f64>> for StokesVector {
    fn from(inner: Vector4<f64>) -> Self {
        Self { inner }
    }
}

impl StokesVector {
    pub fn new(s0: f64, s1: f64, s2: f64, s3: f64) -> Self {
        Self {
            inner: Vector4::new(s0, s1, s2, s3),
        }
    }

    pub fn unpolarized(intensity: f64) -> Self {
        Self::new(intensity, 0.0, 0.0, 0.0)
    }

    pub fn horizontal(intensity: f64) -> Self {
        Self::new(intensity, intensity, 0.0, 0.0)
    }

    pub fn vertical(intensity: f64) -> Self {
        Self::new(intensity, -intensity, 0.0, 0.0)
    }

    /// Linear polarization at +45°.
    pub fn diagonal(intensity: f64) -> Self {
        Self::new(intensity, 0.0, intensity, 0.0)
    }

    /// Linear polarization at -45°.
    pub fn anti_diagonal(intensity: f64) -> Self {
        Self::new(intensity, 0.0, -intensity, 0.0)
    }

    pub fn right_circular(intensity: f64) -> Self {
        Self::new(intensity, 0.0, 0.0, intensity)
    }

    pub fn left_circular(intensity: f64) -> Self {
        Self::new(intensity, 0.0, 0.0, -intensity)
    }

    /// Fully polarized linear light with its plane of polarization at `angle`.
    pub fn linear(intensity: f64, angle: f64) -> Self {
        Self::elliptical(intensity, angle, 0.0)
    }

    /// Fully polarized elliptical light with orientation `psi` and ellipticity angle `chi`.
    pub fn elliptical(intensity: f64, psi: f64, chi: f64) -> Self {
        Self::partially_polarized(intensity, 1.0, psi, chi)
    }

    /// Light with degree of polarization `dop` whose polarized part has
    /// orientation `psi` and ellipticity angle `chi`.
    pub fn partially_polarized(intensity: f64, dop: f64, psi: f64, chi: f64) -> Self {
        let p = intensity * dop;
        Self::new(
            intensity,
            p * (2.0 * chi).cos() * (2.0 * psi).cos(),
            p * (2.0 * chi).cos() * (2.0 * psi).sin(),
            p * (2.0 * chi).sin(),
        )
    }

    /// Builds a Stokes vector from six analyzer measurements. `S0` is the mean
    /// of the three independent estimates of the total intensity.
    pub fn from_intensities(
        i_h: f64,
        i_v: f64,
        i_45: f64,
        i_m45: f64,
        i_r: f64,
        i_l: f64,
    ) -> Self {
        let s0 = (i_h + i_v + i_45 + i_m45 + i_r + i_l) / 3.0;
        Self::new(s0, i_h - i_v, i_45 - i_m45, i_r - i_l)
    }

    /// Stokes vector of a fully polarized Jones vector `(Ex, Ey)`.
    pub fn from_jones(jones: &crate::jones::JonesVector) -> Self {
        crate::jones::stokes_from_jones_vector(jones)
    }

    pub fn s0(&self) -> f64 {
        self.inner[0]
    }

    pub fn s1(&self) -> f64 {
        self.inner[1]
    }

    pub fn s2(&self) -> f64 {
        self.inner[2]
    }

    pub fn s3(&self) -> f64 {
        self.inner[3]
    }

    pub fn as_vector(&self) -> &Vector4<f64> {
        &self.inner
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.inner[0], self.inner[1], self.inner[2], self.inner[3]]
    }

    pub fn intensity(&self) -> f64 {
        self.s0()
    }

    fn polarized_norm(&self) -> f64 {
        (self.s1().powi(2) + self.s2().powi(2) + self.s3().powi(2)).sqrt()
    }

    pub fn degree_of_polarization(&self) -> f64 {
        if self.s0().abs() < config::INTENSITY_EPSILON {
            return 0.0;
        }
        self.polarized_norm() / self.s0()
    }

    pub fn degree_of_linear_polarization(&self) -> f64 {
        if self.s0().abs() < config::INTENSITY_EPSILON {
            return 0.0;
        }
        (self.s1().powi(2) + self.s2().powi(2)).sqrt() / self.s0()
    }

    pub fn degree_of_circular_polarization(&self) -> f64 {
        if self.s0().abs() < config::INTENSITY_EPSILON {
            return 0.0;
        }
        self.s3().abs() / self.s0()
    }

    /// Orientation of the polarization ellipse in `[0, π)`.
    pub fn angle_of_linear_polarization(&self) -> f64 {
        let angle = 0.5 * self.s2().atan2(self.s1());
        let normalized = angle.rem_euclid(std::f64::consts::PI);
        // rem_euclid can round up to exactly π for tiny negative inputs
        if normalized >= std::f64::consts::PI {
            0.0
        } else {
            normalized
        }
    }

    /// Ellipticity angle `χ = ½·asin(S3/S0)`, zero for a dark beam.
    pub fn ellipticity_angle(&self) -> f64 {
        if self.s0().abs() < config::INTENSITY_EPSILON {
            return 0.0;
        }
        0.5 * (self.s3() / self.s0()).clamp(-1.0, 1.0).asin()
    }

    pub fn handedness(&self) -> Handedness {
        let scale = self.s0().abs().max(config::INTENSITY_EPSILON);
        if self.s3().abs() <= config::HANDEDNESS_EPSILON * scale {
            Handedness::None
        } else if self.s3() > 0.0 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }

    /// Checks physical realizability: `S0 ≥ 0` and `S1²+S2²+S3² ≤ S0²`, both within `tol`.
    pub fn validate(&self, tol: f64) -> bool {
        if !self.inner.iter().all(|v| v.is_finite()) {
            return false;
        }
        let polarized_sq = self.s1().powi(2) + self.s2().powi(2) + self.s3().powi(2);
        self.s0() >= -tol && polarized_sq <= self.s0().powi(2) + tol
    }

    /// Returns the nearest physically realizable vector with the same total
    /// intensity and polarization direction. A negative `S0` becomes a dark beam.
    pub fn clamp_to_physical(&self) -> Self {
        if self.s0() <= 0.0 {
            return Self::new(0.0, 0.0, 0.0, 0.0);
        }
        let p = self.polarized_norm();
        if p <= self.s0() {
            return *self;
        }
        let k = self.s0() / p;
        Self::new(self.s0(), self.s1() * k, self.s2() * k, self.s3() * k)
    }

    pub fn add(&self, other: &StokesVector) -> Self {
        Self {
            inner: self.inner + other.inner,
        }
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self {
            inner: self.inner * factor,
        }
    }

    pub fn approx_eq(&self, other: &StokesVector, tol: f64) -> bool {
        self.inner
            .iter()
            .zip(other.inner.iter())
            .all(|(a, b)| (a - b).abs() <= tol)
    }

    /// Normalized Poincaré sphere coordinates `(s1, s2, s3)`; the distance from
    /// the origin equals the degree of polarization.
    pub fn to_poincare(&self) -> (f64, f64, f64) {
        if self.s0().abs() < config::INTENSITY_EPSILON {
            return (0.0, 0.0, 0.0);
        }
        (
            self.s1() / self.s0(),
            self.s2() / self.s0(),
            self.s3() / self.s0(),
        )
    }

    /// Splits the beam into a fully polarized and an unpolarized part.
    pub fn decompose(&self) -> (StokesVector, StokesVector) {
        let p = self.polarized_norm();
        (
            Self::new(p, self.s1(), self.s2(), self.s3()),
            Self::unpolarized(self.s0() - p),
        )
    }

    /// Jones vector of a fully polarized state. Returns `None` when the degree
    /// of polarization is below 0.99, since Jones calculus cannot describe it.
    pub fn to_jones(&self) -> Option<crate::jones::JonesVector> {
        use nalgebra::{Complex, Vector2};

        if self.degree_of_polarization() < 0.99 {
            return None;
        }
        let ex = ((self.s0() + self.s1()) / 2.0).max(0.0).sqrt();
        let ey = ((self.s0() - self.s1()) / 2.0).max(0.0).sqrt();
        let phase = if ex < 1e-10 || ey < 1e-10 {
            0.0
        } else {
            self.s3().atan2(self.s2())
        };
        Some(Vector2::new(
            Complex::new(ex, 0.0),
            Complex::from_polar(ey, phase),
        ))
    }
}

impl ops::Add for StokesVector {
    type Output = StokesVector;

    fn add(self, other: StokesVector) -> StokesVector {
        StokesVector::add(&self, &other)
    }
}

impl ops::Mul<f64> for StokesVector {
    type Output = StokesVector;

    fn mul(self, factor: f64) -> StokesVector {
        self.scale(factor)
    }
}

impl fmt::Display for StokesVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stokes(S0={:.4}, S1={:.4}, S2={:.4}, S3={:.4}, DoP={:.4})",
            self.s0(),
            self.s1(),
            self.s2(),
            self.s3(),
            self.degree_of_polarization()
        )
    }
}
