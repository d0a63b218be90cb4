//! Mueller matrix algebra for polarization transformations.
//!
//! A Mueller matrix is a 4×4 real operator mapping one Stokes vector to another.
//! Unlike Jones matrices, Mueller matrices can describe depolarizing elements.
//!
//! This module provides:
//! - Element access, composition, and application to Stokes vectors
//! - Physical realizability checks and the depolarization index
//! - Factories for canonical optical elements
//! - [`chain_mueller`] for folding an optical train into one matrix
//!
//! # Composition order
//!
//! `a.mul(&b)` is `a ∘ b`: `b` acts on the light first. For light passing
//! through A, then B, then C, the combined matrix is `C·B·A`, which is what
//! `chain_mueller(&[A, B, C])` returns.

use std::fmt;
use std::ops;

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::stokes::StokesVector;


/// A 4×4 real Mueller matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 16]", into = "[f64; 16]")]
pub struct MuellerMatrix {
    inner: Matrix4<f64>,
}

impl From<[f64; 16]> for MuellerMatrix {
    fn from(values: [f64; 16]) -> Self {
        Self::from_row_major(values)
    }
}

impl From<MuellerMatrix> for [f64; 16] {
    fn from(m: MuellerMatrix) -> Self {
        m.to_row_major()
    }
}

impl From<Matrix4<f64>> for MuellerMatrix {
    fn from(inner: Matrix4<f64>) -> Self {
        Self { inner }
    }
}

impl MuellerMatrix {
    pub fn from_row_major(values: [f64; 16]) -> Self {
        Self {
            inner: Matrix4::from_row_slice(&values),
        }
    }

    pub fn to_row_major(&self) -> [f64; 16] {
        let mut out = [0.0; 16];
        for i in 0..4 {
            for j in 0..4 {
                out[4 * i + j] = self.inner[(i, j)];
            }
        }
        out
    }

    pub fn as_matrix(&self) -> &Matrix4<f64> {
        &self.inner
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.inner[(i, j)]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.inner[(i, j)] = value;
    }

    /// Returns `self ∘ other`: `other` is applied to the light first.
    pub fn mul(&self, other: &MuellerMatrix) -> MuellerMatrix {
        Self {
            inner: self.inner * other.inner,
        }
    }

    pub fn apply(&self, stokes: &StokesVector) -> StokesVector {
        StokesVector::from(self.inner * stokes.as_vector())
    }

    pub fn scale(&self, factor: f64) -> MuellerMatrix {
        Self {
            inner: self.inner * factor,
        }
    }

    pub fn add(&self, other: &MuellerMatrix) -> MuellerMatrix {
        Self {
            inner: self.inner + other.inner,
        }
    }

    pub fn transpose(&self) -> MuellerMatrix {
        Self {
            inner: self.inner.transpose(),
        }
    }

    pub fn approx_eq(&self, other: &MuellerMatrix, tol: f64) -> bool {
        self.inner
            .iter()
            .zip(other.inner.iter())
            .all(|(a, b)| (a - b).abs() <= tol)
    }

    /// Necessary (not sufficient) condition for physical realizability:
    /// `m00 ≥ 0` and every element bounded by `m00` in magnitude.
    pub fn is_physical(&self, tol: f64) -> bool {
        let m00 = self.inner[(0, 0)];
        if !self.inner.iter().all(|v| v.is_finite()) || m00 < -tol {
            return false;
        }
        self.inner.iter().all(|v| v.abs() <= m00 + tol)
    }

    /// Depolarization index in `[0, 1]`. A value of 1 means the matrix is
    /// non-depolarizing; a dark (`m00 ≈ 0`) matrix reports 0.
    pub fn depolarization_index(&self) -> f64 {
        let m00 = self.inner[(0, 0)];
        if m00.abs() < crate::config::INTENSITY_EPSILON {
            return 0.0;
        }
        let sum_sq: f64 = self.inner.iter().map(|v| v * v).sum();
        let numerator = (sum_sq - m00 * m00).max(0.0).sqrt();
        (numerator / (3f64.sqrt() * m00)).clamp(0.0, 1.0)
    }

    /// True when the matrix has an equivalent Jones representation.
    pub fn is_non_depolarizing(&self, tol: f64) -> bool {
        (self.depolarization_index() - 1.0).abs() <= tol
    }

    /// Diattenuation `D = √(m01² + m02² + m03²) / m00`, clipped to `[0, 1]`.
    pub fn diattenuation(&self) -> f64 {
        let m00 = self.inner[(0, 0)];
        if m00.abs() < crate::config::INTENSITY_EPSILON {
            return 0.0;
        }
        let d = (self.inner[(0, 1)].powi(2) + self.inner[(0, 2)].powi(2) + self.inner[(0, 3)].powi(2))
            .sqrt()
            / m00;
        d.min(1.0)
    }

    /// Polarizance `P = √(m10² + m20² + m30²) / m00`, clipped to `[0, 1]`.
    pub fn polarizance(&self) -> f64 {
        let m00 = self.inner[(0, 0)];
        if m00.abs() < crate::config::INTENSITY_EPSILON {
            return 0.0;
        }
        let p = (self.inner[(1, 0)].powi(2) + self.inner[(2, 0)].powi(2) + self.inner[(3, 0)].powi(2))
            .sqrt()
            / m00;
        p.min(1.0)
    }

    /// The same element physically rotated by `angle` about the beam axis:
    /// `R(θ)·M·R(−θ)`.
    pub fn rotated(&self, angle: f64) -> MuellerMatrix {
        Self::rotator(angle)
            .mul(self)
            .mul(&Self::rotator(-angle))
    }

    pub fn identity() -> MuellerMatrix {
        Self {
            inner: Matrix4::identity(),
        }
    }

    /// Ideal linear polarizer with transmission axis at `theta`.
    pub fn linear_polarizer(theta: f64) -> MuellerMatrix {
        let c = (2.0 * theta).cos();
        let s = (2.0 * theta).sin();
        Self::from_row_major([
            1.0, c, s, 0.0, //
            c, c * c, s * c, 0.0, //
            s, s * c, s * s, 0.0, //
            0.0, 0.0, 0.0, 0.0,
        ])
        .scale(0.5)
    }

    /// Partial linear polarizer (diattenuator) passing the axis at `theta`
    /// fully and the orthogonal axis with transmission `1 - diattenuation`.
    pub fn partial_polarizer(diattenuation: f64, theta: f64) -> MuellerMatrix {
        let t_para = 1.0;
        let t_perp = 1.0 - diattenuation.clamp(0.0, 1.0);
        let a = (t_para + t_perp) / 2.0;
        let b = (t_para - t_perp) / 2.0;
        let g = (t_para * t_perp).sqrt();
        Self::from_row_major([
            a, b, 0.0, 0.0, //
            b, a, 0.0, 0.0, //
            0.0, 0.0, g, 0.0, //
            0.0, 0.0, 0.0, g,
        ])
        .rotated(theta)
    }

    /// General linear retarder with retardance `delta` and fast axis at `theta`.
    pub fn waveplate(delta: f64, theta: f64) -> MuellerMatrix {
        let c = (2.0 * theta).cos();
        let s = (2.0 * theta).sin();
        let cd = delta.cos();
        let sd = delta.sin();
        Self::from_row_major([
            1.0, 0.0, 0.0, 0.0, //
            0.0, c * c + s * s * cd, c * s * (1.0 - cd), -s * sd, //
            0.0, c * s * (1.0 - cd), s * s + c * c * cd, c * sd, //
            0.0, s * sd, -c * sd, cd,
        ])
    }

    pub fn quarter_wave_plate(theta: f64) -> MuellerMatrix {
        Self::waveplate(std::f64::consts::FRAC_PI_2, theta)
    }

    pub fn half_wave_plate(theta: f64) -> MuellerMatrix {
        Self::waveplate(std::f64::consts::PI, theta)
    }

    /// Pure rotation of the polarization basis: `(S1, S2)` turn by `2θ`.
    pub fn rotator(theta: f64) -> MuellerMatrix {
        let c = (2.0 * theta).cos();
        let s = (2.0 * theta).sin();
        Self::from_row_major([
            1.0, 0.0, 0.0, 0.0, //
            0.0, c, -s, 0.0, //
            0.0, s, c, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ])
    }

    /// Ideal depolarizer with transmission `transmission`.
    pub fn depolarizer(transmission: f64) -> MuellerMatrix {
        let mut inner = Matrix4::zeros();
        inner[(0, 0)] = transmission;
        Self { inner }
    }

    /// Shrinks the polarized part by `1 - fraction`, leaving `S0` unchanged.
    pub fn partial_depolarizer(fraction: f64) -> MuellerMatrix {
        let keep = 1.0 - fraction;
        Self {
            inner: Matrix4::from_diagonal(&nalgebra::Vector4::new(1.0, keep, keep, keep)),
        }
    }

    /// Ideal mirror at normal incidence: reverses circular handedness.
    pub fn mirror() -> MuellerMatrix {
        Self {
            inner: Matrix4::from_diagonal(&nalgebra::Vector4::new(1.0, 1.0, 1.0, -1.0)),
        }
    }

    pub fn attenuator(transmission: f64) -> MuellerMatrix {
        Self::identity().scale(transmission)
    }
}

impl Default for MuellerMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl ops::Mul for MuellerMatrix {
    type Output = MuellerMatrix;

    fn mul(self, other: MuellerMatrix) -> MuellerMatrix {
        MuellerMatrix::mul(&self, &other)
    }
}

impl ops::Mul<StokesVector> for MuellerMatrix {
    type Output = StokesVector;

    fn mul(self, stokes: StokesVector) -> StokesVector {
        self.apply(&stokes)
    }
}

impl fmt::Display for MuellerMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..4 {
            writeln!(
                f,
                "[{:>9.5} {:>9.5} {:>9.5} {:>9.5}]",
                self.inner[(i, 0)],
                self.inner[(i, 1)],
                self.inner[(i, 2)],
                self.inner[(i, 3)]
            )?;
        }
        Ok(())
    }
}

/// Folds an optical train, listed in the order light traverses it, into one
/// matrix. `chain_mueller(&[a, b, c])` is `c·b·a`; an empty train is the identity.
pub fn chain_mueller(elements: &[MuellerMatrix]) -> MuellerMatrix {
    elements
        .iter()
        .fold(MuellerMatrix::identity(), |acc, m| m.mul(&acc))
}
