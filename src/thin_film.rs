//! Coherent thin-film interference using the characteristic matrix method.
//!
//! A stack of homogeneous layers sits between an incident medium `n1` and a
//! substrate `n2`. Each layer contributes
//!
//! ```text
//! | cos δ        i·sin δ / η |
//! | i·η·sin δ    cos δ       |      δ = 2π·n·d·cos θ / λ
//! ```
//!
//! with tilted admittance `η = n·cos θ` for s and `η = n / cos θ` for p.
//! The product applied to `[1, η_sub]` gives `[B, C]`, from which
//! `r = (η0·B − C)/(η0·B + C)` and `T = 4·η0·Re(η_sub)/|η0·B + C|²`.
//! Layer thicknesses and wavelength are in nanometres.

use nalgebra::Matrix2;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::jones;
use crate::mueller::MuellerMatrix;
use crate::snell;


/// One homogeneous layer: refractive index and physical thickness (nm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThinFilmLayer {
    pub index: f64,
    pub thickness: f64,
}

/// Layers listed from the incident side towards the substrate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ThinFilmStack {
    pub layers: Vec<ThinFilmLayer>,
}

impl ThinFilmStack {
    pub fn single(index: f64, thickness: f64) -> Self {
        Self {
            layers: vec![ThinFilmLayer { index, thickness }],
        }
    }
}

/// Amplitude and intensity coefficients of a coated interface.
///
/// `rp` uses the same sign convention as [`crate::fresnel::FresnelCoefficients`].
/// The transmitted amplitudes are normalized so that `|t|² = T`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThinFilmCoefficients {
    pub rs: Complex<f64>,
    pub rp: Complex<f64>,
    pub ts: Complex<f64>,
    pub tp: Complex<f64>,
    pub reflectance_s: f64,
    pub reflectance_p: f64,
    pub transmittance_s: f64,
    pub transmittance_p: f64,
    /// Light cannot propagate in the substrate.
    pub is_tir: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Polarization {
    S,
    P,
}

fn admittance(n: f64, cos_theta: Complex<f64>, pol: Polarization) -> Complex<f64> {
    match pol {
        Polarization::S => n * cos_theta,
        Polarization::P => n / cos_theta,
    }
}

/// Returns `(r, t, T)` for one polarization, where `t` has modulus `√T`.
fn solve(
    stack: &ThinFilmStack,
    n1: f64,
    n2: f64,
    theta_i: f64,
    wavelength: f64,
    pol: Polarization,
) -> (Complex<f64>, Complex<f64>, f64) {
    let one = Complex::new(1.0, 0.0);
    let i = Complex::new(0.0, 1.0);

    let eta_0 = admittance(n1, Complex::new(theta_i.cos(), 0.0), pol);
    let eta_sub = admittance(n2, snell::complex_cos_theta_t(theta_i, n1, n2), pol);

    let mut characteristic = Matrix2::new(one, Complex::new(0.0, 0.0), Complex::new(0.0, 0.0), one);
    for layer in &stack.layers {
        let cos_j = snell::complex_cos_theta_t(theta_i, n1, layer.index);
        let eta_j = admittance(layer.index, cos_j, pol);
        let delta = 2.0 * std::f64::consts::PI * layer.index * layer.thickness * cos_j / wavelength;
        let layer_matrix = Matrix2::new(
            delta.cos(),
            i * delta.sin() / eta_j,
            i * eta_j * delta.sin(),
            delta.cos(),
        );
        characteristic *= layer_matrix;
    }

    let b = characteristic[(0, 0)] + characteristic[(0, 1)] * eta_sub;
    let c = characteristic[(1, 0)] + characteristic[(1, 1)] * eta_sub;
    let denominator = eta_0 * b + c;

    let r = (eta_0 * b - c) / denominator;
    let transmittance = (4.0 * eta_0.re * eta_sub.re / denominator.norm_sqr()).max(0.0);
    let t_phase = (2.0 * eta_0 / denominator).arg();
    let t = Complex::from_polar(transmittance.sqrt(), t_phase);

    match pol {
        Polarization::S => (r, t, transmittance),
        // tilted p admittances flip the sign of r relative to the Fresnel rp
        Polarization::P => (-r, t, transmittance),
    }
}

/// Coefficients for light going from `n1` through `stack` into substrate `n2`.
pub fn thin_film_coefficients(
    stack: &ThinFilmStack,
    n1: f64,
    n2: f64,
    theta_i: f64,
    wavelength: f64,
) -> ThinFilmCoefficients {
    let is_tir = snell::is_total_internal_reflection(theta_i, n1, n2);
    let (rs, ts, t_s) = solve(stack, n1, n2, theta_i, wavelength, Polarization::S);
    let (rp, tp, t_p) = solve(stack, n1, n2, theta_i, wavelength, Polarization::P);

    ThinFilmCoefficients {
        rs,
        rp,
        ts,
        tp,
        reflectance_s: rs.norm_sqr(),
        reflectance_p: rp.norm_sqr(),
        transmittance_s: if is_tir { 0.0 } else { t_s },
        transmittance_p: if is_tir { 0.0 } else { t_p },
        is_tir,
    }
}

/// `λ / (4n)`: the thickness giving a quarter-wave optical path at normal incidence.
pub fn quarter_wave_thickness(wavelength: f64, n: f64) -> f64 {
    wavelength / (4.0 * n)
}

/// Single-layer anti-reflection coating between `n1` and `n2` at `wavelength`.
pub fn ideal_ar_coating(wavelength: f64, n1: f64, n2: f64) -> ThinFilmStack {
    let n_film = (n1 * n2).sqrt();
    ThinFilmStack::single(n_film, quarter_wave_thickness(wavelength, n_film))
}

impl MuellerMatrix {
    pub fn thin_film_reflect(
        stack: &ThinFilmStack,
        n1: f64,
        n2: f64,
        theta_i: f64,
        wavelength: f64,
    ) -> MuellerMatrix {
        let c = thin_film_coefficients(stack, n1, n2, theta_i, wavelength);
        jones::mueller_from_jones(&jones::diagonal(c.rp, c.rs))
    }

    /// `None` when the substrate is beyond its critical angle.
    pub fn thin_film_transmit(
        stack: &ThinFilmStack,
        n1: f64,
        n2: f64,
        theta_i: f64,
        wavelength: f64,
    ) -> Option<MuellerMatrix> {
        let c = thin_film_coefficients(stack, n1, n2, theta_i, wavelength);
        if c.is_tir {
            return None;
        }
        Some(jones::mueller_from_jones(&jones::diagonal(c.tp, c.ts)))
    }
}
