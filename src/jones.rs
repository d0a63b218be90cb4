//! Coherent (non-depolarizing) element descriptions in the Jones calculus and
//! their one-way conversion into Mueller matrices and Stokes vectors.

use nalgebra::{Matrix2, Vector2};
use num_complex::Complex;

use crate::mueller::MuellerMatrix;
use crate::stokes::StokesVector;


/// 2×2 complex Jones matrix in the `(Ex, Ey)` basis.
pub type JonesMatrix = Matrix2<Complex<f64>>;
/// Complex field amplitudes `(Ex, Ey)`.
pub type JonesVector = Vector2<Complex<f64>>;

/// Pauli basis: σ0 = I, σ1 = diag(1, -1), σ2 = [[0, 1], [1, 0]], σ3 = [[0, -i], [i, 0]].
fn pauli(index: usize) -> JonesMatrix {
    let zero = Complex::new(0.0, 0.0);
    let one = Complex::new(1.0, 0.0);
    let i = Complex::new(0.0, 1.0);
    match index {
        0 => Matrix2::new(one, zero, zero, one),
        1 => Matrix2::new(one, zero, zero, -one),
        2 => Matrix2::new(zero, one, one, zero),
        _ => Matrix2::new(zero, -i, i, zero),
    }
}

/// Converts a Jones matrix to its Mueller equivalent,
/// `M_ij = ½ Tr(σ_i J σ_j J†)`.
pub fn mueller_from_jones(jones: &JonesMatrix) -> MuellerMatrix {
    let adjoint = jones.adjoint();
    let sigma: [JonesMatrix; 4] = [pauli(0), pauli(1), pauli(2), pauli(3)];

    let mut mueller = MuellerMatrix::identity();
    for i in 0..4 {
        for j in 0..4 {
            let product = sigma[i] * jones * sigma[j] * adjoint;
            mueller.set(i, j, 0.5 * product.trace().re);
        }
    }
    mueller
}

/// Stokes vector of a fully polarized field, `S_i = E† σ_i E`.
pub fn stokes_from_jones_vector(field: &JonesVector) -> StokesVector {
    let ex = field[0];
    let ey = field[1];
    let cross = ex.conj() * ey;
    StokesVector::new(
        ex.norm_sqr() + ey.norm_sqr(),
        ex.norm_sqr() - ey.norm_sqr(),
        2.0 * cross.re,
        2.0 * cross.im,
    )
}

pub fn identity() -> JonesMatrix {
    JonesMatrix::identity()
}

/// Rotation of the field by `theta`: horizontal light ends up at angle `theta`.
pub fn rotation(theta: f64) -> JonesMatrix {
    let c = Complex::new(theta.cos(), 0.0);
    let s = Complex::new(theta.sin(), 0.0);
    Matrix2::new(c, -s, s, c)
}

/// Projector onto the linear state at `theta`.
pub fn linear_polarizer(theta: f64) -> JonesMatrix {
    let c = theta.cos();
    let s = theta.sin();
    Matrix2::new(
        Complex::new(c * c, 0.0),
        Complex::new(c * s, 0.0),
        Complex::new(c * s, 0.0),
        Complex::new(s * s, 0.0),
    )
}

/// Linear retarder with retardance `delta` and fast axis at `theta`; the slow
/// axis lags by `e^{-iδ}`.
pub fn retarder(delta: f64, theta: f64) -> JonesMatrix {
    let zero = Complex::new(0.0, 0.0);
    let local = Matrix2::new(
        Complex::new(1.0, 0.0),
        zero,
        zero,
        Complex::from_polar(1.0, -delta),
    );
    rotation(theta) * local * rotation(-theta)
}

/// Diagonal Jones matrix `diag(a, b)`.
pub fn diagonal(a: Complex<f64>, b: Complex<f64>) -> JonesMatrix {
    let zero = Complex::new(0.0, 0.0);
    Matrix2::new(a, zero, zero, b)
}

impl MuellerMatrix {
    /// See [`mueller_from_jones`].
    pub fn from_jones(jones: &JonesMatrix) -> MuellerMatrix {
        mueller_from_jones(jones)
    }
}
