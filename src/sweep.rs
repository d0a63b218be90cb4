//! Reflectance and transmittance tables over incidence angle.

use std::f64::consts::FRAC_PI_2;
use std::io::Write;

use anyhow::{Context, Result};
use ndarray::Array1;
use rayon::prelude::*;
use serde::Serialize;

use crate::fresnel::fresnel_coefficients;
use crate::thin_film::{thin_film_coefficients, ThinFilmStack};


/// One angle of a sweep. Powers are fractions of the incident intensity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepRow {
    pub angle: f64,
    pub reflectance_s: f64,
    pub reflectance_p: f64,
    pub transmittance_s: f64,
    pub transmittance_p: f64,
}

/// `samples` evenly spaced incidence angles from 0 to π/2 inclusive.
pub fn angles(samples: usize) -> Array1<f64> {
    Array1::linspace(0.0, FRAC_PI_2, samples.max(2))
}

pub fn fresnel_sweep(n1: f64, n2: f64, samples: usize) -> Vec<SweepRow> {
    angles(samples)
        .to_vec()
        .into_par_iter()
        .map(|angle| {
            let c = fresnel_coefficients(n1, n2, angle);
            SweepRow {
                angle,
                reflectance_s: c.reflectance_s,
                reflectance_p: c.reflectance_p,
                transmittance_s: c.transmittance_s,
                transmittance_p: c.transmittance_p,
            }
        })
        .collect()
}

pub fn thin_film_sweep(
    stack: &ThinFilmStack,
    n1: f64,
    n2: f64,
    wavelength: f64,
    samples: usize,
) -> Vec<SweepRow> {
    angles(samples)
        .to_vec()
        .into_par_iter()
        .map(|angle| {
            let c = thin_film_coefficients(stack, n1, n2, angle, wavelength);
            SweepRow {
                angle,
                reflectance_s: c.reflectance_s,
                reflectance_p: c.reflectance_p,
                transmittance_s: c.transmittance_s,
                transmittance_p: c.transmittance_p,
            }
        })
        .collect()
}

/// Writes a whitespace-separated table with a header line.
pub fn write_table<W: Write>(rows: &[SweepRow], mut writer: W) -> Result<()> {
    writeln!(writer, "angle_deg    Rs           Rp           Ts           Tp")
        .context("Failed to write sweep header")?;
    for row in rows {
        writeln!(
            writer,
            "{:<12.4} {:<12.6} {:<12.6} {:<12.6} {:<12.6}",
            row.angle.to_degrees(),
            row.reflectance_s,
            row.reflectance_p,
            row.transmittance_s,
            row.transmittance_p
        )
        .context("Failed to write sweep row")?;
    }
    Ok(())
}
