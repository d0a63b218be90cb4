use nalgebra::{Point3, Vector3};

use crate::geom::Ray;
use crate::stokes::StokesVector;

/// A beam waiting on the engine's work list.
#[derive(Debug, Clone, PartialEq)]
pub struct Beam {
    pub origin: Point3<f64>,
    pub prop: Vector3<f64>, // unit propagation direction
    pub stokes: StokesVector,
    pub wavelength: f64,
    pub depth: u32,     // device interactions so far
    pub source: usize,  // index of the emitting device
    /// Devices already processed at `origin`, so co-located devices are each
    /// handled once before the beam moves on.
    pub visited_here: Vec<usize>,
}

impl Beam {
    pub fn new_initial(
        origin: Point3<f64>,
        prop: Vector3<f64>,
        stokes: StokesVector,
        wavelength: f64,
        source: usize,
    ) -> Self {
        Self {
            origin,
            prop,
            stokes,
            wavelength,
            depth: 0,
            source,
            visited_here: vec![source],
        }
    }

    pub fn ray(&self) -> Ray {
        Ray::new(self.origin, self.prop)
    }

    pub fn power(&self) -> f64 {
        self.stokes.intensity()
    }

    /// The beam leaving a device hit at `hit_point`.
    pub fn outgoing(
        &self,
        hit_point: Point3<f64>,
        prop: Vector3<f64>,
        stokes: StokesVector,
        visited_here: Vec<usize>,
    ) -> Self {
        Self {
            origin: hit_point,
            prop,
            stokes,
            wavelength: self.wavelength,
            depth: self.depth + 1,
            source: self.source,
            visited_here,
        }
    }
}
