//! Ray and device geometry.
//!
//! Devices are flat discs described by a center, a unit normal and an aperture
//! radius. The scene is bounded by an axis-aligned box.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::config;


/// Half-line from `origin` along unit `direction`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Point3<f64>,
    pub direction: Vector3<f64>,
}

impl Ray {
    pub fn new(origin: Point3<f64>, direction: Vector3<f64>) -> Self {
        Self { origin, direction }
    }

    pub fn at(&self, distance: f64) -> Point3<f64> {
        self.origin + self.direction * distance
    }
}

/// Distance along `ray` to a disc of `radius` centered at `center`, or `None`
/// if the ray misses, is parallel to the disc, or the hit is closer than
/// `min_distance`. A small negative `min_distance` admits discs passing
/// through the ray origin.
pub fn intersect_disc(
    ray: &Ray,
    center: &Point3<f64>,
    normal: &Vector3<f64>,
    radius: f64,
    min_distance: f64,
) -> Option<f64> {
    let denom = ray.direction.dot(normal);
    if denom.abs() < config::PARALLEL_THRESHOLD {
        return None;
    }
    let distance = (*center - ray.origin).dot(normal) / denom;
    if distance < min_distance {
        return None;
    }
    let offset = ray.at(distance) - *center;
    if offset.norm() > radius {
        return None;
    }
    Some(distance)
}

/// Mirror reflection of `direction` about the plane with `normal`.
pub fn reflect(direction: &Vector3<f64>, normal: &Vector3<f64>) -> Vector3<f64> {
    *direction - *normal * (2.0 * direction.dot(normal))
}

/// Angle between the ray and the surface normal, in `[0, π/2]`.
pub fn incidence_angle(direction: &Vector3<f64>, normal: &Vector3<f64>) -> f64 {
    direction.dot(normal).abs().clamp(0.0, 1.0).acos()
}

/// Unit vector from a wire triple, or `None` if degenerate or non-finite.
pub fn normalized(v: [f64; 3]) -> Option<Vector3<f64>> {
    let v = Vector3::from(v);
    if !v.iter().all(|x| x.is_finite()) {
        return None;
    }
    let norm = v.norm();
    if norm < config::VEC_LENGTH_THRESHOLD {
        return None;
    }
    Some(v / norm)
}

/// Any vector perpendicular to `v`, used to displace walk-off rays.
pub fn perpendicular(v: &Vector3<f64>) -> Vector3<f64> {
    let helper = if v.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    v.cross(&helper).normalize()
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "BoxBounds", into = "BoxBounds")]
pub struct AABB {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

#[derive(Serialize, Deserialize)]
struct BoxBounds {
    min: [f64; 3],
    max: [f64; 3],
}

impl From<BoxBounds> for AABB {
    fn from(b: BoxBounds) -> Self {
        AABB::new(Point3::from(b.min), Point3::from(b.max))
    }
}

impl From<AABB> for BoxBounds {
    fn from(b: AABB) -> Self {
        BoxBounds {
            min: [b.min.x, b.min.y, b.min.z],
            max: [b.max.x, b.max.y, b.max.z],
        }
    }
}

impl AABB {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        (0..3).all(|i| {
            self.min[i].is_finite() && self.max[i].is_finite() && self.min[i] < self.max[i]
        })
    }

    pub fn contains(&self, p: &Point3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// Distance along `ray` at which it leaves the box (slab method).
    /// Non-positive if the origin is already outside and moving away.
    pub fn exit_distance(&self, ray: &Ray) -> f64 {
        let mut t_exit = f64::INFINITY;
        for i in 0..3 {
            let d = ray.direction[i];
            if d.abs() < config::PARALLEL_THRESHOLD {
                if ray.origin[i] < self.min[i] || ray.origin[i] > self.max[i] {
                    return 0.0;
                }
                continue;
            }
            let bound = if d > 0.0 { self.max[i] } else { self.min[i] };
            t_exit = t_exit.min((bound - ray.origin[i]) / d);
        }
        t_exit
    }
}
