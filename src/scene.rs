//! Declarative scene description.
//!
//! [`SerializedSceneGraph`] is what crosses the wire: device and splitter types
//! are plain strings and every config field is optional. Converting it into a
//! [`SceneGraph`] validates the whole snapshot at once and fills defaults from
//! [`Settings`], so the engine only ever sees complete, well-formed scenes.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use itertools::Itertools;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;
use crate::geom::{self, AABB};
use crate::protocol::ErrorCode;
use crate::settings::Settings;
use crate::thin_film::ThinFilmStack;


/// Closed set of device kinds. Wire names are camelCase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceType {
    Emitter,
    Polarizer,
    QuarterWavePlate,
    HalfWavePlate,
    GeneralRetarder,
    Rotator,
    Mirror,
    Splitter,
    Attenuator,
    Sensor,
    Depolarizer,
    Lens,
    ThinFilm,
}

impl DeviceType {
    pub const ALL: [DeviceType; 13] = [
        DeviceType::Emitter,
        DeviceType::Polarizer,
        DeviceType::QuarterWavePlate,
        DeviceType::HalfWavePlate,
        DeviceType::GeneralRetarder,
        DeviceType::Rotator,
        DeviceType::Mirror,
        DeviceType::Splitter,
        DeviceType::Attenuator,
        DeviceType::Sensor,
        DeviceType::Depolarizer,
        DeviceType::Lens,
        DeviceType::ThinFilm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DeviceType::Emitter => "emitter",
            DeviceType::Polarizer => "polarizer",
            DeviceType::QuarterWavePlate => "quarterWavePlate",
            DeviceType::HalfWavePlate => "halfWavePlate",
            DeviceType::GeneralRetarder => "generalRetarder",
            DeviceType::Rotator => "rotator",
            DeviceType::Mirror => "mirror",
            DeviceType::Splitter => "splitter",
            DeviceType::Attenuator => "attenuator",
            DeviceType::Sensor => "sensor",
            DeviceType::Depolarizer => "depolarizer",
            DeviceType::Lens => "lens",
            DeviceType::ThinFilm => "thinFilm",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        DeviceType::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or(())
    }
}

/// Parsed from the wire string in `splitType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitType {
    /// Polarizing beam splitter.
    Pbs,
    /// Non-polarizing beam splitter.
    Npbs,
    /// Birefringent calcite displacer.
    Calcite,
}

impl FromStr for SplitType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PBS" => Ok(SplitType::Pbs),
            "NPBS" => Ok(SplitType::Npbs),
            "Calcite" => Ok(SplitType::Calcite),
            _ => Err(()),
        }
    }
}

/// Optional per-device parameters; which ones matter depends on the device type.
/// Angles in radians, lengths along the beam in nm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceParams {
    pub angle: Option<f64>,
    pub polarization_angle: Option<f64>,
    pub unpolarized: Option<bool>,
    pub ellipticity: Option<f64>,
    pub intensity: Option<f64>,
    pub wavelength: Option<f64>,
    pub retardance: Option<f64>,
    pub birefringence: Option<f64>,
    pub thickness: Option<f64>,
    pub transmission: Option<f64>,
    pub depolarization: Option<f64>,
    pub n1: Option<f64>,
    pub n2: Option<f64>,
    pub split_type: Option<String>,
    pub split_ratio: Option<f64>,
    pub walk_off: Option<f64>,
    pub thin_film: Option<ThinFilmStack>,
    pub reflective: Option<bool>,
    pub threshold: Option<f64>,
    pub acceptance_angle: Option<f64>,
    pub transmissive: Option<bool>,
    pub aperture: Option<f64>,
    pub focal_length: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedDevice {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub position: [f64; 3],
    pub normal: [f64; 3],
    #[serde(default)]
    pub params: DeviceParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SerializedConfig {
    pub max_bounces: Option<u32>,
    pub intensity_threshold: Option<f64>,
    pub scene_boundary: Option<AABB>,
    pub enable_surrogate: Option<bool>,
    pub max_segments: Option<usize>,
}

/// Wire form of a scene snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedSceneGraph {
    pub version: u64,
    pub devices: Vec<SerializedDevice>,
    #[serde(default)]
    pub config: SerializedConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    pub max_bounces: u32,
    pub intensity_threshold: f64,
    pub scene_boundary: AABB,
    pub enable_surrogate: bool,
    pub max_segments: usize,
}

/// A validated device. `normal` is unit length and every default the engine
/// relies on (`aperture`, emitter `wavelength`, sensor limits) is filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub device_type: DeviceType,
    pub position: Point3<f64>,
    pub normal: Vector3<f64>,
    pub params: DeviceParams,
    pub split_type: Option<SplitType>,
    pub aperture: f64,
}

/// Immutable, validated scene snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneGraph {
    pub version: u64,
    pub devices: Vec<Device>,
    pub config: SimulationConfig,
}

/// Structural problems found while validating a scene.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("Device '{id}' has unknown type '{kind}'")]
    UnknownDeviceType { id: String, kind: String },

    #[error("Splitter '{id}' has unknown split type '{split}'. Expected PBS, NPBS or Calcite.")]
    UnknownSplitType { id: String, split: String },

    #[error("Device id '{id}' is declared more than once")]
    DuplicateDeviceId { id: String },

    #[error("Invalid geometry for '{id}': {reason}")]
    InvalidGeometry { id: String, reason: String },

    #[error("Invalid parameter for '{id}': {reason}")]
    InvalidParameter { id: String, reason: String },
}

impl SceneError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SceneError::UnknownDeviceType { .. } => ErrorCode::UnknownDeviceType,
            SceneError::UnknownSplitType { .. } => ErrorCode::UnknownSplitType,
            SceneError::DuplicateDeviceId { .. } => ErrorCode::DuplicateDeviceId,
            SceneError::InvalidGeometry { .. } => ErrorCode::InvalidGeometry,
            SceneError::InvalidParameter { .. } => ErrorCode::InvalidParameter,
        }
    }
}

fn invalid(id: &str, reason: impl Into<String>) -> SceneError {
    SceneError::InvalidParameter {
        id: id.to_string(),
        reason: reason.into(),
    }
}

/// Checks that an optional value is finite and inside `[lo, hi]`.
fn check_range(id: &str, name: &str, value: Option<f64>, lo: f64, hi: f64) -> Result<(), SceneError> {
    match value {
        Some(v) if !v.is_finite() || v < lo || v > hi => Err(invalid(
            id,
            format!("{} = {} is outside [{}, {}]", name, v, lo, hi),
        )),
        _ => Ok(()),
    }
}

fn check_finite(id: &str, name: &str, value: Option<f64>) -> Result<(), SceneError> {
    check_range(id, name, value, f64::NEG_INFINITY, f64::INFINITY)
}

fn check_positive(id: &str, name: &str, value: Option<f64>) -> Result<(), SceneError> {
    match value {
        Some(v) if !(v > 0.0) || !v.is_finite() => {
            Err(invalid(id, format!("{} = {} must be positive", name, v)))
        }
        _ => Ok(()),
    }
}

fn validate_params(id: &str, device_type: DeviceType, p: &DeviceParams) -> Result<(), SceneError> {
    for (name, value) in [
        ("angle", p.angle),
        ("polarizationAngle", p.polarization_angle),
        ("ellipticity", p.ellipticity),
        ("retardance", p.retardance),
        ("birefringence", p.birefringence),
        ("walkOff", p.walk_off),
        ("focalLength", p.focal_length),
    ] {
        check_finite(id, name, value)?;
    }
    for (name, value) in [
        ("intensity", p.intensity),
        ("transmission", p.transmission),
        ("depolarization", p.depolarization),
        ("splitRatio", p.split_ratio),
    ] {
        check_range(id, name, value, 0.0, 1.0)?;
    }
    for (name, value) in [
        ("wavelength", p.wavelength),
        ("n1", p.n1),
        ("n2", p.n2),
        ("aperture", p.aperture),
    ] {
        check_positive(id, name, value)?;
    }
    check_range(id, "thickness", p.thickness, 0.0, f64::INFINITY)?;
    check_range(id, "threshold", p.threshold, 0.0, f64::INFINITY)?;
    check_range(id, "acceptanceAngle", p.acceptance_angle, 0.0, std::f64::consts::PI)?;

    if let Some(stack) = &p.thin_film {
        for layer in &stack.layers {
            check_positive(id, "layer index", Some(layer.index))?;
            check_range(id, "layer thickness", Some(layer.thickness), 0.0, f64::INFINITY)?;
        }
    }

    match device_type {
        DeviceType::GeneralRetarder => {
            if p.retardance.is_none() && (p.birefringence.is_none() || p.thickness.is_none()) {
                return Err(invalid(
                    id,
                    "generalRetarder needs retardance, or birefringence and thickness",
                ));
            }
        }
        DeviceType::ThinFilm => {
            if p.thin_film.is_none() {
                return Err(invalid(id, "thinFilm device needs a thinFilm layer stack"));
            }
        }
        _ => {}
    }
    Ok(())
}

impl Device {
    fn from_serialized(wire: SerializedDevice, settings: &Settings) -> Result<Device, SceneError> {
        let id = wire.id;
        if id.is_empty() {
            return Err(invalid(&id, "device id must not be empty"));
        }

        let device_type =
            DeviceType::from_str(&wire.device_type).map_err(|_| SceneError::UnknownDeviceType {
                id: id.clone(),
                kind: wire.device_type.clone(),
            })?;

        if !wire.position.iter().all(|x| x.is_finite()) {
            return Err(SceneError::InvalidGeometry {
                id,
                reason: format!("position {:?} is not finite", wire.position),
            });
        }
        let Some(normal) = geom::normalized(wire.normal) else {
            return Err(SceneError::InvalidGeometry {
                id,
                reason: format!("normal {:?} is degenerate", wire.normal),
            });
        };

        let mut params = wire.params;
        validate_params(&id, device_type, &params)?;

        let split_type = match (device_type, &params.split_type) {
            (DeviceType::Splitter, None) => {
                return Err(invalid(&id, "splitter needs a splitType"));
            }
            (DeviceType::Splitter, Some(name)) => {
                Some(SplitType::from_str(name).map_err(|_| SceneError::UnknownSplitType {
                    id: id.clone(),
                    split: name.clone(),
                })?)
            }
            _ => None,
        };

        match device_type {
            DeviceType::Emitter => {
                params.wavelength.get_or_insert(settings.wavelength);
                params.intensity.get_or_insert(1.0);
            }
            DeviceType::Sensor => {
                params.threshold.get_or_insert(settings.sensor_threshold);
                params.acceptance_angle.get_or_insert(settings.acceptance_angle);
            }
            DeviceType::Splitter => {
                params.split_ratio.get_or_insert(config::DEFAULT_SPLIT_RATIO);
            }
            _ => {}
        }

        Ok(Device {
            aperture: params.aperture.unwrap_or(settings.aperture),
            id,
            device_type,
            position: Point3::from(wire.position),
            normal,
            params,
            split_type,
        })
    }
}

impl SceneGraph {
    /// Validates a wire snapshot. The first problem found is returned; nothing
    /// is partially applied.
    pub fn from_serialized(
        wire: SerializedSceneGraph,
        settings: &Settings,
    ) -> Result<SceneGraph, SceneError> {
        if let Some(id) = wire.devices.iter().map(|d| d.id.as_str()).duplicates().next() {
            return Err(SceneError::DuplicateDeviceId { id: id.to_string() });
        }

        let cfg = wire.config;
        let config = SimulationConfig {
            max_bounces: cfg.max_bounces.unwrap_or(settings.max_bounces),
            intensity_threshold: cfg.intensity_threshold.unwrap_or(settings.intensity_threshold),
            scene_boundary: cfg.scene_boundary.unwrap_or(settings.scene_boundary),
            enable_surrogate: cfg.enable_surrogate.unwrap_or(settings.enable_surrogate),
            max_segments: cfg.max_segments.unwrap_or(settings.max_segments),
        };
        if !config.scene_boundary.is_valid() {
            return Err(SceneError::InvalidGeometry {
                id: "sceneBoundary".to_string(),
                reason: "min must be below max on every axis".to_string(),
            });
        }
        if !(config.intensity_threshold >= 0.0) || !config.intensity_threshold.is_finite() {
            return Err(invalid("config", "intensityThreshold must be a non-negative number"));
        }
        if config.max_segments == 0 {
            return Err(invalid("config", "maxSegments must be at least 1"));
        }

        let devices = wire
            .devices
            .into_iter()
            .map(|d| Device::from_serialized(d, settings))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SceneGraph {
            version: wire.version,
            devices,
            config,
        })
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }
}

impl TryFrom<SerializedSceneGraph> for SceneGraph {
    type Error = SceneError;

    /// Validates with default [`Settings`].
    fn try_from(wire: SerializedSceneGraph) -> Result<Self, Self::Error> {
        SceneGraph::from_serialized(wire, &Settings::default())
    }
}

/// Reads a scene from a `.json` or `.toml` file.
pub fn load_scene_file(path: &Path) -> Result<SerializedSceneGraph> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scene file {:?}", path))?;
    let scene = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&text)
            .with_context(|| format!("Failed to parse TOML scene {:?}", path))?,
        _ => serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse JSON scene {:?}", path))?,
    };
    Ok(scene)
}
