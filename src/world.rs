//! The per-tick output of the engine.

use serde::{Deserialize, Serialize};

use crate::powers::Powers;
use crate::stokes::StokesVector;

/// A straight stretch of light between two interactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightSegment {
    pub source_id: String,
    pub start: [f64; 3],
    pub end: [f64; 3],
    pub stokes: StokesVector,
    pub wavelength: f64,
    pub intensity: f64,
    /// Number of device interactions before this segment.
    pub depth: u32,
}

/// Accumulated light at one device. Inputs and outputs are incoherent sums
/// over every beam that reached the device this tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub device_id: String,
    pub input_stokes: Option<StokesVector>,
    /// One entry per output port; `None` if unreached or fully absorbed.
    pub output_stokes: Option<Vec<StokesVector>>,
    pub hits: u32,
    pub activated: bool,
}

impl DeviceState {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            input_stokes: None,
            output_stokes: None,
            hits: 0,
            activated: false,
        }
    }

    /// Intensity that arrived at the device; zero if it was never reached.
    pub fn received_intensity(&self) -> f64 {
        self.input_stokes.map(|s| s.intensity()).unwrap_or(0.0)
    }
}

/// A produced Stokes vector that had to be clamped back into the physical cone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintViolation {
    pub device_id: String,
    pub source_id: String,
    pub original: StokesVector,
    pub clamped: StokesVector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurrogateFallback {
    pub device_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TruncationReason {
    MaxBounces,
    MaxSegments,
}

/// A branch cut short by an engine limit rather than by physics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Truncation {
    pub source_id: String,
    /// Device the branch was about to reach, if known.
    pub device_id: Option<String>,
    pub reason: TruncationReason,
    pub intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticInfo {
    /// Branches popped from the work list.
    pub iterations: u64,
    /// False when any branch was truncated by a limit.
    pub completed: bool,
    pub violations: Vec<ConstraintViolation>,
    pub surrogate_fallbacks: Vec<SurrogateFallback>,
    pub truncations: Vec<Truncation>,
    pub energy: Powers,
    pub elapsed_ms: f64,
}

impl DiagnosticInfo {
    /// Finished without truncation, clamping or surrogate fallback.
    pub fn is_clean(&self) -> bool {
        self.completed && self.violations.is_empty() && self.surrogate_fallbacks.is_empty()
    }
}

/// Snapshot of light in the scene after one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldState {
    /// Wall clock, milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub scene_version: u64,
    pub segments: Vec<LightSegment>,
    pub devices: Vec<DeviceState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DiagnosticInfo>,
}

impl WorldState {
    pub fn device(&self, id: &str) -> Option<&DeviceState> {
        self.devices.iter().find(|d| d.device_id == id)
    }

    /// Intensity received by a sensor (or any device); zero when unreached or unknown.
    pub fn sensor_intensity(&self, id: &str) -> f64 {
        self.device(id)
            .map(DeviceState::received_intensity)
            .unwrap_or(0.0)
    }

    pub fn completed(&self) -> bool {
        self.diagnostics.as_ref().map(|d| d.completed).unwrap_or(true)
    }
}
