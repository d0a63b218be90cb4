//! Precomputed lookup model for thin-film devices.
//!
//! A surrogate model is a binary table of Mueller matrices sampled over
//! incidence angle, one record per (film, wavelength, substrate, mode). All
//! values are little-endian:
//!
//! ```text
//! header:  "PCSM"  u16 version  u16 reserved  u32 record_count
//! record:  f64 film_index  f64 thickness_nm  f64 wavelength_nm  f64 substrate_index
//!          u8 mode (0 transmit, 1 reflect)  f64 angle_min  f64 angle_max
//!          u32 sample_count (>= 2)  sample_count × 16 f64 (row-major Mueller)
//! ```
//!
//! Records assume an incident medium of index 1. Loading either succeeds for
//! the whole payload or fails without producing a model.

use serde::Serialize;
use thiserror::Error;

use crate::config;
use crate::mueller::MuellerMatrix;
use crate::protocol::ErrorCode;
use crate::thin_film::ThinFilmStack;

#[cfg(test)]
mod tests {

    use super::*;

    fn sample_model() -> SurrogateModel {
        SurrogateModel {
            records: vec![
                SurrogateRecord::tabulate(1.38, 99.6, 550.0, 1.52, SurrogateMode::Transmit, 0.0, 1.4, 57),
                SurrogateRecord::tabulate(1.38, 99.6, 550.0, 1.52, SurrogateMode::Reflect, 0.0, 1.4, 57),
            ],
        }
    }

    #[test]
    fn bytes_round_trip() {
        let model = sample_model();
        let bytes = model.to_bytes();
        assert_eq!(&bytes[0..4], b"PCSM");
        let loaded = SurrogateModel::from_bytes(&bytes).unwrap();
        assert_eq!(loaded, model);
    }

    #[test]
    fn lookup_matches_physics_at_samples_and_between() {
        let model = sample_model();
        let key = SurrogateKey {
            film_index: 1.38,
            thickness: 99.6,
            wavelength: 550.0,
            substrate_index: 1.52,
            mode: SurrogateMode::Reflect,
        };
        let stack = ThinFilmStack::single(1.38, 99.6);
        for angle in [0.0, 0.35, 0.8123, 1.4] {
            let exact = MuellerMatrix::thin_film_reflect(&stack, 1.0, 1.52, angle, 550.0);
            let approx = model.lookup(&key, angle).unwrap();
            assert!(approx.approx_eq(&exact, 1e-3), "angle: {}\n{}\n{}", angle, approx, exact);
        }
    }

    #[test]
    fn lookup_misses() {
        let model = sample_model();
        let mut key = SurrogateKey {
            film_index: 1.38,
            thickness: 99.6,
            wavelength: 550.0,
            substrate_index: 1.52,
            mode: SurrogateMode::Transmit,
        };
        assert_eq!(model.lookup(&key, 1.5), Err(SurrogateMiss::AngleOutOfRange(1.5)));
        key.wavelength = 633.0;
        assert_eq!(model.lookup(&key, 0.2), Err(SurrogateMiss::NoMatchingRecord));
    }

    #[test]
    fn rejects_malformed_payloads() {
        let bytes = sample_model().to_bytes();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert_eq!(SurrogateModel::from_bytes(&bad_magic), Err(SurrogateError::BadMagic));

        let mut bad_version = bytes.clone();
        bad_version[4] = 9;
        assert_eq!(
            SurrogateModel::from_bytes(&bad_version),
            Err(SurrogateError::UnsupportedVersion(9))
        );

        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(
            SurrogateModel::from_bytes(truncated),
            Err(SurrogateError::Truncated { .. })
        ));

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert_eq!(SurrogateModel::from_bytes(&trailing), Err(SurrogateError::TrailingBytes(1)));

        assert!(SurrogateModel::from_bytes(&[]).is_err());
    }

    #[test]
    fn rejects_invalid_records() {
        let mut model = sample_model();
        model.records[1].samples.truncate(1);
        let err = SurrogateModel::from_bytes(&model.to_bytes()).unwrap_err();
        assert!(matches!(err, SurrogateError::InvalidRecord { index: 1, .. }), "{}", err);
        assert_eq!(err.code(), ErrorCode::SurrogateLoadFailed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SurrogateMode {
    Transmit,
    Reflect,
}

impl SurrogateMode {
    fn to_byte(self) -> u8 {
        match self {
            SurrogateMode::Transmit => 0,
            SurrogateMode::Reflect => 1,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(SurrogateMode::Transmit),
            1 => Some(SurrogateMode::Reflect),
            _ => None,
        }
    }
}

/// One tabulated response, sampled at evenly spaced angles in `[angle_min, angle_max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SurrogateRecord {
    pub film_index: f64,
    pub thickness: f64,
    pub wavelength: f64,
    pub substrate_index: f64,
    pub mode: SurrogateMode,
    pub angle_min: f64,
    pub angle_max: f64,
    pub samples: Vec<MuellerMatrix>,
}

/// Film parameters a device looks up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurrogateKey {
    pub film_index: f64,
    pub thickness: f64,
    pub wavelength: f64,
    pub substrate_index: f64,
    pub mode: SurrogateMode,
}

impl SurrogateKey {
    /// Key for a single-layer stack; `None` for anything else.
    pub fn for_stack(
        stack: &ThinFilmStack,
        substrate_index: f64,
        wavelength: f64,
        mode: SurrogateMode,
    ) -> Option<Self> {
        match stack.layers.as_slice() {
            [layer] => Some(Self {
                film_index: layer.index,
                thickness: layer.thickness,
                wavelength,
                substrate_index,
                mode,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurrogateModel {
    pub records: Vec<SurrogateRecord>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SurrogateError {
    #[error("Surrogate payload does not start with PCSM")]
    BadMagic,

    #[error("Unsupported surrogate format version {0}")]
    UnsupportedVersion(u16),

    #[error("Surrogate payload truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("Surrogate record {index} is invalid: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error("Surrogate payload has {0} trailing bytes")]
    TrailingBytes(usize),
}

impl SurrogateError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::SurrogateLoadFailed
    }
}

/// Why a lookup could not be served.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SurrogateMiss {
    #[error("no surrogate model loaded")]
    NoModel,

    #[error("surrogate models cover single-layer films in air only")]
    UnsupportedStack,

    #[error("no surrogate record matches the film parameters")]
    NoMatchingRecord,

    #[error("incidence angle {0} is outside the tabulated range")]
    AngleOutOfRange(f64),
}

/// Little-endian cursor over a byte slice.
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], SurrogateError> {
        let end = self.offset + N;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or(SurrogateError::Truncated {
                offset: self.offset,
            })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.offset = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, SurrogateError> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, SurrogateError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn u32(&mut self) -> Result<u32, SurrogateError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn f64(&mut self) -> Result<f64, SurrogateError> {
        Ok(f64::from_le_bytes(self.take()?))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= config::SURROGATE_MATCH_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

impl SurrogateRecord {
    fn matches(&self, key: &SurrogateKey) -> bool {
        self.mode == key.mode
            && close(self.film_index, key.film_index)
            && close(self.thickness, key.thickness)
            && close(self.wavelength, key.wavelength)
            && close(self.substrate_index, key.substrate_index)
    }

    fn validate(&self) -> Result<(), String> {
        if self.samples.len() < 2 {
            return Err(format!("needs at least 2 samples, got {}", self.samples.len()));
        }
        let scalars = [
            self.film_index,
            self.thickness,
            self.wavelength,
            self.substrate_index,
            self.angle_min,
            self.angle_max,
        ];
        if !scalars.iter().all(|v| v.is_finite()) {
            return Err("non-finite parameter".to_string());
        }
        if !(self.angle_min < self.angle_max) {
            return Err(format!(
                "angle range [{}, {}] is empty",
                self.angle_min, self.angle_max
            ));
        }
        if self
            .samples
            .iter()
            .any(|m| !m.to_row_major().iter().all(|v| v.is_finite()))
        {
            return Err("non-finite sample".to_string());
        }
        Ok(())
    }

    /// Linear interpolation between the two samples bracketing `angle`.
    fn interpolate(&self, angle: f64) -> MuellerMatrix {
        let last = self.samples.len() - 1;
        let position = (angle - self.angle_min) / (self.angle_max - self.angle_min) * last as f64;
        let lower = (position.floor().max(0.0) as usize).min(last - 1);
        let frac = (position - lower as f64).clamp(0.0, 1.0);
        self.samples[lower]
            .scale(1.0 - frac)
            .add(&self.samples[lower + 1].scale(frac))
    }

    /// Samples the thin-film model for a single layer in air.
    #[allow(clippy::too_many_arguments)]
    pub fn tabulate(
        film_index: f64,
        thickness: f64,
        wavelength: f64,
        substrate_index: f64,
        mode: SurrogateMode,
        angle_min: f64,
        angle_max: f64,
        sample_count: usize,
    ) -> SurrogateRecord {
        let stack = ThinFilmStack::single(film_index, thickness);
        let n1 = config::DEFAULT_INCIDENT_INDEX;
        let samples = ndarray::Array1::linspace(angle_min, angle_max, sample_count.max(2))
            .iter()
            .map(|&angle| match mode {
                SurrogateMode::Reflect => {
                    MuellerMatrix::thin_film_reflect(&stack, n1, substrate_index, angle, wavelength)
                }
                SurrogateMode::Transmit => {
                    MuellerMatrix::thin_film_transmit(&stack, n1, substrate_index, angle, wavelength)
                        .unwrap_or_else(|| MuellerMatrix::attenuator(0.0))
                }
            })
            .collect();
        SurrogateRecord {
            film_index,
            thickness,
            wavelength,
            substrate_index,
            mode,
            angle_min,
            angle_max,
            samples,
        }
    }
}

impl SurrogateModel {
    /// Parses a complete payload. Any defect rejects the whole model.
    pub fn from_bytes(bytes: &[u8]) -> Result<SurrogateModel, SurrogateError> {
        let mut reader = Reader { bytes, offset: 0 };

        if reader.take::<4>()? != *config::SURROGATE_MAGIC {
            return Err(SurrogateError::BadMagic);
        }
        let version = reader.u16()?;
        if version != config::SURROGATE_VERSION {
            return Err(SurrogateError::UnsupportedVersion(version));
        }
        let _reserved = reader.u16()?;
        let count = reader.u32()? as usize;

        let mut records = Vec::with_capacity(count.min(1024));
        for index in 0..count {
            let film_index = reader.f64()?;
            let thickness = reader.f64()?;
            let wavelength = reader.f64()?;
            let substrate_index = reader.f64()?;
            let mode_byte = reader.u8()?;
            let mode = SurrogateMode::from_byte(mode_byte).ok_or(SurrogateError::InvalidRecord {
                index,
                reason: format!("unknown mode {}", mode_byte),
            })?;
            let angle_min = reader.f64()?;
            let angle_max = reader.f64()?;
            let sample_count = reader.u32()? as usize;
            if sample_count.saturating_mul(16 * 8) > reader.remaining() {
                return Err(SurrogateError::Truncated {
                    offset: reader.offset,
                });
            }
            let mut samples = Vec::with_capacity(sample_count);
            for _ in 0..sample_count {
                let mut values = [0.0; 16];
                for v in values.iter_mut() {
                    *v = reader.f64()?;
                }
                samples.push(MuellerMatrix::from_row_major(values));
            }

            let record = SurrogateRecord {
                film_index,
                thickness,
                wavelength,
                substrate_index,
                mode,
                angle_min,
                angle_max,
                samples,
            };
            record
                .validate()
                .map_err(|reason| SurrogateError::InvalidRecord { index, reason })?;
            records.push(record);
        }

        if reader.remaining() > 0 {
            return Err(SurrogateError::TrailingBytes(reader.remaining()));
        }
        Ok(SurrogateModel { records })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(config::SURROGATE_MAGIC);
        out.extend_from_slice(&config::SURROGATE_VERSION.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        for r in &self.records {
            for v in [r.film_index, r.thickness, r.wavelength, r.substrate_index] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            out.push(r.mode.to_byte());
            out.extend_from_slice(&r.angle_min.to_le_bytes());
            out.extend_from_slice(&r.angle_max.to_le_bytes());
            out.extend_from_slice(&(r.samples.len() as u32).to_le_bytes());
            for m in &r.samples {
                for v in m.to_row_major() {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
        out
    }

    pub fn lookup(&self, key: &SurrogateKey, angle: f64) -> Result<MuellerMatrix, SurrogateMiss> {
        let record = self
            .records
            .iter()
            .find(|r| r.matches(key))
            .ok_or(SurrogateMiss::NoMatchingRecord)?;
        let tol = config::SURROGATE_MATCH_TOLERANCE;
        if angle < record.angle_min - tol || angle > record.angle_max + tol {
            return Err(SurrogateMiss::AngleOutOfRange(angle));
        }
        Ok(record.interpolate(angle))
    }
}
