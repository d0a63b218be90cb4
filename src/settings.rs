use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use config::{Config, Environment, File};
use log::{debug, info};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::geom::AABB;


/// Runtime configuration for the simulation core.
///
/// Scene-level `config` blocks override these per scene; device parameters
/// that are left out fall back to the values here.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Emitter wavelength (nm) when a scene does not set one.
    pub wavelength: f64,
    /// Radius of a device's interaction disc (scene units).
    pub aperture: f64,
    pub max_bounces: u32,
    /// Branches dimmer than this (S0) are dropped.
    pub intensity_threshold: f64,
    pub scene_boundary: AABB,
    pub enable_surrogate: bool,
    /// Hard cap on segments produced by one tick.
    pub max_segments: usize,
    /// Default sensor activation intensity.
    pub sensor_threshold: f64,
    /// Default sensor acceptance half-angle (rad).
    pub acceptance_angle: f64,
    /// Surrogate model loaded at startup, if any.
    pub surrogate_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wavelength: 550.0,
            aperture: 1.0,
            max_bounces: 32,
            intensity_threshold: 1e-4,
            scene_boundary: AABB::new(
                Point3::new(-100.0, -100.0, -100.0),
                Point3::new(100.0, 100.0, 100.0),
            ),
            enable_surrogate: false,
            max_segments: 4096,
            sensor_threshold: 1e-3,
            acceptance_angle: std::f64::consts::FRAC_PI_2,
            surrogate_path: None,
        }
    }
}

pub fn load_default_config() -> Result<Settings> {
    let root_dir = retrieve_project_root()?;
    let default_config_file = root_dir.join("config/default.toml");

    let settings: Config = Config::builder()
        .add_source(File::from(default_config_file).required(true))
        .build()
        .context("Error loading configuration")?;

    let config: Settings = settings
        .try_deserialize()
        .context("Error deserializing configuration")?;

    validate_config(&config)?;

    Ok(config)
}

/// Layers `config/default.toml`, then `config/local.toml` if present, then
/// `POLARCRAFT_*` environment variables, then command-line overrides.
pub fn load_config(args: &CliArgs) -> Result<Settings> {
    let root_dir = retrieve_project_root()?;

    let default_config_file = root_dir.join("config/default.toml");
    let local_config = root_dir.join("config/local.toml");

    let mut builder =
        Config::builder().add_source(File::from(default_config_file.clone()).required(false));
    if local_config.exists() {
        info!("Using local configuration: {:?}", local_config);
        builder = builder.add_source(File::from(local_config).required(true));
    } else {
        info!("Using default configuration: {:?}", default_config_file);
    }

    let settings: Config = builder
        .add_source(Environment::with_prefix("polarcraft"))
        .build()
        .context("Error loading configuration")?;

    let mut config: Settings = settings
        .try_deserialize()
        .context("Error deserializing configuration")?;

    apply_overrides(&mut config, args);
    validate_config(&config)?;

    debug!("{:#?}", config);

    Ok(config)
}

fn apply_overrides(config: &mut Settings, args: &CliArgs) {
    if let Some(wavelength) = args.wavelength {
        config.wavelength = wavelength;
    }
    if let Some(bounces) = args.max_bounces {
        config.max_bounces = bounces;
    }
    if let Some(threshold) = args.threshold {
        config.intensity_threshold = threshold;
    }
    if let Some(segments) = args.max_segments {
        config.max_segments = segments;
    }
    if let Some(path) = &args.surrogate {
        config.surrogate_path = Some(path.clone());
    }
    if args.enable_surrogate {
        config.enable_surrogate = true;
    }
}

/// Retrieve the project root directory.
/// 1. If the CARGO_MANIFEST_DIR environment variable is set, use it.
/// 2. If the POLARCRAFT_ROOT_DIR environment variable is set, use it.
/// 3. Otherwise walk up from the executable looking for a "config" subdirectory.
fn retrieve_project_root() -> Result<PathBuf> {
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        return Ok(PathBuf::from(manifest_dir));
    }
    if let Ok(path) = env::var("POLARCRAFT_ROOT_DIR") {
        return Ok(PathBuf::from(path));
    }

    let exe_path = env::current_exe().context("Failed to get current executable path")?;
    let mut current_dir = exe_path.parent().map(|p| p.to_path_buf());
    while let Some(dir) = current_dir {
        if dir.join("config").is_dir() {
            return Ok(dir);
        }
        current_dir = dir.parent().map(|p| p.to_path_buf());
    }
    bail!("Could not find a project root containing a config directory. Set POLARCRAFT_ROOT_DIR.")
}

pub fn validate_config(config: &Settings) -> Result<()> {
    if !(config.wavelength > 0.0) {
        bail!("Wavelength must be greater than 0");
    }
    if !(config.aperture > 0.0) {
        bail!("Aperture must be greater than 0");
    }
    if !(config.intensity_threshold >= 0.0) {
        bail!("Intensity threshold must be non-negative");
    }
    if config.max_segments == 0 {
        bail!("Max segments must be at least 1");
    }
    if !config.scene_boundary.is_valid() {
        bail!("Scene boundary must have min < max on every axis");
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(version, about = "polarcraft - polarization optics simulation core")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    /// Wavelength (nm) for emitters that do not specify one.
    #[arg(short, long, global = true)]
    pub wavelength: Option<f64>,

    /// Maximum number of device interactions along one branch.
    #[arg(long, global = true)]
    pub max_bounces: Option<u32>,

    /// Branches with intensity below this are dropped.
    #[arg(long, global = true)]
    pub threshold: Option<f64>,

    /// Maximum number of segments produced by a single tick.
    #[arg(long, global = true)]
    pub max_segments: Option<usize>,

    /// Surrogate model file to load at startup.
    #[arg(long, global = true)]
    pub surrogate: Option<PathBuf>,

    /// Use the surrogate model for thin-film devices.
    #[arg(long, global = true)]
    pub enable_surrogate: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Trace a scene file (JSON or TOML) and print the resulting world state.
    Run {
        scene: PathBuf,
        /// Number of ticks to run.
        #[arg(long, default_value_t = 1)]
        ticks: usize,
        /// Pretty-print the JSON output.
        #[arg(long)]
        pretty: bool,
    },
    /// Speak the worker protocol as JSON lines over stdin/stdout.
    Serve,
    /// Tabulate reflectance and transmittance against incidence angle.
    Sweep {
        #[arg(long, value_enum, default_value_t = SweepKind::Fresnel)]
        kind: SweepKind,
        #[arg(long, default_value_t = 1.0)]
        n1: f64,
        #[arg(long, default_value_t = 1.5)]
        n2: f64,
        /// Film index (thin-film sweeps). Defaults to an ideal AR coating.
        #[arg(long)]
        film_index: Option<f64>,
        /// Film thickness in nm. Defaults to a quarter wave.
        #[arg(long)]
        film_thickness: Option<f64>,
        /// Number of angles between 0 and 90 degrees.
        #[arg(long, default_value_t = 91)]
        samples: usize,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    Fresnel,
    ThinFilm,
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings:
  - Wavelength: {:.3} nm
  - Aperture: {:.3}
  - Max Bounces: {}
  - Intensity Threshold: {:e}
  - Max Segments: {}
  - Surrogate: {}
  ",
            self.wavelength,
            self.aperture,
            self.max_bounces,
            self.intensity_threshold,
            self.max_segments,
            self.enable_surrogate,
        )
    }
}
