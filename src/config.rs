//! Experiment configuration for a flux analysis run.
//!
//! The configuration is persisted as `experiment.json` inside the run's input
//! directory. [`ExperimentConfig::validate`] turns it into the immutable
//! [`RunParameters`] that every pipeline stage borrows.

use crate::core::density::{is_within_kell_range, water_density};
use crate::core::timestamps::MatchPolicy;
use crate::core::units::{MembraneGeometry, MembraneType, PressureUnit, SurfaceArea};
use crate::models::decline::DeclineFitOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// File name of the experiment configuration inside an input directory.
pub const CONFIG_FILE_NAME: &str = "experiment.json";

/// Tolerance used when checking that the test duration is a whole number of samples.
const SAMPLE_MULTIPLE_TOLERANCE: f64 = 1e-9;

/// Main configuration for a filtration experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Number of load cells (one raw channel file each)
    pub load_cell_count: usize,

    /// Unit the test-condition pressures were recorded in
    pub pressure_unit: PressureUnit,

    /// Smoothing window width in samples (positive, odd)
    pub smoothing_window: usize,

    /// Length of each flux measurement in seconds
    pub test_duration_s: f64,

    /// Interval between raw samples in seconds
    pub sampling_interval_s: f64,

    /// Permeate temperature in degrees Celsius
    pub temperature_c: f64,

    /// Whether the load cells report mass or volume
    #[serde(default)]
    pub input_quantity: InputQuantity,

    /// Membrane geometry parameters
    pub membrane: GeometryRecord,

    /// How event start times are matched against channel timestamps
    #[serde(default)]
    pub timestamp_match: MatchPolicy,

    /// Which downstream models to run
    #[serde(default)]
    pub modules: ModuleSelection,

    /// Initial guesses and limits for the flux-decline fit
    #[serde(default)]
    pub decline_fit: DeclineFitOptions,
}

impl ExperimentConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `experiment.json` from an input directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        Self::load(&Self::config_path(dir))
    }

    /// Save configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Path of the configuration file inside an input directory.
    pub fn config_path(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE_NAME)
    }

    /// Check every parameter and derive the values shared by all stages.
    pub fn validate(&self) -> Result<RunParameters, ConfigError> {
        if self.load_cell_count == 0 {
            return Err(ConfigError::InvalidChannelCount);
        }

        if self.smoothing_window == 0 || self.smoothing_window % 2 == 0 {
            return Err(ConfigError::InvalidSmoothingWindow(self.smoothing_window));
        }

        let offset_samples = sample_offset(self.test_duration_s, self.sampling_interval_s)?;

        let surface_area = self.membrane.to_geometry()?.surface_area()?;

        if !self.temperature_c.is_finite() {
            return Err(ConfigError::InvalidTemperature(self.temperature_c));
        }
        if !is_within_kell_range(self.temperature_c) {
            warn!(
                temperature_c = self.temperature_c,
                "Temperature outside 0-100 °C, water density is extrapolated"
            );
        }

        let density_factor = match self.input_quantity {
            InputQuantity::Mass => water_density(self.temperature_c),
            InputQuantity::Volume => 1.0,
        };

        if let MatchPolicy::Nearest { tolerance_s } = self.timestamp_match {
            if !(tolerance_s.is_finite() && tolerance_s >= 0.0) {
                return Err(ConfigError::InvalidMatchTolerance(tolerance_s));
            }
        }

        self.decline_fit.validate()?;

        Ok(RunParameters {
            channel_count: self.load_cell_count,
            pressure_unit: self.pressure_unit,
            window: self.smoothing_window,
            duration_s: self.test_duration_s,
            offset_samples,
            surface_area,
            density_factor,
            match_policy: self.timestamp_match,
        })
    }
}

/// Number of samples between the start and end of a flux bracket.
///
/// The bracket ends `duration / interval - 1` samples after the matched row.
fn sample_offset(duration_s: f64, interval_s: f64) -> Result<usize, ConfigError> {
    if !(duration_s.is_finite() && duration_s > 0.0 && interval_s.is_finite() && interval_s > 0.0)
    {
        return Err(ConfigError::InvalidTiming {
            duration_s,
            interval_s,
        });
    }

    let ratio = duration_s / interval_s;
    let samples = ratio.round();
    if (ratio - samples).abs() > SAMPLE_MULTIPLE_TOLERANCE * ratio.max(1.0) {
        return Err(ConfigError::DurationNotMultiple {
            duration_s,
            interval_s,
        });
    }
    if samples < 2.0 {
        return Err(ConfigError::DurationTooShort {
            duration_s,
            interval_s,
        });
    }

    Ok(samples as usize - 1)
}

/// Validated, derived parameters shared by every stage of one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunParameters {
    pub channel_count: usize,
    pub pressure_unit: PressureUnit,
    pub window: usize,
    pub duration_s: f64,
    /// Samples between bracket start and bracket end
    pub offset_samples: usize,
    pub surface_area: SurfaceArea,
    /// Divisor that turns a raw reading into millilitres (water density for mass input)
    pub density_factor: f64,
    pub match_policy: MatchPolicy,
}

/// Physical quantity reported by the load cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputQuantity {
    /// Grams; converted to millilitres through the water density
    #[default]
    Mass,
    /// Millilitres; used as-is
    Volume,
}

/// Membrane geometry as written in the configuration file.
///
/// Only the dimensions relevant to `membrane_type` need to be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryRecord {
    pub membrane_type: MembraneType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flat_sheet_area_m2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiber_length_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiber_diameter_mm: Option<f64>,
    /// Sheets or fibers per load cell
    pub units: u32,
}

impl GeometryRecord {
    /// Resolve the record into a typed geometry for its membrane type.
    pub fn to_geometry(&self) -> Result<MembraneGeometry, ConfigError> {
        let required = |value: Option<f64>, field: &'static str| {
            value.ok_or(ConfigError::MissingGeometry {
                membrane_type: self.membrane_type,
                field,
            })
        };

        match self.membrane_type {
            MembraneType::FlatSheet => Ok(MembraneGeometry::FlatSheet {
                unit_area_m2: required(self.flat_sheet_area_m2, "flat_sheet_area_m2")?,
                unit_count: self.units,
            }),
            MembraneType::HollowFiber => Ok(MembraneGeometry::HollowFiber {
                fiber_length_cm: required(self.fiber_length_cm, "fiber_length_cm")?,
                fiber_diameter_mm: required(self.fiber_diameter_mm, "fiber_diameter_mm")?,
                fiber_count: self.units,
            }),
        }
    }
}

/// Downstream models selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSelection {
    pub permeance: bool,
    pub flux_decline: bool,
}

impl Default for ModuleSelection {
    fn default() -> Self {
        Self {
            permeance: true,
            flux_decline: true,
        }
    }
}

impl ModuleSelection {
    /// No downstream models.
    pub fn none() -> Self {
        Self {
            permeance: false,
            flux_decline: false,
        }
    }

    /// Parse a module selection from a comma-separated string.
    ///
    /// Accepts `permeance`, `flux_decline` (or `decline`), `all` and `none`.
    pub fn from_csv(s: &str) -> Result<Self, ConfigError> {
        let mut selection = Self::none();

        for name in s.split(',').map(|s| s.trim().to_lowercase()) {
            match name.as_str() {
                "" | "none" => {}
                "all" => {
                    selection.permeance = true;
                    selection.flux_decline = true;
                }
                "permeance" => selection.permeance = true,
                "flux_decline" | "flux-decline" | "decline" => selection.flux_decline = true,
                _ => return Err(ConfigError::UnknownModule(name)),
            }
        }

        Ok(selection)
    }

    /// Check if at least one model is enabled.
    pub fn any_enabled(&self) -> bool {
        self.permeance || self.flux_decline
    }
}

/// Configuration errors. All of them halt the run before any output is written.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not serialize configuration: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("invalid pressure unit '{0}' (expected bar, PSI or MPa)")]
    InvalidPressureUnit(String),

    #[error("invalid membrane type '{0}' (expected FS or HF)")]
    InvalidMembraneType(String),

    #[error("{membrane_type} membrane requires '{field}'")]
    MissingGeometry {
        membrane_type: MembraneType,
        field: &'static str,
    },

    #[error("geometry parameter '{field}' must be positive, got {value}")]
    NonPositiveGeometry { field: &'static str, value: f64 },

    #[error("load cell count must be at least 1")]
    InvalidChannelCount,

    #[error("smoothing window must be a positive odd number of samples, got {0}")]
    InvalidSmoothingWindow(usize),

    #[error("test duration ({duration_s} s) and sampling interval ({interval_s} s) must be positive")]
    InvalidTiming { duration_s: f64, interval_s: f64 },

    #[error("test duration ({duration_s} s) is not a whole multiple of the sampling interval ({interval_s} s)")]
    DurationNotMultiple { duration_s: f64, interval_s: f64 },

    #[error("test duration ({duration_s} s) must span at least two samples of {interval_s} s")]
    DurationTooShort { duration_s: f64, interval_s: f64 },

    #[error("temperature must be finite, got {0}")]
    InvalidTemperature(f64),

    #[error("timestamp match tolerance must be a non-negative number of seconds, got {0}")]
    InvalidMatchTolerance(f64),

    #[error("initial guess for '{parameter}' must be strictly positive, got {value}")]
    NonPositiveInitialGuess { parameter: &'static str, value: f64 },

    #[error("unknown module '{0}' (expected permeance, flux_decline, all or none)")]
    UnknownModule(String),
}
