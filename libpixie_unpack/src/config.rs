use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::channel_event::Frequency;
use super::error::ConfigError;

/// Which software CFD runs on the traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfdAlgorithm {
    Polynomial,
    Traditional,
}

/// Parameters of the software CFD. The delay and length only matter for
/// the traditional algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfdConfig {
    pub algorithm: CfdAlgorithm,
    pub fraction: f64,
    pub delay: usize,
    pub length: usize,
}

/// Structure representing the application configuration. Contains pathing, the
/// digitizer setup and the trace analysis parameters.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub spill_file_path: PathBuf,
    pub output_path: PathBuf,
    pub channel_map_path: Option<PathBuf>,
    pub timing_calibration_path: Option<PathBuf>,
    pub walk_correction_path: Option<PathBuf>,
    /// Digitizer sampling frequency in MHz. Must be 100, 250 or 500.
    pub frequency_mhz: u32,
    /// Correlation window for raw event grouping, in filter clock ticks.
    pub event_width: f64,
    /// Samples averaged for the trace baseline.
    pub baseline_length: usize,
    /// Upper bound of the trace maximum search, in samples.
    pub trace_delay: usize,
    /// Trace QDC integration window, in samples.
    pub qdc_low: usize,
    pub qdc_high: usize,
    pub cfd: CfdConfig,
}

impl Default for Config {
    /// Generate a new Config object with template values
    fn default() -> Self {
        Self {
            spill_file_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            channel_map_path: None,
            timing_calibration_path: None,
            walk_correction_path: None,
            frequency_mhz: 250,
            event_width: 100.0,
            baseline_length: 70,
            trace_delay: 120,
            qdc_low: 70,
            qdc_high: 120,
            cfd: CfdConfig {
                algorithm: CfdAlgorithm::Polynomial,
                fraction: 0.5,
                delay: 5,
                length: 3,
            },
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// The digitizer frequency, validated against the supported set.
    pub fn frequency(&self) -> Result<Frequency, ConfigError> {
        Frequency::from_mhz(self.frequency_mhz)
    }

    /// Path to the per-channel hit count dump written when a run closes.
    pub fn counts_file_path(&self) -> PathBuf {
        self.output_path.join("counts.dat")
    }
}
