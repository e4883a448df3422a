//! Walk corrections remove the energy dependence of the trigger time.
//! Each channel may carry several parameter sets, gated by raw energy
//! range, so that low and high gain regions get their own model fit.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::channel_map::generate_uuid;
use super::error::CalibrationError;

/// The fitted model forms inherited from the legacy analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkModel {
    /// No correction, always zero.
    None,
    /// `p0 + p1 / (p2 + E) + p3 * exp(-E / p4)`
    A,
    /// `p0 + (p1 + p2 / (E + 1)) * exp(-E / p3)`
    B1,
    /// `p0 + p1 * exp(-E / p2)`
    B2,
}

impl WalkModel {
    pub fn from_name(name: &str) -> Result<Self, CalibrationError> {
        match name {
            "None" | "none" => Ok(WalkModel::None),
            "A" => Ok(WalkModel::A),
            "B1" => Ok(WalkModel::B1),
            "B2" => Ok(WalkModel::B2),
            _ => Err(CalibrationError::UnknownWalkModel(name.to_string())),
        }
    }

    pub fn required_parameters(&self) -> usize {
        match self {
            WalkModel::None => 0,
            WalkModel::A => 5,
            WalkModel::B1 => 4,
            WalkModel::B2 => 3,
        }
    }

    fn evaluate(&self, p: &[f64], raw_energy: f64) -> f64 {
        match self {
            WalkModel::None => 0.0,
            WalkModel::A => p[0] + p[1] / (p[2] + raw_energy) + p[3] * (-raw_energy / p[4]).exp(),
            WalkModel::B1 => p[0] + (p[1] + p[2] / (raw_energy + 1.0)) * (-raw_energy / p[3]).exp(),
            WalkModel::B2 => p[0] + p[1] * (-raw_energy / p[2]).exp(),
        }
    }
}

/// One row of the walk calibration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkEntry {
    pub module: u32,
    pub channel: u32,
    pub model: String,
    pub min_energy: f64,
    pub max_energy: f64,
    pub parameters: Vec<f64>,
}

#[derive(Debug, Clone)]
struct WalkCorrection {
    model: WalkModel,
    min_energy: f64,
    max_energy: f64,
    parameters: Vec<f64>,
}

/// Per-channel walk corrections keyed by the packed channel uuid. Channels
/// without an entry get no correction.
#[derive(Debug, Clone, Default)]
pub struct WalkCorrector {
    map: FxHashMap<u32, Vec<WalkCorrection>>,
}

impl WalkCorrector {
    /// Load corrections from a YAML list of [`WalkEntry`] rows.
    pub fn from_file(path: &Path) -> Result<Self, CalibrationError> {
        if !path.exists() {
            return Err(CalibrationError::BadFilePath(PathBuf::from(path)));
        }
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        let entries: Vec<WalkEntry> = serde_yaml::from_str(&contents)?;
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: Vec<WalkEntry>) -> Result<Self, CalibrationError> {
        let mut corrector = WalkCorrector::default();
        for entry in entries {
            corrector.add_entry(entry)?;
        }
        Ok(corrector)
    }

    fn add_entry(&mut self, entry: WalkEntry) -> Result<(), CalibrationError> {
        let model = WalkModel::from_name(&entry.model)?;
        if entry.parameters.len() < model.required_parameters() {
            return Err(CalibrationError::MissingWalkParameters(
                entry.model,
                model.required_parameters(),
                entry.parameters.len(),
            ));
        }
        if entry.min_energy >= entry.max_energy {
            return Err(CalibrationError::BadWalkRange(
                entry.min_energy,
                entry.max_energy,
            ));
        }
        self.map
            .entry(generate_uuid(entry.module, entry.channel))
            .or_default()
            .push(WalkCorrection {
                model,
                min_energy: entry.min_energy,
                max_energy: entry.max_energy,
                parameters: entry.parameters,
            });
        Ok(())
    }

    /// The correction for a channel at a given raw energy. Zero when no
    /// parameter set covers the energy.
    pub fn correction(&self, module: u32, channel: u32, raw_energy: f64) -> f64 {
        if let Some(corrections) = self.map.get(&generate_uuid(module, channel)) {
            for c in corrections {
                if raw_energy >= c.min_energy && raw_energy < c.max_energy {
                    return c.model.evaluate(&c.parameters, raw_energy);
                }
            }
        }
        0.0
    }

    /// Walk out of the time: `t_corrected = t - correction(E)`.
    pub fn corrected_time(&self, module: u32, channel: u32, time: f64, raw_energy: f64) -> f64 {
        time - self.correction(module, channel, raw_energy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(model: &str, min: f64, max: f64, parameters: Vec<f64>) -> WalkEntry {
        WalkEntry {
            module: 0,
            channel: 0,
            model: model.to_string(),
            min_energy: min,
            max_energy: max,
            parameters,
        }
    }

    #[test]
    fn test_model_b2_evaluation() {
        let corrector =
            WalkCorrector::from_entries(vec![entry("B2", 0.0, 1e6, vec![2.0, 4.0, 100.0])])
                .unwrap();
        let expected = 2.0 + 4.0 * (-50.0f64 / 100.0).exp();
        assert!((corrector.correction(0, 0, 50.0) - expected).abs() < 1e-12);
        assert_eq!(corrector.corrected_time(0, 0, 1000.0, 50.0), 1000.0 - expected);
    }

    #[test]
    fn test_range_gated_parameter_sets() {
        let corrector = WalkCorrector::from_entries(vec![
            entry("B2", 0.0, 100.0, vec![1.0, 0.0, 1.0]),
            entry("B2", 100.0, 1000.0, vec![7.0, 0.0, 1.0]),
        ])
        .unwrap();
        assert_eq!(corrector.correction(0, 0, 50.0), 1.0);
        assert_eq!(corrector.correction(0, 0, 500.0), 7.0);
        // Out of every range falls back to zero.
        assert_eq!(corrector.correction(0, 0, 5000.0), 0.0);
    }

    #[test]
    fn test_unmapped_channel_gets_zero() {
        let corrector = WalkCorrector::default();
        assert_eq!(corrector.correction(3, 7, 500.0), 0.0);
    }

    #[test]
    fn test_unknown_model_rejected() {
        let result = WalkCorrector::from_entries(vec![entry("C", 0.0, 1.0, vec![])]);
        assert!(matches!(
            result,
            Err(CalibrationError::UnknownWalkModel(_))
        ));
    }

    #[test]
    fn test_missing_parameters_rejected() {
        let result = WalkCorrector::from_entries(vec![entry("A", 0.0, 1.0, vec![1.0, 2.0])]);
        assert!(matches!(
            result,
            Err(CalibrationError::MissingWalkParameters(_, 5, 2))
        ));
    }

    #[test]
    fn test_bad_range_rejected() {
        let result =
            WalkCorrector::from_entries(vec![entry("B2", 10.0, 5.0, vec![1.0, 1.0, 1.0])]);
        assert!(matches!(result, Err(CalibrationError::BadWalkRange(_, _))));
    }
}
