//! Per-bar timing calibrations: the left-right offset that centers the
//! position spectrum, the time-of-flight offset against the start detector,
//! and the flight-path geometry. Loaded from a YAML list so the same file
//! format serves every experiment.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use fxhash::FxHashMap;
use log::debug;
use serde::{Deserialize, Serialize};

use super::error::CalibrationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TimingCalibration {
    /// Offset added to (left - right) to center the bar, in ns.
    pub left_right_offset: f64,
    /// Offset added to the time of flight, in ns.
    pub tof_offset: f64,
    /// Flight path from target to bar center, in cm.
    pub z0: f64,
    /// Transverse offsets of the bar center, in cm.
    pub x_offset: f64,
    pub z_offset: f64,
}

/// One row of the calibration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingCalibrationEntry {
    pub bar: u32,
    pub subtype: String,
    #[serde(flatten)]
    pub calibration: TimingCalibration,
}

/// Looks up calibrations by (bar number, subtype). Bars without a row get
/// the default calibration, which leaves every offset at zero.
#[derive(Debug, Clone, Default)]
pub struct TimingCalibrator {
    map: FxHashMap<(u32, String), TimingCalibration>,
}

impl TimingCalibrator {
    pub fn from_file(path: &Path) -> Result<Self, CalibrationError> {
        if !path.exists() {
            return Err(CalibrationError::BadFilePath(PathBuf::from(path)));
        }
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        let entries: Vec<TimingCalibrationEntry> = serde_yaml::from_str(&contents)?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<TimingCalibrationEntry>) -> Self {
        let mut calibrator = TimingCalibrator::default();
        for entry in entries {
            calibrator
                .map
                .insert((entry.bar, entry.subtype), entry.calibration);
        }
        calibrator
    }

    /// The calibration for a bar, defaulting when none was loaded.
    pub fn calibration(&self, bar: u32, subtype: &str) -> TimingCalibration {
        match self.map.get(&(bar, subtype.to_string())) {
            Some(cal) => cal.clone(),
            None => {
                debug!("No timing calibration for bar {} ({}), using default", bar, subtype);
                TimingCalibration::default()
            }
        }
    }

    pub fn get(&self, bar: u32, subtype: &str) -> Option<&TimingCalibration> {
        self.map.get(&(bar, subtype.to_string()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_default() {
        let entries = vec![TimingCalibrationEntry {
            bar: 3,
            subtype: String::from("medium"),
            calibration: TimingCalibration {
                left_right_offset: 2.5,
                tof_offset: -10.0,
                z0: 100.0,
                x_offset: 0.0,
                z_offset: 1.0,
            },
        }];
        let calibrator = TimingCalibrator::from_entries(entries);
        assert_eq!(calibrator.calibration(3, "medium").left_right_offset, 2.5);
        assert_eq!(calibrator.calibration(3, "small"), TimingCalibration::default());
        assert!(calibrator.get(4, "medium").is_none());
    }

    #[test]
    fn test_yaml_round_trip() {
        let entries = vec![TimingCalibrationEntry {
            bar: 0,
            subtype: String::from("small"),
            calibration: TimingCalibration {
                left_right_offset: 1.0,
                tof_offset: 2.0,
                z0: 50.0,
                x_offset: -0.5,
                z_offset: 0.5,
            },
        }];
        let yaml = serde_yaml::to_string(&entries).unwrap();
        let parsed: Vec<TimingCalibrationEntry> = serde_yaml::from_str(&yaml).unwrap();
        let calibrator = TimingCalibrator::from_entries(parsed);
        assert_eq!(calibrator.calibration(0, "small").z0, 50.0);
    }
}
