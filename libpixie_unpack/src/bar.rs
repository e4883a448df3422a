//! Pairing of detector ends into bars. Two photomultipliers read out each
//! plastic bar; their locations are assigned in pairs so that
//! `location / 2` names the bar and the channel map tags name the side.

use fxhash::FxHashMap;
use log::warn;

use super::channel_map::Identifier;
use super::hires_timing::HighResTimingData;
use super::timing_cal::{TimingCalibration, TimingCalibrator};

/// Which end of the bar a channel reads out, judged from its map tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarSide {
    Left,
    Right,
}

impl BarSide {
    /// Tags carried over from the legacy maps: vertical bars use up/down,
    /// some maps use top/bottom.
    pub fn from_identifier(id: &Identifier) -> Option<Self> {
        if id.has_tag("left") || id.has_tag("up") || id.has_tag("top") {
            Some(BarSide::Left)
        } else if id.has_tag("right") || id.has_tag("down") || id.has_tag("bottom") {
            Some(BarSide::Right)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BarKey {
    pub bar: u32,
    pub subtype: String,
}

/// One assembled bar. High resolution bars use the CFD phases of both
/// ends; the fallback keeps the filter timestamps and on-board energies so
/// a bar with a bad trace still lands in the coarse spectra.
#[derive(Debug, Clone)]
pub struct BarDetector {
    pub key: BarKey,
    pub time_average_ns: f64,
    /// `(left - right) + left_right_offset` from the calibration.
    pub time_difference_ns: f64,
    /// Geometric mean of the on-board energies.
    pub energy: f64,
    /// Geometric mean of the trace QDCs, zero for low resolution bars.
    pub qdc: f64,
    pub high_resolution: bool,
    pub calibration: TimingCalibration,
}

#[derive(Debug, Clone, Default)]
struct BarParts {
    left: Option<HighResTimingData>,
    right: Option<HighResTimingData>,
}

/// Assembles bars from the detector ends of one raw event. The working map
/// is local to each pass, so a failed spill never leaks ends into the next.
#[derive(Debug, Clone, Default)]
pub struct BarBuilder {
    calibrator: TimingCalibrator,
    dropped_singles: usize,
    dropped_untagged: usize,
}

impl BarBuilder {
    pub fn new(calibrator: TimingCalibrator) -> Self {
        BarBuilder {
            calibrator,
            dropped_singles: 0,
            dropped_untagged: 0,
        }
    }

    /// Detector ends that arrived without a partner, accumulated across
    /// passes.
    pub fn dropped_singles(&self) -> usize {
        self.dropped_singles
    }

    /// Detector ends whose map entry carried no side tag.
    pub fn dropped_untagged(&self) -> usize {
        self.dropped_untagged
    }

    /// Pair the given ends into bars. A second end on the same side of the
    /// same bar within one pass overwrites the first.
    pub fn build(&mut self, ends: Vec<(&Identifier, HighResTimingData)>) -> Vec<BarDetector> {
        let mut parts: FxHashMap<BarKey, BarParts> = FxHashMap::default();
        for (id, data) in ends {
            let side = match BarSide::from_identifier(id) {
                Some(side) => side,
                None => {
                    warn!(
                        "Channel at location {} ({}:{}) has no side tag; dropping",
                        id.location, id.detector_type, id.subtype
                    );
                    self.dropped_untagged += 1;
                    continue;
                }
            };
            let key = BarKey {
                bar: id.bar_number(),
                subtype: id.subtype.clone(),
            };
            let entry = parts.entry(key).or_default();
            match side {
                BarSide::Left => entry.left = Some(data),
                BarSide::Right => entry.right = Some(data),
            }
        }

        let mut bars = Vec::new();
        for (key, part) in parts {
            match (part.left, part.right) {
                (Some(left), Some(right)) => {
                    let calibration = self.calibrator.calibration(key.bar, &key.subtype);
                    bars.push(Self::assemble(key, &left, &right, calibration));
                }
                _ => self.dropped_singles += 1,
            }
        }
        bars.sort_by(|a, b| a.key.cmp(&b.key));
        bars
    }

    fn assemble(
        key: BarKey,
        left: &HighResTimingData,
        right: &HighResTimingData,
        calibration: TimingCalibration,
    ) -> BarDetector {
        let energy = (left.energy * right.energy).sqrt();
        if left.is_valid && right.is_valid {
            BarDetector {
                time_average_ns: 0.5 * (left.high_res_time_ns + right.high_res_time_ns),
                time_difference_ns: (left.high_res_time_ns - right.high_res_time_ns)
                    + calibration.left_right_offset,
                energy,
                qdc: (left.qdc * right.qdc).sqrt(),
                high_resolution: true,
                calibration,
                key,
            }
        } else {
            BarDetector {
                time_average_ns: 0.5 * (left.filter_time_ns + right.filter_time_ns),
                time_difference_ns: (left.filter_time_ns - right.filter_time_ns)
                    + calibration.left_right_offset,
                energy,
                qdc: 0.0,
                high_resolution: false,
                calibration,
                key,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing_cal::TimingCalibrationEntry;

    fn identifier(location: u32, tag: &str) -> Identifier {
        Identifier {
            detector_type: String::from("vandle"),
            subtype: String::from("medium"),
            location,
            damm_id: 3100,
            tags: vec![tag.to_string()],
        }
    }

    fn end(high_res_time_ns: f64, filter_time_ns: f64, valid: bool) -> HighResTimingData {
        HighResTimingData {
            high_res_time_ns,
            filter_time_ns,
            energy: 100.0,
            qdc: 400.0,
            is_valid: valid,
            ..Default::default()
        }
    }

    #[test]
    fn test_high_resolution_bar() {
        let left_id = identifier(0, "left");
        let right_id = identifier(1, "right");
        let mut builder = BarBuilder::default();
        let bars = builder.build(vec![
            (&left_id, end(1010.0, 1000.0, true)),
            (&right_id, end(1006.0, 1000.0, true)),
        ]);
        assert_eq!(bars.len(), 1);
        let bar = &bars[0];
        assert!(bar.high_resolution);
        assert_eq!(bar.key, BarKey { bar: 0, subtype: String::from("medium") });
        assert_eq!(bar.time_average_ns, 1008.0);
        assert_eq!(bar.time_difference_ns, 4.0);
        assert_eq!(bar.energy, 100.0);
        assert_eq!(bar.qdc, 400.0);
    }

    #[test]
    fn test_low_resolution_fallback() {
        let left_id = identifier(0, "up");
        let right_id = identifier(1, "down");
        let mut builder = BarBuilder::default();
        let bars = builder.build(vec![
            (&left_id, end(0.0, 1000.0, false)),
            (&right_id, end(1006.0, 996.0, true)),
        ]);
        assert_eq!(bars.len(), 1);
        let bar = &bars[0];
        assert!(!bar.high_resolution);
        assert_eq!(bar.time_average_ns, 998.0);
        assert_eq!(bar.time_difference_ns, 4.0);
        assert_eq!(bar.qdc, 0.0);
        assert_eq!(bar.energy, 100.0);
    }

    #[test]
    fn test_left_right_offset_applied() {
        let entries = vec![TimingCalibrationEntry {
            bar: 0,
            subtype: String::from("medium"),
            calibration: TimingCalibration {
                left_right_offset: -4.0,
                ..Default::default()
            },
        }];
        let mut builder = BarBuilder::new(TimingCalibrator::from_entries(entries));
        let left_id = identifier(0, "left");
        let right_id = identifier(1, "right");
        let bars = builder.build(vec![
            (&left_id, end(1010.0, 1000.0, true)),
            (&right_id, end(1006.0, 1000.0, true)),
        ]);
        assert_eq!(bars[0].time_difference_ns, 0.0);
    }

    #[test]
    fn test_unmatched_single_dropped_and_counted() {
        let left_id = identifier(0, "left");
        let mut builder = BarBuilder::default();
        let bars = builder.build(vec![(&left_id, end(1010.0, 1000.0, true))]);
        assert!(bars.is_empty());
        assert_eq!(builder.dropped_singles(), 1);
    }

    #[test]
    fn test_untagged_end_dropped_and_counted() {
        let bare_id = Identifier {
            detector_type: String::from("vandle"),
            subtype: String::from("medium"),
            location: 0,
            damm_id: 3100,
            tags: Vec::new(),
        };
        let mut builder = BarBuilder::default();
        let bars = builder.build(vec![(&bare_id, end(1010.0, 1000.0, true))]);
        assert!(bars.is_empty());
        assert_eq!(builder.dropped_untagged(), 1);
    }

    #[test]
    fn test_duplicate_side_overwrites() {
        // Two left ends land on the same bar; the later one wins. This is
        // the historical map-overwrite behavior, kept on purpose.
        let left_id = identifier(0, "left");
        let right_id = identifier(1, "right");
        let mut builder = BarBuilder::default();
        let bars = builder.build(vec![
            (&left_id, end(9999.0, 1000.0, true)),
            (&left_id, end(1010.0, 1000.0, true)),
            (&right_id, end(1006.0, 1000.0, true)),
        ]);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].time_difference_ns, 4.0);
    }

    #[test]
    fn test_bars_keyed_by_subtype() {
        let left_medium = identifier(0, "left");
        let mut right_small = identifier(1, "right");
        right_small.subtype = String::from("small");
        let mut builder = BarBuilder::default();
        // Same bar number, different subtypes: these must not pair.
        let bars = builder.build(vec![
            (&left_medium, end(1010.0, 1000.0, true)),
            (&right_small, end(1006.0, 1000.0, true)),
        ]);
        assert!(bars.is_empty());
        assert_eq!(builder.dropped_singles(), 2);
    }
}
