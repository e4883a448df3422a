//! Run statistics. `RunningStats` is a streaming accumulator for scalar
//! quantities; `StatsData` holds the DSP statistics snapshots the poll
//! program interleaves with the data, so that rates can be formed from the
//! difference of consecutive snapshots.

use fxhash::FxHashMap;

use super::constants::{MAX_VSN, NUMBER_OF_CHANNELS, STATS_SNAPSHOT_WORDS};
use super::error::StatsError;

// Word offsets inside one 128-word DSP snapshot.
const REAL_TIME_HIGH: usize = 0;
const REAL_TIME_LOW: usize = 1;
const LIVE_TIME_HIGH: usize = 63;
const LIVE_TIME_LOW: usize = 79;
const FAST_PEAKS_HIGH: usize = 95;
const FAST_PEAKS_LOW: usize = 111;

/// Streaming mean and sample standard deviation without storing samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    sum: f64,
    sum_sq: f64,
    count: u64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.sum_sq += value * value;
        self.count += 1;
    }

    /// Merge another accumulator into this one. Combining is associative
    /// and commutative, so partial results can be merged in any order.
    pub fn combine(&mut self, other: &RunningStats) {
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.count += other.count;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.sum / self.count as f64
    }

    /// Sample standard deviation. Undefined below two samples.
    pub fn std_dev(&self) -> f64 {
        if self.count <= 1 {
            return f64::NAN;
        }
        let n = self.count as f64;
        ((n * self.sum_sq - self.sum * self.sum) / (n * (n - 1.0))).sqrt()
    }
}

/// The latest DSP statistics snapshot per module, with the previous one
/// kept around so callers can form deltas over the last snapshot interval.
#[derive(Debug, Clone, Default)]
pub struct StatsData {
    current: FxHashMap<u32, Vec<u32>>,
    previous: FxHashMap<u32, Vec<u32>>,
}

impl StatsData {
    /// Accept a new snapshot for a module, rolling its predecessor into
    /// the previous slot.
    pub fn update(&mut self, vsn: u32, snapshot: Vec<u32>) -> Result<(), StatsError> {
        if vsn >= MAX_VSN {
            return Err(StatsError::BadVsn(vsn));
        }
        if snapshot.len() != STATS_SNAPSHOT_WORDS {
            return Err(StatsError::BadSnapshotLength(snapshot.len()));
        }
        if let Some(old) = self.current.insert(vsn, snapshot) {
            self.previous.insert(vsn, old);
        }
        Ok(())
    }

    fn word48(snapshot: &[u32], high: usize, low: usize) -> u64 {
        ((snapshot[high] as u64) << 32) | snapshot[low] as u64
    }

    fn channel_value(&self, vsn: u32, channel: usize, high: usize, low: usize) -> Option<u64> {
        if channel >= NUMBER_OF_CHANNELS {
            return None;
        }
        self.current
            .get(&vsn)
            .map(|s| Self::word48(s, high + channel, low + channel))
    }

    /// Real time counter of the module, in filter ticks.
    pub fn real_time_ticks(&self, vsn: u32) -> Option<u64> {
        self.current
            .get(&vsn)
            .map(|s| Self::word48(s, REAL_TIME_HIGH, REAL_TIME_LOW))
    }

    pub fn live_time_ticks(&self, vsn: u32, channel: usize) -> Option<u64> {
        self.channel_value(vsn, channel, LIVE_TIME_HIGH, LIVE_TIME_LOW)
    }

    pub fn fast_peaks(&self, vsn: u32, channel: usize) -> Option<u64> {
        self.channel_value(vsn, channel, FAST_PEAKS_HIGH, FAST_PEAKS_LOW)
    }

    /// Triggers accumulated since the previous snapshot, for rate forming.
    /// None until two snapshots have arrived for the module.
    pub fn delta_fast_peaks(&self, vsn: u32, channel: usize) -> Option<u64> {
        if channel >= NUMBER_OF_CHANNELS {
            return None;
        }
        let current = self.current.get(&vsn)?;
        let previous = self.previous.get(&vsn)?;
        let now = Self::word48(current, FAST_PEAKS_HIGH + channel, FAST_PEAKS_LOW + channel);
        let then = Self::word48(previous, FAST_PEAKS_HIGH + channel, FAST_PEAKS_LOW + channel);
        Some(now.saturating_sub(then))
    }

    pub fn delta_real_time_ticks(&self, vsn: u32) -> Option<u64> {
        let now = Self::word48(self.current.get(&vsn)?, REAL_TIME_HIGH, REAL_TIME_LOW);
        let then = Self::word48(self.previous.get(&vsn)?, REAL_TIME_HIGH, REAL_TIME_LOW);
        Some(now.saturating_sub(then))
    }
}
