//! The digitized waveform attached to a channel event and the analysis that
//! derives scalar values (baseline, maximum, QDC) from it. Derived values
//! live in a named side table on the trace; re-running an analysis pass
//! overwrites the previous values rather than appending.

use fxhash::FxHashMap;

use super::error::TimingError;
use super::polynomial;

/// The minimum number of samples needed for a good baseline calculation.
pub const MINIMUM_BASELINE_LENGTH: usize = 5;

/// Side-table keys written by [`TimingDataExtractor`].
pub mod keys {
    pub const BASELINE: &str = "baseline";
    pub const SIGMA_BASELINE: &str = "sigmaBaseline";
    pub const MAX_POSITION: &str = "maxPosition";
    pub const MAX_VALUE: &str = "maxValue";
    pub const EXTRAPOLATED_MAX: &str = "extrapolatedMax";
    pub const QDC: &str = "qdc";
    pub const TAIL_RATIO: &str = "tailRatio";
    pub const PHASE: &str = "phase";
}

/// An ordered sequence of raw ADC samples, fixed at construction, plus a
/// key to value table of derived scalars.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    samples: Vec<u16>,
    values: FxHashMap<String, f64>,
}

impl Trace {
    pub fn new(samples: Vec<u16>) -> Self {
        Trace {
            samples,
            values: FxHashMap::default(),
        }
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Store a derived value, replacing any previous value for the key.
    pub fn set_value(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }

    pub fn value(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn baseline(&self) -> Option<f64> {
        self.value(keys::BASELINE)
    }

    pub fn sigma_baseline(&self) -> Option<f64> {
        self.value(keys::SIGMA_BASELINE)
    }

    pub fn max_info(&self) -> Option<(usize, f64)> {
        match (self.value(keys::MAX_POSITION), self.value(keys::MAX_VALUE)) {
            (Some(pos), Some(val)) => Some((pos as usize, val)),
            _ => None,
        }
    }

    pub fn qdc(&self) -> Option<f64> {
        self.value(keys::QDC)
    }

    pub fn phase(&self) -> Option<f64> {
        self.value(keys::PHASE)
    }
}

/// Average of the data, baseline style.
fn average(data: &[u16]) -> f64 {
    data.iter().map(|&s| s as f64).sum::<f64>() / data.len() as f64
}

/// Standard deviation of the full population around `mean`.
fn standard_deviation(data: &[u16], mean: f64) -> f64 {
    let sum: f64 = data.iter().map(|&s| (s as f64 - mean).powi(2)).sum();
    (sum / data.len() as f64).sqrt()
}

/// Trapezoidal integral of the data. No baseline subtraction here to keep
/// things general.
fn integrate(data: &[u16]) -> f64 {
    let mut integral = 0.0;
    for i in 1..data.len() {
        integral += 0.5 * (data[i - 1] as f64 + data[i] as f64);
    }
    integral
}

/// Compute the trace baseline and its standard deviation over
/// `[range.0, range.1)`.
pub fn calculate_baseline(
    data: &[u16],
    range: (usize, usize),
) -> Result<(f64, f64), TimingError> {
    if data.is_empty() {
        return Err(TimingError::EmptyTrace);
    }
    if range.1 <= range.0 {
        return Err(TimingError::BadBaselineRange(range.1, range.0));
    }
    if data.len() < range.1 {
        return Err(TimingError::MaxOutOfRange(range.1, data.len()));
    }
    if range.1 - range.0 < MINIMUM_BASELINE_LENGTH {
        return Err(TimingError::TraceTooShort(
            range.1 - range.0,
            MINIMUM_BASELINE_LENGTH,
        ));
    }
    let window = &data[range.0..range.1];
    let baseline = average(window);
    let sigma = standard_deviation(window, baseline);
    Ok((baseline, sigma))
}

/// Find the bin and value of the trace maximum. The search is bounded above
/// by the trace delay set for the channel and starts after the baseline
/// window so that noise at the head of the trace cannot win.
pub fn find_maximum(
    data: &[u16],
    trace_delay_in_bins: usize,
) -> Result<(usize, f64), TimingError> {
    if data.is_empty() {
        return Err(TimingError::EmptyTrace);
    }
    if trace_delay_in_bins > data.len() {
        return Err(TimingError::MaxOutOfRange(trace_delay_in_bins, data.len()));
    }
    if trace_delay_in_bins < MINIMUM_BASELINE_LENGTH {
        return Err(TimingError::TraceTooShort(
            trace_delay_in_bins,
            MINIMUM_BASELINE_LENGTH,
        ));
    }
    let (position, value) = data[MINIMUM_BASELINE_LENGTH..trace_delay_in_bins]
        .iter()
        .enumerate()
        .max_by_key(|(_, &s)| s)
        .map(|(i, &s)| (i + MINIMUM_BASELINE_LENGTH, s as f64))
        .ok_or(TimingError::EmptyTrace)?;
    Ok((position, value))
}

/// Extrapolate the true maximum by fitting a third order polynomial around
/// the maximum bin. The side of the maximum with the larger neighbor decides
/// where the fit window starts.
pub fn extrapolate_maximum(
    data: &[u16],
    max_info: (usize, f64),
) -> Result<(f64, [f64; 4]), TimingError> {
    if data.len() < 4 {
        return Err(TimingError::TraceTooShort(data.len(), 4));
    }
    if max_info.0 < 2 || max_info.0 + 1 >= data.len() {
        return Err(TimingError::MaxOutOfRange(max_info.0, data.len()));
    }
    let fit_start_bin = if data[max_info.0 - 1] >= data[max_info.0 + 1] {
        max_info.0 - 2
    } else {
        max_info.0 - 1
    };
    polynomial::calculate_poly3(data, fit_start_bin)
}

/// Trapezoidal QDC over `[range.0, range.1)`, no baseline subtraction.
pub fn calculate_qdc(data: &[u16], range: (usize, usize)) -> Result<f64, TimingError> {
    if data.is_empty() {
        return Err(TimingError::EmptyTrace);
    }
    if data.len() < range.1 {
        return Err(TimingError::MaxOutOfRange(range.1, data.len()));
    }
    if range.0 > range.1 {
        return Err(TimingError::BadBaselineRange(range.1, range.0));
    }
    Ok(integrate(&data[range.0..range.1]))
}

/// Ratio of the integral of the pulse tail to the full QDC, used for pulse
/// shape discrimination.
pub fn calculate_tail_ratio(
    data: &[u16],
    range: (usize, usize),
    qdc: f64,
) -> Result<f64, TimingError> {
    if qdc == 0.0 {
        return Err(TimingError::EmptyTrace);
    }
    Ok(calculate_qdc(data, range)? / qdc)
}

/// Derives the scalar values every timing algorithm depends on: baseline,
/// maximum and QDC. Results land in the trace side table and a failed
/// extraction leaves the trace marked invalid rather than half populated.
#[derive(Debug, Clone)]
pub struct TimingDataExtractor {
    baseline_length: usize,
    trace_delay_in_bins: usize,
    qdc_window: (usize, usize),
}

impl TimingDataExtractor {
    pub fn new(baseline_length: usize, trace_delay_in_bins: usize, qdc_window: (usize, usize)) -> Self {
        TimingDataExtractor {
            baseline_length,
            trace_delay_in_bins,
            qdc_window,
        }
    }

    /// Analyze a trace, overwriting any values from a previous pass.
    /// Returns the (baseline, sigma, max position, max value) tuple on
    /// success.
    pub fn extract(&self, trace: &mut Trace) -> Result<(f64, f64, usize, f64), TimingError> {
        let samples = trace.samples().to_vec();
        let (baseline, sigma) = calculate_baseline(&samples, (0, self.baseline_length))?;
        let delay = self.trace_delay_in_bins.min(samples.len());
        let (max_pos, max_val) = find_maximum(&samples, delay)?;
        let qdc_high = self.qdc_window.1.min(samples.len());
        let qdc = calculate_qdc(&samples, (self.qdc_window.0, qdc_high))?;

        trace.set_value(keys::BASELINE, baseline);
        trace.set_value(keys::SIGMA_BASELINE, sigma);
        trace.set_value(keys::MAX_POSITION, max_pos as f64);
        trace.set_value(keys::MAX_VALUE, max_val - baseline);
        // The trapezoid over N samples spans N - 1 intervals.
        let qdc_intervals = (qdc_high - self.qdc_window.0).saturating_sub(1);
        trace.set_value(keys::QDC, qdc - baseline * qdc_intervals as f64);

        // Tail of the pulse relative to the full integral, for pulse shape
        // discrimination.
        if qdc != 0.0 && max_pos < qdc_high {
            if let Ok(ratio) = calculate_tail_ratio(&samples, (max_pos, qdc_high), qdc) {
                trace.set_value(keys::TAIL_RATIO, ratio);
            }
        }

        if let Ok((extrapolated, _)) = extrapolate_maximum(&samples, (max_pos, max_val)) {
            trace.set_value(keys::EXTRAPOLATED_MAX, extrapolated - baseline);
        }
        Ok((baseline, sigma, max_pos, max_val - baseline))
    }
}

/// A trace taken from a medium VANDLE module, shared across test modules.
#[cfg(test)]
pub const VANDLE_TRACE: [u16; 124] = [
    437, 436, 434, 434, 437, 437, 438, 435, 434, 438, 439, 437, 438, 434, 435,
    439, 438, 434, 434, 435, 437, 440, 439, 435, 437, 439, 438, 435, 436, 436,
    437, 439, 435, 433, 434, 436, 439, 441, 436, 437, 439, 438, 438, 435, 434,
    434, 438, 438, 434, 434, 437, 440, 439, 438, 434, 436, 439, 439, 437, 436,
    434, 436, 438, 437, 436, 437, 440, 440, 439, 436, 435, 437, 501, 1122,
    2358, 3509, 3816, 3467, 2921, 2376, 1914, 1538, 1252, 1043, 877, 750, 667,
    619, 591, 563, 526, 458, 395, 403, 452, 478, 492, 498, 494, 477, 460, 459,
    462, 461, 460, 456, 452, 452, 455, 453, 446, 441, 440, 444, 456, 459, 451,
    450, 447, 445, 449, 456, 456, 455,
];
