//! High resolution timing for one detector end. Combines the filter
//! timestamp of the channel event with the sub-sample CFD phase derived
//! from its trace.

use super::cfd::phase_failed;
use super::channel_event::{ChannelEvent, Frequency};
use super::trace::keys;

/// The timing quantities one end of a bar contributes. `is_valid` gates the
/// high resolution path; an end without a usable trace or phase still
/// carries its on-board energy and filter time for the low resolution
/// fallback.
#[derive(Debug, Clone, Default)]
pub struct HighResTimingData {
    pub location: u32,
    /// Sub-sample trigger phase in trace bins, when the CFD converged.
    pub phase: Option<f64>,
    /// Filter timestamp in nanoseconds.
    pub filter_time_ns: f64,
    /// Phase in nanoseconds on top of the filter timestamp.
    pub high_res_time_ns: f64,
    pub energy: f64,
    pub qdc: f64,
    pub maximum: f64,
    pub baseline_sigma: f64,
    pub is_valid: bool,
}

impl HighResTimingData {
    /// Build timing data from a decoded event whose trace analysis already
    /// ran. The event is valid for high resolution work when the trace
    /// produced a QDC and maximum and the CFD found a phase.
    pub fn new(event: &ChannelEvent, location: u32, frequency: Frequency) -> Self {
        let filter_time_ns = event.filter_time() as f64 * frequency.filter_period_ns();
        let phase = event
            .trace
            .phase()
            .filter(|&p| !phase_failed(p));
        let qdc = event.trace.qdc().unwrap_or(0.0);
        let maximum = event.trace.value(keys::MAX_VALUE).unwrap_or(0.0);
        let baseline_sigma = event.trace.sigma_baseline().unwrap_or(f64::NAN);

        let high_res_time_ns = match phase {
            Some(p) => filter_time_ns + p * frequency.adc_period_ns(),
            None => filter_time_ns,
        };
        let is_valid = phase.is_some() && qdc > 0.0 && maximum > 0.0;

        HighResTimingData {
            location,
            phase,
            filter_time_ns,
            high_res_time_ns,
            energy: event.energy,
            qdc,
            maximum,
            baseline_sigma,
            is_valid,
        }
    }
}
