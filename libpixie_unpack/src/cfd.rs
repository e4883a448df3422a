//! Constant fraction discrimination in software. Two flavors exist: the
//! traditional digital CFD that mimics the on-board algorithm, and a
//! polynomial CFD that fits the leading edge near a simple threshold
//! crossing. Both report the sub-sample trigger phase in units of trace
//! bins.
//!
//! A trace that simply never crosses is a physics outcome, reported with the
//! [`FAILED_PHASE`] sentinel. Structural misuse (empty traces, a maximum
//! outside the trace) is an error instead.

use super::constants::FAILED_PHASE;
use super::error::TimingError;
use super::polynomial;

/// Tells whether a phase value is the failure sentinel.
pub fn phase_failed(phase: f64) -> bool {
    phase == FAILED_PHASE
}

/// The digital CFD. The response is built from the baseline subtracted
/// trace as a running sum of scaled minus delayed samples; the zero
/// crossing before the response minimum is the trigger phase.
#[derive(Debug, Clone, Copy)]
pub struct TraditionalCfd {
    /// Scaling fraction applied to the prompt sample.
    pub fraction: f64,
    /// Delay in bins between the prompt and the delayed sample.
    pub delay: usize,
    /// Length of the running sum in bins.
    pub length: usize,
}

impl TraditionalCfd {
    pub fn new(fraction: f64, delay: usize, length: usize) -> Self {
        TraditionalCfd {
            fraction,
            delay,
            length,
        }
    }

    pub fn calculate_phase(&self, data: &[u16], baseline: f64) -> Result<f64, TimingError> {
        if data.is_empty() {
            return Err(TimingError::EmptyTrace);
        }
        // The oldest sample the running sum touches is i - (length - 1) - delay,
        // so the response is defined from delay + length - 1 on.
        let first_valid = (self.delay + self.length).saturating_sub(1);
        if data.len() <= first_valid + 1 {
            return Err(TimingError::TraceTooShort(data.len(), first_valid + 2));
        }

        let subtracted: Vec<f64> = data.iter().map(|&s| s as f64 - baseline).collect();

        let mut response = vec![0.0; data.len()];
        let mut min_position = 0;
        let mut min_value = f64::INFINITY;
        for i in first_valid..data.len() {
            let mut sum = 0.0;
            for k in 0..self.length {
                sum += self.fraction * subtracted[i - k] - subtracted[i - k - self.delay];
            }
            response[i] = sum;
            if sum < min_value {
                min_value = sum;
                min_position = i;
            }
        }
        if min_position == 0 {
            return Ok(FAILED_PHASE);
        }

        // Walk backward from the minimum to the last positive-to-negative
        // zero crossing of the response.
        for i in (first_valid..min_position).rev() {
            if response[i] >= 0.0 && response[i + 1] < 0.0 {
                return Ok(i as f64 - response[i] / (response[i + 1] - response[i]));
            }
        }
        Ok(FAILED_PHASE)
    }
}

/// The polynomial CFD. A fixed fraction of the pulse amplitude sets a
/// threshold on the leading edge; a second order fit through the samples
/// around the crossing interpolates the phase.
#[derive(Debug, Clone, Copy)]
pub struct PolynomialCfd {
    /// Fraction of the baseline subtracted maximum used as threshold.
    pub fraction: f64,
}

impl PolynomialCfd {
    pub fn new(fraction: f64) -> Self {
        PolynomialCfd { fraction }
    }

    pub fn calculate_phase(
        &self,
        data: &[u16],
        max_info: (usize, f64),
        baseline: f64,
    ) -> Result<f64, TimingError> {
        if data.is_empty() {
            return Err(TimingError::EmptyTrace);
        }
        if max_info.0 >= data.len() {
            return Err(TimingError::MaxOutOfRange(max_info.0, data.len()));
        }

        let subtracted: Vec<f64> = data.iter().map(|&s| s as f64 - baseline).collect();
        let threshold = self.fraction * (max_info.1 - baseline);

        let mut crossing = None;
        for i in (1..=max_info.0).rev() {
            if subtracted[i - 1] < threshold && threshold <= subtracted[i] {
                crossing = Some(i);
                break;
            }
        }
        let crossing = match crossing {
            Some(bin) => bin,
            None => return Ok(FAILED_PHASE),
        };

        let (_, coeffs) = polynomial::calculate_poly2(&subtracted, crossing - 1)?;
        if coeffs[2] > 0.0 {
            return Err(TimingError::ConcaveFit);
        }
        let discriminant =
            coeffs[1] * coeffs[1] - 4.0 * coeffs[2] * (coeffs[0] - threshold);
        if discriminant < 0.0 {
            return Ok(FAILED_PHASE);
        }
        Ok((-coeffs[1] + discriminant.sqrt()) / (2.0 * coeffs[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{calculate_baseline, find_maximum, VANDLE_TRACE};

    #[test]
    fn test_polynomial_phase_on_reference_trace() {
        let (baseline, _) = calculate_baseline(&VANDLE_TRACE, (0, 70)).unwrap();
        let max_info = find_maximum(&VANDLE_TRACE, 124).unwrap();
        let cfd = PolynomialCfd::new(0.5);
        let phase = cfd
            .calculate_phase(&VANDLE_TRACE, max_info, baseline)
            .unwrap();
        assert!((phase - 73.807).abs() < 0.01, "phase was {}", phase);
    }

    #[test]
    fn test_polynomial_phase_errors() {
        let cfd = PolynomialCfd::new(0.5);
        assert!(matches!(
            cfd.calculate_phase(&[], (0, 0.0), 0.0),
            Err(TimingError::EmptyTrace)
        ));
        assert!(matches!(
            cfd.calculate_phase(&VANDLE_TRACE, (2000, 3816.0), 436.0),
            Err(TimingError::MaxOutOfRange(2000, 124))
        ));
    }

    #[test]
    fn test_polynomial_no_crossing_gives_sentinel() {
        // A flat trace never rises through the threshold.
        let flat = [100u16; 30];
        let cfd = PolynomialCfd::new(0.5);
        let phase = cfd.calculate_phase(&flat, (10, 500.0), 100.0).unwrap();
        assert!(phase_failed(phase));
    }

    #[test]
    fn test_traditional_phase_lands_on_leading_edge() {
        let (baseline, _) = calculate_baseline(&VANDLE_TRACE, (0, 70)).unwrap();
        let cfd = TraditionalCfd::new(0.5, 5, 3);
        let phase = cfd.calculate_phase(&VANDLE_TRACE, baseline).unwrap();
        assert!(!phase_failed(phase));
        assert!(phase > 70.0 && phase < 90.0, "phase was {}", phase);
    }

    #[test]
    fn test_traditional_phase_recovers_step_crossing() {
        // A unit step at sample s gives a response of F*A over [s, s+d) and
        // (F-1)*A after, so the interpolated crossing sits at s + d - 1 + F.
        let mut step = [0u16; 40];
        for sample in step.iter_mut().skip(20) {
            *sample = 1000;
        }
        let cfd = TraditionalCfd::new(0.5, 4, 1);
        let phase = cfd.calculate_phase(&step, 0.0).unwrap();
        assert!((phase - 23.5).abs() < 1e-6, "phase was {}", phase);

        let cfd = TraditionalCfd::new(0.25, 4, 1);
        let phase = cfd.calculate_phase(&step, 0.0).unwrap();
        assert!((phase - 23.25).abs() < 1e-6, "phase was {}", phase);
    }

    #[test]
    fn test_traditional_crossing_at_first_full_window() {
        // A step this early puts the zero crossing at delay + length - 1,
        // the first sample the running sum can cover.
        let mut step = [0u16; 40];
        for sample in step.iter_mut().skip(1) {
            *sample = 1000;
        }
        let cfd = TraditionalCfd::new(0.5, 4, 1);
        let phase = cfd.calculate_phase(&step, 0.0).unwrap();
        assert!((phase - 4.5).abs() < 1e-6, "phase was {}", phase);
    }

    #[test]
    fn test_traditional_flat_trace_gives_sentinel() {
        let flat = [100u16; 40];
        let cfd = TraditionalCfd::new(0.5, 5, 3);
        let phase = cfd.calculate_phase(&flat, 100.0).unwrap();
        assert!(phase_failed(phase));
    }

    #[test]
    fn test_traditional_short_trace_is_error() {
        let cfd = TraditionalCfd::new(0.5, 10, 10);
        assert!(matches!(
            cfd.calculate_phase(&[1, 2, 3], 0.0),
            Err(TimingError::TraceTooShort(3, _))
        ));
        assert!(matches!(
            cfd.calculate_phase(&[], 0.0),
            Err(TimingError::EmptyTrace)
        ));
    }
}
