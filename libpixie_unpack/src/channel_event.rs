//! Decoding of a single Pixie-16 channel event from its four word header,
//! optional header sections, and trace. The encoder exists so that tests and
//! tools can produce bit-faithful list-mode streams.

use serde::{Deserialize, Serialize};

use super::constants::*;
use super::error::{ConfigError, FormatError};
use super::trace::Trace;
use super::word_buffer::WordBuffer;

/// Sampling frequency of a Pixie-16 module. The frequency fixes the CFD
/// scaling constants used to build the high resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    Mhz100,
    Mhz250,
    Mhz500,
}

impl Frequency {
    pub fn from_mhz(mhz: u32) -> Result<Self, ConfigError> {
        match mhz {
            100 => Ok(Frequency::Mhz100),
            250 => Ok(Frequency::Mhz250),
            500 => Ok(Frequency::Mhz500),
            _ => Err(ConfigError::BadFrequency(mhz)),
        }
    }

    /// Ratio of the ADC clock to the filter clock.
    pub fn cfd_multiplier(&self) -> f64 {
        match self {
            Frequency::Mhz100 => 1.0,
            Frequency::Mhz250 => 2.0,
            Frequency::Mhz500 => 10.0,
        }
    }

    /// Full scale of the CFD fractional time field.
    pub fn cfd_size(&self) -> f64 {
        match self {
            Frequency::Mhz100 => 32768.0,
            Frequency::Mhz250 => 16384.0,
            Frequency::Mhz500 => 8192.0,
        }
    }

    /// Nanoseconds per ADC sample.
    pub fn adc_period_ns(&self) -> f64 {
        match self {
            Frequency::Mhz100 => 10.0,
            Frequency::Mhz250 => 4.0,
            Frequency::Mhz500 => 2.0,
        }
    }

    /// Nanoseconds per filter clock tick.
    pub fn filter_period_ns(&self) -> f64 {
        match self {
            Frequency::Mhz100 => 10.0,
            Frequency::Mhz250 => 8.0,
            Frequency::Mhz500 => 10.0,
        }
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Frequency::Mhz250
    }
}

/// Which optional sections a given header length carries. The firmware only
/// emits the even codes listed in [`HeaderScheme::from_header_length`]; a
/// header length of one marks a statistics block, which is not a channel
/// event and is handled upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderScheme {
    pub has_energy_sums: bool,
    pub has_external_timestamp: bool,
    pub has_qdc: bool,
}

impl HeaderScheme {
    pub fn from_header_length(length: u32) -> Option<Self> {
        let scheme = match length {
            4 => HeaderScheme::default(),
            6 => HeaderScheme {
                has_external_timestamp: true,
                ..Default::default()
            },
            8 => HeaderScheme {
                has_energy_sums: true,
                ..Default::default()
            },
            10 => HeaderScheme {
                has_energy_sums: true,
                has_external_timestamp: true,
                ..Default::default()
            },
            12 => HeaderScheme {
                has_qdc: true,
                ..Default::default()
            },
            14 => HeaderScheme {
                has_external_timestamp: true,
                has_qdc: true,
                ..Default::default()
            },
            16 => HeaderScheme {
                has_energy_sums: true,
                has_qdc: true,
                ..Default::default()
            },
            18 => HeaderScheme {
                has_energy_sums: true,
                has_external_timestamp: true,
                has_qdc: true,
            },
            _ => return None,
        };
        Some(scheme)
    }

    pub fn header_length(&self) -> u32 {
        let mut length = BASE_HEADER_LENGTH;
        if self.has_energy_sums {
            length += NUM_ENERGY_SUM_WORDS;
        }
        if self.has_external_timestamp {
            length += NUM_EXTERNAL_TS_WORDS;
        }
        if self.has_qdc {
            length += NUM_QDCS as u32;
        }
        length
    }
}

/// On-board energy filter sums. The baseline is transported as the raw bits
/// of an IEEE 754 single.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnergySums {
    pub trailing: u32,
    pub leading: u32,
    pub gap: u32,
    pub baseline: f32,
}

/// One decoded channel event, header fields plus any optional sections and
/// the trace.
#[derive(Debug, Clone, Default)]
pub struct ChannelEvent {
    pub channel_number: u32,
    pub slot_id: u32,
    pub crate_id: u32,
    pub module_number: u32,
    pub header_length: u32,
    pub event_length: u32,
    pub virtual_channel: bool,
    pub saturated: bool,
    pub pileup: bool,
    pub time_low: u32,
    pub time_high: u32,
    pub cfd_fractional_time: u32,
    pub cfd_forced_trigger: bool,
    pub cfd_trigger_source: bool,
    pub energy: f64,
    pub energy_sums: Option<EnergySums>,
    pub external_timestamp: Option<u64>,
    pub qdc: Option<[u32; NUM_QDCS]>,
    pub trace: Trace,
    /// Time in filter clock ticks with the CFD fraction folded in.
    pub time: f64,
}

impl ChannelEvent {
    /// The 48-bit filter timestamp in filter clock ticks.
    pub fn filter_time(&self) -> u64 {
        self.time_low as u64 + ((self.time_high as u64) << 32)
    }

    /// Fold the CFD fractional time into the filter timestamp. When the CFD
    /// failed (forced trigger or zero fraction) the plain filter time is
    /// used without the frequency multiplier. At 250 MHz the trigger-source
    /// bit subtracts a tick; at 500 MHz the raw fraction spans two ticks and
    /// the source bit selects which one.
    pub fn calculate_time(&self, frequency: Frequency) -> f64 {
        if self.cfd_forced_trigger || self.cfd_fractional_time == 0 {
            return self.filter_time() as f64;
        }
        let fraction = self.cfd_fractional_time as f64 / frequency.cfd_size();
        let source = if self.cfd_trigger_source { 1.0 } else { 0.0 };
        let phase = match frequency {
            Frequency::Mhz100 => fraction,
            Frequency::Mhz250 => fraction - source,
            Frequency::Mhz500 => fraction + source - 1.0,
        };
        frequency.cfd_multiplier() * self.filter_time() as f64 + phase
    }

    /// On-board QDC sum `index`, or [`U_DELIMITER`] when the index is out of
    /// range or the header carried no QDCs.
    pub fn qdc_value(&self, index: usize) -> u32 {
        match self.qdc {
            Some(qdc) if index < NUM_QDCS => qdc[index],
            _ => U_DELIMITER,
        }
    }

    pub fn uuid(&self) -> u32 {
        self.module_number * NUMBER_OF_CHANNELS as u32 + self.channel_number
    }
}

/// Decode the next channel event from `buf`. `record_words_left` is the
/// number of list-mode words remaining in the enclosing module record, used
/// to reject events that claim to extend past the record end.
pub fn decode_channel_event(
    buf: &mut WordBuffer<'_>,
    module: u32,
    record_words_left: u32,
    frequency: Frequency,
) -> Result<ChannelEvent, FormatError> {
    let word0 = buf.read_word()?;
    let channel_number = word0 & CHANNEL_NUMBER_MASK;
    let slot_id = (word0 & SLOT_ID_MASK) >> SLOT_ID_SHIFT;
    let crate_id = (word0 & CRATE_ID_MASK) >> CRATE_ID_SHIFT;
    let header_length = (word0 & HEADER_LENGTH_MASK) >> HEADER_LENGTH_SHIFT;
    let event_length = (word0 & EVENT_LENGTH_MASK) >> EVENT_LENGTH_SHIFT;

    if event_length > record_words_left {
        return Err(FormatError::EventPastRecordEnd(event_length, module));
    }

    let scheme = HeaderScheme::from_header_length(header_length).ok_or(
        FormatError::BadHeaderLength(header_length, module, crate_id, slot_id, channel_number),
    )?;

    let word1 = buf.read_word()?;
    let word2 = buf.read_word()?;
    let word3 = buf.read_word()?;

    let time_low = word1;
    let time_high = word2 & EVENT_TIME_HIGH_MASK;
    let cfd_fractional_time = (word2 & CFD_FRACTIONAL_TIME_MASK) >> CFD_FRACTIONAL_TIME_SHIFT;
    let cfd_trigger_source = word2 & CFD_TRIGGER_SOURCE_MASK != 0;
    let cfd_forced_trigger = word2 & CFD_FORCED_TRIGGER_MASK != 0;

    let raw_energy = word3 & ENERGY_MASK;
    let trace_samples = ((word3 & TRACE_LENGTH_MASK) >> TRACE_LENGTH_SHIFT) as usize;

    let trace_words = trace_samples.div_ceil(RAW_WORDS_PER_LIST_WORD) as u32;
    if header_length + trace_words != event_length {
        return Err(FormatError::EventLengthMismatch {
            module,
            expected: event_length,
            header: header_length,
            trace: trace_samples,
        });
    }

    let energy_sums = if scheme.has_energy_sums {
        let words = buf.read_words(NUM_ENERGY_SUM_WORDS as usize)?;
        Some(EnergySums {
            trailing: words[0],
            leading: words[1],
            gap: words[2],
            baseline: f32::from_bits(words[3]),
        })
    } else {
        None
    };

    let external_timestamp = if scheme.has_external_timestamp {
        let low = buf.read_word()?;
        let high = buf.read_word()? & EVENT_TIME_HIGH_MASK;
        Some(low as u64 + ((high as u64) << 32))
    } else {
        None
    };

    let qdc = if scheme.has_qdc {
        let words = buf.read_words(NUM_QDCS)?;
        let mut sums = [0u32; NUM_QDCS];
        sums.copy_from_slice(&words);
        Some(sums)
    } else {
        None
    };

    let trace = Trace::new(buf.read_samples(trace_samples)?);

    let saturated = word0 & SATURATED_MASK != 0;
    let energy = if saturated {
        SATURATED_ENERGY
    } else {
        raw_energy as f64
    };

    let mut event = ChannelEvent {
        channel_number,
        slot_id,
        crate_id,
        module_number: module,
        header_length,
        event_length,
        virtual_channel: word0 & VIRTUAL_CHANNEL_MASK != 0,
        saturated,
        pileup: word0 & PILEUP_MASK != 0,
        time_low,
        time_high,
        cfd_fractional_time,
        cfd_forced_trigger,
        cfd_trigger_source,
        energy,
        energy_sums,
        external_timestamp,
        qdc,
        trace,
        time: 0.0,
    };
    event.time = event.calculate_time(frequency);
    Ok(event)
}

/// Encode an event back into list-mode words. The header length is derived
/// from the sections present on the event, not from the stored field, so a
/// hand-built event always encodes consistently.
pub fn encode_channel_event(event: &ChannelEvent) -> Vec<u32> {
    let scheme = HeaderScheme {
        has_energy_sums: event.energy_sums.is_some(),
        has_external_timestamp: event.external_timestamp.is_some(),
        has_qdc: event.qdc.is_some(),
    };
    let header_length = scheme.header_length();
    let trace_samples = event.trace.len();
    let trace_words = trace_samples.div_ceil(RAW_WORDS_PER_LIST_WORD) as u32;
    let event_length = header_length + trace_words;

    let mut words = Vec::with_capacity(event_length as usize);

    let mut word0 = (event.channel_number & CHANNEL_NUMBER_MASK)
        | ((event.slot_id << SLOT_ID_SHIFT) & SLOT_ID_MASK)
        | ((event.crate_id << CRATE_ID_SHIFT) & CRATE_ID_MASK)
        | ((header_length << HEADER_LENGTH_SHIFT) & HEADER_LENGTH_MASK)
        | ((event_length << EVENT_LENGTH_SHIFT) & EVENT_LENGTH_MASK);
    if event.virtual_channel {
        word0 |= VIRTUAL_CHANNEL_MASK;
    }
    if event.saturated {
        word0 |= SATURATED_MASK;
    }
    if event.pileup {
        word0 |= PILEUP_MASK;
    }
    words.push(word0);
    words.push(event.time_low);

    let mut word2 = (event.time_high & EVENT_TIME_HIGH_MASK)
        | ((event.cfd_fractional_time << CFD_FRACTIONAL_TIME_SHIFT) & CFD_FRACTIONAL_TIME_MASK);
    if event.cfd_trigger_source {
        word2 |= CFD_TRIGGER_SOURCE_MASK;
    }
    if event.cfd_forced_trigger {
        word2 |= CFD_FORCED_TRIGGER_MASK;
    }
    words.push(word2);

    let raw_energy = if event.saturated {
        0
    } else {
        event.energy as u32 & ENERGY_MASK
    };
    words.push(raw_energy | ((trace_samples as u32) << TRACE_LENGTH_SHIFT));

    if let Some(sums) = event.energy_sums {
        words.push(sums.trailing);
        words.push(sums.leading);
        words.push(sums.gap);
        words.push(sums.baseline.to_bits());
    }
    if let Some(ts) = event.external_timestamp {
        words.push(ts as u32);
        words.push((ts >> 32) as u32 & EVENT_TIME_HIGH_MASK);
    }
    if let Some(qdc) = event.qdc {
        words.extend_from_slice(&qdc);
    }

    let samples = event.trace.samples();
    for pair in samples.chunks(RAW_WORDS_PER_LIST_WORD) {
        let low = pair[0] as u32;
        let high = if pair.len() == 2 { pair[1] as u32 } else { 0 };
        words.push(low | (high << 16));
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::VANDLE_TRACE;
    use crate::word_buffer::to_raw;

    const BASE_HEADER: [u32; 4] = [540717, 123456789, 26001, 2345];
    const QDC_SUMS: [u32; 8] = [123, 456, 789, 987, 654, 321, 135, 791];

    fn decode(words: &[u32]) -> Result<ChannelEvent, FormatError> {
        let raw = to_raw(words);
        let mut buf = WordBuffer::new(&raw);
        decode_channel_event(&mut buf, 0, words.len() as u32, Frequency::Mhz250)
    }

    #[test]
    fn test_decode_base_header() {
        let event = decode(&BASE_HEADER).unwrap();
        assert_eq!(event.channel_number, 13);
        assert_eq!(event.slot_id, 2);
        assert_eq!(event.crate_id, 0);
        assert_eq!(event.header_length, 4);
        assert_eq!(event.event_length, 4);
        assert_eq!(event.energy, 2345.0);
        assert_eq!(event.time_low, 123456789);
        assert_eq!(event.time_high, 26001);
        assert_eq!(event.filter_time(), 111673568120085);
        assert_eq!(event.time, 111673568120085.0);
        assert!(event.trace.is_empty());
        assert!(!event.pileup);
        assert!(!event.saturated);
    }

    #[test]
    fn test_time_with_cfd_fraction() {
        let mut words = BASE_HEADER;
        words[2] = 26001 | (1234 << 16);
        let event = decode(&words).unwrap();
        assert_eq!(event.cfd_fractional_time, 1234);
        let expected = 2.0 * 111673568120085.0 + 1234.0 / 16384.0;
        assert_eq!(event.time, expected);
    }

    #[test]
    fn test_time_folds_trigger_source_per_frequency() {
        let mut words = BASE_HEADER;
        words[2] = 26001 | (1234 << 16);
        let decode_at = |frequency, source: bool| {
            let mut words = words;
            if source {
                words[2] |= CFD_TRIGGER_SOURCE_MASK;
            }
            let raw = to_raw(&words);
            let mut buf = WordBuffer::new(&raw);
            decode_channel_event(&mut buf, 0, words.len() as u32, frequency).unwrap()
        };
        let filter = 111673568120085.0;
        let fraction_250 = 1234.0 / 16384.0;
        let fraction_500 = 1234.0 / 8192.0;

        assert_eq!(decode_at(Frequency::Mhz250, false).time, 2.0 * filter + fraction_250);
        assert_eq!(
            decode_at(Frequency::Mhz250, true).time,
            2.0 * filter + fraction_250 - 1.0
        );
        // At 500 MHz the tick offset applies when the source bit is clear.
        assert_eq!(
            decode_at(Frequency::Mhz500, false).time,
            10.0 * filter + fraction_500 - 1.0
        );
        assert_eq!(decode_at(Frequency::Mhz500, true).time, 10.0 * filter + fraction_500);
    }

    #[test]
    fn test_forced_trigger_falls_back_to_filter_time() {
        let mut words = BASE_HEADER;
        words[2] = 26001 | (1234 << 16) | CFD_FORCED_TRIGGER_MASK;
        let event = decode(&words).unwrap();
        assert!(event.cfd_forced_trigger);
        assert_eq!(event.time, 111673568120085.0);
    }

    #[test]
    fn test_decode_header_with_qdc() {
        let mut words = vec![1622061, 123456789, 26001, 2345];
        words.extend_from_slice(&QDC_SUMS);
        let event = decode(&words).unwrap();
        assert_eq!(event.header_length, 12);
        assert_eq!(event.qdc, Some(QDC_SUMS));
        assert_eq!(event.qdc_value(3), 987);
        assert_eq!(event.qdc_value(8), U_DELIMITER);
    }

    #[test]
    fn test_decode_header_with_trace() {
        let mut words = vec![8667181, 123456789, 26001, 2345 | (124 << 16)];
        for pair in VANDLE_TRACE.chunks(2) {
            words.push(pair[0] as u32 | ((pair[1] as u32) << 16));
        }
        let event = decode(&words).unwrap();
        assert_eq!(event.event_length, 66);
        assert_eq!(event.trace.samples(), &VANDLE_TRACE);
    }

    #[test]
    fn test_saturated_event_gets_saturated_energy() {
        let mut words = BASE_HEADER;
        words[0] |= SATURATED_MASK;
        let event = decode(&words).unwrap();
        assert!(event.saturated);
        assert_eq!(event.energy, SATURATED_ENERGY);
    }

    #[test]
    fn test_bad_header_length_rejected() {
        let mut words = BASE_HEADER;
        words[0] = (words[0] & !HEADER_LENGTH_MASK) | (5 << HEADER_LENGTH_SHIFT);
        assert!(matches!(
            decode(&words),
            Err(FormatError::BadHeaderLength(5, _, _, _, _))
        ));
    }

    #[test]
    fn test_event_length_mismatch_rejected() {
        // Claims 100 trace samples but event length stays at the bare header.
        let mut words = BASE_HEADER;
        words[3] = 2345 | (100 << 16);
        assert!(matches!(
            decode(&words),
            Err(FormatError::EventLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_event_past_record_end_rejected() {
        let raw = to_raw(&BASE_HEADER);
        let mut buf = WordBuffer::new(&raw);
        let result = decode_channel_event(&mut buf, 3, 2, Frequency::Mhz250);
        assert!(matches!(result, Err(FormatError::EventPastRecordEnd(4, 3))));
    }

    #[test]
    fn test_truncated_event_rejected() {
        let raw = to_raw(&BASE_HEADER[..3]);
        let mut buf = WordBuffer::new(&raw);
        let result = decode_channel_event(&mut buf, 0, 4, Frequency::Mhz250);
        assert!(matches!(result, Err(FormatError::Buffer(_))));
    }

    #[test]
    fn test_encode_decode_full_header() {
        // Header code 18 carries every optional section.
        let mut words = Vec::new();
        let word0 = 13 | (2 << 4) | (18 << 12) | ((18 + 62) << 17);
        words.push(word0);
        words.push(123456789);
        words.push(26001);
        words.push(2345 | (124 << 16));
        words.extend_from_slice(&[12, 13, 14, 437f32.to_bits()]);
        words.extend_from_slice(&[1111, 2222]);
        words.extend_from_slice(&QDC_SUMS);
        for pair in VANDLE_TRACE.chunks(2) {
            words.push(pair[0] as u32 | ((pair[1] as u32) << 16));
        }
        let event = decode(&words).unwrap();
        assert_eq!(event.header_length, 18);
        assert_eq!(
            event.energy_sums,
            Some(EnergySums {
                trailing: 12,
                leading: 13,
                gap: 14,
                baseline: 437.0
            })
        );
        assert_eq!(event.external_timestamp, Some((2222u64 << 32) | 1111));
        assert_eq!(encode_channel_event(&event), words);
    }

    #[test]
    fn test_encode_matches_reference_words() {
        let mut event = ChannelEvent {
            channel_number: 13,
            slot_id: 2,
            time_low: 123456789,
            time_high: 26001,
            energy: 2345.0,
            qdc: Some(QDC_SUMS),
            ..Default::default()
        };
        assert_eq!(encode_channel_event(&event)[0], 1622061);

        event.qdc = None;
        event.trace = Trace::new(VANDLE_TRACE.to_vec());
        assert_eq!(encode_channel_event(&event)[0], 8667181);
    }
}
