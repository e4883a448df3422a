//! Unpacking of one spill: the sequence of module records the poll program
//! ships between end-of-spill delimiters. Channel events from every module
//! are time sorted and grouped into raw events by the correlation window.
//!
//! Any structural failure poisons the whole spill. The caller drops the
//! spill and keeps reading, since one corrupt record says nothing about the
//! records that follow it.

use log::debug;

use super::channel_event::{decode_channel_event, ChannelEvent, Frequency};
use super::constants::*;
use super::error::{FormatError, SpillError};
use super::word_buffer::WordBuffer;

/// One statistics block lifted out of the event stream, tagged with the
/// module that produced it.
#[derive(Debug, Clone)]
pub struct StatsBlock {
    pub vsn: u32,
    pub snapshot: Vec<u32>,
}

/// A group of channel events that fired within one correlation window.
#[derive(Debug, Clone, Default)]
pub struct RawEvent {
    pub events: Vec<ChannelEvent>,
}

impl RawEvent {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Everything unpacked from one spill.
#[derive(Debug, Clone, Default)]
pub struct Spill {
    pub raw_events: Vec<RawEvent>,
    pub stats_blocks: Vec<StatsBlock>,
    /// Unix time from the wall-clock record, when the poll program sent one.
    pub wall_clock: Option<u64>,
    /// Module records seen, empty ones included.
    pub module_count: usize,
    pub event_count: usize,
}

/// Walks the module records of a spill and produces time ordered raw
/// events. One unpacker is reused across spills; it carries only
/// configuration, never spill state.
#[derive(Debug, Clone)]
pub struct SpillUnpacker {
    frequency: Frequency,
    /// Correlation window in filter clock ticks.
    event_width: f64,
}

impl SpillUnpacker {
    pub fn new(frequency: Frequency, event_width: f64) -> Self {
        SpillUnpacker {
            frequency,
            event_width,
        }
    }

    /// Unpack a whole spill from raw 16-bit words.
    pub fn unpack_spill(&self, raw: &[u16]) -> Result<Spill, SpillError> {
        let mut buf = WordBuffer::new(raw);
        let mut spill = Spill::default();
        let mut events: Vec<ChannelEvent> = Vec::new();
        let mut last_vsn: Option<u32> = None;

        while !buf.is_empty() {
            let record_start = buf.list_position();
            let len_rec = buf.read_word().map_err(FormatError::from)?;
            let vsn = buf.read_word().map_err(FormatError::from)?;

            if vsn == END_OF_SPILL_VSN {
                break;
            }
            if vsn == CLOCK_VSN {
                spill.wall_clock = Some(Self::read_wall_clock(&mut buf, len_rec)?);
                continue;
            }
            if len_rec < MODULE_HEADER_WORDS || len_rec > MAX_MODULE_WORDS || vsn >= MAX_VSN {
                return Err(SpillError::BadRecord(
                    len_rec,
                    vsn,
                    record_start,
                    buf.list_position() + buf.remaining() / RAW_WORDS_PER_LIST_WORD,
                ));
            }
            if let Some(prev) = last_vsn {
                if vsn != prev + 1 {
                    return Err(SpillError::MissingModule(prev + 1, prev, vsn));
                }
            }
            last_vsn = Some(vsn);
            spill.module_count += 1;

            let payload_words = len_rec - MODULE_HEADER_WORDS;
            if payload_words as usize * RAW_WORDS_PER_LIST_WORD > buf.remaining() {
                return Err(SpillError::RecordPastBufferEnd(
                    len_rec,
                    buf.remaining() / RAW_WORDS_PER_LIST_WORD,
                ));
            }
            if len_rec == EMPTY_MODULE_LENGTH {
                debug!("Module {} was empty this spill", vsn);
                continue;
            }

            let record_end = buf.list_position() + payload_words as usize;
            while buf.list_position() < record_end {
                let words_left = (record_end - buf.list_position()) as u32;
                let word0 = buf.peek_word().map_err(FormatError::from)?;
                let header_length = (word0 & HEADER_LENGTH_MASK) >> HEADER_LENGTH_SHIFT;
                if header_length == 1 {
                    spill
                        .stats_blocks
                        .push(Self::read_stats_block(&mut buf, vsn, words_left)?);
                } else {
                    events.push(decode_channel_event(
                        &mut buf,
                        vsn,
                        words_left,
                        self.frequency,
                    )?);
                }
            }
        }

        spill.event_count = events.len();
        spill.raw_events = self.correlate(events);
        Ok(spill)
    }

    fn read_wall_clock(buf: &mut WordBuffer<'_>, len_rec: u32) -> Result<u64, SpillError> {
        let payload = buf
            .read_words((len_rec.max(MODULE_HEADER_WORDS) - MODULE_HEADER_WORDS) as usize)
            .map_err(FormatError::from)?;
        let low = payload.first().copied().unwrap_or(0) as u64;
        let high = payload.get(1).copied().unwrap_or(0) as u64;
        Ok(low | (high << 32))
    }

    fn read_stats_block(
        buf: &mut WordBuffer<'_>,
        vsn: u32,
        words_left: u32,
    ) -> Result<StatsBlock, SpillError> {
        let word0 = buf.read_word().map_err(FormatError::from)?;
        let event_length = ((word0 & EVENT_LENGTH_MASK) >> EVENT_LENGTH_SHIFT) as usize;
        if event_length as u32 > words_left {
            return Err(SpillError::BadEvent(FormatError::EventPastRecordEnd(
                event_length as u32,
                vsn,
            )));
        }
        let snapshot_words = event_length.saturating_sub(1);
        if snapshot_words != STATS_SNAPSHOT_WORDS {
            return Err(SpillError::BadEvent(FormatError::BadStatsBlock(
                vsn,
                snapshot_words,
            )));
        }
        let snapshot = buf
            .read_words(snapshot_words)
            .map_err(FormatError::from)?;
        Ok(StatsBlock { vsn, snapshot })
    }

    /// Time sort the events of the spill and cut them into raw events. A
    /// new raw event starts whenever the gap to the previous event exceeds
    /// the correlation window.
    fn correlate(&self, mut events: Vec<ChannelEvent>) -> Vec<RawEvent> {
        events.sort_by(|a, b| a.time.total_cmp(&b.time));

        let mut raw_events: Vec<RawEvent> = Vec::new();
        let mut current = RawEvent::default();
        let mut last_time = f64::NEG_INFINITY;
        for event in events {
            if !current.is_empty() && event.time - last_time > self.event_width {
                raw_events.push(std::mem::take(&mut current));
            }
            last_time = event.time;
            current.events.push(event);
        }
        if !current.is_empty() {
            raw_events.push(current);
        }
        raw_events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_event::{encode_channel_event, ChannelEvent};
    use crate::word_buffer::to_raw;

    fn make_event(channel: u32, time_low: u32) -> ChannelEvent {
        ChannelEvent {
            channel_number: channel,
            slot_id: 2,
            time_low,
            energy: 1000.0,
            ..Default::default()
        }
    }

    fn module_record(vsn: u32, events: &[ChannelEvent]) -> Vec<u32> {
        let mut payload = Vec::new();
        for event in events {
            payload.extend(encode_channel_event(event));
        }
        let mut record = vec![payload.len() as u32 + 2, vsn];
        record.extend(payload);
        record
    }

    fn end_of_spill() -> Vec<u32> {
        vec![2, END_OF_SPILL_VSN]
    }

    #[test]
    fn test_unpack_single_module() {
        let mut words = module_record(0, &[make_event(0, 100), make_event(1, 105)]);
        words.extend(end_of_spill());
        let raw = to_raw(&words);

        let unpacker = SpillUnpacker::new(Frequency::Mhz250, 50.0);
        let spill = unpacker.unpack_spill(&raw).unwrap();
        assert_eq!(spill.module_count, 1);
        assert_eq!(spill.event_count, 2);
        assert_eq!(spill.raw_events.len(), 1);
        assert_eq!(spill.raw_events[0].len(), 2);
    }

    #[test]
    fn test_events_time_sorted_across_modules() {
        let mut words = module_record(0, &[make_event(0, 500)]);
        words.extend(module_record(1, &[make_event(1, 100)]));
        words.extend(end_of_spill());
        let raw = to_raw(&words);

        let unpacker = SpillUnpacker::new(Frequency::Mhz250, 50.0);
        let spill = unpacker.unpack_spill(&raw).unwrap();
        assert_eq!(spill.raw_events.len(), 2);
        assert_eq!(spill.raw_events[0].events[0].time, 100.0);
        assert_eq!(spill.raw_events[1].events[0].time, 500.0);
    }

    #[test]
    fn test_correlation_window_splits_raw_events() {
        let events = [
            make_event(0, 100),
            make_event(1, 120),
            make_event(2, 300),
            make_event(3, 310),
        ];
        let mut words = module_record(0, &events);
        words.extend(end_of_spill());
        let raw = to_raw(&words);

        let unpacker = SpillUnpacker::new(Frequency::Mhz250, 50.0);
        let spill = unpacker.unpack_spill(&raw).unwrap();
        assert_eq!(spill.raw_events.len(), 2);
        assert_eq!(spill.raw_events[0].len(), 2);
        assert_eq!(spill.raw_events[1].len(), 2);
    }

    #[test]
    fn test_empty_module_record() {
        let mut words = vec![2, 0];
        words.extend(module_record(1, &[make_event(0, 100)]));
        words.extend(end_of_spill());
        let raw = to_raw(&words);

        let unpacker = SpillUnpacker::new(Frequency::Mhz250, 50.0);
        let spill = unpacker.unpack_spill(&raw).unwrap();
        assert_eq!(spill.module_count, 2);
        assert_eq!(spill.event_count, 1);
    }

    #[test]
    fn test_missing_module_is_fatal() {
        let mut words = module_record(0, &[make_event(0, 100)]);
        words.extend(module_record(2, &[make_event(0, 200)]));
        words.extend(end_of_spill());
        let raw = to_raw(&words);

        let unpacker = SpillUnpacker::new(Frequency::Mhz250, 50.0);
        assert!(matches!(
            unpacker.unpack_spill(&raw),
            Err(SpillError::MissingModule(1, 0, 2))
        ));
    }

    #[test]
    fn test_bad_vsn_is_fatal() {
        let words = vec![2, 57];
        let raw = to_raw(&words);
        let unpacker = SpillUnpacker::new(Frequency::Mhz250, 50.0);
        assert!(matches!(
            unpacker.unpack_spill(&raw),
            Err(SpillError::BadRecord(2, 57, _, _))
        ));
    }

    #[test]
    fn test_record_past_buffer_end_is_fatal() {
        // Record claims 100 words but the buffer ends after the header.
        let words = vec![100, 0];
        let raw = to_raw(&words);
        let unpacker = SpillUnpacker::new(Frequency::Mhz250, 50.0);
        assert!(matches!(
            unpacker.unpack_spill(&raw),
            Err(SpillError::RecordPastBufferEnd(100, _))
        ));
    }

    #[test]
    fn test_wall_clock_record() {
        let mut words = vec![4, CLOCK_VSN, 1693420800, 0];
        words.extend(end_of_spill());
        let raw = to_raw(&words);

        let unpacker = SpillUnpacker::new(Frequency::Mhz250, 50.0);
        let spill = unpacker.unpack_spill(&raw).unwrap();
        assert_eq!(spill.wall_clock, Some(1693420800));
        assert_eq!(spill.module_count, 0);
    }

    #[test]
    fn test_stats_block_routed_out_of_event_stream() {
        let mut stats_header =
            (1 << HEADER_LENGTH_SHIFT) | ((STATS_SNAPSHOT_WORDS as u32 + 1) << EVENT_LENGTH_SHIFT);
        stats_header |= 3; // channel bits are ignored for stats
        let mut payload = vec![stats_header];
        payload.extend((0..STATS_SNAPSHOT_WORDS as u32).collect::<Vec<u32>>());

        let mut words = vec![payload.len() as u32 + 2, 0];
        words.extend(payload);
        words.extend(end_of_spill());
        let raw = to_raw(&words);

        let unpacker = SpillUnpacker::new(Frequency::Mhz250, 50.0);
        let spill = unpacker.unpack_spill(&raw).unwrap();
        assert_eq!(spill.event_count, 0);
        assert_eq!(spill.stats_blocks.len(), 1);
        assert_eq!(spill.stats_blocks[0].vsn, 0);
        assert_eq!(spill.stats_blocks[0].snapshot.len(), STATS_SNAPSHOT_WORDS);
        assert_eq!(spill.stats_blocks[0].snapshot[5], 5);
    }

    #[test]
    fn test_stats_block_past_record_end_is_fatal() {
        // The record carries only 10 payload words but the stats header
        // claims a full snapshot; reading on would swallow the next record.
        let stats_header =
            (1 << HEADER_LENGTH_SHIFT) | ((STATS_SNAPSHOT_WORDS as u32 + 1) << EVENT_LENGTH_SHIFT);
        let mut payload = vec![stats_header];
        payload.extend(vec![0u32; 9]);

        let mut words = vec![payload.len() as u32 + 2, 0];
        words.extend(payload);
        words.extend(module_record(1, &[make_event(0, 100)]));
        words.extend(end_of_spill());
        let raw = to_raw(&words);

        let unpacker = SpillUnpacker::new(Frequency::Mhz250, 50.0);
        assert!(matches!(
            unpacker.unpack_spill(&raw),
            Err(SpillError::BadEvent(FormatError::EventPastRecordEnd(129, 0)))
        ));
    }

    #[test]
    fn test_short_stats_block_is_fatal() {
        let stats_header = (1 << HEADER_LENGTH_SHIFT) | (50 << EVENT_LENGTH_SHIFT);
        let mut payload = vec![stats_header];
        payload.extend(vec![0u32; 49]);

        let mut words = vec![payload.len() as u32 + 2, 0];
        words.extend(payload);
        words.extend(end_of_spill());
        let raw = to_raw(&words);

        let unpacker = SpillUnpacker::new(Frequency::Mhz250, 50.0);
        assert!(unpacker.unpack_spill(&raw).is_err());
    }
}
