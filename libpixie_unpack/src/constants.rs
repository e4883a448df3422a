//! Constants describing the Pixie-16 list-mode data format and the spill
//! structure that wraps it. The channel header bit layout follows the Rev. D
//! register map with the CFD bits of the R30474 firmware.

/// Two 16-bit raw words pair into one 32-bit list-mode word.
pub const RAW_WORDS_PER_LIST_WORD: usize = 2;

//Word 0 of the channel header
pub const CHANNEL_NUMBER_MASK: u32 = 0x0000000F;
pub const SLOT_ID_MASK: u32 = 0x000000F0;
pub const SLOT_ID_SHIFT: u32 = 4;
pub const CRATE_ID_MASK: u32 = 0x00000F00;
pub const CRATE_ID_SHIFT: u32 = 8;
pub const HEADER_LENGTH_MASK: u32 = 0x0001F000;
pub const HEADER_LENGTH_SHIFT: u32 = 12;
pub const EVENT_LENGTH_MASK: u32 = 0x1FFE0000;
pub const EVENT_LENGTH_SHIFT: u32 = 17;
pub const VIRTUAL_CHANNEL_MASK: u32 = 0x20000000;
pub const SATURATED_MASK: u32 = 0x40000000;
pub const PILEUP_MASK: u32 = 0x80000000;

//Word 2 of the channel header
pub const EVENT_TIME_HIGH_MASK: u32 = 0x0000FFFF;
pub const CFD_FRACTIONAL_TIME_MASK: u32 = 0x3FFF0000;
pub const CFD_FRACTIONAL_TIME_SHIFT: u32 = 16;
pub const CFD_TRIGGER_SOURCE_MASK: u32 = 0x40000000;
pub const CFD_FORCED_TRIGGER_MASK: u32 = 0x80000000;

//Word 3 of the channel header
pub const ENERGY_MASK: u32 = 0x0000FFFF;
pub const TRACE_LENGTH_MASK: u32 = 0xFFFF0000;
pub const TRACE_LENGTH_SHIFT: u32 = 16;

/// Number of list-mode words in the base channel header.
pub const BASE_HEADER_LENGTH: u32 = 4;
/// Number of list-mode words holding the on-board energy sums.
pub const NUM_ENERGY_SUM_WORDS: u32 = 4;
/// Number of list-mode words holding the external timestamp.
pub const NUM_EXTERNAL_TS_WORDS: u32 = 2;
/// Number of on-board QDC sums. Each occupies one list-mode word at the tail
/// of the header.
pub const NUM_QDCS: usize = 8;

/// Energy assigned to events flagged as saturated, the maximum value of a
/// 16-bit ADC.
pub const SATURATED_ENERGY: f64 = 65536.0;

//Pixie module data header (the two words preceding each module's payload)
pub const MODULE_HEADER_WORDS: u32 = 2;
/// A module record of exactly two words carries no channel data.
pub const EMPTY_MODULE_LENGTH: u32 = 2;
/// Largest sane module record for a Rev. D readout.
pub const MAX_MODULE_WORDS: u32 = 131072;
/// No more than 14 Pixie modules fit in one crate.
pub const MAX_VSN: u32 = 14;
/// Module number marking the end of a spill.
pub const END_OF_SPILL_VSN: u32 = 9999;
/// Module number of the wall-clock record inserted by the poll program.
pub const CLOCK_VSN: u32 = 1000;

/// Number of channels on one Pixie-16 module.
pub const NUMBER_OF_CHANNELS: usize = 16;

/// Fixed number of DSP words in one statistics snapshot.
pub const STATS_SNAPSHOT_WORDS: usize = 128;

/// Sentinel returned by timing algorithms that failed to find a phase.
pub const FAILED_PHASE: f64 = -9999.0;
/// Sentinel for out-of-range QDC access.
pub const U_DELIMITER: u32 = u32::MAX;
