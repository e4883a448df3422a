//! # pixie_unpack
//!
//! pixie_unpack is an unpacker for Pixie-16 list-mode data, written in Rust.
//! It reads the spill stream the poll program writes to disk, decodes the
//! channel events of every module, time sorts and correlates them into raw
//! events, derives high resolution timing from the traces, and pairs
//! double-ended detectors into bars.
//!
//! The chain, in order:
//!
//! - [`spill_file`] reads length-prefixed spills from disk.
//! - [`word_buffer`] pairs raw 16-bit words into list-mode words.
//! - [`spill`] walks the module records of a spill and applies its sanity
//!   checks; [`channel_event`] decodes each channel event.
//! - [`trace`] derives baseline, maximum and QDC from the waveform;
//!   [`cfd`] finds the sub-sample trigger phase; [`polynomial`] holds the
//!   least-squares fits both lean on.
//! - [`hires_timing`] and [`bar`] turn detector ends into assembled bars,
//!   using the [`channel_map`], [`walk`] and [`timing_cal`] calibrations.
//! - [`stats`] accumulates run statistics and the DSP snapshots.
//! - [`process`] drives the whole chain from a [`config::Config`].
//!
//! A format error anywhere in a spill discards that spill and nothing else;
//! the file reader keeps going. Configuration problems (unmapped channels,
//! bad calibration files) abort the run instead.
pub mod bar;
pub mod cfd;
pub mod channel_event;
pub mod channel_map;
pub mod config;
pub mod constants;
pub mod error;
pub mod hires_timing;
pub mod polynomial;
pub mod process;
pub mod spill;
pub mod spill_file;
pub mod stats;
pub mod timing_cal;
pub mod trace;
pub mod walk;
pub mod word_buffer;
