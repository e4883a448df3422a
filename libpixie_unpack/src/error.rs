use std::path::PathBuf;
use thiserror::Error;

use super::constants::*;

#[derive(Debug, Clone, Error)]
pub enum WordBufferError {
    #[error("Buffer underrun reading list-mode word at position {0}; only {1} raw words remain")]
    Underrun(usize, usize),
    #[error("Buffer underrun reading {0} trace samples at position {1}; only {2} raw words remain")]
    TraceUnderrun(usize, usize, usize),
}

#[derive(Debug, Clone, Error)]
pub enum FormatError {
    #[error("Ran out of buffer while decoding: {0}")]
    Buffer(#[from] WordBufferError),
    #[error("Unknown header length {0} in module {1} (crate:slot:chan {2}:{3}:{4})")]
    BadHeaderLength(u32, u32, u32, u32, u32),
    #[error("Event length {expected} in module {module} does not correspond to header length {header} and trace length {trace} samples")]
    EventLengthMismatch {
        module: u32,
        expected: u32,
        header: u32,
        trace: usize,
    },
    #[error("Event of length {0} in module {1} extends past the end of its module record")]
    EventPastRecordEnd(u32, u32),
    #[error("Statistics block in module {0} carried {1} words; expected {expected}", expected=STATS_SNAPSHOT_WORDS)]
    BadStatsBlock(u32, usize),
}

#[derive(Debug, Clone, Error)]
pub enum SpillError {
    #[error("Spill failed while decoding a channel event: {0}")]
    BadEvent(#[from] FormatError),
    #[error("Spill record sanity check failed: record length {0}, vsn {1} at word {2} of {3}")]
    BadRecord(u32, u32, usize, usize),
    #[error("Spill is missing module {0}; previous vsn {1}, found vsn {2}")]
    MissingModule(u32, u32, u32),
    #[error("Spill record of {0} words extends past the end of the {1} word buffer")]
    RecordPastBufferEnd(u32, usize),
    #[error("Spill failed while routing a statistics block: {0}")]
    Stats(#[from] StatsError),
}

#[derive(Debug, Clone, Error)]
pub enum StatsError {
    #[error("Statistics received vsn {0}; only {max} modules fit in a crate", max=MAX_VSN)]
    BadVsn(u32),
    #[error("Statistics snapshot had {0} words; expected {expected}", expected=STATS_SNAPSHOT_WORDS)]
    BadSnapshotLength(usize),
}

#[derive(Debug, Clone, Error)]
pub enum TimingError {
    #[error("The trace was empty")]
    EmptyTrace,
    #[error("The maximum position {0} is larger than the trace length {1}")]
    MaxOutOfRange(usize, usize),
    #[error("The trace has {0} samples; at least {1} are required")]
    TraceTooShort(usize, usize),
    #[error("Bad baseline range: high {0} not above low {1}")]
    BadBaselineRange(usize, usize),
    #[error("The fitted parabola was concave-upward; try increasing the fraction")]
    ConcaveFit,
}

#[derive(Debug, Error)]
pub enum ChannelMapError {
    #[error("ChannelMap failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("ChannelMap failed to parse an integer: {0}")]
    ParsingError(#[from] std::num::ParseIntError),
    #[error("ChannelMap was given a file with the incorrect format; most likely the number of columns is incorrect")]
    BadFileFormat,
    #[error("No detector is registered for module {0} channel {1}")]
    UnknownChannel(u32, u32),
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Failed to load calibration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Calibration failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Calibration failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Unknown walk model: {0}")]
    UnknownWalkModel(String),
    #[error("Walk model {0} needs at least {1} parameters but only {2} were found")]
    MissingWalkParameters(String, usize, usize),
    #[error("Bad walk correction range: {0} to {1}")]
    BadWalkRange(f64, f64),
}

#[derive(Debug, Error)]
pub enum SpillFileError {
    #[error("Could not open spill file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Reached end of spill file")]
    EndOfFile,
    #[error("Spill file declared a spill of {0} words, larger than the sane maximum")]
    OversizedSpill(u32),
    #[error("Spill file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config frequency {0} MHz is not one of 100, 250, 500")]
    BadFrequency(u32),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Pipeline failed due to ChannelMap error: {0}")]
    MapError(#[from] ChannelMapError),
    #[error("Pipeline failed due to Calibration error: {0}")]
    CalibrationError(#[from] CalibrationError),
    #[error("Pipeline failed due to spill file error: {0}")]
    FileError(#[from] SpillFileError),
    #[error("Pipeline failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}
