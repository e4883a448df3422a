use std::io::Write;
use std::sync::{Arc, Mutex};

use fxhash::FxHashMap;
use log::{debug, error, info, warn};

use super::bar::BarBuilder;
use super::cfd::{PolynomialCfd, TraditionalCfd};
use super::channel_event::ChannelEvent;
use super::channel_map::{ChannelMap, Identifier};
use super::config::{CfdAlgorithm, Config};
use super::constants::{FAILED_PHASE, MAX_VSN, NUMBER_OF_CHANNELS};
use super::error::{PipelineError, SpillFileError};
use super::hires_timing::HighResTimingData;
use super::spill::SpillUnpacker;
use super::spill_file::SpillFile;
use super::stats::{RunningStats, StatsData};
use super::timing_cal::TimingCalibrator;
use super::trace::{keys, TimingDataExtractor};
use super::walk::WalkCorrector;

/// How often the shared progress value is refreshed.
const FLUSH_FRACTION: f32 = 0.01;

/// Detector types that read out as bars and go through pairing.
const BAR_TYPES: [&str; 2] = ["vandle", "beta"];

/// Run one trace through the configured CFD, landing the phase in the
/// trace side table. CFD failures are per event, never fatal.
fn calculate_phase(config: &Config, event: &mut ChannelEvent) {
    if event.trace.is_empty() {
        return;
    }
    let baseline = match event.trace.baseline() {
        Some(b) => b,
        None => return,
    };
    let result = match config.cfd.algorithm {
        CfdAlgorithm::Polynomial => {
            let max_position = match event.trace.max_info() {
                Some((pos, _)) => pos,
                None => return,
            };
            // The side table keeps the baseline subtracted maximum; the
            // CFD wants the raw one.
            let raw_max = match event.trace.value(keys::MAX_VALUE) {
                Some(v) => v + baseline,
                None => return,
            };
            PolynomialCfd::new(config.cfd.fraction).calculate_phase(
                event.trace.samples(),
                (max_position, raw_max),
                baseline,
            )
        }
        CfdAlgorithm::Traditional => {
            TraditionalCfd::new(config.cfd.fraction, config.cfd.delay, config.cfd.length)
                .calculate_phase(event.trace.samples(), baseline)
        }
    };
    match result {
        Ok(phase) => event.trace.set_value(keys::PHASE, phase),
        Err(e) => {
            debug!(
                "CFD failed for module {} channel {}: {}",
                event.module_number, event.channel_number, e
            );
            event.trace.set_value(keys::PHASE, FAILED_PHASE);
        }
    }
}

/// Dump the per-channel hit counts accumulated over the run.
fn write_counts(config: &Config, counts: &FxHashMap<u32, u64>) -> Result<(), PipelineError> {
    let mut file = std::fs::File::create(config.counts_file_path())?;
    let mut uuids: Vec<&u32> = counts.keys().collect();
    uuids.sort();
    for uuid in uuids {
        writeln!(
            file,
            "{} {} {}",
            uuid / NUMBER_OF_CHANNELS as u32,
            uuid % NUMBER_OF_CHANNELS as u32,
            counts[uuid]
        )?;
    }
    Ok(())
}

/// The main loop of the unpacker.
///
/// This takes in a config (and progress monitor) and runs the full chain on
/// the spill file: unpack, trace analysis, CFD, bar building, statistics.
pub fn process(config: Config, progress: Arc<Mutex<f32>>) -> Result<(), PipelineError> {
    let frequency = config.frequency()?;
    let channel_map = ChannelMap::new(config.channel_map_path.as_deref())?;
    let calibrator = match &config.timing_calibration_path {
        Some(path) => TimingCalibrator::from_file(path)?,
        None => TimingCalibrator::default(),
    };
    let walk = match &config.walk_correction_path {
        Some(path) => WalkCorrector::from_file(path)?,
        None => WalkCorrector::default(),
    };

    let mut spill_file = SpillFile::new(&config.spill_file_path)?;
    info!(
        "Processing {} of spill data from {}",
        human_bytes::human_bytes(spill_file.size_bytes() as f64),
        config.spill_file_path.to_string_lossy()
    );

    let unpacker = SpillUnpacker::new(frequency, config.event_width);
    let extractor = TimingDataExtractor::new(
        config.baseline_length,
        config.trace_delay,
        (config.qdc_low, config.qdc_high),
    );
    let mut bar_builder = BarBuilder::new(calibrator);
    let mut stats = StatsData::default();
    let mut counts: FxHashMap<u32, u64> = FxHashMap::default();
    let mut bar_time_differences = RunningStats::default();

    let mut spill_count: u64 = 0;
    let mut bad_spill_count: u64 = 0;
    let mut raw_event_count: u64 = 0;
    let mut bar_count: u64 = 0;
    let mut last_sent_progress: f32 = 0.0;

    loop {
        let raw = match spill_file.get_next_spill() {
            Ok(words) => words,
            Err(SpillFileError::EndOfFile) => break,
            Err(e) => return Err(PipelineError::FileError(e)),
        };
        spill_count += 1;

        let frac = spill_file.progress();
        if frac - last_sent_progress >= FLUSH_FRACTION {
            last_sent_progress = frac;
            if let Ok(mut p) = progress.lock() {
                *p = frac;
            }
        }

        let mut spill = match unpacker.unpack_spill(&raw) {
            Ok(spill) => spill,
            Err(e) => {
                warn!("Dropping spill {}: {}", spill_count, e);
                bad_spill_count += 1;
                continue;
            }
        };
        if let Some(clock) = spill.wall_clock {
            info!("Spill {} wall clock: {} s", spill_count, clock);
        }
        for block in spill.stats_blocks.drain(..) {
            if let Err(e) = stats.update(block.vsn, block.snapshot) {
                warn!("Bad statistics block in spill {}: {}", spill_count, e);
            }
        }

        raw_event_count += spill.raw_events.len() as u64;
        for raw_event in &mut spill.raw_events {
            let mut bar_ends: Vec<(&Identifier, HighResTimingData)> = Vec::new();
            for event in &mut raw_event.events {
                *counts.entry(event.uuid()).or_insert(0) += 1;
                let id = channel_map.identifier(event.module_number, event.channel_number)?;
                if id.detector_type == "ignore" || id.subtype == "ignore" {
                    continue;
                }

                if !event.trace.is_empty() {
                    if let Err(e) = extractor.extract(&mut event.trace) {
                        debug!(
                            "Trace analysis failed for module {} channel {}: {}",
                            event.module_number, event.channel_number, e
                        );
                    } else {
                        calculate_phase(&config, event);
                    }
                }

                if BAR_TYPES.contains(&id.detector_type.as_str()) {
                    let mut data = HighResTimingData::new(event, id.location, frequency);
                    let correction =
                        walk.correction(event.module_number, event.channel_number, event.energy);
                    data.filter_time_ns -= correction;
                    data.high_res_time_ns -= correction;
                    bar_ends.push((id, data));
                }
            }
            let bars = bar_builder.build(bar_ends);
            bar_count += bars.len() as u64;
            for bar in &bars {
                bar_time_differences.push(bar.time_difference_ns);
            }
        }
    }

    info!(
        "Run complete: {} spills ({} dropped), {} raw events, {} bars",
        spill_count, bad_spill_count, raw_event_count, bar_count
    );
    info!(
        "Dropped {} unpaired and {} untagged bar ends",
        bar_builder.dropped_singles(),
        bar_builder.dropped_untagged()
    );
    if bar_time_differences.count() > 1 {
        info!(
            "Bar time difference: mean {:.3} ns, sigma {:.3} ns over {} bars",
            bar_time_differences.mean(),
            bar_time_differences.std_dev(),
            bar_time_differences.count()
        );
    }
    for vsn in 0..MAX_VSN {
        if let Some(delta) = stats.delta_real_time_ticks(vsn) {
            info!("Module {} advanced {} real time ticks between snapshots", vsn, delta);
        }
    }

    if let Err(e) = write_counts(&config, &counts) {
        error!("Failed to write channel hit counts: {}", e);
        return Err(e);
    }

    if let Ok(mut p) = progress.lock() {
        *p = 1.0;
    }
    Ok(())
}
