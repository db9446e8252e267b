//! Bandwidth predictor (spec §4.3, C3).
//!
//! A [`Predictor`] turns a batch of drained [`crate::telemetry::Sample`]s
//! into a predicted augmentation-stream throughput. The common threshold
//! derivation (congestion percent → progress threshold) is the same for
//! every backend (spec §4.3 steps 6–8) and lives in [`derive_threshold`];
//! backends only differ in how they arrive at a predicted rate.

use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::telemetry::Sample;

/// Minimum number of usable rate samples before the spectral predictor will
/// attempt an FFT (spec §4.3 step 3: "if fewer than a threshold number of
/// samples are present, skip this cycle").
const MIN_SAMPLES: usize = 8;

/// Turns a batch of telemetry samples (or an external oracle) into a
/// predicted rate in bytes/second for the augmentation stream.
pub trait Predictor: Send {
    /// Estimate the current predicted rate. `Err(PipelineError::
    /// PredictorUnavailable)` means the caller should leave the threshold
    /// window unchanged (spec §4.3 "Failure").
    fn estimate_rate_bytes_per_sec(&mut self, samples: &[Sample]) -> Result<f64>;
}

/// Common threshold derivation (spec §4.3 steps 6–8), shared by every
/// predictor backend.
///
/// `predicted_rate_bytes_per_sec` is converted to Mbit/s, compared against
/// `link_bandwidth_mbps` to get a congestion percentage, and mapped to a
/// threshold in `[1, 100]`.
pub fn derive_threshold(predicted_rate_bytes_per_sec: f64, link_bandwidth_mbps: f64) -> u8 {
    let throughput_mbps = predicted_rate_bytes_per_sec * 8.0 / 1_000_000.0;
    let congestion = if link_bandwidth_mbps > 0.0 {
        ((1.0 - throughput_mbps / link_bandwidth_mbps) * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };
    let threshold = if congestion <= 20.0 {
        100.0
    } else {
        100.0 - (congestion - 20.0)
    };
    threshold.clamp(1.0, 100.0) as u8
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn stddev(values: &[f64], mean_value: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean_value).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Spectral predictor: FFTs the augmentation rate series and averages the
/// rate near each "dominant" frequency to estimate near-future throughput
/// (spec §4.3 steps 1–5).
#[derive(Default)]
pub struct SpectralPredictor {
    planner: FftPlanner<f64>,
}

impl SpectralPredictor {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }
}

impl Predictor for SpectralPredictor {
    fn estimate_rate_bytes_per_sec(&mut self, samples: &[Sample]) -> Result<f64> {
        // Step 2: instantaneous rate, skipping zero-elapsed samples.
        let rates: Vec<f64> = samples
            .iter()
            .filter(|s| s.elapsed_seconds > 0.0)
            .map(|s| s.bytes as f64 / s.elapsed_seconds)
            .collect();

        if rates.len() < MIN_SAMPLES {
            return Err(PipelineError::PredictorUnavailable(format!(
                "only {} usable samples, need at least {MIN_SAMPLES}",
                rates.len()
            )));
        }

        let n = rates.len();
        let mut buf: Vec<Complex64> = rates.iter().map(|&r| Complex64::new(r, 0.0)).collect();
        let fft = self.planner.plan_fft_forward(n);
        fft.process(&mut buf);

        // Step 4: magnitudes of the positive-frequency half, excluding DC.
        let half = n / 2;
        if half < 2 {
            return Err(PipelineError::PredictorUnavailable(
                "sample window too short for spectral analysis".into(),
            ));
        }
        let magnitudes: Vec<f64> = buf[1..half].iter().map(|c| c.norm()).collect();
        let mag_mean = mean(&magnitudes);
        let mag_std = stddev(&magnitudes, mag_mean);
        let dominant_threshold = mag_mean + 1.5 * mag_std;

        let dominant_indices: Vec<usize> = magnitudes
            .iter()
            .enumerate()
            .filter(|(_, &m)| m > dominant_threshold)
            .map(|(i, _)| i + 1) // shift back into 1..half
            .collect();

        if dominant_indices.is_empty() {
            return Err(PipelineError::PredictorUnavailable(
                "no dominant frequency found in rate spectrum".into(),
            ));
        }

        // Step 5: for each dominant index, estimate the period and average
        // the time-domain rate within +/- P/2 samples of that index.
        let mut estimates = Vec::with_capacity(dominant_indices.len());
        for idx in dominant_indices {
            let period = (n as f64 / idx as f64).round() as usize;
            let half_window = (period / 2).max(1);
            let lo = idx.saturating_sub(half_window);
            let hi = (idx + half_window).min(n.saturating_sub(1));
            if lo > hi {
                continue;
            }
            estimates.push(mean(&rates[lo..=hi]));
        }

        if estimates.is_empty() {
            return Err(PipelineError::PredictorUnavailable(
                "dominant indices produced no valid window".into(),
            ));
        }

        Ok(mean(&estimates))
    }
}

/// One `(time_offset, rate_mbps)` row published by an external oracle.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OracleRecord {
    #[allow(dead_code)]
    time_offset: f64,
    rate_mbps: f64,
}

/// Reads predictions from a side-file an external helper publishes, instead
/// of computing them in-process (spec §4.3 "Alternate predictor"). The file
/// format is `time,rate` CSV lines, one pair per line — the same shape the
/// original tooling's `read_predictions()` parsed from `predictions.txt`.
pub struct OracleFilePredictor {
    path: PathBuf,
}

impl OracleFilePredictor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_records(path: &Path) -> Result<Vec<OracleRecord>> {
        let file = std::fs::File::open(path).map_err(|_| {
            PipelineError::PredictorUnavailable(format!(
                "oracle file {} not available",
                path.display()
            ))
        })?;
        let reader = std::io::BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| {
                PipelineError::PredictorUnavailable(format!("error reading oracle file: {e}"))
            })?;
            let mut parts = line.splitn(2, ',');
            let (Some(t), Some(r)) = (parts.next(), parts.next()) else {
                continue;
            };
            if let (Ok(time_offset), Ok(rate_mbps)) = (t.trim().parse(), r.trim().parse()) {
                records.push(OracleRecord {
                    time_offset,
                    rate_mbps,
                });
            }
        }
        Ok(records)
    }
}

impl Predictor for OracleFilePredictor {
    fn estimate_rate_bytes_per_sec(&mut self, _samples: &[Sample]) -> Result<f64> {
        let records = Self::read_records(&self.path)?;
        let latest = records.last().ok_or_else(|| {
            PipelineError::PredictorUnavailable(format!(
                "oracle file {} had no parseable records",
                self.path.display()
            ))
        })?;
        // Convert published Mbit/s back to bytes/s so the common derivation
        // function can treat both backends identically.
        Ok(latest.rate_mbps * 1_000_000.0 / 8.0)
    }
}
