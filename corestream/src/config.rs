//! Session configuration (spec §6).
//!
//! Loaded from a JSON file (the same side-file shape the original tooling
//! used for its congestion/prediction exchange) with CLI overrides for the
//! knobs an operator is most likely to flip per invocation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Which predictor backend the bandwidth predictor worker uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorMode {
    /// FFT-based spectral analysis of the augmentation rate series.
    Spectral,
    /// Read `(time, rate)` pairs from an externally-published oracle file.
    OracleFile,
    /// Threshold always stays at 100 (truncation disabled).
    Disabled,
}

fn default_base_port() -> u16 {
    5555
}
fn default_num_steps() -> u64 {
    1
}
fn default_chunk_size() -> usize {
    1024 * 1024
}
fn default_link_bandwidth_mbps() -> f64 {
    200.0
}
fn default_prediction_cadence() -> u64 {
    3
}
fn default_lookahead_steps() -> u64 {
    5
}
fn default_telemetry_capacity() -> usize {
    10_000
}
fn default_round_robin_chunks() -> usize {
    1
}
fn default_predictor_mode() -> PredictorMode {
    PredictorMode::Disabled
}
fn default_output_root() -> PathBuf {
    PathBuf::from("./output")
}
fn default_processor_path() -> PathBuf {
    PathBuf::from("./blob_detection")
}
fn default_oracle_path() -> PathBuf {
    PathBuf::from("./predictions.txt")
}

/// Full set of configuration knobs for one pipeline session (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// First port number; the two streams use `base_port` and `base_port+1`.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Address the reduced stream connects/binds to (host only; port comes
    /// from `base_port`).
    pub reduced_addr: String,
    /// Address the augmentation stream connects/binds to.
    pub augmentation_addr: String,
    /// Number of simulation steps to run.
    #[serde(default = "default_num_steps")]
    pub num_steps: u64,
    /// Maximum chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// B_link used by the predictor, in Mbit/s.
    #[serde(default = "default_link_bandwidth_mbps")]
    pub link_bandwidth_mbps: f64,
    /// Every how many augmentation steps the predictor acts.
    #[serde(default = "default_prediction_cadence")]
    pub prediction_cadence: u64,
    /// L, the threshold look-ahead window size.
    #[serde(default = "default_lookahead_steps")]
    pub lookahead_steps: u64,
    /// M, the telemetry ring capacity.
    #[serde(default = "default_telemetry_capacity")]
    pub telemetry_capacity: usize,
    /// Ordered reduced-stream file list (paths relative to the sender's CWD).
    pub reduced_files: Vec<PathBuf>,
    /// Ordered augmentation-stream file list.
    pub augmentation_files: Vec<PathBuf>,
    /// Receiver base directory; per-step subdirectory `<output_root>/<step>/`.
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Which predictor backend to run.
    #[serde(default = "default_predictor_mode")]
    pub predictor_mode: PredictorMode,
    /// Path to the oracle predictions file, used when `predictor_mode ==
    /// oracle_file`.
    #[serde(default = "default_oracle_path")]
    pub oracle_path: PathBuf,
    /// How many chunks the augmentation sender sends from one file before
    /// switching to the next (spec §4.4's "round-robin between files").
    #[serde(default = "default_round_robin_chunks")]
    pub round_robin_chunks: usize,
    /// Path to the external downstream processor binary (C8). Invoked as
    /// `<processor_path> <step> <output_root>`.
    #[serde(default = "default_processor_path")]
    pub processor_path: PathBuf,
}

impl SessionConfig {
    /// Load a session config from a JSON file on disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| PipelineError::FileIo {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| {
            PipelineError::Config(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Resolve the bound/connect address for a given stream.
    pub fn addr_for(&self, stream: crate::protocol::StreamIdentity) -> String {
        let (host, offset) = match stream {
            crate::protocol::StreamIdentity::Reduced => {
                (&self.reduced_addr, stream.port_offset())
            }
            crate::protocol::StreamIdentity::Augmentation => {
                (&self.augmentation_addr, stream.port_offset())
            }
        };
        format!("{host}:{}", self.base_port + offset)
    }

    /// File list for a given stream.
    pub fn files_for(&self, stream: crate::protocol::StreamIdentity) -> &[PathBuf] {
        match stream {
            crate::protocol::StreamIdentity::Reduced => &self.reduced_files,
            crate::protocol::StreamIdentity::Augmentation => &self.augmentation_files,
        }
    }
}
