//! Downstream processor invocation (spec §4.8, C8).
//!
//! Calls the external analysis binary for each step the [`StepTable`]
//! releases, in order, and appends one line per step to a wall-clock log —
//! the same shape as the original tooling's `step_processor_thread`, which
//! timed `run_blob_detection_scripts` and appended to `../data/log.txt`.
//! A processor failure is logged and does not stop the pipeline (spec §7:
//! `ProcessorFailure` is non-fatal).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use crate::error::Result;
use crate::step_table::StepTable;

/// Drains released steps from a [`StepTable`] and invokes the processor for
/// each, in the order the table hands them out (which is always
/// numerically increasing — see [`StepTable::wait_and_take_next`]).
pub struct DownstreamInvoker {
    step_table: Arc<StepTable>,
    processor_path: PathBuf,
    output_root: PathBuf,
}

impl DownstreamInvoker {
    pub fn new(step_table: Arc<StepTable>, processor_path: PathBuf, output_root: PathBuf) -> Self {
        Self {
            step_table,
            processor_path,
            output_root,
        }
    }

    /// Blocks until [`StepTable::wait_and_take_next`] returns `None`
    /// (session shutdown or every step released).
    pub fn run(&self) -> Result<()> {
        while let Some(snapshot) = self.step_table.wait_and_take_next() {
            let start = Instant::now();
            info!(
                step = snapshot.step,
                reduced_files = snapshot.reduced_filenames.len(),
                augmentation_files = snapshot.augmentation_filenames.len(),
                "processing step"
            );

            if let Err(e) = self.invoke_processor(snapshot.step) {
                error!(step = snapshot.step, error = %e, "processor failed, continuing");
            }

            let elapsed = start.elapsed().as_secs_f64();
            if let Err(e) = self.append_log(elapsed) {
                error!(step = snapshot.step, error = %e, "failed to append step log");
            }
        }
        Ok(())
    }

    fn invoke_processor(&self, step: u64) -> Result<()> {
        let status = Command::new(&self.processor_path)
            .arg(step.to_string())
            .arg(&self.output_root)
            .status();
        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(crate::error::PipelineError::ProcessorFailure {
                step,
                reason: format!("exited with {status}"),
            }),
            Err(e) => Err(crate::error::PipelineError::ProcessorFailure {
                step,
                reason: e.to_string(),
            }),
        }
    }

    fn append_log(&self, elapsed_seconds: f64) -> Result<()> {
        let log_path = log_path(&self.output_root);
        let mut file =
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .map_err(|source| crate::error::PipelineError::FileIo {
                    path: log_path.display().to_string(),
                    source,
                })?;
        writeln!(file, "{elapsed_seconds:.6}").map_err(|source| {
            crate::error::PipelineError::FileIo {
                path: log_path.display().to_string(),
                source,
            }
        })?;
        Ok(())
    }
}

fn log_path(output_root: &Path) -> PathBuf {
    output_root.join("log.txt")
}
