//! Per-stream receiver loop (spec §4.6, C6). Mirror of [`crate::sender`].
//!
//! One [`StreamReceiver`] drives one stream through every step: accept a
//! filename, create `<output_root>/<step>/`, append incoming chunks to the
//! file, reply with the measured receive time per chunk, and react to the
//! step-alert code. Grounded on the original tooling's `recv_data` worker in
//! `receiver.c`, fixed to the one-filename-per-file framing spec §4.6
//! mandates.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::protocol::{AlertCode, Frame, StreamIdentity};
use crate::step_table::StepTable;
use crate::transport::Transport;

/// Drives one stream's per-step receive loop.
pub struct StreamReceiver<T: Transport> {
    transport: T,
    identity: StreamIdentity,
    output_root: PathBuf,
    step_table: Arc<StepTable>,
    /// An `Alert` frame read while looking for the next filename, held here
    /// until `await_alert` consumes it — the sender has no way to "peek",
    /// so the step loop reads one frame too far and stashes it.
    pending_alert: Option<AlertCode>,
}

impl<T: Transport> StreamReceiver<T> {
    pub fn new(
        transport: T,
        identity: StreamIdentity,
        output_root: PathBuf,
        step_table: Arc<StepTable>,
    ) -> Self {
        Self {
            transport,
            identity,
            output_root,
            step_table,
            pending_alert: None,
        }
    }

    /// Run until `END_SESSION` is observed.
    pub fn run(&mut self) -> Result<()> {
        let mut step: u64 = 0;
        loop {
            self.run_step(step)?;
            match self.await_alert(step)? {
                AlertCode::MoreFilesSameStep => continue,
                AlertCode::NextStep => {
                    self.step_table.mark_done(step, self.identity);
                    step += 1;
                }
                AlertCode::EndSession => {
                    self.step_table.mark_done(step, self.identity);
                    return Ok(());
                }
            }
        }
    }

    /// Receive files for this step. The sender announces a file's `Filename`
    /// before each burst of chunks it sends for it — including when the
    /// round-robin loop resumes a file it had switched away from, since a
    /// `Chunk` frame carries no file identifier of its own — so this loop
    /// keeps every file opened so far this step in `open` and tracks which
    /// one is `active` between a `Filename` and its eventual `FileEnd`.
    /// Once every file is done, the sender sends the alert directly instead
    /// of another filename, which is how this loop notices the step is over.
    fn run_step(&mut self, step: u64) -> Result<()> {
        let step_dir = self.output_root.join(step.to_string());
        let mut open: HashMap<String, File> = HashMap::new();
        let mut active: Option<String> = None;

        loop {
            let start = Instant::now();
            let msg = self.transport.recv()?;
            let elapsed = start.elapsed().as_secs_f64();
            match Frame::decode(&msg)? {
                Frame::Filename(name) => {
                    let filename = String::from_utf8(name.to_vec()).map_err(|e| {
                        PipelineError::ProtocolViolation(format!(
                            "filename is not valid utf-8: {e}"
                        ))
                    })?;
                    if !open.contains_key(&filename) {
                        fs::create_dir_all(&step_dir).map_err(|source| PipelineError::FileIo {
                            path: step_dir.display().to_string(),
                            source,
                        })?;
                        let file_path = step_dir.join(&filename);
                        let file = OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(&file_path)
                            .map_err(|source| PipelineError::FileIo {
                                path: file_path.display().to_string(),
                                source,
                            })?;
                        open.insert(filename.clone(), file);
                        self.step_table
                            .note_filename(step, self.identity, filename.clone());
                    }
                    active = Some(filename);
                }
                Frame::Chunk(data) => {
                    let filename = active.clone().ok_or_else(|| {
                        PipelineError::ProtocolViolation(
                            "received Chunk with no file announced".into(),
                        )
                    })?;
                    let file = open
                        .get_mut(&filename)
                        .expect("active filename is always present in open");
                    file.write_all(&data).map_err(|source| PipelineError::FileIo {
                        path: step_dir.join(&filename).display().to_string(),
                        source,
                    })?;
                    self.transport
                        .send(&Frame::TimingReply(elapsed).encode())?;
                }
                Frame::FileEnd => {
                    let filename = active.take().ok_or_else(|| {
                        PipelineError::ProtocolViolation(
                            "received FileEnd with no file announced".into(),
                        )
                    })?;
                    debug!(step, file = %filename, "file complete");
                }
                Frame::Alert(code) => {
                    self.pending_alert = Some(code);
                    return Ok(());
                }
                other => {
                    return Err(PipelineError::ProtocolViolation(format!(
                        "expected Filename, Chunk, FileEnd, or Alert, got {other:?}"
                    )))
                }
            }
        }
    }

    fn await_alert(&mut self, step: u64) -> Result<AlertCode> {
        let code = if let Some(code) = self.pending_alert.take() {
            code
        } else {
            match Frame::decode(&self.transport.recv()?)? {
                Frame::Alert(code) => code,
                other => {
                    return Err(PipelineError::ProtocolViolation(format!(
                        "expected Alert, got {other:?}"
                    )))
                }
            }
        };
        if code.expects_ack() {
            let ack_text = format!("step ({step}): Received {:?} data", self.identity);
            self.transport.send(&Frame::Ack(ack_text).encode())?;
        }
        info!(step, identity = ?self.identity, code = ?code, "step alert processed");
        Ok(code)
    }
}
