//! Per-stream sender loop (spec §4.4, C4).
//!
//! One [`StreamSender`] drives one stream (reduced or augmentation) through
//! every configured step: send each file's name, chunk its bytes across the
//! transport, read back the receiver's per-chunk timing, and close the step
//! out with an alert code. The augmentation variant additionally feeds the
//! telemetry ring and consults the live progress threshold so it can
//! truncate a file early. Grounded on the original tooling's `send_data`
//! worker in `sender.c`, generalized to the one-filename-per-file framing
//! the wire protocol mandates.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::protocol::{AlertCode, Frame, StreamIdentity};
use crate::telemetry::{Sample, SenderShared};
use crate::transport::Transport;

/// Drives one stream's per-step send loop.
pub struct StreamSender<T: Transport> {
    transport: T,
    identity: StreamIdentity,
    files: Vec<std::path::PathBuf>,
    chunk_size: usize,
    round_robin_chunks: usize,
    shared: Arc<SenderShared>,
}

impl<T: Transport> StreamSender<T> {
    pub fn new(
        transport: T,
        identity: StreamIdentity,
        files: Vec<std::path::PathBuf>,
        chunk_size: usize,
        round_robin_chunks: usize,
        shared: Arc<SenderShared>,
    ) -> Self {
        Self {
            transport,
            identity,
            files,
            chunk_size,
            round_robin_chunks: round_robin_chunks.max(1),
            shared,
        }
    }

    /// Run every step in sequence. `num_steps` is the session length;
    /// `is_augmentation` selects the truncation behavior of step 5/6 in
    /// spec §4.4.
    pub fn run(&mut self, num_steps: u64) -> Result<()> {
        for step in 0..num_steps {
            self.run_step(step, step + 1 == num_steps)?;
            match self.identity {
                StreamIdentity::Reduced => self.shared.advance_reduced(),
                StreamIdentity::Augmentation => self.shared.advance_aug(),
            }
        }
        Ok(())
    }

    fn run_step(&mut self, step: u64, is_last_step: bool) -> Result<()> {
        let files = self.files.clone();
        if self.identity == StreamIdentity::Augmentation && files.len() > 1 {
            self.send_step_round_robin(step, &files)?;
        } else {
            for path in &files {
                self.send_file(step, path)?;
            }
        }

        let code = if is_last_step {
            AlertCode::EndSession
        } else {
            AlertCode::NextStep
        };
        self.transport.send(&Frame::Alert(code).encode())?;
        if code.expects_ack() {
            let ack = self.transport.recv()?;
            let ack = Frame::decode(&ack)?;
            match ack {
                Frame::Ack(text) => {
                    debug!(identity = ?self.identity, step, ack = %text, "step acked")
                }
                other => {
                    return Err(PipelineError::ProtocolViolation(format!(
                        "expected Ack after alert, got {other:?}"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Send every file for this step, not interleaved: spec §4.6 mandates
    /// the one-filename-per-file framing (variant a) for the reduced stream
    /// and for single-file augmentation steps.
    fn send_file(&mut self, step: u64, path: &Path) -> Result<()> {
        let filename = file_name_bytes(path)?;
        self.transport
            .send(&Frame::Filename(Bytes::from(filename)).encode())?;

        let mut file = File::open(path).map_err(|source| PipelineError::FileIo {
            path: path.display().to_string(),
            source,
        })?;
        let file_size = file
            .metadata()
            .map_err(|source| PipelineError::FileIo {
                path: path.display().to_string(),
                source,
            })?
            .len();

        let mut sent_bytes: u64 = 0;
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = file.read(&mut buf).map_err(|source| PipelineError::FileIo {
                path: path.display().to_string(),
                source,
            })?;
            if n == 0 {
                break;
            }
            sent_bytes += n as u64;
            self.send_chunk_and_record(&buf[..n])?;

            if self.identity == StreamIdentity::Augmentation
                && self.should_truncate(step, sent_bytes, file_size)
            {
                info!(
                    file = %path.display(),
                    step,
                    sent_bytes,
                    file_size,
                    "truncating augmentation file at progress threshold"
                );
                break;
            }
        }
        self.transport.send(&Frame::FileEnd.encode())?;
        Ok(())
    }

    /// Augmentation, multi-file case: interleave chunks across files,
    /// switching every `round_robin_chunks` chunks, preserving per-file
    /// ordering (spec §4.4's round-robin policy knob).
    ///
    /// A `Chunk` frame carries no file identifier, so the receiver only
    /// knows which file a chunk belongs to via the most recently sent
    /// `Filename`. Every time the burst switches to a different file than
    /// the one last announced — including resuming a file after the loop
    /// cycled away from it — a fresh `Filename` frame is sent first.
    fn send_step_round_robin(&mut self, step: u64, files: &[std::path::PathBuf]) -> Result<()> {
        struct OpenFile {
            path: std::path::PathBuf,
            file: File,
            size: u64,
            sent: u64,
            done: bool,
        }

        let mut open_files = Vec::with_capacity(files.len());
        for path in files {
            let file = File::open(path).map_err(|source| PipelineError::FileIo {
                path: path.display().to_string(),
                source,
            })?;
            let size = file
                .metadata()
                .map_err(|source| PipelineError::FileIo {
                    path: path.display().to_string(),
                    source,
                })?
                .len();
            open_files.push(OpenFile {
                path: path.clone(),
                file,
                size,
                sent: 0,
                done: false,
            });
        }

        let mut idx = 0usize;
        let mut buf = vec![0u8; self.chunk_size];
        let mut last_announced: Option<usize> = None;
        while open_files.iter().any(|of| !of.done) {
            if open_files[idx].done {
                idx = (idx + 1) % open_files.len();
                continue;
            }

            if last_announced != Some(idx) {
                let filename = file_name_bytes(&open_files[idx].path)?;
                self.transport
                    .send(&Frame::Filename(Bytes::from(filename)).encode())?;
                last_announced = Some(idx);
            }

            if open_files[idx].size == 0 {
                self.transport.send(&Frame::FileEnd.encode())?;
                open_files[idx].done = true;
                last_announced = None;
                debug!(file = %open_files[idx].path.display(), "empty augmentation file closed immediately");
                idx = (idx + 1) % open_files.len();
                continue;
            }

            for _ in 0..self.round_robin_chunks {
                if open_files[idx].done {
                    break;
                }
                let of = &mut open_files[idx];
                let n = of
                    .file
                    .read(&mut buf)
                    .map_err(|source| PipelineError::FileIo {
                        path: of.path.display().to_string(),
                        source,
                    })?;
                if n == 0 {
                    self.transport.send(&Frame::FileEnd.encode())?;
                    of.done = true;
                    last_announced = None;
                    break;
                }
                of.sent += n as u64;
                let (sent, size, path) = (of.sent, of.size, of.path.clone());
                self.send_chunk_and_record(&buf[..n])?;
                if self.should_truncate(step, sent, size) {
                    info!(file = %path.display(), step, sent_bytes = sent, file_size = size, "truncating augmentation file at progress threshold");
                    self.transport.send(&Frame::FileEnd.encode())?;
                    open_files[idx].done = true;
                    last_announced = None;
                    break;
                }
            }
            idx = (idx + 1) % open_files.len();
        }
        Ok(())
    }

    fn send_chunk_and_record(&mut self, data: &[u8]) -> Result<()> {
        let start = Instant::now();
        self.transport
            .send(&Frame::Chunk(Bytes::copy_from_slice(data)).encode())?;
        let reply = self.transport.recv()?;
        let elapsed = match Frame::decode(&reply)? {
            Frame::TimingReply(seconds) => seconds,
            other => {
                return Err(PipelineError::ProtocolViolation(format!(
                    "expected TimingReply after chunk, got {other:?}"
                )))
            }
        };
        let _ = start; // receiver's own measurement is authoritative (spec §6 msg 3)

        if self.identity == StreamIdentity::Augmentation {
            self.shared.push_sample(Sample {
                elapsed_seconds: elapsed,
                bytes: data.len(),
            });
        }
        Ok(())
    }

    /// spec §4.4 step 5: `progress = 100 * sent_bytes / file_size`; truncate
    /// once it reaches the current step's threshold.
    fn should_truncate(&self, step: u64, sent_bytes: u64, file_size: u64) -> bool {
        if file_size == 0 {
            return false;
        }
        let progress = (sent_bytes as f64 / file_size as f64) * 100.0;
        let threshold = self.shared.threshold(step) as f64;
        if progress >= threshold {
            warn!(step, progress, threshold, "augmentation progress reached threshold");
            true
        } else {
            false
        }
    }
}

fn file_name_bytes(path: &Path) -> Result<Vec<u8>> {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.as_bytes().to_vec())
        .ok_or_else(|| PipelineError::Config(format!("invalid filename: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory transport stub, driven by a scripted reply queue, so the
    /// sender loop can be tested without sockets.
    struct FakeTransport {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<Vec<u8>>,
    }

    impl Transport for FakeTransport {
        fn send(&mut self, msg: &[u8]) -> Result<()> {
            self.sent.push(msg.to_vec());
            Ok(())
        }

        fn recv(&mut self) -> Result<Vec<u8>> {
            self.replies
                .pop_front()
                .ok_or_else(|| PipelineError::ProtocolViolation("no scripted reply".into()))
        }
    }

    fn timing_reply(seconds: f64) -> Vec<u8> {
        Frame::TimingReply(seconds).encode().to_vec()
    }

    fn ack(text: &str) -> Vec<u8> {
        Frame::Ack(text.to_string()).encode().to_vec()
    }

    #[test]
    fn reduced_single_file_single_step_sends_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.bin");
        std::fs::write(&path, vec![1u8; 10]).unwrap();

        let transport = FakeTransport {
            sent: Vec::new(),
            replies: VecDeque::from(vec![timing_reply(0.01), ack("ok")]),
        };
        let shared = Arc::new(SenderShared::new(1, 100));
        let mut sender = StreamSender::new(
            transport,
            StreamIdentity::Reduced,
            vec![path],
            1024,
            1,
            shared,
        );
        sender.run(1).unwrap();

        let frames: Vec<Frame> = sender
            .transport
            .sent
            .iter()
            .map(|b| Frame::decode(b).unwrap())
            .collect();
        assert!(matches!(frames[0], Frame::Filename(_)));
        assert!(matches!(frames[1], Frame::Chunk(_)));
        assert!(matches!(frames[2], Frame::FileEnd));
        assert_eq!(frames[3], Frame::Alert(AlertCode::EndSession));
    }

    #[test]
    fn augmentation_truncates_at_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, vec![2u8; 40]).unwrap(); // 4 chunks of 10 bytes

        let transport = FakeTransport {
            sent: Vec::new(),
            replies: VecDeque::from(vec![
                timing_reply(0.01),
                timing_reply(0.01),
                ack("ok"),
            ]),
        };
        let shared = Arc::new(SenderShared::new(1, 100));
        shared.write_threshold_window(0, 1, 50); // truncate at 50%
        let mut sender = StreamSender::new(
            transport,
            StreamIdentity::Augmentation,
            vec![path],
            10,
            1,
            shared,
        );
        sender.run(1).unwrap();

        let frames: Vec<Frame> = sender
            .transport
            .sent
            .iter()
            .map(|b| Frame::decode(b).unwrap())
            .collect();
        let chunk_count = frames.iter().filter(|f| matches!(f, Frame::Chunk(_))).count();
        assert_eq!(chunk_count, 2); // 2 of 4 chunks -> 50% exactly
        assert!(matches!(
            frames[chunk_count + 1],
            Frame::FileEnd
        ));
    }

    #[test]
    fn empty_file_sends_only_eof_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, []).unwrap();

        let transport = FakeTransport {
            sent: Vec::new(),
            replies: VecDeque::from(vec![ack("ok")]),
        };
        let shared = Arc::new(SenderShared::new(1, 100));
        let mut sender = StreamSender::new(
            transport,
            StreamIdentity::Augmentation,
            vec![path],
            1024,
            1,
            shared,
        );
        sender.run(1).unwrap();

        let frames: Vec<Frame> = sender
            .transport
            .sent
            .iter()
            .map(|b| Frame::decode(b).unwrap())
            .collect();
        assert!(matches!(frames[0], Frame::Filename(_)));
        assert!(matches!(frames[1], Frame::FileEnd));
        assert_eq!(frames[2], Frame::Alert(AlertCode::EndSession));
    }

    #[test]
    fn round_robin_reannounces_filename_when_resuming_a_switched_away_file() {
        let dir = tempfile::tempdir().unwrap();
        let a1 = dir.path().join("a1.bin");
        let a2 = dir.path().join("a2.bin");
        std::fs::write(&a1, vec![1u8; 10]).unwrap(); // 2 chunks of 5 bytes
        std::fs::write(&a2, vec![2u8; 10]).unwrap();

        let transport = FakeTransport {
            sent: Vec::new(),
            replies: VecDeque::from(vec![
                timing_reply(0.01),
                timing_reply(0.01),
                timing_reply(0.01),
                timing_reply(0.01),
                ack("ok"),
            ]),
        };
        let shared = Arc::new(SenderShared::new(1, 100));
        let mut sender = StreamSender::new(
            transport,
            StreamIdentity::Augmentation,
            vec![a1, a2],
            5,
            1,
            shared,
        );
        sender.run(1).unwrap();

        let frames: Vec<Frame> = sender
            .transport
            .sent
            .iter()
            .map(|b| Frame::decode(b).unwrap())
            .collect();

        // Every time the round-robin loop switches which file is active — on
        // first touch and again each time it resumes a file it had cycled
        // away from — it must re-announce that file's name, since a Chunk
        // frame carries no identifier of its own.
        let filenames: Vec<String> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Filename(b) => Some(String::from_utf8(b.to_vec()).unwrap()),
                _ => None,
            })
            .collect();
        assert_eq!(filenames, vec!["a1.bin", "a2.bin", "a1.bin", "a2.bin"]);

        let file_end_count = frames.iter().filter(|f| matches!(f, Frame::FileEnd)).count();
        assert_eq!(file_end_count, 2);
        assert_eq!(frames.last().unwrap(), &Frame::Alert(AlertCode::EndSession));
    }

    #[test]
    fn unexpected_reply_is_protocol_violation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.bin");
        std::fs::write(&path, vec![1u8; 5]).unwrap();

        let transport = FakeTransport {
            sent: Vec::new(),
            replies: VecDeque::from(vec![ack("not a timing reply")]),
        };
        let shared = Arc::new(SenderShared::new(1, 100));
        let mut sender = StreamSender::new(
            transport,
            StreamIdentity::Reduced,
            vec![path],
            1024,
            1,
            shared,
        );
        let err = sender.run(1).unwrap_err();
        assert!(matches!(err, PipelineError::ProtocolViolation(_)));
    }
}
