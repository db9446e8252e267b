//! Step ordering gate (spec §4.8, C7).
//!
//! Both stream receivers report per-step progress into one table; a single
//! processor thread waits on it and releases steps to the downstream
//! invoker strictly in increasing step order, exactly once each — mirroring
//! the original tooling's `step_manager.c`, where a step is handed to
//! `run_blob_detection_scripts` only once `is_step_complete()` holds and a
//! condition variable wakes the processing thread instead of it polling.

use parking_lot::{Condvar, Mutex};

use crate::protocol::StreamIdentity;

#[derive(Debug, Default, Clone)]
struct StepStatus {
    reduced_done: bool,
    augmentation_done: bool,
    reduced_filenames: Vec<String>,
    augmentation_filenames: Vec<String>,
}

/// Snapshot of one completed step's filenames, handed to the downstream
/// invoker once both streams have reported completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSnapshot {
    pub step: u64,
    pub reduced_filenames: Vec<String>,
    pub augmentation_filenames: Vec<String>,
}

struct Inner {
    steps: Vec<StepStatus>,
    next_to_release: u64,
    shutdown: bool,
}

/// Tracks per-step completion of the reduced and augmentation streams and
/// releases steps to the processor in strictly increasing order.
pub struct StepTable {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl StepTable {
    /// `augmentation_enabled` is false when the session carries no
    /// augmentation stream at all, in which case every step starts with its
    /// augmentation half already marked done (the original's `quality ==
    /// REDUCED` case).
    pub fn new(num_steps: u64, augmentation_enabled: bool) -> Self {
        let steps = (0..num_steps.max(1))
            .map(|_| StepStatus {
                augmentation_done: !augmentation_enabled,
                ..Default::default()
            })
            .collect();
        Self {
            inner: Mutex::new(Inner {
                steps,
                next_to_release: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Record one received filename against `step`'s stream.
    pub fn note_filename(&self, step: u64, stream: StreamIdentity, filename: impl Into<String>) {
        let mut inner = self.inner.lock();
        let Some(status) = inner.steps.get_mut(step as usize) else {
            return;
        };
        match stream {
            StreamIdentity::Reduced => status.reduced_filenames.push(filename.into()),
            StreamIdentity::Augmentation => status.augmentation_filenames.push(filename.into()),
        }
    }

    /// Mark `step` complete for `stream` and wake any waiting processor.
    pub fn mark_done(&self, step: u64, stream: StreamIdentity) {
        let mut inner = self.inner.lock();
        if let Some(status) = inner.steps.get_mut(step as usize) {
            match stream {
                StreamIdentity::Reduced => status.reduced_done = true,
                StreamIdentity::Augmentation => status.augmentation_done = true,
            }
        }
        self.cond.notify_all();
    }

    /// Block until the next step (in increasing order) is complete for both
    /// streams, then hand it off exactly once. Returns `None` once every
    /// step has been released or [`Self::request_shutdown`] was called
    /// before the next step completed.
    pub fn wait_and_take_next(&self) -> Option<StepSnapshot> {
        let mut inner = self.inner.lock();
        loop {
            let idx = inner.next_to_release as usize;
            if idx >= inner.steps.len() {
                return None;
            }
            let complete = {
                let status = &inner.steps[idx];
                status.reduced_done && status.augmentation_done
            };
            if complete {
                let status = std::mem::take(&mut inner.steps[idx]);
                let step = inner.next_to_release;
                inner.next_to_release += 1;
                return Some(StepSnapshot {
                    step,
                    reduced_filenames: status.reduced_filenames,
                    augmentation_filenames: status.augmentation_filenames,
                });
            }
            if inner.shutdown {
                return None;
            }
            self.cond.wait(&mut inner);
        }
    }

    /// Wake any thread blocked in [`Self::wait_and_take_next`] so it can
    /// observe session shutdown instead of waiting forever on a step that
    /// will never complete.
    pub fn request_shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        self.cond.notify_all();
    }
}
