//! Telemetry ring, threshold window, and step counters (spec §4.2, §4.3,
//! §4.5, §5).
//!
//! Spec §5 requires the telemetry ring and the threshold vector to share a
//! single mutex (shared-state items #1 and #2), and for the step counters to
//! live under that same lock so the predictor can read a consistent
//! `s_aug` alongside the samples it just drained. `SenderShared` is that one
//! lock, mirroring the way the teacher's `FlowController` bundles several
//! related maps behind a caller-supplied lock rather than locking internally
//! per field.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// One (elapsed_seconds, bytes) observation from a completed chunk transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub elapsed_seconds: f64,
    pub bytes: usize,
}

/// Bounded circular buffer of samples. Older samples are silently dropped
/// once the buffer reaches `capacity` and the writer keeps pushing faster
/// than the reader drains (spec §4.2).
#[derive(Debug)]
struct TelemetryRing {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl TelemetryRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    fn push(&mut self, sample: Sample) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Return and clear all currently buffered samples, in FIFO order.
    fn drain_all(&mut self) -> Vec<Sample> {
        self.samples.drain(..).collect()
    }
}

/// State shared between the augmentation [`crate::sender::StreamSender`]
/// (writer of samples and `s_aug`), the reduced sender (writer of
/// `s_reduced`), and the [`crate::predictor`] worker (reader of samples and
/// `s_aug`, writer of the threshold window). One lock covers all of it.
pub struct SenderShared {
    inner: Mutex<Inner>,
}

struct Inner {
    ring: TelemetryRing,
    /// Per-step progress threshold, `threshold[step] in [1,100]`. Initialized
    /// to 100 (no truncation) for every step until the predictor writes a
    /// fresh value.
    threshold: Vec<u8>,
    s_reduced: u64,
    s_aug: u64,
}

impl SenderShared {
    pub fn new(num_steps: u64, telemetry_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ring: TelemetryRing::new(telemetry_capacity),
                threshold: vec![100u8; num_steps.max(1) as usize],
                s_reduced: 0,
                s_aug: 0,
            }),
        }
    }

    /// Record one augmentation chunk's timing.
    pub fn push_sample(&self, sample: Sample) {
        self.inner.lock().ring.push(sample);
    }

    /// Drain all samples accumulated since the previous call (predictor
    /// step 1).
    pub fn drain_samples(&self) -> Vec<Sample> {
        self.inner.lock().ring.drain_all()
    }

    /// Current progress threshold for `step`, clamped to the configured
    /// horizon; returns 100 for any step beyond the window (permissive
    /// default per spec §4.3 step 8's failure mode).
    pub fn threshold(&self, step: u64) -> u8 {
        let inner = self.inner.lock();
        inner
            .threshold
            .get(step as usize)
            .copied()
            .unwrap_or(100)
    }

    /// Write `value` into `thresh[start..start+len)`, clamped to [1,100]
    /// and bounds-checked against the vector length (spec §4.3 step 8).
    pub fn write_threshold_window(&self, start: u64, len: u64, value: u8) {
        let value = value.clamp(1, 100);
        let mut inner = self.inner.lock();
        let vec_len = inner.threshold.len() as u64;
        let end = (start + len).min(vec_len);
        let start = start.min(vec_len);
        for i in start..end {
            inner.threshold[i as usize] = value;
        }
    }

    /// Current augmentation step counter, read by the predictor.
    pub fn s_aug(&self) -> u64 {
        self.inner.lock().s_aug
    }

    /// Current reduced step counter.
    pub fn s_reduced(&self) -> u64 {
        self.inner.lock().s_reduced
    }

    /// Advance the augmentation step counter. Monotonic (spec §4.5).
    pub fn advance_aug(&self) {
        let mut inner = self.inner.lock();
        inner.s_aug += 1;
    }

    /// Advance the reduced step counter. Monotonic (spec §4.5).
    pub fn advance_reduced(&self) {
        let mut inner = self.inner.lock();
        inner.s_reduced += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest_when_full() {
        let mut ring = TelemetryRing::new(2);
        ring.push(Sample {
            elapsed_seconds: 1.0,
            bytes: 10,
        });
        ring.push(Sample {
            elapsed_seconds: 2.0,
            bytes: 20,
        });
        ring.push(Sample {
            elapsed_seconds: 3.0,
            bytes: 30,
        });
        let drained = ring.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].bytes, 20);
        assert_eq!(drained[1].bytes, 30);
    }

    #[test]
    fn drain_clears_ring() {
        let mut ring = TelemetryRing::new(10);
        ring.push(Sample {
            elapsed_seconds: 1.0,
            bytes: 5,
        });
        assert_eq!(ring.drain_all().len(), 1);
        assert!(ring.drain_all().is_empty());
    }

    #[test]
    fn threshold_defaults_to_100() {
        let shared = SenderShared::new(4, 100);
        assert_eq!(shared.threshold(0), 100);
        assert_eq!(shared.threshold(99), 100); // out of horizon, still permissive
    }

    #[test]
    fn write_threshold_window_clamps_and_bounds_checks() {
        let shared = SenderShared::new(4, 100);
        shared.write_threshold_window(1, 2, 0); // clamp to 1
        assert_eq!(shared.threshold(0), 100);
        assert_eq!(shared.threshold(1), 1);
        assert_eq!(shared.threshold(2), 1);
        assert_eq!(shared.threshold(3), 100);

        // Writing past the end doesn't panic.
        shared.write_threshold_window(3, 10, 200);
        assert_eq!(shared.threshold(3), 100); // clamp to 100
    }

    #[test]
    fn step_counters_are_independent_and_monotonic() {
        let shared = SenderShared::new(4, 100);
        assert_eq!(shared.s_aug(), 0);
        assert_eq!(shared.s_reduced(), 0);
        shared.advance_aug();
        shared.advance_aug();
        shared.advance_reduced();
        assert_eq!(shared.s_aug(), 2);
        assert_eq!(shared.s_reduced(), 1);
    }
}
