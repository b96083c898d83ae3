//! Bounded sample queue between the rendering thread and the sound card callback.
//!
//! The rendering thread pushes whole cycles and blocks while the queue is full; the
//! real-time callback drains it without ever waiting. The queue depth is therefore the
//! output latency.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Thread-safe bounded queue of interleaved `f32` samples.
///
/// A `closed` flag lives under the same mutex as the samples, so a producer blocked on a
/// full queue is always woken by [`SampleQueue::close`].
pub struct SampleQueue {
    channels: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    max_samples: usize,
}

struct QueueInner {
    samples: VecDeque<f32>,
    closed: bool,
}

impl SampleQueue {
    /// Create a queue holding at most `max_frames` frames of `channels` channels.
    pub fn new(channels: usize, max_frames: usize) -> Self {
        let channels = channels.max(1);
        let max_samples = max_frames.max(1) * channels;
        Self {
            channels,
            inner: Mutex::new(QueueInner {
                samples: VecDeque::with_capacity(max_samples),
                closed: false,
            }),
            cv: Condvar::new(),
            max_samples,
        }
    }

    fn guard(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Capacity in frames.
    pub fn max_frames(&self) -> usize {
        self.max_samples / self.channels
    }

    /// Buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.guard().samples.len() / self.channels
    }

    pub fn is_closed(&self) -> bool {
        self.guard().closed
    }

    /// Mark the queue closed and wake every waiter. Idempotent.
    pub fn close(&self) {
        self.guard().closed = true;
        self.cv.notify_all();
    }

    /// Push samples, blocking while the queue is full.
    ///
    /// Returns `false` if the queue was closed before everything was pushed.
    pub fn push_blocking(&self, samples: &[f32]) -> bool {
        let mut offset = 0;
        while offset < samples.len() {
            let mut g = self.guard();
            while g.samples.len() >= self.max_samples && !g.closed {
                g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
            }
            if g.closed {
                return false;
            }

            let room = self.max_samples - g.samples.len();
            let end = (offset + room).min(samples.len());
            g.samples.extend(&samples[offset..end]);
            offset = end;
        }
        true
    }

    /// Move up to `out.len()` samples (whole frames only) into `out` without blocking.
    ///
    /// Returns the number of samples written.
    pub fn pop_into(&self, out: &mut [f32]) -> usize {
        let mut g = self.guard();
        let take = g.samples.len().min(out.len()) / self.channels * self.channels;
        for (dst, src) in out[..take].iter_mut().zip(g.samples.drain(..take)) {
            *dst = src;
        }
        drop(g);
        if take > 0 {
            self.cv.notify_all();
        }
        take
    }
}
