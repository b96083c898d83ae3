//! Per-session decode thread.
//!
//! Network reads, decoding and resampling run on a thread owned by the session, which
//! fills a bounded [`SampleQueue`]. The rendering thread only drains that queue, so a
//! stalled stream starves the output instead of blocking the speaker.

use std::sync::Arc;
use std::thread;

use crate::frame::FrameSource;
use crate::queue::SampleQueue;

/// Frames pulled from the upstream pipeline per push.
const PUSH_FRAMES: usize = 1024;

/// Consumer side of a session's decode thread.
///
/// Renders silence while the queue is starved and reports exhaustion only once the
/// producer has finished and everything queued has been played. Dropping it stops the
/// producer at its next push.
pub struct Prefetched {
    queue: Arc<SampleQueue>,
    channels: usize,
    sample_rate: u32,
    starved: bool,
}

/// Run `source` on a new thread, buffering up to `buffer_frames` frames ahead.
pub fn spawn<S: FrameSource + 'static>(mut source: S, buffer_frames: usize) -> Prefetched {
    let channels = source.channels().max(1);
    let sample_rate = source.sample_rate();
    let queue = Arc::new(SampleQueue::new(channels, buffer_frames));

    let producer = queue.clone();
    thread::spawn(move || {
        let mut buf = vec![0.0f32; PUSH_FRAMES * channels];
        loop {
            let frames = source.fill(&mut buf);
            if frames == 0 || !producer.push_blocking(&buf[..frames * channels]) {
                break;
            }
        }
        producer.close();
        tracing::debug!("session decoder finished");
    });

    Prefetched {
        queue,
        channels,
        sample_rate,
        starved: false,
    }
}

impl FrameSource for Prefetched {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn fill(&mut self, out: &mut [f32]) -> usize {
        let frames = out.len() / self.channels;
        let wanted = frames * self.channels;

        let mut got = self.queue.pop_into(&mut out[..wanted]);
        let closed = self.queue.is_closed();
        if got == 0 && closed {
            // The producer may have pushed its last block right before closing.
            got = self.queue.pop_into(&mut out[..wanted]);
            if got == 0 {
                return 0;
            }
        }

        if got < wanted {
            if !closed && !self.starved {
                tracing::debug!("session buffer underrun");
            }
            self.starved = !closed;
            out[got..wanted].fill(0.0);
        } else {
            self.starved = false;
        }
        frames
    }
}

impl Drop for Prefetched {
    fn drop(&mut self) {
        self.queue.close();
    }
}
