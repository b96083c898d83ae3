//! Lazy frame sequences.
//!
//! Every pipeline stage (decoder, resampler, volume) implements [`FrameSource`] and
//! wraps the stage before it, so a stage can be left out without the rest of the
//! pipeline noticing.

/// A pull-based sequence of interleaved `f32` frames.
pub trait FrameSource: Send {
    /// Channels per frame.
    fn channels(&self) -> usize;

    /// Frames per second.
    fn sample_rate(&self) -> u32;

    /// Write whole interleaved frames into `out` and return how many were written.
    ///
    /// `out.len()` must be a multiple of [`FrameSource::channels`]. A source may return
    /// fewer frames than requested; `0` means the sequence is exhausted.
    fn fill(&mut self, out: &mut [f32]) -> usize;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn channels(&self) -> usize {
        (**self).channels()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn fill(&mut self, out: &mut [f32]) -> usize {
        (**self).fill(out)
    }
}

/// Pull from `src` until `out` is full or `src` is exhausted.
///
/// Returns frames written.
pub fn fill_exact<S: FrameSource + ?Sized>(src: &mut S, out: &mut [f32]) -> usize {
    let channels = src.channels().max(1);
    let mut written = 0usize;
    while written * channels < out.len() {
        let n = src.fill(&mut out[written * channels..]);
        if n == 0 {
            break;
        }
        written += n;
    }
    written
}

/// Copy one frame between channel layouts.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - equal layouts: pass-through
/// - other layouts: clamp to the last available source channel
pub fn map_frame(src: &[f32], dst: &mut [f32]) {
    let get = |ch: usize| src.get(ch).copied().unwrap_or(0.0);
    match (src.len(), dst.len()) {
        (a, b) if a == b => dst.copy_from_slice(src),
        (2, 1) => dst[0] = 0.5 * (get(0) + get(1)),
        (0, _) => dst.fill(0.0),
        (n, _) => {
            for (ch, out) in dst.iter_mut().enumerate() {
                *out = get(ch.min(n - 1));
            }
        }
    }
}
