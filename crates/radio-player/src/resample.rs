//! Streaming resample stage.
//!
//! Uses Rubato to convert decoded interleaved `f32` audio from the source rate to the
//! output device rate. The stage is pull-driven: each time its output runs dry it pulls
//! one fixed-size chunk from the stage before it, so the only buffering is one chunk in
//! and one chunk out. When the stage before it ends, zero blocks are fed through until
//! the filter's delayed tail has been emitted.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::error::{RadioError, Result};
use crate::frame::{FrameSource, fill_exact};

/// Configuration for the resample stage.
#[derive(Clone, Copy, Debug)]
pub struct ResampleConfig {
    /// Interpolation quality, 1 (cheapest) to 8 (most accurate).
    pub quality: u8,

    /// Input chunk size in frames.
    ///
    /// Larger values reduce per-call overhead at the cost of latency.
    pub chunk_frames: usize,
}

/// Whether a source at `src_rate` has to be resampled for an output at `dst_rate`.
///
/// Rates are compared exactly.
pub fn needs_resampling(src_rate: u32, dst_rate: u32) -> bool {
    src_rate != dst_rate
}

/// Upper bound on zero blocks fed through while flushing the filter tail.
const MAX_FLUSH_BLOCKS: usize = 8;

/// Sinc parameters for a quality level.
fn sinc_params(quality: u8) -> SincInterpolationParameters {
    let q = quality.clamp(1, 8) as usize;
    let sinc_len = 32 * q;
    let window = WindowFunction::BlackmanHarris2;
    let interpolation = match q {
        1..=2 => SincInterpolationType::Linear,
        3..=5 => SincInterpolationType::Quadratic,
        _ => SincInterpolationType::Cubic,
    };
    SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation,
        oversampling_factor: if q >= 6 { 256 } else { 128 },
        window,
    }
}

/// Frames of `inner` re-timed to a new sample rate.
pub struct Resampled<S> {
    inner: S,
    resampler: Async<f32>,
    channels: usize,
    dst_rate: u32,
    ratio: f64,
    chunk_frames: usize,
    input: Vec<f32>,
    output: Vec<f32>,
    out_pos: usize,
    out_len: usize,
    indexing: Indexing,
    frames_in: u64,
    frames_out: u64,
    flush_blocks: usize,
    inner_done: bool,
    finished: bool,
}

impl<S: FrameSource> Resampled<S> {
    /// Wrap `inner` so it produces frames at `dst_rate`.
    pub fn new(inner: S, dst_rate: u32, cfg: ResampleConfig) -> Result<Self> {
        let src_rate = inner.sample_rate();
        let channels = inner.channels();
        if src_rate == 0 || dst_rate == 0 || channels == 0 {
            return Err(RadioError::decode(format!(
                "cannot resample {channels} channel(s) from {src_rate} Hz to {dst_rate} Hz"
            )));
        }

        let f_ratio = dst_rate as f64 / src_rate as f64;
        let chunk_frames = cfg.chunk_frames.max(1);
        let params = sinc_params(cfg.quality);

        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| RadioError::decode(format!("resampler init: {e}")))?;

        let out_frames = (chunk_frames as f64 * f_ratio * 1.1).ceil() as usize + chunk_frames;

        Ok(Self {
            inner,
            resampler,
            channels,
            dst_rate,
            ratio: f_ratio,
            chunk_frames,
            input: vec![0.0; chunk_frames * channels],
            output: vec![0.0; out_frames * channels],
            out_pos: 0,
            out_len: 0,
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
            frames_in: 0,
            frames_out: 0,
            flush_blocks: 0,
            inner_done: false,
            finished: false,
        })
    }

    /// Pull one chunk from `inner` and resample it, or flush the tail once `inner` is
    /// exhausted.
    ///
    /// Returns `false` once all output has been produced or the resampler fails.
    fn process_next(&mut self) -> bool {
        if self.finished {
            return false;
        }
        if self.inner_done {
            return self.flush_tail();
        }

        let got = fill_exact(&mut self.inner, &mut self.input);
        if got == 0 {
            self.inner_done = true;
            return self.flush_tail();
        }
        let partial = if got < self.chunk_frames {
            // Last block of a finished stream.
            self.inner_done = true;
            Some(got)
        } else {
            None
        };

        match self.run(got, partial) {
            Some(produced) => {
                self.frames_in += got as u64;
                self.frames_out += produced as u64;
                self.out_pos = 0;
                self.out_len = produced * self.channels;
                true
            }
            None => {
                self.finished = true;
                false
            }
        }
    }

    /// Feed a zero block so the samples still held in the filter reach the output.
    fn flush_tail(&mut self) -> bool {
        let target = (self.frames_in as f64 * self.ratio).ceil() as u64
            + self.resampler.output_delay() as u64;
        if self.frames_out >= target || self.flush_blocks >= MAX_FLUSH_BLOCKS {
            self.finished = true;
            return false;
        }
        self.flush_blocks += 1;
        self.input.fill(0.0);

        let Some(produced) = self.run(self.chunk_frames, Some(0)) else {
            self.finished = true;
            return false;
        };
        let keep = produced.min((target - self.frames_out) as usize);
        self.frames_out += keep as u64;
        self.out_pos = 0;
        self.out_len = keep * self.channels;
        true
    }

    /// Resample the first `frames` frames of the input buffer into the output buffer.
    ///
    /// Returns the number of output frames, or `None` if the resampler failed.
    fn run(&mut self, frames: usize, partial_len: Option<usize>) -> Option<usize> {
        self.indexing.input_offset = 0;
        self.indexing.output_offset = 0;
        self.indexing.partial_len = partial_len;

        let input_adapter = match InterleavedSlice::new(
            &self.input[..frames * self.channels],
            self.channels,
            frames,
        ) {
            Ok(a) => a,
            Err(e) => {
                tracing::error!("interleaved slice (input) error: {e:#}");
                return None;
            }
        };

        let out_capacity_frames = self.output.len() / self.channels;
        let mut output_adapter =
            match InterleavedSlice::new_mut(&mut self.output, self.channels, out_capacity_frames) {
                Ok(a) => a,
                Err(e) => {
                    tracing::error!("interleaved slice (output) error: {e:#}");
                    return None;
                }
            };

        match self.resampler.process_into_buffer(
            &input_adapter,
            &mut output_adapter,
            Some(&self.indexing),
        ) {
            Ok((_nbr_in, nbr_out)) => Some(nbr_out),
            Err(e) => {
                tracing::error!("resampler process error: {e:#}");
                None
            }
        }
    }
}

impl<S: FrameSource> FrameSource for Resampled<S> {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.dst_rate
    }

    fn fill(&mut self, out: &mut [f32]) -> usize {
        while self.out_pos >= self.out_len {
            if !self.process_next() {
                return 0;
            }
        }
        let available = self.out_len - self.out_pos;
        let take = available.min(out.len()) / self.channels * self.channels;
        out[..take].copy_from_slice(&self.output[self.out_pos..self.out_pos + take]);
        self.out_pos += take;
        take / self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ConstSource;

    const CFG: ResampleConfig = ResampleConfig {
        quality: 6,
        chunk_frames: 1024,
    };

    fn drain(src: &mut impl FrameSource) -> Vec<f32> {
        let mut all = Vec::new();
        let mut out = vec![0.0; src.channels() * 700];
        loop {
            let n = src.fill(&mut out);
            if n == 0 {
                break;
            }
            all.extend_from_slice(&out[..n * src.channels()]);
        }
        all
    }

    #[test]
    fn needs_resampling_uses_exact_equality() {
        assert!(!needs_resampling(44_100, 44_100));
        assert!(needs_resampling(44_099, 44_100));
        assert!(needs_resampling(48_000, 44_100));
    }

    #[test]
    fn upsampling_doubles_frame_count() {
        let src = ConstSource::new(2, 22_050, 0.5, Some(22_050));
        let mut stage = Resampled::new(src, 44_100, CFG).unwrap();
        assert_eq!(stage.sample_rate(), 44_100);
        assert_eq!(stage.channels(), 2);

        let samples = drain(&mut stage);
        let frames = samples.len() / 2;
        assert!((40_000..=46_000).contains(&frames), "frames = {frames}");

        // Past the filter's warm-up the constant input comes through unchanged.
        let mid = samples[frames];
        assert!((mid - 0.5).abs() < 0.05, "mid = {mid}");
    }

    #[test]
    fn tail_held_in_the_filter_is_flushed() {
        // Whole chunks only, so no padded last block carries the tail out.
        let src = ConstSource::new(1, 22_050, 0.5, Some(22 * 1024));
        let mut stage = Resampled::new(src, 44_100, CFG).unwrap();
        let delay = stage.resampler.output_delay();
        assert!(delay > 0);

        let frames = drain(&mut stage).len();
        let expected = 2 * 22 * 1024 + delay;
        assert!((expected - 2..=expected).contains(&frames), "frames = {frames}");
    }

    #[test]
    fn downsampling_reduces_frame_count() {
        let src = ConstSource::new(1, 48_000, 0.25, Some(48_000));
        let mut stage = Resampled::new(src, 44_100, CFG).unwrap();
        let frames = drain(&mut stage).len();
        assert!((40_000..=45_000).contains(&frames), "frames = {frames}");
    }

    #[test]
    fn exhausted_stage_keeps_returning_zero() {
        let src = ConstSource::new(1, 22_050, 0.1, Some(10));
        let mut stage = Resampled::new(src, 44_100, CFG).unwrap();
        drain(&mut stage);
        let mut out = [0.0; 16];
        assert_eq!(stage.fill(&mut out), 0);
    }

    #[test]
    fn sinc_params_scale_with_quality() {
        assert_eq!(sinc_params(1).sinc_len, 32);
        assert_eq!(sinc_params(6).sinc_len, 192);
        assert_eq!(sinc_params(200).sinc_len, 256);
    }

    #[test]
    fn rejects_zero_rate() {
        let src = ConstSource::new(2, 0, 0.0, None);
        assert!(Resampled::new(src, 44_100, CFG).err().unwrap().is_decode());
    }
}
