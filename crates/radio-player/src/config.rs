use std::time::Duration;

/// Output device parameters, fixed for the lifetime of a [`crate::speaker::Speaker`].
#[derive(Clone, Debug)]
pub struct SpeakerConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Amount of audio queued ahead of the sound card.
    pub buffer_latency: Duration,
    /// Output channel count.
    pub channels: u16,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            buffer_latency: Duration::from_millis(100),
            channels: 2,
        }
    }
}

impl SpeakerConfig {
    /// Number of frames covered by `buffer_latency` at `sample_rate`.
    pub fn latency_frames(&self) -> usize {
        frames_for(self.sample_rate, self.buffer_latency).max(1)
    }

    /// Frames rendered per cycle of the rendering thread.
    pub fn cycle_frames(&self) -> usize {
        (self.latency_frames() / 4).max(64)
    }
}

/// Playback tuning for the radio player pipeline.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Volume change per increase/decrease step, in log2 gain units.
    pub volume_step: f64,
    /// Resampler quality (1..=8), higher is more accurate and more expensive.
    pub resample_quality: u8,
    /// Resampler input chunk size in frames.
    pub resample_chunk_frames: usize,
    /// Decoded audio each session buffers ahead of the speaker.
    pub session_buffer: Duration,
    /// TCP connect timeout for stream requests.
    pub connect_timeout: Duration,
    /// Time allowed between sending the request and receiving response headers.
    pub response_timeout: Duration,
    /// `User-Agent` sent with stream requests.
    pub user_agent: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            volume_step: 0.5,
            resample_quality: 6,
            resample_chunk_frames: 1024,
            session_buffer: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(10),
            user_agent: concat!("radio-player/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl PlayerConfig {
    /// Frames covered by `session_buffer` at `rate_hz`.
    pub fn session_buffer_frames(&self, rate_hz: u32) -> usize {
        frames_for(rate_hz, self.session_buffer).max(1)
    }
}

fn frames_for(rate_hz: u32, duration: Duration) -> usize {
    (rate_hz as f64 * duration.as_secs_f64()).round() as usize
}
