//! CPAL-backed sample sink.
//!
//! The rendering thread pushes cycles into a bounded [`SampleQueue`] one buffer latency
//! deep. The real-time callback drains it without blocking, converts `f32` to the device
//! sample format, and outputs silence on underrun.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::config::SpeakerConfig;
use crate::device;
use crate::queue::SampleQueue;
use crate::speaker::SampleSink;

/// Sound card output through CPAL.
pub struct CpalSink {
    _stream: cpal::Stream,
    queue: Arc<SampleQueue>,
    channels: usize,
    sample_rate: u32,
    underrun_events: Arc<AtomicU64>,
    reported_underruns: u64,
}

impl CpalSink {
    /// Open an output stream on the default (or `needle`-matching) device.
    pub fn open(needle: Option<&str>, cfg: &SpeakerConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, needle)?;
        let supported = device::pick_output_config(&device, cfg.sample_rate, cfg.channels)?;

        let mut stream_config: cpal::StreamConfig = supported.clone().into();
        let sample_rate = stream_config.sample_rate;
        let latency_frames = SpeakerConfig {
            sample_rate,
            ..cfg.clone()
        }
        .latency_frames();
        if let Some(buf) = device::pick_buffer_size(&supported, latency_frames) {
            stream_config.buffer_size = buf;
        }
        if sample_rate != cfg.sample_rate {
            tracing::warn!(
                requested_hz = cfg.sample_rate,
                actual_hz = sample_rate,
                "output device does not support the requested rate"
            );
        }

        let channels = stream_config.channels as usize;
        let queue = Arc::new(SampleQueue::new(channels, latency_frames));
        let underrun_events = Arc::new(AtomicU64::new(0));

        let stream = build_output_stream(
            &device,
            &stream_config,
            supported.sample_format(),
            &queue,
            &underrun_events,
        )?;
        stream.play()?;

        tracing::info!(
            device = %device.description()?,
            rate_hz = sample_rate,
            channels,
            buffer_size = ?stream_config.buffer_size,
            sample_format = ?supported.sample_format(),
            "output stream started"
        );

        Ok(Self {
            _stream: stream,
            queue,
            channels,
            sample_rate,
            underrun_events,
            reported_underruns: 0,
        })
    }
}

impl SampleSink for CpalSink {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let underruns = self.underrun_events.load(Ordering::Relaxed);
        if underruns != self.reported_underruns {
            tracing::debug!(
                new = underruns - self.reported_underruns,
                total = underruns,
                "output underrun"
            );
            self.reported_underruns = underruns;
        }

        if self.queue.push_blocking(samples) {
            Ok(())
        } else {
            Err(anyhow!("output queue closed"))
        }
    }

    fn queue(&self) -> Option<Arc<SampleQueue>> {
        Some(self.queue.clone())
    }
}

/// Build a CPAL output stream fed from `queue`.
///
/// `queue` must carry interleaved `f32` at the stream's rate and channel count.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    underrun_events: &Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, underrun_events),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, underrun_events),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, underrun_events),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, underrun_events),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    underrun_events: &Arc<AtomicU64>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let queue_cb = queue.clone();
    let underruns_cb = underrun_events.clone();
    let mut scratch: Vec<f32> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if scratch.len() < data.len() {
                scratch.resize(data.len(), 0.0);
            }
            let got = queue_cb.pop_into(&mut scratch[..data.len()]);
            if got < data.len() {
                scratch[got..data.len()].fill(0.0);
                underruns_cb.fetch_add(1, Ordering::Relaxed);
            }
            let n = data.len();
            for (dst, src) in data.iter_mut().zip(&scratch[..n]) {
                *dst = <T as cpal::Sample>::from_sample::<f32>(*src);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}
