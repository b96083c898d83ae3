//! Output device.
//!
//! A [`Speaker`] owns a dedicated rendering thread. Each cycle the thread takes the mixer
//! lock, pulls one cycle of frames from the active source (silence when there is none),
//! releases the lock, and writes the cycle to its [`SampleSink`]. Installing or clearing
//! a source takes the same lock, so a swap never lands inside a cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};

use crate::config::SpeakerConfig;
use crate::frame::{FrameSource, fill_exact, map_frame};
use crate::playback::CpalSink;
use crate::queue::SampleQueue;

/// Where rendered audio goes.
///
/// Built on the rendering thread and never leaves it.
pub trait SampleSink {
    fn channels(&self) -> usize;

    fn sample_rate(&self) -> u32;

    /// Write one cycle of interleaved samples. May block for back-pressure.
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Queue that `write` blocks on, if any. Closed when the speaker shuts down.
    fn queue(&self) -> Option<Arc<SampleQueue>> {
        None
    }
}

struct SinkInfo {
    sample_rate: u32,
    channels: usize,
    queue: Option<Arc<SampleQueue>>,
}

struct Shared {
    mixer: Mutex<Mixer>,
    shutdown: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct Mixer {
    active: Option<Box<dyn FrameSource>>,
    scratch: Vec<f32>,
}

impl Mixer {
    /// Fill `out` from the active source, mapping channels and padding with silence.
    ///
    /// The source is dropped once it runs dry.
    fn render(&mut self, out: &mut [f32], out_channels: usize) {
        let frames = out.len() / out_channels;
        let mut filled = 0usize;

        if let Some(src) = self.active.as_mut() {
            let src_channels = src.channels().max(1);
            self.scratch.resize(frames * src_channels, 0.0);
            filled = fill_exact(src, &mut self.scratch);

            let produced = &self.scratch[..filled * src_channels];
            for (frame, dst) in produced
                .chunks_exact(src_channels)
                .zip(out.chunks_exact_mut(out_channels))
            {
                map_frame(frame, dst);
            }

            if filled < frames {
                self.active = None;
                tracing::info!("active source exhausted");
            }
        }

        out[filled * out_channels..].fill(0.0);
    }
}

/// Exclusive access to the speaker's mixer, held by the rendering thread for a whole
/// cycle.
pub struct SpeakerGuard<'a> {
    mixer: MutexGuard<'a, Mixer>,
}

impl SpeakerGuard<'_> {
    /// Replace whatever is playing with `source`.
    pub fn install_active_source(&mut self, source: Box<dyn FrameSource>) {
        self.mixer.active = Some(source);
    }

    /// Stop playing the active source. Returns `false` if nothing was playing.
    pub fn clear_active_source(&mut self) -> bool {
        self.mixer.active.take().is_some()
    }

    pub fn has_active_source(&self) -> bool {
        self.mixer.active.is_some()
    }
}

/// The audio output device.
pub struct Speaker {
    shared: Arc<Shared>,
    sample_rate: u32,
    queue: Option<Arc<SampleQueue>>,
    render: Option<JoinHandle<()>>,
}

impl Speaker {
    /// Open the default (or `device`-matching) sound card through CPAL.
    pub fn open_default(config: &SpeakerConfig, device: Option<&str>) -> Result<Self> {
        let needle = device.map(str::to_string);
        Self::start(config, move |cfg| {
            let sink = CpalSink::open(needle.as_deref(), cfg)?;
            Ok(Box::new(sink) as Box<dyn SampleSink>)
        })
    }

    /// Spawn the rendering thread with a sink built by `make_sink` on that thread.
    ///
    /// Blocks until the sink is ready; returns its error if it could not be built.
    pub fn start<F>(config: &SpeakerConfig, make_sink: F) -> Result<Self>
    where
        F: FnOnce(&SpeakerConfig) -> Result<Box<dyn SampleSink>> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            mixer: Mutex::new(Mixer::default()),
            shutdown: AtomicBool::new(false),
        });
        let (init_tx, init_rx) = crossbeam_channel::bounded::<Result<SinkInfo>>(1);

        let shared_for_thread = shared.clone();
        let config_for_thread = config.clone();
        let render = thread::Builder::new()
            .name("speaker-render".to_string())
            .spawn(move || {
                let sink = match make_sink(&config_for_thread) {
                    Ok(sink) => sink,
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                let cycle_frames = SpeakerConfig {
                    sample_rate: sink.sample_rate(),
                    ..config_for_thread
                }
                .cycle_frames();
                let _ = init_tx.send(Ok(SinkInfo {
                    sample_rate: sink.sample_rate(),
                    channels: sink.channels(),
                    queue: sink.queue(),
                }));
                render_loop(&shared_for_thread, sink, cycle_frames);
            })
            .context("spawn speaker rendering thread")?;

        let info = match init_rx.recv() {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                let _ = render.join();
                return Err(e.context("open audio sink"));
            }
            Err(_) => {
                let _ = render.join();
                return Err(anyhow!("speaker rendering thread exited during init"));
            }
        };
        if info.channels == 0 || info.sample_rate == 0 {
            shared.shutdown.store(true, Ordering::SeqCst);
            if let Some(q) = &info.queue {
                q.close();
            }
            let _ = render.join();
            return Err(anyhow!("audio sink reported an empty format"));
        }

        tracing::info!(
            rate_hz = info.sample_rate,
            channels = info.channels,
            latency_ms = config.buffer_latency.as_millis() as u64,
            "speaker started"
        );

        Ok(Self {
            shared,
            sample_rate: info.sample_rate,
            queue: info.queue,
            render: Some(render),
        })
    }

    /// Output rate every installed source must already be at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Take the mixer lock. Waits for any render cycle in progress to finish.
    pub fn lock(&self) -> SpeakerGuard<'_> {
        SpeakerGuard {
            mixer: self.shared.lock(),
        }
    }

    /// Replace whatever is playing with `source`.
    pub fn install_active_source(&self, source: Box<dyn FrameSource>) {
        self.lock().install_active_source(source);
    }

    /// Stop playing the active source. Returns `false` if nothing was playing.
    pub fn clear_active_source(&self) -> bool {
        self.lock().clear_active_source()
    }
}

impl Drop for Speaker {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(q) = &self.queue {
            q.close();
        }
        if let Some(render) = self.render.take() {
            let _ = render.join();
        }
    }
}

fn render_loop(shared: &Shared, mut sink: Box<dyn SampleSink>, cycle_frames: usize) {
    let channels = sink.channels();
    let mut cycle = vec![0.0f32; cycle_frames * channels];

    while !shared.shutdown.load(Ordering::SeqCst) {
        shared.lock().render(&mut cycle, channels);
        if let Err(e) = sink.write(&cycle) {
            if !shared.shutdown.load(Ordering::SeqCst) {
                tracing::error!("audio sink write failed: {e:#}");
            }
            break;
        }
    }
    tracing::debug!("speaker rendering thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{CaptureSink, ConstSource, wait_for};
    use std::time::Duration;

    fn capture_speaker() -> (Speaker, Arc<crate::testutil::Captured>) {
        let (sink, captured) = CaptureSink::new(2, 44_100);
        let speaker = Speaker::start(&SpeakerConfig::default(), move |_| {
            Ok(Box::new(sink) as Box<dyn SampleSink>)
        })
        .unwrap();
        (speaker, captured)
    }

    #[test]
    fn renders_silence_without_a_source() {
        let (speaker, captured) = capture_speaker();
        assert!(wait_for(Duration::from_secs(2), || {
            captured.frames.load(Ordering::Relaxed) > 5_000
        }));
        assert_eq!(captured.nonzero_samples.load(Ordering::Relaxed), 0);
        assert!(!speaker.lock().has_active_source());
    }

    #[test]
    fn plays_installed_source_mapped_to_stereo() {
        let (speaker, captured) = capture_speaker();
        speaker.install_active_source(Box::new(ConstSource::new(1, 44_100, 0.5, None)));
        assert!(wait_for(Duration::from_secs(2), || {
            captured.nonzero_samples.load(Ordering::Relaxed) > 10_000
        }));
        let last = captured.last_cycle.lock().unwrap().clone();
        assert!(last.iter().all(|s| *s == 0.5));
    }

    #[test]
    fn clear_stops_output() {
        let (speaker, captured) = capture_speaker();
        speaker.install_active_source(Box::new(ConstSource::new(2, 44_100, 0.5, None)));
        assert!(speaker.clear_active_source());
        assert!(!speaker.clear_active_source());

        let before = captured.frames.load(Ordering::Relaxed);
        assert!(wait_for(Duration::from_secs(2), || {
            captured.frames.load(Ordering::Relaxed) > before + 5_000
        }));
        let last = captured.last_cycle.lock().unwrap().clone();
        assert!(last.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn exhausted_source_is_dropped() {
        let (speaker, _captured) = capture_speaker();
        speaker.install_active_source(Box::new(ConstSource::new(2, 44_100, 0.5, Some(100))));
        assert!(wait_for(Duration::from_secs(2), || {
            !speaker.lock().has_active_source()
        }));
    }

    #[test]
    fn sink_init_failure_is_reported() {
        let err = Speaker::start(&SpeakerConfig::default(), |_| Err(anyhow!("no sound card")))
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("no sound card"));
    }

    #[test]
    fn mixer_pads_partial_cycle_with_silence() {
        let mut mixer = Mixer::default();
        mixer.active = Some(Box::new(ConstSource::new(2, 44_100, 1.0, Some(2))));
        let mut out = [9.0f32; 8];
        mixer.render(&mut out, 2);
        assert_eq!(out, [1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(mixer.active.is_none());
    }
}
