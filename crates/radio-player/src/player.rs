//! Radio player: channel switching and live volume control.
//!
//! A session is one channel's pipeline, from the HTTP body through the decoder, an
//! optional resampler and a volume stage, installed on the [`Speaker`]. Everything up
//! to the volume stage runs on the session's own decode thread, so control calls never
//! wait on the network once a channel has started. The player keeps at most one session
//! and carries its volume level over to the next one.

use std::sync::Arc;

use crate::channel::Channel;
use crate::config::PlayerConfig;
use crate::decode;
use crate::error::Result;
use crate::frame::FrameSource;
use crate::http_stream::{OpenedStream, StreamAcquirer, StreamHandle};
use crate::prefetch;
use crate::resample::{ResampleConfig, Resampled, needs_resampling};
use crate::speaker::Speaker;
use crate::status::{PlaybackEndReason, PlayerStatus, SessionEnd};
use crate::volume::{Volume, VolumeControl, VolumeState};

/// What a session was built from. Kept after the session ends for status reporting.
#[derive(Clone, Debug)]
struct SessionInfo {
    channel: String,
    codec: Option<String>,
    source_rate: u32,
    resampling: bool,
    end: SessionEnd,
}

struct Session {
    info: SessionInfo,
    volume: VolumeControl,
}

/// Plays one channel at a time on a shared [`Speaker`].
pub struct RadioPlayer {
    speaker: Arc<Speaker>,
    acquirer: StreamAcquirer,
    config: PlayerConfig,
    stream: Option<StreamHandle>,
    session: Option<Session>,
    last: Option<SessionInfo>,
    level: f64,
}

impl RadioPlayer {
    pub fn new(speaker: Arc<Speaker>, config: PlayerConfig) -> Self {
        Self {
            speaker,
            acquirer: StreamAcquirer::new(&config),
            config,
            stream: None,
            session: None,
            last: None,
            level: 0.0,
        }
    }

    /// Stop whatever is playing and start `channel`.
    ///
    /// The new session starts unmuted at the previous session's level. On error nothing
    /// plays and the previous session stays stopped.
    pub fn play_channel(&mut self, channel: &Channel) -> Result<()> {
        self.close_stream();
        self.speaker.clear_active_source();
        self.end_session();

        let OpenedStream {
            handle,
            body,
            hint,
            content_type,
        } = self.acquirer.open(&channel.url).inspect_err(|e| {
            tracing::warn!(channel = %channel.name, "failed to open stream: {e}");
        })?;

        let end = SessionEnd::default();
        let decoded = match decode::open_stream(Box::new(body), &hint, end.clone()) {
            Ok(decoded) => decoded,
            Err(e) => {
                handle.close();
                tracing::warn!(
                    channel = %channel.name,
                    content_type = content_type.as_deref().unwrap_or(""),
                    "failed to decode stream: {e}"
                );
                return Err(e);
            }
        };

        let source_rate = decoded.sample_rate();
        let output_rate = self.speaker.sample_rate();
        let codec = decoded.codec().map(str::to_string);
        let resampling = needs_resampling(source_rate, output_rate);

        let source: Box<dyn FrameSource> = if resampling {
            tracing::info!(
                from_hz = source_rate,
                to_hz = output_rate,
                "sample rate mismatch, resampling"
            );
            let cfg = ResampleConfig {
                quality: self.config.resample_quality,
                chunk_frames: self.config.resample_chunk_frames,
            };
            match Resampled::new(decoded, output_rate, cfg) {
                Ok(stage) => Box::new(stage),
                Err(e) => {
                    handle.close();
                    return Err(e);
                }
            }
        } else {
            Box::new(decoded)
        };

        let feed = prefetch::spawn(source, self.config.session_buffer_frames(output_rate));
        let volume = VolumeControl::new(VolumeState::new(self.level));
        let stage = Volume::new(feed, volume.clone());

        tracing::info!(
            channel = %channel.name,
            url = %channel.url,
            codec = codec.as_deref().unwrap_or("unknown"),
            rate_hz = source_rate,
            level = self.level,
            "playing"
        );

        self.speaker.install_active_source(Box::new(stage));
        self.stream = Some(handle);
        self.session = Some(Session {
            info: SessionInfo {
                channel: channel.name.clone(),
                codec,
                source_rate,
                resampling,
                end,
            },
            volume,
        });
        Ok(())
    }

    /// Silence output and end the session. The byte stream stays open until
    /// [`RadioPlayer::close`] or the next [`RadioPlayer::play_channel`].
    pub fn stop(&mut self) {
        let was_playing = self.speaker.clear_active_source();
        if self.session.is_some() || was_playing {
            tracing::info!("stopped");
        }
        self.end_session();
    }

    /// Toggle mute on the current session.
    pub fn mute(&self) {
        if let Some(session) = &self.session {
            let muted = session.volume.toggle_mute();
            tracing::debug!(muted, "mute toggled");
        }
    }

    pub fn increase_volume(&self) {
        self.adjust_volume(self.config.volume_step);
    }

    pub fn decrease_volume(&self) {
        self.adjust_volume(-self.config.volume_step);
    }

    /// Back to unity gain.
    pub fn reset_volume(&self) {
        if let Some(session) = &self.session {
            session.volume.reset();
            tracing::debug!(level = 0.0, "volume reset");
        }
    }

    /// Release the byte stream, if any, and end the session.
    pub fn close(&mut self) {
        self.close_stream();
        self.end_session();
    }

    /// Current volume, or `None` when no session is active.
    pub fn volume(&self) -> Option<VolumeState> {
        self.session.as_ref().map(|s| s.volume.snapshot())
    }

    pub fn status(&self) -> PlayerStatus {
        let info = self.current_info();
        let volume = self.volume();
        PlayerStatus {
            channel: info.map(|i| i.channel.clone()),
            codec: info.and_then(|i| i.codec.clone()),
            source_rate: info.map(|i| i.source_rate),
            output_rate: self.speaker.sample_rate(),
            resampling: info.is_some_and(|i| i.resampling),
            level: volume.map_or(self.level, |v| v.level),
            muted: volume.is_some_and(|v| v.muted),
            active: self.speaker.lock().has_active_source(),
            end_reason: info.and_then(|i| i.end.get()),
        }
    }

    fn adjust_volume(&self, delta: f64) {
        if let Some(session) = &self.session {
            let level = session.volume.adjust(delta);
            tracing::debug!(level, "volume changed");
        }
    }

    fn current_info(&self) -> Option<&SessionInfo> {
        self.session
            .as_ref()
            .map(|s| &s.info)
            .or(self.last.as_ref())
    }

    fn close_stream(&mut self) {
        let Some(handle) = self.stream.take() else {
            return;
        };
        // Recorded before closing so the decoder's EOF on its next read loses.
        if let Some(info) = self.current_info() {
            info.end.record(PlaybackEndReason::Closed);
        }
        handle.close();
    }

    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            self.level = session.volume.snapshot().level;
            self.last = Some(session.info);
        }
    }
}

impl Drop for RadioPlayer {
    fn drop(&mut self) {
        self.close_stream();
        self.speaker.clear_active_source();
    }
}
