use std::sync::{Arc, OnceLock};

/// Why a session's frame sequence stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackEndReason {
    /// The server ended the stream.
    Eof,
    /// A read or decode error cut the stream short.
    Error,
    /// The stream was closed by the player.
    Closed,
}

/// Write-once end marker shared by a session's decoder and its player.
///
/// The first recorded reason wins.
#[derive(Clone, Debug, Default)]
pub struct SessionEnd(Arc<OnceLock<PlaybackEndReason>>);

impl SessionEnd {
    /// Record `reason`; returns `false` if a reason was already set.
    pub fn record(&self, reason: PlaybackEndReason) -> bool {
        self.0.set(reason).is_ok()
    }

    pub fn get(&self) -> Option<PlaybackEndReason> {
        self.0.get().copied()
    }
}

/// Snapshot of the player returned by [`crate::player::RadioPlayer::status`].
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerStatus {
    /// Name of the channel of the current (or last) session.
    pub channel: Option<String>,
    /// Source codec name (for example MP3).
    pub codec: Option<String>,
    /// Decoded sample rate before resampling.
    pub source_rate: Option<u32>,
    /// Output device sample rate.
    pub output_rate: u32,
    /// Whether the current session is resampled.
    pub resampling: bool,
    /// Volume level carried across sessions.
    pub level: f64,
    /// Mute flag of the current session.
    pub muted: bool,
    /// Whether the output device currently has a source installed.
    pub active: bool,
    /// Why the last session's stream stopped, if it has.
    pub end_reason: Option<PlaybackEndReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_end_reason_wins() {
        let end = SessionEnd::default();
        assert!(end.get().is_none());
        assert!(end.record(PlaybackEndReason::Closed));
        assert!(!end.record(PlaybackEndReason::Eof));
        assert_eq!(end.get(), Some(PlaybackEndReason::Closed));
    }

    #[test]
    fn clones_share_the_marker() {
        let end = SessionEnd::default();
        let decoder_side = end.clone();
        decoder_side.record(PlaybackEndReason::Error);
        assert_eq!(end.get(), Some(PlaybackEndReason::Error));
    }
}
