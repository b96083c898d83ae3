//! Errors surfaced by [`crate::player::RadioPlayer::play_channel`].

/// Result type alias for radio playback operations.
pub type Result<T> = std::result::Result<T, RadioError>;

/// Failures while starting a channel.
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    /// The stream URL could not be reached or answered with a non-success status.
    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    /// The response body is not audio we can decode.
    #[error("decode error: {reason}")]
    Decode { reason: String },
}

impl RadioError {
    pub(crate) fn network(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::Network {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn decode(reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            reason: reason.to_string(),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

impl From<symphonia::core::errors::Error> for RadioError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        Self::decode(err)
    }
}
