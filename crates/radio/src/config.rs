use std::time::Duration;

use radio_player::config::{PlayerConfig, SpeakerConfig};

use crate::cli::Args;

#[derive(Clone, Debug)]
pub struct RadioPlayConfig {
    pub device: Option<String>,
    pub channel: Option<String>,
    pub speaker: SpeakerConfig,
    pub player: PlayerConfig,
}

impl RadioPlayConfig {
    pub fn from_args(args: &Args, channel: Option<String>) -> Self {
        Self {
            device: normalize_device_name(args.device.clone()),
            channel,
            speaker: SpeakerConfig {
                sample_rate: args.sample_rate,
                buffer_latency: Duration::from_millis(args.latency_ms),
                ..SpeakerConfig::default()
            },
            player: PlayerConfig::default(),
        }
    }
}

pub fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
