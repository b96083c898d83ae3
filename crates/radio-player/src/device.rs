//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing a stream config close to the speaker's fixed rate and latency

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default device when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Pick the output config closest to `target_rate` with `channels` channels.
///
/// Configs supporting the exact rate win; then matching channel counts; then the
/// preferred sample format. If the device cannot run at `target_rate`, the nearest
/// supported rate is used and the speaker reports it.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();

    let mut best: Option<(u32, bool, u8, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let distance = rate.abs_diff(target_rate);
        let channel_match = range.channels() == channels;
        let format_rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_dist, b_chan, b_rank, _)) => {
                is_better_candidate(distance, channel_match, format_rank, *b_dist, *b_chan, *b_rank)
            }
        };
        if replace {
            best = Some((distance, channel_match, format_rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|b| b.3).ok_or_else(|| anyhow!("No supported output configs"))
}

/// Pick a fixed callback buffer size for `latency_frames`, clamped to what the device
/// advertises. Returns `None` when the device only supports its default.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    latency_frames: usize,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            // Half the latency per callback keeps one buffer in flight while the next fills.
            let wanted = (latency_frames / 2).max(1) as u32;
            Some(cpal::BufferSize::Fixed(wanted.clamp(*min, (*max).max(*min))))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print available output devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(
    distance: u32,
    channel_match: bool,
    format_rank: u8,
    best_distance: u32,
    best_channel_match: bool,
    best_rank: u8,
) -> bool {
    if distance != best_distance {
        distance < best_distance
    } else if channel_match != best_channel_match {
        channel_match
    } else {
        format_rank < best_rank
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
