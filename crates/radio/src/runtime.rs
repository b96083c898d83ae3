//! Radio runtime: device listing and the interactive play loop.
//!
//! Control input arrives on one channel from two producers: a stdin reader thread and
//! the Ctrl-C handler. The main thread owns the player and applies commands in order.

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::Sender;
use radio_player::channel::Channel;
use radio_player::device;
use radio_player::player::RadioPlayer;
use radio_player::speaker::Speaker;
use radio_player::status::PlayerStatus;

use crate::channels;
use crate::config::RadioPlayConfig;

const HELP: &str = "commands: <number|name> switch channel, + louder, - softer, 0 reset volume, \
m mute, s stop, i status, l list, q quit";

#[derive(Clone, Debug, PartialEq)]
pub enum ControlCommand {
    Switch(usize),
    VolumeUp,
    VolumeDown,
    ResetVolume,
    Mute,
    Stop,
    Status,
    List,
    Quit,
}

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Play `config.channel` (or the first channel) and run the control loop until quit.
pub fn run_play(config: RadioPlayConfig) -> Result<()> {
    let channels = channels::registry();
    let first = match config.channel.as_deref() {
        Some(query) => channels::find(&channels, query)
            .ok_or_else(|| anyhow!("unknown channel: {query}"))?,
        None => 0,
    };

    let speaker = Speaker::open_default(&config.speaker, config.device.as_deref())
        .context("open output device")?;
    let mut player = RadioPlayer::new(Arc::new(speaker), config.player);

    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<ControlCommand>();
    let ctrlc_tx = cmd_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(ControlCommand::Quit);
    })
    .context("install Ctrl-C handler")?;
    spawn_stdin_reader(cmd_tx, channels.clone())?;

    switch_to(&mut player, &channels[first]);
    println!("{HELP}");

    for cmd in cmd_rx.iter() {
        match cmd {
            ControlCommand::Switch(index) => switch_to(&mut player, &channels[index]),
            ControlCommand::VolumeUp => player.increase_volume(),
            ControlCommand::VolumeDown => player.decrease_volume(),
            ControlCommand::ResetVolume => player.reset_volume(),
            ControlCommand::Mute => player.mute(),
            ControlCommand::Stop => player.stop(),
            ControlCommand::Status => println!("{}", format_status(&player.status())),
            ControlCommand::List => channels::print(&channels),
            ControlCommand::Quit => break,
        }
    }

    player.close();
    tracing::info!("bye");
    Ok(())
}

fn switch_to(player: &mut RadioPlayer, channel: &Channel) {
    if let Err(e) = player.play_channel(channel) {
        tracing::error!(channel = %channel.name, "playback failed: {e}");
    }
}

/// Parse one line of stdin input. Numbers and names resolve against `channels`.
pub fn parse_command(line: &str, channels: &[Channel]) -> Option<ControlCommand> {
    let line = line.trim();
    let cmd = match line {
        "+" => ControlCommand::VolumeUp,
        "-" => ControlCommand::VolumeDown,
        "0" => ControlCommand::ResetVolume,
        "m" => ControlCommand::Mute,
        "s" => ControlCommand::Stop,
        "i" => ControlCommand::Status,
        "l" => ControlCommand::List,
        "q" => ControlCommand::Quit,
        _ => ControlCommand::Switch(channels::find(channels, line)?),
    };
    Some(cmd)
}

fn spawn_stdin_reader(tx: Sender<ControlCommand>, channels: Vec<Channel>) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin-control".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line, &channels) {
                    Some(cmd) => {
                        if tx.send(cmd).is_err() {
                            return;
                        }
                    }
                    None => println!("unknown command: {}\n{HELP}", line.trim()),
                }
            }
            let _ = tx.send(ControlCommand::Quit);
        })
        .context("spawn stdin reader")?;
    Ok(())
}

pub fn format_status(status: &PlayerStatus) -> String {
    let Some(channel) = status.channel.as_deref() else {
        return "idle".to_string();
    };
    let state = if status.active { "playing" } else { "stopped" };
    let mut out = format!("{state}: {channel}");
    if let Some(codec) = status.codec.as_deref() {
        out.push_str(&format!(" [{codec}]"));
    }
    if let Some(rate) = status.source_rate {
        if status.resampling {
            out.push_str(&format!(" {rate} Hz -> {} Hz", status.output_rate));
        } else {
            out.push_str(&format!(" {rate} Hz"));
        }
    }
    out.push_str(&format!(", volume {:+.1}", status.level));
    if status.muted {
        out.push_str(" (muted)");
    }
    if let Some(reason) = status.end_reason {
        out.push_str(&format!(", stream ended: {reason:?}"));
    }
    out
}
