use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "radio", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Audio queued ahead of the sound card, in milliseconds
    #[arg(long, default_value_t = 100)]
    pub latency_ms: u64,

    /// Output sample rate; streams at other rates are resampled
    #[arg(long, default_value_t = 44_100)]
    pub sample_rate: u32,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List output devices and exit
    ListDevices,

    /// Print the channel list and exit
    Channels,

    /// Play a channel and read control commands from stdin
    Play {
        /// Channel number (from `channels`) or name; defaults to the first channel
        channel: Option<String>,
    },
}
