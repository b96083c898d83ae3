//! Radio: plays internet radio channels on the local sound card.
//!
//! The stream is fetched over HTTP, decoded with Symphonia, resampled with Rubato when
//! its rate differs from the output, scaled by the live volume, and played via CPAL.
//! While playing, stdin accepts channel switches and volume commands.

mod channels;
mod cli;
mod config;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,radio=info")),
        )
        .init();

    match &args.cmd {
        cli::Command::ListDevices => runtime::list_devices(),
        cli::Command::Channels => {
            channels::print(&channels::registry());
            Ok(())
        }
        cli::Command::Play { channel } => {
            runtime::run_play(config::RadioPlayConfig::from_args(&args, channel.clone()))
        }
    }
}
