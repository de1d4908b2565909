//! Multicast Audio Receiver
//!
//! Plays the multicast audio stream on a local output device until Ctrl+C.
//!
//! Usage: `receiver [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_audio_receiver::{audio::list_output_devices, config::ReceiverConfig, Receiver};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting multicast audio receiver");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(ReceiverConfig::default_path);

    let config = match &config_path {
        Some(path) => ReceiverConfig::load_or_default(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ReceiverConfig::default(),
    };
    config.validate()?;

    println!("\n=== Available Output Devices ===");
    for device in list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    tracing::info!(
        "Listening on {}:{} (buffer {} ms, volume {})",
        config.network.multicast_group,
        config.network.port,
        config.playback.buffer_ms,
        config.playback.initial_volume
    );

    let receiver = Receiver::new(config);
    receiver.try_start()?;

    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl+C")?;
                break;
            }
            _ = stats_interval.tick() => {
                if let Some(stats) = receiver.stats() {
                    tracing::info!(
                        "Receiver stats: {} datagrams, {} bytes queued, {} malformed, {} dropped, {} underruns, {} format changes",
                        stats.datagrams,
                        stats.bytes_queued,
                        stats.malformed,
                        stats.overflows,
                        stats.underruns,
                        stats.format_changes
                    );
                }
                if receiver.is_active() && !receiver.is_receiving() {
                    tracing::warn!("Session ended, restarting");
                    receiver.stop();
                    receiver.start();
                }
            }
        }
    }

    tracing::info!("Shutting down");
    tokio::task::spawn_blocking(move || receiver.dispose()).await?;
    Ok(())
}
