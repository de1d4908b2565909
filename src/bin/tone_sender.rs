//! Test Tone Sender
//!
//! Streams a sine tone to the multicast group in the receiver's wire format,
//! for checking a receiver end to end.
//!
//! Usage: `tone_sender [sample_rate] [bit_width] [channels] [frequency_hz]`

use anyhow::{bail, Context, Result};
use std::f32::consts::PI;
use std::net::{SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_audio_receiver::{
    constants::{DEFAULT_MULTICAST_GROUP, DEFAULT_PORT},
    protocol::{encode_header, ChannelMap, StreamFormat, MAX_PAYLOAD},
};

fn arg<T: std::str::FromStr>(index: usize, default: T) -> Result<T> {
    match std::env::args().nth(index) {
        Some(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid argument {}: {}", index, value)),
        None => Ok(default),
    }
}

/// Encode one sample in `[-1.0, 1.0]` as little-endian PCM of `bit_width`
fn push_sample(out: &mut Vec<u8>, value: f32, bit_width: u8) {
    match bit_width {
        8 => out.push(((value * 127.0) as i16 + 128) as u8),
        16 => out.extend_from_slice(&((value * 32_767.0) as i16).to_le_bytes()),
        24 => out.extend_from_slice(&((value * 8_388_607.0) as i32).to_le_bytes()[..3]),
        _ => out.extend_from_slice(&((f64::from(value) * 2_147_483_647.0) as i32).to_le_bytes()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let channel_count: u8 = arg(3, 2)?;
    let format = StreamFormat {
        sample_rate: arg(1, 44_100)?,
        bit_width: arg(2, 16)?,
        channel_count,
        channel_map: ChannelMap::native_for(channel_count)
            .unwrap_or(ChannelMap(((1u32 << channel_count.min(16)) - 1) as u16)),
    };
    let frequency: f32 = arg(4, 440.0)?;

    if !format.is_playable() {
        bail!("unplayable format {}", format);
    }
    let header = encode_header(&format)
        .with_context(|| format!("{} Hz is not a multiple of 44.1 or 48 kHz", format.sample_rate))?;

    let frame_bytes = format.bytes_per_frame();
    let frames_per_packet = MAX_PAYLOAD / frame_bytes;
    let packet_duration =
        Duration::from_secs_f64(frames_per_packet as f64 / f64::from(format.sample_rate));

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_multicast_ttl_v4(1)?;
    let target = SocketAddrV4::new(DEFAULT_MULTICAST_GROUP, DEFAULT_PORT);

    tracing::info!(
        "Sending {} Hz tone as {} to {} ({} frames per packet)",
        frequency,
        format,
        target,
        frames_per_packet
    );

    let mut phase = 0.0f32;
    let step = 2.0 * PI * frequency / format.sample_rate as f32;
    let mut packet = Vec::with_capacity(header.len() + frames_per_packet * frame_bytes);
    let mut next_send = Instant::now();
    let mut sent: u64 = 0;

    loop {
        packet.clear();
        packet.extend_from_slice(&header);
        for _ in 0..frames_per_packet {
            let value = phase.sin() * 0.5;
            for _ in 0..format.channel_count {
                push_sample(&mut packet, value, format.bit_width);
            }
            phase = (phase + step) % (2.0 * PI);
        }

        if let Err(e) = socket.send_to(&packet, target) {
            tracing::warn!("Failed to send packet: {}", e);
        }
        sent += 1;
        if sent % 1000 == 0 {
            tracing::info!("Sent {} packets", sent);
        }

        next_send += packet_duration;
        tokio::time::sleep_until(next_send.into()).await;
    }
}
