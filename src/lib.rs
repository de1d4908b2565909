//! # LAN Audio Receiver
//!
//! Plays a PCM audio stream multicast over the LAN on a local output device
//! with minimal added latency.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        Receiver (receiver.rs)                             │
//! │   start / stop / dispose / volume            start gate: one session      │
//! └───────────────┬──────────────────────────────────────────────────────────┘
//!                 │ spawns one worker per session
//!                 ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                  Session worker (network::session)                        │
//! │                                                                           │
//! │  UDP socket ──► protocol::decode ──► format unchanged? ──► jitter ring    │
//! │  239.255.77.77:4010                        │ no                 │         │
//! │  (network::udp)                            ▼                    │         │
//! │                                 stop sink, drop its ring,       │         │
//! │                                 open sink for new format        │         │
//! └─────────────────────────────────────────────────────────────────┼─────────┘
//!                                                                   │ pulled by
//!                                                                   ▼ device
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │           Output sink (audio::sink, audio::playback via cpal)             │
//! │   PCM → device samples, × volume gain, silence on underrun                │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The channel map carried in each header is decoded and exposed through
//! [`protocol::ChannelMap`], but the cpal backend plays channels in payload
//! order. A stream whose layout differs from the device's native layout may
//! come out of the wrong speakers.

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod receiver;

pub use error::{Error, Result};
pub use receiver::Receiver;

/// Application-wide constants
pub mod constants {
    use std::net::Ipv4Addr;

    /// Multicast group the stream source sends to
    pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 77, 77);

    /// Default UDP port of the stream
    pub const DEFAULT_PORT: u16 = 4010;

    /// Default jitter buffer window in milliseconds
    pub const DEFAULT_JITTER_BUFFER_MS: u32 = 500;

    /// Accepted jitter buffer window range in milliseconds
    pub const MIN_JITTER_BUFFER_MS: u32 = 20;
    pub const MAX_JITTER_BUFFER_MS: u32 = 2000;

    /// Volume before any caller sets one
    pub const DEFAULT_VOLUME: u8 = 100;

    /// Receive buffer size; larger than any standard datagram so oversized
    /// senders are not truncated
    pub const RECV_BUFFER_SIZE: usize = 65_536;
}
