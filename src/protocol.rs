//! Wire format of the multicast audio stream
//!
//! Every datagram carries a fixed 5-byte header followed by raw interleaved
//! little-endian PCM:
//!
//! ```text
//! ┌──────────┬───────────┬──────────┬─────────────┬─────────────┬──────────────┐
//! │ 0: rate  │ 1: bits   │ 2: chans │ 3: map low  │ 4: map high │ 5..: PCM     │
//! └──────────┴───────────┴──────────┴─────────────┴─────────────┴──────────────┘
//! ```
//!
//! The rate byte selects a base rate (bit 7 set: 44.1 kHz, clear: 48 kHz) and
//! a multiplier in its low seven bits. The decoder forwards whatever the
//! header encodes; playability is judged separately by
//! [`StreamFormat::is_playable`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Size of the format header in bytes
pub const HEADER_SIZE: usize = 5;

/// Largest PCM payload a standard sender emits per datagram
pub const MAX_PAYLOAD: usize = 1152;

const BASE_RATE_44K: u32 = 44_100;
const BASE_RATE_48K: u32 = 48_000;
const RATE_44K_FLAG: u8 = 0x80;

/// Decode the rate selector byte into a sample rate in Hz.
///
/// A selector of `0` or `128` yields 0 Hz, which is not playable.
pub fn decode_rate(selector: u8) -> u32 {
    let base = if selector >= RATE_44K_FLAG {
        BASE_RATE_44K
    } else {
        BASE_RATE_48K
    };
    base * u32::from(selector % 128)
}

/// Encode a sample rate as a selector byte, if it is a multiple of either
/// base rate that fits the seven-bit multiplier.
pub fn encode_rate(sample_rate: u32) -> Option<u8> {
    let multiplier = |base: u32| {
        if sample_rate % base != 0 {
            return None;
        }
        u8::try_from(sample_rate / base)
            .ok()
            .filter(|m| (1..128).contains(m))
    };

    multiplier(BASE_RATE_44K)
        .map(|m| m | RATE_44K_FLAG)
        .or_else(|| multiplier(BASE_RATE_48K))
}

/// Speaker position bits of the channel map, lowest bit first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeakerPosition {
    FrontLeft,
    FrontRight,
    FrontCenter,
    Lfe,
    BackLeft,
    BackRight,
    FrontLeftOfCenter,
    FrontRightOfCenter,
    BackCenter,
    SideLeft,
    SideRight,
    /// Any bit above `SideRight`
    Other(u8),
}

impl SpeakerPosition {
    fn from_bit(bit: u8) -> Self {
        match bit {
            0 => Self::FrontLeft,
            1 => Self::FrontRight,
            2 => Self::FrontCenter,
            3 => Self::Lfe,
            4 => Self::BackLeft,
            5 => Self::BackRight,
            6 => Self::FrontLeftOfCenter,
            7 => Self::FrontRightOfCenter,
            8 => Self::BackCenter,
            9 => Self::SideLeft,
            10 => Self::SideRight,
            other => Self::Other(other),
        }
    }
}

/// Channel layout bitmask as sent by the stream source.
///
/// Channels in the payload appear in ascending bit order of the mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChannelMap(pub u16);

impl ChannelMap {
    pub const MONO: ChannelMap = ChannelMap(0x0004);
    pub const STEREO: ChannelMap = ChannelMap(0x0003);
    pub const QUAD: ChannelMap = ChannelMap(0x0033);
    pub const SURROUND_5_1: ChannelMap = ChannelMap(0x003F);
    pub const SURROUND_7_1: ChannelMap = ChannelMap(0x063F);

    /// Combine the two header bytes into a map
    pub fn from_bytes(low: u8, high: u8) -> Self {
        Self(u16::from(high) << 8 | u16::from(low))
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// Speaker positions present in the map, in payload order
    pub fn positions(self) -> impl Iterator<Item = SpeakerPosition> {
        (0..16u8)
            .filter(move |bit| self.0 & (1 << bit) != 0)
            .map(SpeakerPosition::from_bit)
    }

    /// Layout a plain interleaved output device assumes for `channels`
    pub fn native_for(channels: u8) -> Option<ChannelMap> {
        match channels {
            1 => Some(Self::MONO),
            2 => Some(Self::STEREO),
            4 => Some(Self::QUAD),
            6 => Some(Self::SURROUND_5_1),
            8 => Some(Self::SURROUND_7_1),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// PCM sample encodings the receiver can render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// 8-bit unsigned
    U8,
    /// 16-bit signed little-endian
    I16,
    /// 24-bit signed little-endian, packed
    I24,
    /// 32-bit signed little-endian
    I32,
}

impl SampleEncoding {
    pub fn from_bit_width(bits: u8) -> Option<Self> {
        match bits {
            8 => Some(Self::U8),
            16 => Some(Self::I16),
            24 => Some(Self::I24),
            32 => Some(Self::I32),
            _ => None,
        }
    }

    /// Bytes per sample
    pub fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 => 2,
            Self::I24 => 3,
            Self::I32 => 4,
        }
    }

    /// Convert one sample to `[-1.0, 1.0)`. `bytes` must hold at least
    /// [`bytes`](Self::bytes) bytes.
    pub fn to_f32(self, bytes: &[u8]) -> f32 {
        match self {
            Self::U8 => (f32::from(bytes[0]) - 128.0) / 128.0,
            Self::I16 => f32::from(i16::from_le_bytes([bytes[0], bytes[1]])) / 32_768.0,
            Self::I24 => {
                let raw = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
                raw as f32 / 8_388_608.0
            }
            Self::I32 => {
                let raw = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                raw as f32 / 2_147_483_648.0
            }
        }
    }
}

/// Format of the PCM payload, taken from a datagram header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub bit_width: u8,
    pub channel_count: u8,
    pub channel_map: ChannelMap,
}

impl StreamFormat {
    /// Format the output is opened with before the first datagram arrives
    pub const INITIAL: StreamFormat = StreamFormat {
        sample_rate: 44_100,
        bit_width: 16,
        channel_count: 2,
        channel_map: ChannelMap::STEREO,
    };

    pub fn sample_encoding(&self) -> Option<SampleEncoding> {
        SampleEncoding::from_bit_width(self.bit_width)
    }

    /// Whether an output device could be opened for this format at all
    pub fn is_playable(&self) -> bool {
        self.sample_encoding().is_some() && self.sample_rate > 0 && self.channel_count > 0
    }

    /// Bytes per interleaved frame, 0 for unknown bit widths
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_encoding()
            .map(|e| e.bytes() * usize::from(self.channel_count))
            .unwrap_or(0)
    }

    /// Whole frames' worth of bytes covering `duration`
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frames = u128::from(self.sample_rate) * duration.as_millis() / 1000;
        frames as usize * self.bytes_per_frame()
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {}-bit, {} ch (map {})",
            self.sample_rate, self.bit_width, self.channel_count, self.channel_map
        )
    }
}

/// A decoded datagram borrowing its payload from the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datagram<'a> {
    pub format: StreamFormat,
    pub payload: &'a [u8],
}

/// Split a raw datagram into its format and PCM payload
pub fn decode(datagram: &[u8]) -> Result<Datagram<'_>, ProtocolError> {
    if datagram.len() < HEADER_SIZE {
        return Err(ProtocolError::Truncated(datagram.len()));
    }

    let format = StreamFormat {
        sample_rate: decode_rate(datagram[0]),
        bit_width: datagram[1],
        channel_count: datagram[2],
        channel_map: ChannelMap::from_bytes(datagram[3], datagram[4]),
    };

    Ok(Datagram {
        format,
        payload: &datagram[HEADER_SIZE..],
    })
}

/// Build the header for `format`, if its rate is representable
pub fn encode_header(format: &StreamFormat) -> Option<[u8; HEADER_SIZE]> {
    let [low, high] = format.channel_map.bits().to_le_bytes();
    Some([
        encode_rate(format.sample_rate)?,
        format.bit_width,
        format.channel_count,
        low,
        high,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rate_selector_examples() {
        assert_eq!(decode_rate(129), 44_100);
        assert_eq!(decode_rate(1), 48_000);
        assert_eq!(decode_rate(130), 88_200);
        assert_eq!(decode_rate(4), 192_000);
        assert_eq!(decode_rate(0), 0);
        assert_eq!(decode_rate(128), 0);
    }

    #[test]
    fn test_decode_header_and_payload() {
        let payload = [0x10u8, 0x20, 0x30, 0x40];
        let mut datagram = vec![129, 16, 2, 0x03, 0x00];
        datagram.extend_from_slice(&payload);

        let decoded = decode(&datagram).unwrap();
        assert_eq!(
            decoded.format,
            StreamFormat {
                sample_rate: 44_100,
                bit_width: 16,
                channel_count: 2,
                channel_map: ChannelMap(0x0003),
            }
        );
        assert_eq!(decoded.payload, &payload);
    }

    #[test]
    fn test_channel_map_byte_order() {
        let decoded = decode(&[1, 24, 8, 0x3F, 0x06]).unwrap();
        assert_eq!(decoded.format.channel_map, ChannelMap::SURROUND_7_1);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_short_datagram_is_rejected() {
        assert_eq!(decode(&[129, 16, 2]), Err(ProtocolError::Truncated(3)));
        assert_eq!(decode(&[]), Err(ProtocolError::Truncated(0)));
    }

    #[test]
    fn test_decoder_forwards_unplayable_formats() {
        let decoded = decode(&[0, 12, 0, 0, 0]).unwrap();
        assert_eq!(decoded.format.sample_rate, 0);
        assert_eq!(decoded.format.bit_width, 12);
        assert!(!decoded.format.is_playable());
        assert_eq!(decoded.format.bytes_per_frame(), 0);
    }

    #[test]
    fn test_channel_positions() {
        let positions: Vec<_> = ChannelMap::SURROUND_5_1.positions().collect();
        assert_eq!(
            positions,
            vec![
                SpeakerPosition::FrontLeft,
                SpeakerPosition::FrontRight,
                SpeakerPosition::FrontCenter,
                SpeakerPosition::Lfe,
                SpeakerPosition::BackLeft,
                SpeakerPosition::BackRight,
            ]
        );

        let odd: Vec<_> = ChannelMap(0x8200).positions().collect();
        assert_eq!(
            odd,
            vec![SpeakerPosition::SideLeft, SpeakerPosition::Other(15)]
        );
    }

    #[test]
    fn test_bytes_for_duration() {
        let format = StreamFormat::INITIAL;
        assert_eq!(format.bytes_per_frame(), 4);
        assert_eq!(format.bytes_for(Duration::from_millis(500)), 22_050 * 4);

        let wide = StreamFormat {
            sample_rate: 48_000,
            bit_width: 24,
            channel_count: 6,
            channel_map: ChannelMap::SURROUND_5_1,
        };
        assert_eq!(wide.bytes_per_frame(), 18);
        assert_eq!(wide.bytes_for(Duration::from_millis(10)), 480 * 18);
    }

    #[test]
    fn test_sample_conversion() {
        assert_eq!(SampleEncoding::U8.to_f32(&[128]), 0.0);
        assert_eq!(SampleEncoding::U8.to_f32(&[0]), -1.0);
        assert_eq!(SampleEncoding::I16.to_f32(&[0x00, 0x80]), -1.0);
        assert_eq!(SampleEncoding::I16.to_f32(&[0x00, 0x40]), 0.5);
        assert_eq!(SampleEncoding::I24.to_f32(&[0x00, 0x00, 0x80]), -1.0);
        assert_eq!(SampleEncoding::I24.to_f32(&[0x00, 0x00, 0x40]), 0.5);
        assert_eq!(SampleEncoding::I32.to_f32(&[0, 0, 0, 0xC0]), -0.5);
    }

    #[test]
    fn test_encode_rate_prefers_44k_family() {
        assert_eq!(encode_rate(44_100), Some(129));
        assert_eq!(encode_rate(48_000), Some(1));
        assert_eq!(encode_rate(96_000), Some(2));
        assert_eq!(encode_rate(22_050), None);
        assert_eq!(encode_rate(0), None);
    }

    proptest! {
        #[test]
        fn prop_decode_rate_formula(selector in any::<u8>()) {
            let base = if selector >= 128 { 44_100 } else { 48_000 };
            prop_assert_eq!(decode_rate(selector), base * u32::from(selector % 128));
        }

        #[test]
        fn prop_header_fields_survive(
            selector in 1u8..=255,
            bit_width in any::<u8>(),
            channel_count in any::<u8>(),
            map in any::<u16>(),
            payload in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            prop_assume!(selector != 128);
            let format = StreamFormat {
                sample_rate: decode_rate(selector),
                bit_width,
                channel_count,
                channel_map: ChannelMap(map),
            };
            let mut datagram = encode_header(&format).unwrap().to_vec();
            datagram.extend_from_slice(&payload);

            let decoded = decode(&datagram).unwrap();
            prop_assert_eq!(decoded.format, format);
            prop_assert_eq!(decoded.payload, &payload[..]);
        }

        #[test]
        fn prop_short_datagrams_never_decode(bytes in proptest::collection::vec(any::<u8>(), 0..HEADER_SIZE)) {
            prop_assert!(decode(&bytes).is_err());
        }
    }
}
