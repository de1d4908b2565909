//! Receive loop of one playback session
//!
//! One worker thread per session blocks on the socket, decodes each datagram
//! in arrival order and feeds the payload to the jitter buffer. A header that
//! differs from the active format tears the output sink down and opens a new
//! one before the payload is queued.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::buffer::{jitter_buffer, BufferCounters, JitterWriter};
use crate::audio::sink::{OutputBackend, SinkHandle};
use crate::audio::volume::VolumeControl;
use crate::constants::RECV_BUFFER_SIZE;
use crate::error::AudioError;
use crate::protocol::{self, ChannelMap, StreamFormat};

/// What happened to one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Payload of this many bytes was queued
    Queued(usize),
    /// Format changed, the sink was rebuilt and this many bytes were queued
    Reconfigured(usize),
    /// Jitter buffer was full, payload dropped
    Overflow,
    /// Shorter than a header, dropped
    Malformed,
    /// Current format cannot be played, payload dropped
    Muted,
}

/// Per-session counters, updated by the worker and read by anyone
#[derive(Debug, Default)]
pub struct SessionStats {
    datagrams: AtomicU64,
    bytes_queued: AtomicU64,
    malformed: AtomicU64,
    muted: AtomicU64,
    format_changes: AtomicU64,
    receive_errors: AtomicU64,
    buffer: Arc<BufferCounters>,
}

impl SessionStats {
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            bytes_queued: self.bytes_queued.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            overflows: self.buffer.overflows(),
            underruns: self.buffer.underruns(),
            muted: self.muted.load(Ordering::Relaxed),
            format_changes: self.format_changes.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub datagrams: u64,
    pub bytes_queued: u64,
    pub malformed: u64,
    /// Payloads dropped because the jitter buffer was full
    pub overflows: u64,
    /// Device pulls that found less audio than asked for
    pub underruns: u64,
    pub muted: u64,
    pub format_changes: u64,
    pub receive_errors: u64,
}

/// A playing sink and the ring feeding it
struct Output {
    sink: Box<dyn SinkHandle>,
    buffer: JitterWriter,
}

/// Decoding and output state of a running session
pub struct StreamProcessor {
    backend: Arc<dyn OutputBackend>,
    volume: Arc<VolumeControl>,
    stats: Arc<SessionStats>,
    window: Duration,
    current: StreamFormat,
    output: Option<Output>,
}

impl StreamProcessor {
    /// Open the output at [`StreamFormat::INITIAL`] so playback can begin
    /// before the first header is seen.
    pub fn start(
        backend: Arc<dyn OutputBackend>,
        volume: Arc<VolumeControl>,
        window: Duration,
        stats: Arc<SessionStats>,
    ) -> Result<Self, AudioError> {
        let mut processor = Self {
            backend,
            volume,
            stats,
            window,
            current: StreamFormat::INITIAL,
            output: None,
        };
        processor.open_sink()?;
        Ok(processor)
    }

    pub fn format(&self) -> &StreamFormat {
        &self.current
    }

    /// Jitter buffer of the live output, if any
    pub fn buffer(&self) -> Option<&JitterWriter> {
        self.output.as_ref().map(|output| &output.buffer)
    }

    pub fn is_playing(&self) -> bool {
        self.output.is_some()
    }

    /// Process one raw datagram. Only output device failures are errors.
    pub fn handle_datagram(&mut self, datagram: &[u8]) -> Result<Outcome, AudioError> {
        let decoded = match protocol::decode(datagram) {
            Ok(decoded) => decoded,
            Err(e) => {
                SessionStats::bump(&self.stats.malformed, 1);
                tracing::debug!("Discarding datagram: {}", e);
                return Ok(Outcome::Malformed);
            }
        };

        let reconfigured = decoded.format != self.current;
        if reconfigured {
            self.switch_format(decoded.format)?;
        }

        let Some(output) = self.output.as_mut() else {
            SessionStats::bump(&self.stats.muted, 1);
            return Ok(Outcome::Muted);
        };

        let len = decoded.payload.len();
        if !output.buffer.push(decoded.payload) {
            return Ok(Outcome::Overflow);
        }
        SessionStats::bump(&self.stats.bytes_queued, len as u64);

        Ok(if reconfigured {
            Outcome::Reconfigured(len)
        } else {
            Outcome::Queued(len)
        })
    }

    fn switch_format(&mut self, format: StreamFormat) -> Result<(), AudioError> {
        tracing::info!("Stream format changed from {} to {}", self.current, format);
        SessionStats::bump(&self.stats.format_changes, 1);

        // Old sink and its ring go first so nothing queued under the old
        // format is played
        self.close_sink();
        self.current = format;

        if !format.is_playable() {
            tracing::warn!(
                "Cannot play {}, dropping audio until the next format change",
                format
            );
            return Ok(());
        }

        self.check_channel_map(&format);
        self.open_sink()
    }

    fn check_channel_map(&self, format: &StreamFormat) {
        tracing::debug!(
            "Channel layout: {:?}",
            format.channel_map.positions().collect::<Vec<_>>()
        );

        if self.backend.supports_channel_map() {
            return;
        }
        if ChannelMap::native_for(format.channel_count) != Some(format.channel_map) {
            tracing::warn!(
                "Channel map {} is not the native layout for {} channels; {} plays channels in order, so speakers may be misassigned",
                format.channel_map,
                format.channel_count,
                self.backend.name()
            );
        }
    }

    fn open_sink(&mut self) -> Result<(), AudioError> {
        let (buffer, reader) =
            jitter_buffer(self.window, &self.current, self.stats.buffer.clone());
        let mut sink = self.backend.initialize(&self.current, reader)?;
        self.volume.attach(sink.as_ref());

        if let Err(e) = sink.play() {
            self.volume.detach(&sink.gain());
            sink.stop();
            return Err(e);
        }

        tracing::info!(
            "Output opened on {} for {} at volume {} ({} byte buffer)",
            self.backend.name(),
            self.current,
            self.volume.get(),
            buffer.capacity()
        );
        self.output = Some(Output { sink, buffer });
        Ok(())
    }

    fn close_sink(&mut self) {
        if let Some(mut output) = self.output.take() {
            self.volume.detach(&output.sink.gain());
            output.sink.stop();
        }
    }

    /// Stop output and drop anything still queued
    pub fn shutdown(&mut self) {
        self.close_sink();
    }
}

impl Drop for StreamProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Everything a session worker needs, moved onto its thread
pub struct SessionContext {
    pub socket: Arc<UdpSocket>,
    pub cancel: Arc<AtomicBool>,
    pub backend: Arc<dyn OutputBackend>,
    pub volume: Arc<VolumeControl>,
    pub window: Duration,
    pub stats: Arc<SessionStats>,
}

/// Body of the session worker: open the output, then receive until the
/// cancel flag is raised. Device failures end the session early.
pub fn run(ctx: SessionContext) {
    let mut processor = match StreamProcessor::start(
        ctx.backend.clone(),
        ctx.volume.clone(),
        ctx.window,
        ctx.stats.clone(),
    ) {
        Ok(processor) => processor,
        Err(e) => {
            tracing::error!("Failed to open output, session ended: {}", e);
            return;
        }
    };

    match receive_loop(&ctx.socket, &ctx.cancel, &mut processor, &ctx.stats) {
        Ok(()) => tracing::info!("Session stopped"),
        Err(e) => tracing::error!("Output failed, session ended: {}", e),
    }

    processor.shutdown();
    tracing::debug!("Session totals: {:?}", ctx.stats.snapshot());
}

/// Receive datagrams in order until `cancel` is set.
///
/// Socket errors never end the loop; a receive that fails or returns because
/// the socket was woken is followed by a check of the cancel flag.
pub fn receive_loop(
    socket: &UdpSocket,
    cancel: &AtomicBool,
    processor: &mut StreamProcessor,
    stats: &SessionStats,
) -> Result<(), AudioError> {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    while !cancel.load(Ordering::Acquire) {
        match socket.recv(&mut buf) {
            Ok(len) => {
                if cancel.load(Ordering::Acquire) {
                    break;
                }
                SessionStats::bump(&stats.datagrams, 1);
                processor.handle_datagram(&buf[..len])?;
            }
            Err(e) => {
                if cancel.load(Ordering::Acquire) {
                    break;
                }
                SessionStats::bump(&stats.receive_errors, 1);
                tracing::debug!("Receive failed: {}", e);
            }
        }
    }

    Ok(())
}
