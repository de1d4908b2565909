//! Jitter buffer between the receive loop and the output device
//!
//! A lock-free single-producer single-consumer byte ring. The receive loop
//! owns the [`JitterWriter`] and appends whole datagram payloads; the device
//! callback owns the [`JitterReader`] and drains at its own pace, so neither
//! side ever waits on the other. The window is bounded in time: when it is
//! full a new payload is dropped outright.
//!
//! Every output sink gets a fresh ring. Nothing queued under an old format
//! can reach a sink opened for a new one.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::protocol::{StreamFormat, MAX_PAYLOAD};

/// Overflow and underrun counters, shared by every ring of a session
#[derive(Debug, Default)]
pub struct BufferCounters {
    overflows: AtomicU64,
    underruns: AtomicU64,
}

impl BufferCounters {
    /// Payloads dropped because the window was full
    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Device reads that came back short
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// Capacity in bytes for `window` of `format`.
///
/// Whole frames only, and never smaller than one maximal datagram or nothing
/// would ever fit.
pub fn capacity_for(window: Duration, format: &StreamFormat) -> usize {
    let frame_size = format.bytes_per_frame().max(1);
    let floor = MAX_PAYLOAD.div_ceil(frame_size) * frame_size;
    format.bytes_for(window).max(floor)
}

/// Create an empty ring holding `window` worth of audio in `format`
pub fn jitter_buffer(
    window: Duration,
    format: &StreamFormat,
    counters: Arc<BufferCounters>,
) -> (JitterWriter, JitterReader) {
    let capacity = capacity_for(window, format);
    let (producer, consumer) = HeapRb::<u8>::new(capacity).split();

    let writer = JitterWriter {
        producer,
        capacity,
        counters: counters.clone(),
    };
    let reader = JitterReader {
        consumer,
        frame_size: format.bytes_per_frame().max(1),
        counters,
    };
    (writer, reader)
}

/// Network side of the ring
pub struct JitterWriter {
    producer: HeapProd<u8>,
    capacity: usize,
    counters: Arc<BufferCounters>,
}

impl JitterWriter {
    /// Append a payload. Returns false, dropping the whole payload, when it
    /// does not fit into the remaining window.
    pub fn push(&mut self, payload: &[u8]) -> bool {
        if self.producer.vacant_len() < payload.len() {
            self.counters.overflows.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.producer.push_slice(payload);
        true
    }

    /// Bytes queued and not yet drained
    pub fn len(&self) -> usize {
        self.producer.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Device side of the ring
pub struct JitterReader {
    consumer: HeapCons<u8>,
    frame_size: usize,
    counters: Arc<BufferCounters>,
}

impl JitterReader {
    /// Drain up to `out.len()` bytes, rounded down to whole frames.
    /// Returns the number of bytes written; a short read counts as underrun.
    pub fn pop_into(&mut self, out: &mut [u8]) -> usize {
        let available = self.consumer.occupied_len().min(out.len());
        let count = available - available % self.frame_size;
        let read = self.consumer.pop_slice(&mut out[..count]);

        if read < out.len() {
            self.counters.underruns.fetch_add(1, Ordering::Relaxed);
        }
        read
    }
}
