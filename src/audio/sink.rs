//! Output sink abstraction
//!
//! A backend opens sinks bound to one [`StreamFormat`]. Changing format means
//! stopping the old sink and initializing a new one; sinks are never
//! reconfigured in place.

use std::sync::Arc;

use crate::audio::buffer::JitterReader;
use crate::audio::volume::{SinkGain, Volume};
use crate::error::AudioError;
use crate::protocol::StreamFormat;

/// Factory for output sinks on some audio device
pub trait OutputBackend: Send + Sync {
    /// Human readable backend name for logs
    fn name(&self) -> &str;

    /// Open a sink for `format` that drains `reader`. The sink is not
    /// playing until [`SinkHandle::play`] is called.
    fn initialize(
        &self,
        format: &StreamFormat,
        reader: JitterReader,
    ) -> Result<Box<dyn SinkHandle>, AudioError>;

    /// Whether sinks honour the stream's channel map. Backends that only
    /// play plain interleaved channels return false; channels of a
    /// non-native layout may then come out of the wrong speakers.
    fn supports_channel_map(&self) -> bool {
        false
    }
}

/// A live output bound to one format
pub trait SinkHandle: Send {
    fn format(&self) -> &StreamFormat;

    fn play(&mut self) -> Result<(), AudioError>;

    /// Stop output and release the device. Idempotent.
    fn stop(&mut self);

    /// Gain read by the device on every buffer write
    fn gain(&self) -> Arc<SinkGain>;

    /// Applied from the next buffer the device pulls
    fn set_volume(&self, volume: Volume) {
        self.gain().set(volume);
    }
}
