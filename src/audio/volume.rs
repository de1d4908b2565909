//! Output volume shared between callers and the live output sink

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::audio::sink::SinkHandle;
use crate::error::VolumeError;

/// Volume level in `0..=100`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Volume(u8);

impl Volume {
    pub const MUTE: Volume = Volume(0);
    pub const MAX: Volume = Volume(100);

    pub fn new(level: u8) -> Result<Self, VolumeError> {
        Self::try_from(i32::from(level))
    }

    pub fn level(self) -> u8 {
        self.0
    }

    /// Linear gain factor applied to samples
    pub fn gain(self) -> f32 {
        f32::from(self.0) / 100.0
    }
}

impl TryFrom<i32> for Volume {
    type Error = VolumeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .filter(|level| *level <= Self::MAX.0)
            .map(Volume)
            .ok_or(VolumeError::OutOfRange(value))
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::MAX
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Gain read by a sink's device callback on every buffer write
#[derive(Debug)]
pub struct SinkGain {
    level: AtomicU8,
}

impl SinkGain {
    pub fn new(volume: Volume) -> Arc<Self> {
        Arc::new(Self {
            level: AtomicU8::new(volume.level()),
        })
    }

    pub fn set(&self, volume: Volume) {
        self.level.store(volume.level(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> Volume {
        Volume(self.level.load(Ordering::Relaxed))
    }

    pub fn factor(&self) -> f32 {
        self.volume().gain()
    }
}

/// Process-scoped volume setting.
///
/// Outlives any single output sink: every new sink is attached here and
/// immediately receives the stored level, and [`set`](Self::set) reaches the
/// attached sink, if any.
#[derive(Debug)]
pub struct VolumeControl {
    level: AtomicU8,
    live: Mutex<Option<Arc<SinkGain>>>,
}

impl VolumeControl {
    pub fn new(initial: Volume) -> Self {
        Self {
            level: AtomicU8::new(initial.level()),
            live: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Volume {
        Volume(self.level.load(Ordering::Acquire))
    }

    pub fn set(&self, volume: Volume) {
        let live = self.live.lock();
        self.level.store(volume.level(), Ordering::Release);
        if let Some(gain) = live.as_ref() {
            gain.set(volume);
        }
    }

    /// Make `sink` the live output and tell it the stored level
    pub fn attach(&self, sink: &dyn SinkHandle) {
        let mut live = self.live.lock();
        sink.set_volume(self.get());
        *live = Some(sink.gain());
    }

    /// Forget `gain` if it is still the live one
    pub fn detach(&self, gain: &Arc<SinkGain>) {
        let mut live = self.live.lock();
        if live.as_ref().is_some_and(|current| Arc::ptr_eq(current, gain)) {
            *live = None;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.live.lock().is_some()
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new(Volume::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::jitter_buffer;
    use crate::audio::sink::testing::RecordingBackend;
    use crate::audio::sink::OutputBackend;
    use crate::protocol::StreamFormat;
    use std::time::Duration;

    fn open_sink(backend: &RecordingBackend) -> Box<dyn SinkHandle> {
        let (_writer, reader) = jitter_buffer(
            Duration::from_millis(100),
            &StreamFormat::INITIAL,
            Default::default(),
        );
        backend.initialize(&StreamFormat::INITIAL, reader).unwrap()
    }

    #[test]
    fn test_volume_bounds() {
        assert_eq!(Volume::try_from(-1), Err(VolumeError::OutOfRange(-1)));
        assert_eq!(Volume::try_from(101), Err(VolumeError::OutOfRange(101)));
        assert_eq!(Volume::try_from(0).unwrap(), Volume::MUTE);
        assert_eq!(Volume::try_from(100).unwrap(), Volume::MAX);
        assert!(Volume::new(200).is_err());
    }

    #[test]
    fn test_attach_retells_stored_level() {
        let control = VolumeControl::new(Volume::new(40).unwrap());
        let sink = open_sink(&RecordingBackend::default());
        assert_eq!(sink.gain().volume(), Volume::MAX);

        control.attach(sink.as_ref());
        assert_eq!(sink.gain().volume().level(), 40);
        assert!(control.is_attached());
    }

    #[test]
    fn test_set_reaches_live_sink_only() {
        let control = VolumeControl::default();
        let backend = RecordingBackend::default();
        let old_sink = open_sink(&backend);
        let new_sink = open_sink(&backend);
        let (old, new) = (old_sink.gain(), new_sink.gain());

        control.attach(old_sink.as_ref());
        control.attach(new_sink.as_ref());
        control.detach(&old);
        assert!(control.is_attached());

        control.set(Volume::new(25).unwrap());
        assert_eq!(new.volume().level(), 25);
        assert_eq!(old.volume(), Volume::MAX);

        control.detach(&new);
        control.set(Volume::MUTE);
        assert_eq!(control.get(), Volume::MUTE);
        assert_eq!(new.volume().level(), 25);
    }

    #[test]
    fn test_gain_factor() {
        let gain = SinkGain::new(Volume::new(50).unwrap());
        assert_eq!(gain.factor(), 0.5);
    }
}
