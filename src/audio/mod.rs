//! Audio output subsystem

pub mod buffer;
pub mod device;
pub mod playback;
pub mod sink;
pub mod volume;

pub use buffer::{jitter_buffer, BufferCounters, JitterReader, JitterWriter};
pub use device::{get_output_device, list_output_devices, OutputDeviceInfo};
pub use playback::CpalBackend;
pub use sink::{OutputBackend, SinkHandle};
pub use volume::{SinkGain, Volume, VolumeControl};
