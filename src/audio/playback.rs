//! cpal-backed output sinks
//!
//! `cpal::Stream` cannot leave the thread that built it, so every sink runs
//! a small playback thread owning the stream. The thread reports whether the
//! stream could be opened before [`OutputBackend::initialize`] returns and
//! then waits for play/stop commands.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::buffer::JitterReader;
use crate::audio::device::get_output_device;
use crate::audio::sink::{OutputBackend, SinkHandle};
use crate::audio::volume::{SinkGain, Volume};
use crate::error::AudioError;
use crate::protocol::{SampleEncoding, StreamFormat};

/// Backend rendering to a cpal output device
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    device: Option<String>,
}

impl CpalBackend {
    /// Use the named output device, or the host default when `None`
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

impl OutputBackend for CpalBackend {
    fn name(&self) -> &str {
        self.device.as_deref().unwrap_or("default output")
    }

    fn initialize(
        &self,
        format: &StreamFormat,
        reader: JitterReader,
    ) -> Result<Box<dyn SinkHandle>, AudioError> {
        let encoding = format
            .sample_encoding()
            .filter(|_| format.is_playable())
            .ok_or_else(|| AudioError::UnsupportedFormat(format.to_string()))?;

        let sink = CpalSink::open(self.device.clone(), *format, encoding, reader)?;
        Ok(Box::new(sink))
    }
}

enum Command {
    Play(Sender<Result<(), AudioError>>),
    Stop,
}

/// One open cpal output stream
pub struct CpalSink {
    format: StreamFormat,
    gain: Arc<SinkGain>,
    commands: Sender<Command>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalSink {
    fn open(
        device_name: Option<String>,
        format: StreamFormat,
        encoding: SampleEncoding,
        reader: JitterReader,
    ) -> Result<Self, AudioError> {
        let gain = SinkGain::new(Volume::MAX);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (command_tx, command_rx) = bounded::<Command>(4);

        let thread_gain = gain.clone();
        let handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match build_stream(
                    device_name.as_deref(),
                    &format,
                    encoding,
                    reader,
                    thread_gain,
                ) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                run_commands(&stream, &command_rx);
                // Stream is dropped here, releasing the device
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                format,
                gain,
                commands: command_tx,
                thread_handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::StreamError(
                    "playback thread exited during setup".to_string(),
                ))
            }
        }
    }
}

fn run_commands(stream: &cpal::Stream, commands: &Receiver<Command>) {
    // A dropped sender also ends the loop
    while let Ok(command) = commands.recv() {
        match command {
            Command::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| AudioError::CpalError(e.to_string()));
                let _ = reply.send(result);
            }
            Command::Stop => {
                if let Err(e) = stream.pause() {
                    tracing::debug!("Pausing output stream failed: {}", e);
                }
                break;
            }
        }
    }
}

impl SinkHandle for CpalSink {
    fn format(&self) -> &StreamFormat {
        &self.format
    }

    fn play(&mut self) -> Result<(), AudioError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(Command::Play(reply_tx))
            .map_err(|_| AudioError::StreamError("playback thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| AudioError::StreamError("playback thread is gone".to_string()))?
    }

    fn stop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.commands.send(Command::Stop);
            let _ = handle.join();
        }
    }

    fn gain(&self) -> Arc<SinkGain> {
        self.gain.clone()
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(
    device_name: Option<&str>,
    format: &StreamFormat,
    encoding: SampleEncoding,
    reader: JitterReader,
    gain: Arc<SinkGain>,
) -> Result<cpal::Stream, AudioError> {
    let device = get_output_device(device_name)?;
    let sample_format = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
        .sample_format();

    let config = StreamConfig {
        channels: u16::from(format.channel_count),
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    tracing::debug!(
        "Opening {} output ({:?} device samples) for {}",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        sample_format,
        format
    );

    match sample_format {
        cpal::SampleFormat::F32 => build_typed::<f32>(&device, &config, encoding, reader, gain),
        cpal::SampleFormat::I16 => build_typed::<i16>(&device, &config, encoding, reader, gain),
        cpal::SampleFormat::U16 => build_typed::<u16>(&device, &config, encoding, reader, gain),
        other => Err(AudioError::UnsupportedFormat(format!(
            "device sample format {:?}",
            other
        ))),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    encoding: SampleEncoding,
    mut reader: JitterReader,
    gain: Arc<SinkGain>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let sample_bytes = encoding.bytes();
    let mut scratch: Vec<u8> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let wanted = data.len() * sample_bytes;
                if scratch.len() < wanted {
                    scratch.resize(wanted, 0);
                }
                let filled = reader.pop_into(&mut scratch[..wanted]);
                let factor = gain.factor();

                write_samples(data, &scratch[..filled], encoding, factor);
            },
            |err| {
                tracing::warn!("Output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

/// Convert `pcm` into `out`, scaled by `factor`; slots without input get silence
fn write_samples<T>(out: &mut [T], pcm: &[u8], encoding: SampleEncoding, factor: f32)
where
    T: Sample + FromSample<f32>,
{
    let mut samples = pcm.chunks_exact(encoding.bytes());
    for slot in out.iter_mut() {
        *slot = match samples.next() {
            Some(bytes) => T::from_sample(encoding.to_f32(bytes) * factor),
            None => T::EQUILIBRIUM,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChannelMap;

    #[test]
    fn test_write_samples_scales_and_pads() {
        let pcm = [0x00, 0x40, 0x00, 0xC0];
        let mut out = [1.0f32; 4];
        write_samples(&mut out, &pcm, SampleEncoding::I16, 0.5);
        assert_eq!(out, [0.25, -0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_write_samples_to_integer_device() {
        let pcm = [0x00, 0x00, 0x40];
        let mut out = [7i16; 2];
        write_samples(&mut out, &pcm, SampleEncoding::I24, 1.0);
        assert_eq!(out, [16_384, 0]);
    }

    #[test]
    fn test_unplayable_format_is_rejected_before_touching_devices() {
        let backend = CpalBackend::default();
        let format = StreamFormat {
            sample_rate: 48_000,
            bit_width: 20,
            channel_count: 2,
            channel_map: ChannelMap::STEREO,
        };
        let (_writer, reader) = crate::audio::buffer::jitter_buffer(
            std::time::Duration::from_millis(200),
            &format,
            Default::default(),
        );
        let result = backend.initialize(&format, reader);
        assert!(matches!(result, Err(AudioError::UnsupportedFormat(_))));
    }
}
