//! Microphone acquisition with scoped release on every exit path.
//!
//! The microphone is system-exclusive: exactly one capture may hold it.
//! Acquisition returns a [`CaptureGuard`]; dropping the guard stops the
//! stream, so success, error, explicit stop, and teardown all release the
//! device deterministically.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::Sender;

#[derive(Debug, Clone, Copy)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Holding the guard keeps the microphone open; dropping it releases the
/// device. `cpal::Stream` is not `Send`, so the guard lives and dies on the
/// capture worker thread that created it.
pub struct CaptureGuard {
    _stream: cpal::Stream,
    pub format: CaptureFormat,
}

pub struct Recorder {
    device: cpal::Device,
    name: String,
}

impl Recorder {
    /// Resolve the input device, by name when configured.
    ///
    /// # Errors
    ///
    /// Returns an error when no input device is available or the named
    /// device is not found.
    pub fn new(preferred_device: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = match preferred_device {
            Some(name) => host
                .input_devices()
                .context("failed to enumerate input devices")?
                .find(|device| device.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow!("input device '{name}' not found"))?,
            None => host
                .default_input_device()
                .ok_or_else(|| anyhow!("no input device available"))?,
        };
        let name = device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string());
        Ok(Self { device, name })
    }

    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.name
    }

    /// Open the input stream and start delivering f32 frames.
    ///
    /// Samples are normalized to [-1.0, 1.0] regardless of the device's
    /// native format and stay interleaved at the device channel count.
    ///
    /// # Errors
    ///
    /// Returns an error when the device refuses a stream (in practice: the
    /// OS denied access or the device configuration cannot be read).
    pub fn open_stream(&self, frames: Sender<Vec<f32>>) -> Result<CaptureGuard> {
        let input_config = self
            .device
            .default_input_config()
            .context("failed to read the default input configuration")?;
        let stream_config: StreamConfig = input_config.clone().into();
        let sample_format = input_config.sample_format();
        let format = CaptureFormat {
            sample_rate: stream_config.sample_rate.0,
            channels: stream_config.channels,
        };

        let err_fn = |err| tracing::warn!("input stream error: {err}");
        let stream = match sample_format {
            SampleFormat::F32 => {
                let frames = frames.clone();
                self.device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _| send_f32(data, &frames),
                    err_fn,
                    None,
                )?
            }
            SampleFormat::I16 => {
                let frames = frames.clone();
                self.device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _| send_i16(data, &frames),
                    err_fn,
                    None,
                )?
            }
            SampleFormat::U16 => {
                let frames = frames.clone();
                self.device.build_input_stream(
                    &stream_config,
                    move |data: &[u16], _| send_u16(data, &frames),
                    err_fn,
                    None,
                )?
            }
            other => {
                return Err(anyhow!("input sample format {other:?} is not supported"));
            }
        };
        stream.play().context("failed to start the input stream")?;

        Ok(CaptureGuard {
            _stream: stream,
            format,
        })
    }
}

fn send_f32(input: &[f32], frames: &Sender<Vec<f32>>) {
    // A full channel means the consumer stopped draining; dropping the frame
    // is preferable to blocking the audio callback.
    let _ = frames.try_send(input.to_vec());
}

fn send_i16(input: &[i16], frames: &Sender<Vec<f32>>) {
    let scale = 1.0 / f32::from(i16::MAX);
    let buffer: Vec<f32> = input.iter().map(|&s| f32::from(s) * scale).collect();
    let _ = frames.try_send(buffer);
}

fn send_u16(input: &[u16], frames: &Sender<Vec<f32>>) {
    const MIDPOINT: f32 = 32_768.0;
    let buffer: Vec<f32> = input
        .iter()
        .map(|&s| (f32::from(s) - MIDPOINT) / MIDPOINT)
        .collect();
    let _ = frames.try_send(buffer);
}
