//! CPAL output driver for the software backend
//!
//! Opens the default output device and pulls blocks from a [`RenderHandle`]
//! inside the device callback. The renderer always produces stereo; the
//! callback folds or spreads it onto whatever channel count the device has.

use crate::audio::software::RenderHandle;
use carousel_core::domain::audio::{AudioError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig as CpalStreamConfig};
use tracing::{debug, error, info};

/// Rate and channel count the default output device prefers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputDeviceConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A running output stream; audio stops when this is dropped
pub struct CpalOutput {
    _stream: Stream,
    config: OutputDeviceConfig,
}

fn default_device() -> Result<cpal::Device> {
    let host = cpal::default_host();
    debug!("Using audio host: {:?}", host.id());
    host.default_output_device()
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}

impl CpalOutput {
    /// Query the default output device without opening it
    pub fn default_config() -> Result<OutputDeviceConfig> {
        let device = default_device()?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;

        Ok(OutputDeviceConfig {
            sample_rate: supported.sample_rate(),
            channels: supported.channels(),
        })
    }

    /// Open the default output device at the handle's rate and start pulling blocks
    pub fn start(mut render: RenderHandle) -> Result<Self> {
        let device = default_device()?;
        #[allow(deprecated)]
        let name = device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string());

        let default = Self::default_config()?;
        let config = OutputDeviceConfig {
            sample_rate: render.output_rate(),
            channels: default.channels,
        };
        if config.channels == 0 {
            return Err(AudioError::UnsupportedConfiguration(format!(
                "Device {} reports no output channels",
                name
            )));
        }

        info!(
            "Creating output stream: device={}, rate={}Hz, channels={}",
            name, config.sample_rate, config.channels
        );

        let cpal_config = CpalStreamConfig {
            channels: config.channels,
            sample_rate: config.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let device_channels = config.channels as usize;
        let mut stereo: Vec<f32> = Vec::new();

        let stream = device
            .build_output_stream(
                &cpal_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / device_channels;
                    // Grows to the largest block once, then stays put
                    if stereo.len() < frames * 2 {
                        stereo.resize(frames * 2, 0.0);
                    }
                    let block = &mut stereo[..frames * 2];
                    render.render(block);
                    spread_stereo(block, data, device_channels);
                },
                |err| error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamError(format!("Failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(format!("Failed to start stream: {}", e)))?;

        Ok(Self {
            _stream: stream,
            config,
        })
    }

    pub fn config(&self) -> OutputDeviceConfig {
        self.config
    }
}

/// Map interleaved stereo onto `channels` interleaved device channels
fn spread_stereo(stereo: &[f32], out: &mut [f32], channels: usize) {
    for (frame, pair) in out.chunks_exact_mut(channels).zip(stereo.chunks_exact(2)) {
        match frame {
            [mono] => *mono = (pair[0] + pair[1]) * 0.5,
            [left, right, rest @ ..] => {
                *left = pair[0];
                *right = pair[1];
                rest.fill(0.0);
            }
            [] => {}
        }
    }
    let written = (stereo.len() / 2) * channels;
    if written < out.len() {
        out[written..].fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spread_to_mono() {
        let mut out = vec![9.0; 2];
        spread_stereo(&[1.0, 0.0, 0.5, 0.5], &mut out, 1);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn test_spread_to_surround() {
        let mut out = vec![9.0; 8];
        spread_stereo(&[0.1, 0.2, 0.3, 0.4], &mut out, 4);
        assert_eq!(out, vec![0.1, 0.2, 0.0, 0.0, 0.3, 0.4, 0.0, 0.0]);
    }

    #[test]
    fn test_spread_silences_tail() {
        let mut out = vec![9.0; 6];
        spread_stereo(&[0.1, 0.2], &mut out, 2);
        assert_eq!(out, vec![0.1, 0.2, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_default_config() {
        match CpalOutput::default_config() {
            Ok(config) => {
                assert!(config.sample_rate > 0);
                assert!(config.channels > 0);
            }
            Err(e) => {
                // On CI or headless systems, there might not be audio devices
                eprintln!("Skipping test: {}", e);
            }
        }
    }
}
