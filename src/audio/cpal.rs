// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! A small wrapper around cpal output devices that drives the voice engine
//! from the audio callback.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, info};

use crate::sampler::Engine;

/// The mono scratch buffer is pre-sized for the largest callback we expect;
/// a larger callback grows it once, outside the steady state.
const INITIAL_SCRATCH_FRAMES: usize = 8192;

/// A cpal output device, wrapped with the data needed for listing and
/// stream construction.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The maximum number of output channels the device supports.
    max_channels: u16,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

impl Device {
    /// Lists cpal output devices.
    pub fn list() -> Result<Vec<Device>, Box<dyn Error>> {
        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let output_configs = match device.supported_output_configs() {
                    Ok(configs) => configs,
                    Err(e) => {
                        debug!(
                            err = e.to_string(),
                            host = host_id.name(),
                            device = device.name().unwrap_or_default(),
                            "Error getting output configs"
                        );
                        continue;
                    }
                };

                let mut max_channels = 0;
                for output_config in output_configs {
                    if max_channels < output_config.channels() {
                        max_channels = output_config.channels();
                    }
                }

                if max_channels > 0 {
                    devices.push(Device {
                        name: device.name()?,
                        host_id,
                        max_channels,
                        device,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets an output device by name. `None` or `"default"` selects the
    /// default output device of the default host.
    pub fn get(name: Option<&str>) -> Result<Device, Box<dyn Error>> {
        match name {
            None | Some("default") => {
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or("no default audio output device available")?;
                let max_channels = device
                    .supported_output_configs()?
                    .map(|config| config.channels())
                    .max()
                    .unwrap_or(0);
                Ok(Device {
                    name: device.name()?,
                    host_id: host.id(),
                    max_channels,
                    device,
                })
            }
            Some(name) => Device::list()?
                .into_iter()
                .find(|device| device.name.trim() == name)
                .ok_or_else(|| format!("no device found with name {}", name).into()),
        }
    }

    /// Opens an f32 output stream that renders the engine into a mono
    /// scratch buffer per callback and copies the mix to every hardware
    /// channel. The engine is re-targeted to the device sample rate before
    /// the stream starts.
    pub fn open_stream(&self, engine: Arc<Engine>) -> Result<OutputStream, Box<dyn Error>> {
        let config = self.device.default_output_config()?;
        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(format!(
                "unsupported output sample format {:?} on {}",
                config.sample_format(),
                self.name
            )
            .into());
        }

        let sample_rate = config.sample_rate().0;
        let channels = usize::from(config.channels()).max(1);
        engine.set_sample_rate(sample_rate);

        info!(
            device = self.name,
            sample_rate,
            channels,
            "Opening audio output stream"
        );

        let mut scratch = vec![0.0f32; INITIAL_SCRATCH_FRAMES];
        let stream = self.device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                if scratch.len() < frames {
                    scratch.resize(frames, 0.0);
                }

                engine.render(&mut scratch[..frames]);

                for (frame, out) in data.chunks_mut(channels).enumerate() {
                    out.fill(scratch[frame]);
                }
            },
            |err| error!(err = err.to_string(), "Audio stream error"),
            None,
        )?;
        stream.play()?;

        Ok(OutputStream {
            name: self.name.clone(),
            _stream: stream,
        })
    }
}

/// A running output stream. Dropping it stops playback.
pub struct OutputStream {
    name: String,
    _stream: cpal::Stream,
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        debug!(device = self.name, "Audio output stream stopped");
    }
}
