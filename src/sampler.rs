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

//! The SFZ sampler control plane: construction from an SFZ file, event
//! intake, reverb parameters, rendering and transport lifecycle.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::audio;
use crate::midi;
use crate::samples::{SampleCache, SampleLoadError};
use crate::sfz::{parse_sfz_file, Section, SfzError};

pub mod engine;
pub mod envelope;
pub mod reverb;
pub mod voice;

pub use engine::{Engine, DEFAULT_MAX_VOICES};

/// The sample rate the engine assumes until a transport reports the real
/// device rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Fatal construction-time errors. Runtime paths never return errors; they
/// log and proceed.
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error(transparent)]
    Sfz(#[from] SfzError),

    #[error("failed to load sample '{path}' for region {region}: {source}")]
    Sample {
        region: usize,
        path: String,
        source: SampleLoadError,
    },
}

/// An SFZ sampler: the parsed instrument, its decoded samples, the voice
/// engine and (optionally) live audio/MIDI transports.
pub struct SfzSampler {
    engine: Arc<Engine>,
    output: Option<audio::OutputStream>,
    midi_input: Option<midi::InputConnection>,
    closed: bool,
}

impl SfzSampler {
    /// Creates a sampler from an SFZ file. Every referenced sample is
    /// resolved against the SFZ file's directory and decoded up front; a
    /// missing or undecodable sample is fatal. When `device_name` is given,
    /// a live cpal output stream and a MIDI input are attached; transport
    /// failures are logged and the sampler still works for offline
    /// rendering.
    pub fn new(sfz_path: &Path, device_name: Option<&str>) -> Result<Self, SamplerError> {
        let instrument = parse_sfz_file(sfz_path)?;
        info!(
            path = ?sfz_path,
            regions = instrument.regions.len(),
            groups = instrument.groups.len(),
            "Parsed SFZ instrument"
        );

        let sfz_dir = sfz_path.parent().unwrap_or_else(|| Path::new("."));
        let mut cache = SampleCache::new();
        let mut region_samples = Vec::with_capacity(instrument.regions.len());
        for (index, region) in instrument.regions.iter().enumerate() {
            let scope = instrument.scope(region);
            let sample_path = scope.get_str("sample").unwrap_or("");
            if sample_path.is_empty() {
                warn!(region = index, "Region has no sample opcode");
                region_samples.push(None);
                continue;
            }

            let sample = cache
                .load_relative(sfz_dir, sample_path)
                .map_err(|source| SamplerError::Sample {
                    region: index,
                    path: sample_path.to_string(),
                    source,
                })?;
            region_samples.push(Some(sample));
        }

        info!(
            samples = cache.len(),
            memory_kb = cache.total_memory_usage() / 1024,
            "Samples loaded"
        );

        // Reverb defaults come from the global section, falling back to the
        // first group. Collected before the instrument moves into the engine.
        let mut reverb_sections: Vec<Section> = Vec::new();
        if let Some(global) = &instrument.global {
            reverb_sections.push(global.clone());
        }
        if let Some(group) = instrument.groups.first() {
            reverb_sections.push(group.clone());
        }

        let engine = Arc::new(Engine::new(
            instrument,
            region_samples,
            DEFAULT_SAMPLE_RATE,
            DEFAULT_MAX_VOICES,
        ));

        for section in &reverb_sections {
            apply_reverb_opcodes(&engine, section);
        }

        let mut sampler = Self {
            engine,
            output: None,
            midi_input: None,
            closed: false,
        };

        if let Some(name) = device_name {
            sampler.attach_transport(name);
        }

        Ok(sampler)
    }

    /// Attaches the live audio output and MIDI input. Failures are warnings:
    /// the sampler still renders offline.
    fn attach_transport(&mut self, device_name: &str) {
        match audio::cpal::Device::get(Some(device_name))
            .and_then(|device| device.open_stream(self.engine.clone()))
        {
            Ok(stream) => {
                info!(device = device_name, "Audio output started");
                self.output = Some(stream);
            }
            Err(e) => {
                warn!(
                    device = device_name,
                    err = e.to_string(),
                    "Could not open audio output; continuing without it"
                );
            }
        }

        match midi::connect(None, self.engine.clone()) {
            Ok(connection) => {
                info!(port = connection.port_name(), "MIDI input connected");
                self.midi_input = Some(connection);
            }
            Err(e) => {
                warn!(
                    err = e.to_string(),
                    "Could not connect MIDI input; continuing without it"
                );
            }
        }
    }

    pub fn note_on(&self, note: u8, velocity: u8) {
        if self.closed {
            return;
        }
        self.engine.note_on(note, velocity);
    }

    pub fn note_off(&self, note: u8) {
        if self.closed {
            return;
        }
        self.engine.note_off(note);
    }

    pub fn control_change(&self, cc: u8, value: u8) {
        if self.closed {
            return;
        }
        self.engine.control_change(cc, value);
    }

    pub fn pitch_bend(&self, value: i16) {
        if self.closed {
            return;
        }
        self.engine.pitch_bend(value);
    }

    /// Decodes and dispatches a raw MIDI event (note-on with velocity 0 is
    /// note-off).
    pub fn handle_raw_midi(&self, raw: &[u8]) {
        if self.closed {
            return;
        }
        midi::dispatch_raw(&self.engine, raw);
    }

    /// Renders the next buffer of the mix.
    pub fn render(&self, output: &mut [f32]) {
        if self.closed {
            output.fill(0.0);
            return;
        }
        self.engine.render(output);
    }

    pub fn active_voice_count(&self) -> usize {
        self.engine.active_voice_count()
    }

    pub fn set_reverb_send(&self, send: f64) {
        self.engine.set_reverb_send(send);
    }

    pub fn reverb_send(&self) -> f64 {
        self.engine.reverb_send()
    }

    pub fn set_reverb_room_size(&self, size: f64) {
        self.engine.set_reverb_room_size(size);
    }

    pub fn reverb_room_size(&self) -> f64 {
        self.engine.reverb_room_size()
    }

    pub fn set_reverb_damping(&self, damping: f64) {
        self.engine.set_reverb_damping(damping);
    }

    pub fn reverb_damping(&self) -> f64 {
        self.engine.reverb_damping()
    }

    pub fn set_reverb_wet(&self, wet: f64) {
        self.engine.set_reverb_wet(wet);
    }

    pub fn reverb_wet(&self) -> f64 {
        self.engine.reverb_wet()
    }

    pub fn set_reverb_dry(&self, dry: f64) {
        self.engine.set_reverb_dry(dry);
    }

    pub fn reverb_dry(&self) -> f64 {
        self.engine.reverb_dry()
    }

    pub fn set_reverb_width(&self, width: f64) {
        self.engine.set_reverb_width(width);
    }

    pub fn reverb_width(&self) -> f64 {
        self.engine.reverb_width()
    }

    /// Releases any transports and marks the sampler unusable. Further
    /// events are ignored and `render` produces silence.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.output = None;
        self.midi_input = None;
        self.closed = true;
        info!("Sampler closed");
    }
}

impl Drop for SfzSampler {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SfzSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SfzSampler")
            .field("active_voices", &self.active_voice_count())
            .field("live_output", &self.output.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Applies `reverb_*` opcodes from an SFZ section. The raw values are
/// treated as percent and divided by 100 before the usual [0, 1] clamp.
fn apply_reverb_opcodes(engine: &Engine, section: &Section) {
    let params: [(&str, fn(&Engine, f64)); 6] = [
        ("reverb_send", Engine::set_reverb_send),
        ("reverb_room_size", Engine::set_reverb_room_size),
        ("reverb_damping", Engine::set_reverb_damping),
        ("reverb_wet", Engine::set_reverb_wet),
        ("reverb_dry", Engine::set_reverb_dry),
        ("reverb_width", Engine::set_reverb_width),
    ];

    for (opcode, setter) in params {
        if section.get_str(opcode).is_some() {
            let value = section.get_f64(opcode, -1.0);
            if value >= 0.0 {
                setter(engine, value / 100.0);
            }
        }
    }
}
