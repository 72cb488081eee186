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

//! Test fixtures: synthetic samples, WAV writers and instrument builders.

use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hound::{SampleFormat, WavSpec, WavWriter};
use tempfile::TempDir;

use crate::samples::Sample;
use crate::sampler::{Engine, DEFAULT_MAX_VOICES};
use crate::sfz::parser::parse_sfz;
use crate::sfz::{Instrument, Region, Section, SectionKind};

/// A 440 Hz sine at 44.1 kHz, amplitude 0.5, on every channel.
pub fn sine_sample(frames: usize, channels: u16) -> Arc<Sample> {
    let mut data = Vec::with_capacity(frames * channels as usize);
    for frame in 0..frames {
        let value = (frame as f64 * 2.0 * PI * 440.0 / 44100.0).sin() * 0.5;
        for _ in 0..channels {
            data.push(value);
        }
    }
    Arc::new(Sample::new(
        PathBuf::from("sine-test"),
        data,
        44100,
        channels,
    ))
}

/// A mono linear ramp from 0 to 1, handy for position assertions.
pub fn ramp_sample(frames: usize) -> Arc<Sample> {
    let data = (0..frames).map(|i| i as f64 / frames as f64).collect();
    Arc::new(Sample::new(PathBuf::from("ramp-test"), data, 44100, 1))
}

/// Writes a mono 16-bit sine WAV and returns the pre-quantization values.
pub fn write_sine_wav(path: &Path, frames: usize, sample_rate: u32) -> Vec<f64> {
    let mut writer = WavWriter::create(
        path,
        WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        },
    )
    .expect("failed to create test WAV");

    let mut written = Vec::with_capacity(frames);
    for frame in 0..frames {
        let value = (frame as f64 * 2.0 * PI * 440.0 / f64::from(sample_rate)).sin() * 0.5;
        written.push(value);
        writer
            .write_sample((value * 32767.0) as i16)
            .expect("failed to write sample");
    }
    writer.finalize().expect("failed to finalize test WAV");
    written
}

/// Writes a stereo 16-bit WAV holding constant left/right values.
pub fn write_stereo_wav(path: &Path, frames: usize, sample_rate: u32, left: f64, right: f64) {
    let mut writer = WavWriter::create(
        path,
        WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        },
    )
    .expect("failed to create test WAV");

    for _ in 0..frames {
        writer
            .write_sample((left * 32767.0) as i16)
            .expect("failed to write left sample");
        writer
            .write_sample((right * 32767.0) as i16)
            .expect("failed to write right sample");
    }
    writer.finalize().expect("failed to finalize test WAV");
}

/// Builds a one-region instrument with the given opcodes and no group.
pub fn region_instrument(opcodes: &[(&str, &str)]) -> Instrument {
    let mut section = Section::new(SectionKind::Region);
    for (name, value) in opcodes {
        section.insert(name, value);
    }
    Instrument {
        global: None,
        groups: Vec::new(),
        regions: vec![Region {
            section,
            group: None,
        }],
    }
}

/// Parses SFZ text and builds an engine where every region plays the given
/// sample, sidestepping the filesystem.
pub fn build_engine(sfz: &str, sample: Arc<Sample>) -> Engine {
    let instrument = parse_sfz(sfz);
    let samples = instrument
        .regions
        .iter()
        .map(|_| Some(sample.clone()))
        .collect();
    Engine::new(instrument, samples, 44100, DEFAULT_MAX_VOICES)
}

/// Writes an SFZ file plus a `tone.wav` sample it can reference into a temp
/// directory. The directory guard must be kept alive for the test's
/// duration.
pub fn write_test_instrument(sfz_content: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    write_sine_wav(&dir.path().join("tone.wav"), 44100, 44100);

    let sfz_path = dir.path().join("test.sfz");
    std::fs::write(&sfz_path, sfz_content).expect("failed to write SFZ file");

    (dir, sfz_path)
}
