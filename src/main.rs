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
mod audio;
mod midi;
mod sampler;
mod samples;
mod sfz;
#[cfg(test)]
mod testutil;

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{crate_version, Parser, Subcommand};
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::info;

use crate::sampler::{SfzSampler, DEFAULT_SAMPLE_RATE};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "An SFZ sampler."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the available MIDI input devices.
    MidiDevices {},
    /// Plays an SFZ instrument live from MIDI input.
    Play {
        /// The path to the SFZ instrument.
        sfz_path: PathBuf,
        /// The audio output device to use.
        #[arg(short, long, default_value = "default")]
        device: String,
    },
    /// Renders notes of an SFZ instrument offline into a WAV file.
    Render {
        /// The path to the SFZ instrument.
        sfz_path: PathBuf,
        /// The output WAV path.
        output: PathBuf,
        /// Notes to play, as MIDI numbers or note names (e.g. 60 or c4).
        #[arg(short, long, value_delimiter = ',', default_value = "c4")]
        notes: Vec<String>,
        /// The note-on velocity (1-127).
        #[arg(short, long, default_value_t = 100)]
        velocity: u8,
        /// Seconds before the notes are released.
        #[arg(long, default_value_t = 2.0)]
        hold: f64,
        /// Total length of the rendered file in seconds.
        #[arg(long, default_value_t = 4.0)]
        duration: f64,
        /// Reverb send level (0.0-1.0), overriding the SFZ file's setting.
        #[arg(long)]
        reverb_send: Option<f64>,
    },
}

fn main() {
    // Default logging to off except for this crate, which keeps symphonia's
    // chatter out of the way.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off,sfzplay=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Play { sfz_path, device } => {
            let _sampler = SfzSampler::new(&sfz_path, Some(&device))?;
            info!("Playing. Press Ctrl-C to exit.");
            loop {
                std::thread::park();
            }
        }
        Commands::Render {
            sfz_path,
            output,
            notes,
            velocity,
            hold,
            duration,
            reverb_send,
        } => {
            let notes = notes
                .iter()
                .map(|n| parse_note(n))
                .collect::<Result<Vec<u8>, _>>()?;
            render_to_wav(
                &sfz_path,
                &output,
                &notes,
                velocity,
                hold,
                duration,
                reverb_send,
            )?;
        }
    }

    Ok(())
}

/// Parses a CLI note argument: a MIDI number or a note name like `c4`.
fn parse_note(value: &str) -> Result<u8, Box<dyn Error>> {
    if let Ok(number) = value.parse::<u8>() {
        if number <= 127 {
            return Ok(number);
        }
        return Err(format!("MIDI note out of range: {}", value).into());
    }
    match sfz::note::note_to_midi(value) {
        Some(note) => Ok(note as u8),
        None => Err(format!("unrecognized note: {}", value).into()),
    }
}

/// Renders the given notes offline and writes a 16-bit mono WAV.
#[allow(clippy::too_many_arguments)]
fn render_to_wav(
    sfz_path: &Path,
    output: &Path,
    notes: &[u8],
    velocity: u8,
    hold: f64,
    duration: f64,
    reverb_send: Option<f64>,
) -> Result<(), Box<dyn Error>> {
    const BLOCK_FRAMES: usize = 512;

    let sampler = SfzSampler::new(sfz_path, None)?;
    if let Some(send) = reverb_send {
        sampler.set_reverb_send(send);
    }
    let sample_rate = DEFAULT_SAMPLE_RATE;

    let total_frames = (duration * f64::from(sample_rate)) as usize;
    let hold_frames = (hold * f64::from(sample_rate)) as usize;

    for &note in notes {
        sampler.note_on(note, velocity);
    }
    info!(
        notes = ?notes,
        velocity,
        voices = sampler.active_voice_count(),
        "Rendering"
    );

    let mut writer = WavWriter::create(
        output,
        WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        },
    )?;

    let mut block = vec![0.0f32; BLOCK_FRAMES];
    let mut rendered = 0usize;
    let mut released = false;

    while rendered < total_frames {
        if !released && rendered >= hold_frames {
            for &note in notes {
                sampler.note_off(note);
            }
            released = true;
        }

        let frames = BLOCK_FRAMES.min(total_frames - rendered);
        sampler.render(&mut block[..frames]);

        for &sample in &block[..frames] {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((f64::from(clamped) * 32767.0) as i16)?;
        }
        rendered += frames;
    }

    writer.finalize()?;
    info!(output = ?output, seconds = duration, "Render complete");

    Ok(())
}
