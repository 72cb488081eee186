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

//! Symphonia-based decoding of sample files into f64 PCM frames.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

use super::{Sample, SampleLoadError};

/// Decodes an entire WAV or FLAC file into an in-memory [`Sample`].
///
/// The format is gated on the file extension before probing so that a
/// mis-named file produces a clear unsupported-format error rather than a
/// probe failure.
pub fn decode_file(path: &Path) -> Result<Sample, SampleLoadError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();
    if extension != "wav" && extension != "flac" {
        return Err(SampleLoadError::UnsupportedFormat(
            path.display().to_string(),
        ));
    }

    if !path.exists() {
        return Err(SampleLoadError::NotFound(path.display().to_string()));
    }

    debug!(path = ?path, "Decoding sample file");

    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(&extension);

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|source| SampleLoadError::Decode {
            path: path.display().to_string(),
            source,
        })?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| SampleLoadError::NoAudioTrack(path.display().to_string()))?;
    let track_id = track.id;

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|source| SampleLoadError::Decode {
            path: path.display().to_string(),
            source,
        })?;

    let mut data: Vec<f64> = Vec::new();
    let mut sample_rate = 0u32;
    let mut channels = 0u16;
    let mut sample_buf: Option<SampleBuffer<f64>> = None;

    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            // Symphonia signals end-of-stream as an unexpected EOF.
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(source) => {
                return Err(SampleLoadError::Decode {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .map_err(|source| SampleLoadError::Decode {
                path: path.display().to_string(),
                source,
            })?;

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;

        let needs_new_buf = sample_buf
            .as_ref()
            .map(|buf| buf.capacity() < decoded.capacity() * channels as usize)
            .unwrap_or(true);
        if needs_new_buf {
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }

        let buf = sample_buf.as_mut().expect("sample buffer just created");
        buf.copy_interleaved_ref(decoded);
        data.extend_from_slice(buf.samples());
    }

    if channels == 0 || data.is_empty() {
        return Err(SampleLoadError::NoAudioTrack(path.display().to_string()));
    }

    Ok(Sample::new(path.to_path_buf(), data, sample_rate, channels))
}
