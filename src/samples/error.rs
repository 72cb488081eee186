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

/// Error types for sample loading and decoding.
#[derive(Debug, thiserror::Error)]
pub enum SampleLoadError {
    #[error("sample file not found: {0}")]
    NotFound(String),

    #[error("unsupported audio format: {0} (supported: .wav, .flac)")]
    UnsupportedFormat(String),

    #[error("no audio track found in {0}")]
    NoAudioTrack(String),

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        source: symphonia::core::errors::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
