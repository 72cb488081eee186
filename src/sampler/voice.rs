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

//! A single running instance of a region: playback position, pitch ratio,
//! envelope and loop state.

use std::sync::Arc;

use crate::samples::Sample;
use crate::sfz::Scope;

use super::envelope::Envelope;

/// How a region's sample loops. Unknown `loop_mode` values behave as
/// `no_loop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopMode {
    /// Play once, deactivate at the end of the sample.
    NoLoop,
    /// Like `NoLoop`, but the voice also ignores note-off.
    OneShot,
    /// Wrap from `loop_end` back to `loop_start` forever.
    Continuous,
    /// Loop while the note is held, then play out to the end.
    Sustain,
}

impl LoopMode {
    pub fn from_opcode(value: &str) -> Self {
        match value {
            "one_shot" => Self::OneShot,
            "loop_continuous" => Self::Continuous,
            "loop_sustain" => Self::Sustain,
            _ => Self::NoLoop,
        }
    }
}

/// When a region fires. Unknown `trigger` values behave as `attack`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerMode {
    Attack,
    Release,
    First,
    Legato,
}

impl TriggerMode {
    pub fn from_opcode(value: &str) -> Self {
        match value {
            "release" => Self::Release,
            "first" => Self::First,
            "legato" => Self::Legato,
            _ => Self::Attack,
        }
    }
}

/// An active playing voice. Created on note-on (or by a release trigger) and
/// removed by the mixer once inactive.
pub struct Voice {
    sample: Arc<Sample>,
    region_index: usize,
    note: u8,
    #[allow(dead_code)]
    velocity: u8,
    /// Read position in source frames; fractional because of pitch shifting.
    position: f64,
    gain: f64,
    /// Normalized pan position; the mixer currently sums to mono, so this
    /// is carried but not applied.
    #[allow(dead_code)]
    pan: f64,
    /// Source frames advanced per output frame.
    pitch_ratio: f64,
    envelope: Envelope,
    loop_mode: LoopMode,
    loop_start: f64,
    loop_end: f64,
    group: i32,
    off_by: i32,
    trigger: TriggerMode,
    note_on: bool,
    active: bool,
}

impl Voice {
    /// Builds a voice for a matched region. `note_on` is false for release
    /// triggers, whose envelopes must not wait for a note-off.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sample: Arc<Sample>,
        region_index: usize,
        scope: &Scope,
        note: u8,
        velocity: u8,
        note_on: bool,
        pitch_bend: i16,
        sample_rate: u32,
    ) -> Self {
        let envelope = Envelope::from_scope(scope, sample_rate);
        let (loop_mode, loop_start, loop_end) = loop_params(scope, sample.frames());

        Self {
            region_index,
            note,
            velocity,
            position: 0.0,
            gain: compute_gain(scope, velocity),
            pan: compute_pan(scope),
            pitch_ratio: compute_pitch_ratio(scope, note, pitch_bend),
            envelope,
            loop_mode,
            loop_start,
            loop_end,
            group: scope.get_i32("group", 0),
            off_by: scope.get_i32("off_by", 0),
            trigger: TriggerMode::from_opcode(scope.get_str("trigger").unwrap_or("")),
            note_on,
            active: true,
            sample,
        }
    }

    /// Renders this voice additively into the output buffer, advancing
    /// position, envelope and loop state. Deactivates itself when the
    /// envelope finishes or a non-looping sample runs out.
    pub fn render(&mut self, output: &mut [f32]) {
        for out in output.iter_mut() {
            let level = self.envelope.process();
            if level <= 0.0 && self.envelope.is_off() {
                self.active = false;
                break;
            }

            let value = self.interpolated_sample() * self.gain * level;
            *out += value as f32;

            self.position += self.pitch_ratio;
            if !self.advance_loop() {
                self.active = false;
                break;
            }
        }
    }

    /// Reads the sample at the current fractional position with linear
    /// interpolation, taking the left channel of stereo sources.
    fn interpolated_sample(&self) -> f64 {
        let frames = self.sample.frames();
        let channels = self.sample.channels() as usize;
        let int_pos = self.position as usize;
        let frac = self.position - int_pos as f64;

        if int_pos >= frames {
            return 0.0;
        }

        let current = self.sample.data()[int_pos * channels];
        let next = if int_pos + 1 < frames {
            self.sample.data()[(int_pos + 1) * channels]
        } else {
            current
        };

        current + frac * (next - current)
    }

    /// Runs the loop state machine after a position advance. Returns false
    /// when the voice should stop.
    fn advance_loop(&mut self) -> bool {
        match self.loop_mode {
            LoopMode::Continuous => {
                if self.position >= self.loop_end {
                    self.position = self.loop_start + (self.position - self.loop_end);
                }
                true
            }
            LoopMode::Sustain => {
                if self.note_on {
                    if self.position >= self.loop_end {
                        self.position = self.loop_start + (self.position - self.loop_end);
                    }
                    true
                } else {
                    self.position < self.last_frame()
                }
            }
            LoopMode::NoLoop | LoopMode::OneShot => self.position < self.last_frame(),
        }
    }

    fn last_frame(&self) -> f64 {
        self.sample.frames().saturating_sub(1) as f64
    }

    /// Handles a note-off: starts the envelope release and flips a sustain
    /// loop into its play-out phase. One-shot voices ignore note-off.
    pub fn release(&mut self) {
        if self.loop_mode == LoopMode::OneShot {
            return;
        }
        if self.loop_mode == LoopMode::Sustain {
            self.loop_mode = LoopMode::NoLoop;
        }
        self.envelope.release();
        self.note_on = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn is_note_on(&self) -> bool {
        self.note_on
    }

    pub fn group(&self) -> i32 {
        self.group
    }

    pub fn off_by(&self) -> i32 {
        self.off_by
    }

    pub fn region_index(&self) -> usize {
        self.region_index
    }
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Voice")
            .field("note", &self.note)
            .field("region", &self.region_index)
            .field("position", &self.position)
            .field("pitch_ratio", &self.pitch_ratio)
            .field("trigger", &self.trigger)
            .field("active", &self.active)
            .finish()
    }
}

/// Linear gain from the inherited `volume` (dB, clamped to [-60, +6]) scaled
/// by velocity.
pub fn compute_gain(scope: &Scope, velocity: u8) -> f64 {
    let volume = scope.get_f64("volume", 0.0).clamp(-60.0, 6.0);
    let linear = 10.0_f64.powf(volume / 20.0);
    linear * f64::from(velocity) / 127.0
}

/// Pan position from the inherited `pan`, normalized to [-1, +1].
pub fn compute_pan(scope: &Scope) -> f64 {
    scope.get_f64("pan", 0.0).clamp(-100.0, 100.0) / 100.0
}

/// Pitch ratio from `pitch_keycenter`/`transpose`/`tune`/`pitch` plus the
/// pitch-bend contribution, clamped to [0.1, 10.0].
///
/// `pitch_keycenter` defaults to the played note, so an undeclared keycenter
/// plays at 1:1.
pub fn compute_pitch_ratio(scope: &Scope, note: u8, pitch_bend: i16) -> f64 {
    let keycenter = scope.get_note("pitch_keycenter", i32::from(note));
    let mut semitones = f64::from(i32::from(note) - keycenter);

    semitones += f64::from(scope.get_i32("transpose", 0));
    semitones += scope.get_f64("tune", 0.0) / 100.0;
    semitones += scope.get_f64("pitch", 0.0) / 100.0;

    if pitch_bend != 0 {
        let bend_up = scope.get_i32("bend_up", 200);
        let bend_down = scope.get_i32("bend_down", -200);
        if pitch_bend > 0 {
            semitones += f64::from(pitch_bend) / 8192.0 * f64::from(bend_up) / 100.0;
        } else {
            semitones += f64::from(pitch_bend) / 8192.0 * f64::from(-bend_down) / 100.0;
        }
    }

    let ratio = 2.0_f64.powf(semitones / 12.0);
    ratio.clamp(0.1, 10.0)
}

/// Loop parameters from the inherited opcodes. `loop_start` defaults to 0
/// and `loop_end` to the last frame; an inverted range falls back to the
/// full sample.
fn loop_params(scope: &Scope, frames: usize) -> (LoopMode, f64, f64) {
    let mode = LoopMode::from_opcode(scope.get_str("loop_mode").unwrap_or(""));
    let last = frames.saturating_sub(1) as f64;

    let mut start = scope.get_f64("loop_start", 0.0).max(0.0);
    let mut end = scope.get_f64("loop_end", last).min(last);
    if start >= end {
        start = 0.0;
        end = last;
    }

    (mode, start, end)
}
