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

//! Linear ADSR amplitude envelope, advanced once per output sample.

use crate::sfz::Scope;

/// Envelope phases. `Off` is terminal; the mixer removes the voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeStage {
    Attack,
    Decay,
    Sustain,
    Release,
    Off,
}

/// A per-voice linear ADSR state machine with sample-accurate timing.
///
/// The release phase always ramps from the sustain level, not the level at
/// the moment of note-off; releasing during attack or decay therefore steps
/// to the sustain level first.
#[derive(Clone, Debug)]
pub struct Envelope {
    stage: EnvelopeStage,
    level: f64,
    /// Samples elapsed in the current stage.
    elapsed: f64,
    attack_samples: f64,
    decay_samples: f64,
    sustain_level: f64,
    release_samples: f64,
}

impl Envelope {
    /// Defaults: attack 1 ms, decay 100 ms, sustain 100%, release 100 ms.
    pub fn from_scope(scope: &Scope, sample_rate: u32) -> Self {
        let rate = f64::from(sample_rate);
        let attack = scope.get_f64("ampeg_attack", 0.001);
        let decay = scope.get_f64("ampeg_decay", 0.1);
        let sustain = scope.get_f64("ampeg_sustain", 100.0);
        let release = scope.get_f64("ampeg_release", 0.1);

        Self::new(
            attack * rate,
            decay * rate,
            normalize_sustain(sustain),
            release * rate,
        )
    }

    /// Creates an envelope from stage lengths in samples and a sustain level
    /// in [0, 1].
    pub fn new(
        attack_samples: f64,
        decay_samples: f64,
        sustain_level: f64,
        release_samples: f64,
    ) -> Self {
        Self {
            stage: EnvelopeStage::Attack,
            level: 0.0,
            elapsed: 0.0,
            attack_samples,
            decay_samples,
            sustain_level,
            release_samples,
        }
    }

    /// Advances the envelope by one sample and returns the level, always in
    /// [0, 1].
    pub fn process(&mut self) -> f64 {
        match self.stage {
            EnvelopeStage::Attack => {
                if self.attack_samples <= 0.0 {
                    self.enter_decay();
                } else {
                    self.elapsed += 1.0;
                    self.level = self.elapsed / self.attack_samples;
                    if self.level >= 1.0 {
                        self.enter_decay();
                    }
                }
            }
            EnvelopeStage::Decay => {
                if self.decay_samples <= 0.0 || self.elapsed >= self.decay_samples {
                    self.level = self.sustain_level;
                    self.stage = EnvelopeStage::Sustain;
                    self.elapsed = 0.0;
                } else {
                    let progress = self.elapsed / self.decay_samples;
                    self.level = 1.0 - (1.0 - self.sustain_level) * progress;
                    self.elapsed += 1.0;
                }
            }
            EnvelopeStage::Sustain => {
                // Held indefinitely; only a note-off moves us on.
                self.level = self.sustain_level;
            }
            EnvelopeStage::Release => {
                if self.release_samples <= 0.0 || self.elapsed >= self.release_samples {
                    self.level = 0.0;
                    self.stage = EnvelopeStage::Off;
                } else {
                    let progress = self.elapsed / self.release_samples;
                    self.level = self.sustain_level * (1.0 - progress);
                    self.elapsed += 1.0;
                }
            }
            EnvelopeStage::Off => {
                self.level = 0.0;
            }
        }

        self.level = self.level.clamp(0.0, 1.0);
        self.level
    }

    fn enter_decay(&mut self) {
        self.level = 1.0;
        self.stage = EnvelopeStage::Decay;
        self.elapsed = 0.0;
    }

    /// Starts the release ramp unless the envelope is already releasing or
    /// finished.
    pub fn release(&mut self) {
        if self.stage != EnvelopeStage::Release && self.stage != EnvelopeStage::Off {
            self.stage = EnvelopeStage::Release;
            self.elapsed = 0.0;
        }
    }

    /// Returns the current stage.
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    /// Returns the current level without advancing.
    pub fn level(&self) -> f64 {
        self.level
    }

    /// Returns true once the envelope has finished its release.
    pub fn is_off(&self) -> bool {
        self.stage == EnvelopeStage::Off
    }

    #[cfg(test)]
    pub(crate) fn sustain_level(&self) -> f64 {
        self.sustain_level
    }
}

/// `ampeg_sustain` carries a unit inconsistency in the wild: percent in
/// [0, 100] in files, but a 0..1 fraction in some tooling. Values above 1
/// are treated as percent; anything else passes through. The result is
/// clamped to [0, 1].
fn normalize_sustain(raw: f64) -> f64 {
    let normalized = if raw > 1.0 { raw / 100.0 } else { raw };
    normalized.clamp(0.0, 1.0)
}
