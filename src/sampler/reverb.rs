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

//! Freeverb-style reverb: eight parallel damped comb filters into four
//! serial allpasses per channel. All delay lines are allocated up front at
//! construction; processing performs no allocation.

const NUM_COMBS: usize = 8;
const NUM_ALLPASSES: usize = 4;

/// Comb delay lengths in samples at 44.1 kHz; scaled linearly at other rates.
const COMB_DELAYS: [usize; NUM_COMBS] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
/// Allpass delay lengths in samples at 44.1 kHz.
const ALLPASS_DELAYS: [usize; NUM_ALLPASSES] = [556, 441, 341, 225];

const FIXED_GAIN: f64 = 0.015;
const SCALE_WET: f64 = 3.0;
const SCALE_DRY: f64 = 2.0;
const SCALE_DAMP: f64 = 0.4;
const SCALE_ROOM: f64 = 0.28;
const OFFSET_ROOM: f64 = 0.7;
const INITIAL_ROOM: f64 = 0.5;
const INITIAL_DAMP: f64 = 0.5;
const INITIAL_WET: f64 = 1.0 / SCALE_WET;
const INITIAL_DRY: f64 = 0.0;
const INITIAL_WIDTH: f64 = 1.0;
/// Extra delay on the right channel's filters.
const STEREO_SPREAD: usize = 23;

/// A comb filter with one-pole low-pass damping in the feedback path.
struct CombFilter {
    buffer: Vec<f64>,
    index: usize,
    feedback: f64,
    damp1: f64,
    damp2: f64,
    filter_store: f64,
}

impl CombFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback: 0.0,
            damp1: 0.0,
            damp2: 0.0,
            filter_store: 0.0,
        }
    }

    fn process(&mut self, input: f64) -> f64 {
        let output = self.buffer[self.index];

        self.filter_store = output * self.damp2 + self.filter_store * self.damp1;
        self.buffer[self.index] = input + self.filter_store * self.feedback;

        self.index += 1;
        if self.index >= self.buffer.len() {
            self.index = 0;
        }

        output
    }

    fn set_damp(&mut self, value: f64) {
        self.damp1 = value;
        self.damp2 = 1.0 - value;
    }

    fn set_feedback(&mut self, value: f64) {
        self.feedback = value;
    }
}

/// An allpass filter with fixed 0.5 feedback.
struct AllpassFilter {
    buffer: Vec<f64>,
    index: usize,
    feedback: f64,
}

impl AllpassFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback: 0.5,
        }
    }

    fn process(&mut self, input: f64) -> f64 {
        let bufout = self.buffer[self.index];
        let output = -input + bufout;
        self.buffer[self.index] = input + bufout * self.feedback;

        self.index += 1;
        if self.index >= self.buffer.len() {
            self.index = 0;
        }

        output
    }
}

/// The complete Freeverb processor. User parameters are all in [0, 1];
/// setters clamp.
pub struct Freeverb {
    combs_left: Vec<CombFilter>,
    combs_right: Vec<CombFilter>,
    allpasses_left: Vec<AllpassFilter>,
    allpasses_right: Vec<AllpassFilter>,

    gain: f64,
    room_size: f64,
    damp: f64,
    wet: f64,
    dry: f64,
    width: f64,
}

impl Freeverb {
    /// Creates a reverb with delay lines scaled to the given sample rate.
    pub fn new(sample_rate: u32) -> Self {
        let scale = f64::from(sample_rate) / 44100.0;
        let scaled = |delay: usize| (delay as f64 * scale) as usize;

        let mut reverb = Self {
            combs_left: COMB_DELAYS.iter().map(|&d| CombFilter::new(scaled(d))).collect(),
            combs_right: COMB_DELAYS
                .iter()
                .map(|&d| CombFilter::new(scaled(d) + STEREO_SPREAD))
                .collect(),
            allpasses_left: ALLPASS_DELAYS
                .iter()
                .map(|&d| AllpassFilter::new(scaled(d)))
                .collect(),
            allpasses_right: ALLPASS_DELAYS
                .iter()
                .map(|&d| AllpassFilter::new(scaled(d) + STEREO_SPREAD))
                .collect(),
            gain: FIXED_GAIN,
            room_size: INITIAL_ROOM,
            damp: INITIAL_DAMP,
            wet: INITIAL_WET * SCALE_WET,
            dry: INITIAL_DRY * SCALE_DRY,
            width: INITIAL_WIDTH,
        };
        reverb.update_parameters();
        reverb
    }

    fn update_parameters(&mut self) {
        let feedback = self.room_size * SCALE_ROOM + OFFSET_ROOM;
        let damp = self.damp * SCALE_DAMP;

        for comb in self.combs_left.iter_mut().chain(self.combs_right.iter_mut()) {
            comb.set_feedback(feedback);
            comb.set_damp(damp);
        }
    }

    /// Sets the room size (0 to 1).
    pub fn set_room_size(&mut self, size: f64) {
        self.room_size = size.clamp(0.0, 1.0);
        self.update_parameters();
    }

    pub fn room_size(&self) -> f64 {
        self.room_size
    }

    /// Sets the damping amount (0 to 1).
    pub fn set_damping(&mut self, damp: f64) {
        self.damp = damp.clamp(0.0, 1.0);
        self.update_parameters();
    }

    pub fn damping(&self) -> f64 {
        self.damp
    }

    /// Sets the wet level (0 to 1).
    pub fn set_wet(&mut self, wet: f64) {
        self.wet = wet.clamp(0.0, 1.0) * SCALE_WET;
    }

    pub fn wet(&self) -> f64 {
        self.wet / SCALE_WET
    }

    /// Sets the dry level (0 to 1).
    pub fn set_dry(&mut self, dry: f64) {
        self.dry = dry.clamp(0.0, 1.0) * SCALE_DRY;
    }

    pub fn dry(&self) -> f64 {
        self.dry / SCALE_DRY
    }

    /// Sets the stereo width (0 to 1).
    pub fn set_width(&mut self, width: f64) {
        self.width = width.clamp(0.0, 1.0);
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    /// Processes one stereo sample pair.
    pub fn process_stereo(&mut self, input_left: f64, input_right: f64) -> (f64, f64) {
        let input = (input_left + input_right) * self.gain;

        let mut out_left = 0.0;
        let mut out_right = 0.0;
        for comb in self.combs_left.iter_mut() {
            out_left += comb.process(input);
        }
        for comb in self.combs_right.iter_mut() {
            out_right += comb.process(input);
        }

        for allpass in self.allpasses_left.iter_mut() {
            out_left = allpass.process(out_left);
        }
        for allpass in self.allpasses_right.iter_mut() {
            out_right = allpass.process(out_right);
        }

        let wet_left = out_left * self.wet;
        let wet_right = out_right * self.wet;

        let wet1 = wet_left * (self.width / 2.0 + 0.5);
        let wet2 = wet_right * ((1.0 - self.width) / 2.0);

        (
            input_left * self.dry + wet1 + wet2,
            input_right * self.dry + wet1 + wet2,
        )
    }

    /// Processes a mono sample, feeding both channels and reading back the
    /// left output.
    pub fn process_mono(&mut self, input: f64) -> f64 {
        self.process_stereo(input, input).0
    }
}
