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

//! The polyphonic voice engine: event intake, region matching, voice
//! allocation and buffer rendering.
//!
//! Event intake and rendering may run on different threads; both take a
//! short critical section on the engine state. Nothing inside the lock
//! performs I/O, parsing or sample decoding, and the render path does not
//! allocate.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::samples::Sample;
use crate::sfz::{Instrument, Region, Scope};

use super::reverb::Freeverb;
use super::voice::{TriggerMode, Voice};

/// Default polyphony cap. Note-ons past the cap evict the oldest voice.
pub const DEFAULT_MAX_VOICES: usize = 32;

/// Mutable engine state shared between the control plane and the render
/// thread.
struct EngineState {
    voices: Vec<Voice>,
    max_voices: usize,
    sample_rate: u32,
    /// The most recent note that fell inside any region's keyswitch window.
    current_keyswitch: u8,
    /// Held-note count driving `first`/`legato` trigger modes.
    active_note_count: u32,
    /// 14-bit pitch bend in [-8192, +8191].
    pitch_bend: i16,
    reverb: Freeverb,
    /// Global reverb send level in [0, 1]; 0 bypasses the reverb entirely.
    reverb_send: f64,
}

/// The voice engine for one instrument. Samples are resolved per region at
/// construction so the event path never touches the cache.
pub struct Engine {
    instrument: Instrument,
    region_samples: Vec<Option<Arc<Sample>>>,
    state: Mutex<EngineState>,
}

impl Engine {
    /// Creates an engine. `region_samples` holds the decoded sample for each
    /// region by index; regions without one never produce voices.
    pub fn new(
        instrument: Instrument,
        region_samples: Vec<Option<Arc<Sample>>>,
        sample_rate: u32,
        max_voices: usize,
    ) -> Self {
        debug_assert_eq!(instrument.regions.len(), region_samples.len());
        Self {
            instrument,
            region_samples,
            state: Mutex::new(EngineState {
                voices: Vec::with_capacity(max_voices),
                max_voices,
                sample_rate,
                current_keyswitch: 0,
                active_note_count: 0,
                pitch_bend: 0,
                reverb: Freeverb::new(sample_rate),
                reverb_send: 0.0,
            }),
        }
    }

    /// Returns the engine sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.state.lock().sample_rate
    }

    /// Re-targets the engine to a new sample rate, rebuilding the reverb
    /// delay lines. Called by the transport before streaming starts, never
    /// from the audio callback.
    pub fn set_sample_rate(&self, sample_rate: u32) {
        let mut state = self.state.lock();
        if state.sample_rate == sample_rate {
            return;
        }
        debug!(sample_rate, "Engine sample rate changed");
        state.sample_rate = sample_rate;

        let mut reverb = Freeverb::new(sample_rate);
        reverb.set_room_size(state.reverb.room_size());
        reverb.set_damping(state.reverb.damping());
        reverb.set_wet(state.reverb.wet());
        reverb.set_dry(state.reverb.dry());
        reverb.set_width(state.reverb.width());
        state.reverb = reverb;
    }

    /// Handles a note-on: updates the keyswitch state, counts the note and
    /// starts a voice for every matching region.
    pub fn note_on(&self, note: u8, velocity: u8) {
        let mut state = self.state.lock();
        debug!(note, velocity, "Note on");

        self.update_keyswitch(&mut state, note);
        state.active_note_count += 1;

        for (index, region) in self.instrument.regions.iter().enumerate() {
            if self.region_matches(&state, region, note, velocity) {
                self.start_voice(&mut state, index, region, note, velocity, true);
            }
        }
    }

    /// Handles a note-off: releases matching voices and fires any
    /// release-trigger regions for the note.
    pub fn note_off(&self, note: u8) {
        let mut state = self.state.lock();
        debug!(note, "Note off");

        state.active_note_count = state.active_note_count.saturating_sub(1);

        for voice in state.voices.iter_mut() {
            if voice.note() == note && voice.is_note_on() {
                voice.release();
            }
        }

        // Release triggers get a fresh voice with a moderate velocity and no
        // note-on flag, so they play out without waiting for a note-off.
        for (index, region) in self.instrument.regions.iter().enumerate() {
            let scope = self.instrument.scope(region);
            if TriggerMode::from_opcode(scope.get_str("trigger").unwrap_or("")) != TriggerMode::Release
            {
                continue;
            }
            if key_matches(&scope, note) && keyswitch_matches(&scope, state.current_keyswitch) {
                self.start_voice(&mut state, index, region, note, 64, false);
            }
        }
    }

    /// Handles a MIDI control change. CC 91-95 map to the reverb parameters;
    /// the 0-127 value maps linearly onto [0, 1].
    pub fn control_change(&self, cc: u8, value: u8) {
        let amount = f64::from(value) / 127.0;
        match cc {
            91 => self.set_reverb_send(amount),
            92 => self.set_reverb_room_size(amount),
            93 => self.set_reverb_damping(amount),
            94 => self.set_reverb_wet(amount),
            95 => self.set_reverb_dry(amount),
            _ => debug!(cc, value, "Unhandled MIDI CC"),
        }
    }

    /// Sets the 14-bit pitch bend value, clamped to [-8192, +8191]. Applied
    /// to voices created after this call.
    pub fn pitch_bend(&self, value: i16) {
        let mut state = self.state.lock();
        state.pitch_bend = value.clamp(-8192, 8191);
        debug!(bend = state.pitch_bend, "Pitch bend");
    }

    /// Renders the mix into the output buffer: every active voice is summed
    /// in insertion order, then the reverb bus runs if the send is nonzero.
    pub fn render(&self, output: &mut [f32]) {
        output.fill(0.0);

        let mut state = self.state.lock();
        let state = &mut *state;

        for voice in state.voices.iter_mut() {
            voice.render(output);
        }
        state.voices.retain(|v| v.is_active());

        if state.reverb_send > 0.0 {
            let send = state.reverb_send;
            for sample in output.iter_mut() {
                let input = f64::from(*sample);
                let reverb_out = state.reverb.process_mono(input * send);
                let mixed = input * (1.0 - send) + reverb_out;
                *sample = mixed.clamp(-1.0, 1.0) as f32;
            }
        }
    }

    /// Returns the number of active voices.
    pub fn active_voice_count(&self) -> usize {
        self.state.lock().voices.len()
    }

    pub fn set_reverb_send(&self, send: f64) {
        self.state.lock().reverb_send = send.clamp(0.0, 1.0);
    }

    pub fn reverb_send(&self) -> f64 {
        self.state.lock().reverb_send
    }

    pub fn set_reverb_room_size(&self, size: f64) {
        self.state.lock().reverb.set_room_size(size);
    }

    pub fn reverb_room_size(&self) -> f64 {
        self.state.lock().reverb.room_size()
    }

    pub fn set_reverb_damping(&self, damping: f64) {
        self.state.lock().reverb.set_damping(damping);
    }

    pub fn reverb_damping(&self) -> f64 {
        self.state.lock().reverb.damping()
    }

    pub fn set_reverb_wet(&self, wet: f64) {
        self.state.lock().reverb.set_wet(wet);
    }

    pub fn reverb_wet(&self) -> f64 {
        self.state.lock().reverb.wet()
    }

    pub fn set_reverb_dry(&self, dry: f64) {
        self.state.lock().reverb.set_dry(dry);
    }

    pub fn reverb_dry(&self) -> f64 {
        self.state.lock().reverb.dry()
    }

    pub fn set_reverb_width(&self, width: f64) {
        self.state.lock().reverb.set_width(width);
    }

    pub fn reverb_width(&self) -> f64 {
        self.state.lock().reverb.width()
    }

    /// Records the note as the current keyswitch if it falls inside any
    /// region's keyswitch window.
    fn update_keyswitch(&self, state: &mut EngineState, note: u8) {
        for region in &self.instrument.regions {
            let scope = self.instrument.scope(region);
            let sw_lokey = scope.get_note("sw_lokey", -1);
            let sw_hikey = scope.get_note("sw_hikey", -1);
            if sw_lokey >= 0 && sw_hikey >= 0 && (sw_lokey..=sw_hikey).contains(&i32::from(note)) {
                state.current_keyswitch = note;
                debug!(keyswitch = note, "Keyswitch updated");
                return;
            }
        }
    }

    /// Checks whether a region responds to a note-on. The note count has
    /// already been incremented, so `first` means exactly one held note.
    fn region_matches(
        &self,
        state: &EngineState,
        region: &Region,
        note: u8,
        velocity: u8,
    ) -> bool {
        let scope = self.instrument.scope(region);

        if !key_matches(&scope, note) {
            return false;
        }

        let lovel = scope.get_i32("lovel", 1);
        let hivel = scope.get_i32("hivel", 127);
        if i32::from(velocity) < lovel || i32::from(velocity) > hivel {
            return false;
        }

        if !keyswitch_matches(&scope, state.current_keyswitch) {
            return false;
        }

        match TriggerMode::from_opcode(scope.get_str("trigger").unwrap_or("")) {
            TriggerMode::Attack => true,
            TriggerMode::First => state.active_note_count <= 1,
            TriggerMode::Legato => state.active_note_count >= 2,
            // Release regions fire from the note-off path only.
            TriggerMode::Release => false,
        }
    }

    /// Builds and registers a voice for a matched region, enforcing group
    /// exclusion and the polyphony cap.
    fn start_voice(
        &self,
        state: &mut EngineState,
        region_index: usize,
        region: &Region,
        note: u8,
        velocity: u8,
        note_on: bool,
    ) {
        let Some(sample) = self.region_samples[region_index].clone() else {
            debug!(region = region_index, "Region has no sample; skipping");
            return;
        };

        let scope = self.instrument.scope(region);
        let voice = Voice::new(
            sample,
            region_index,
            &scope,
            note,
            velocity,
            note_on,
            state.pitch_bend,
            state.sample_rate,
        );

        // Group exclusion is pre-emptive: starting a voice in group g cuts
        // every voice declaring off_by=g.
        let group = voice.group();
        if group > 0 {
            state.voices.retain(|v| {
                if v.off_by() == group {
                    debug!(note = v.note(), group, "Voice cut by group exclusion");
                    false
                } else {
                    true
                }
            });
        }

        if state.voices.len() >= state.max_voices {
            warn!(
                max_voices = state.max_voices,
                "Polyphony cap reached, evicting oldest voice"
            );
            state.voices.remove(0);
        }

        debug!(note, region = region_index, "Voice started");
        state.voices.push(voice);
    }

    #[cfg(test)]
    pub(crate) fn pitch_bend_value(&self) -> i16 {
        self.state.lock().pitch_bend
    }

    #[cfg(test)]
    pub(crate) fn has_voice_for_note(&self, note: u8) -> bool {
        self.state.lock().voices.iter().any(|v| v.note() == note)
    }

    #[cfg(test)]
    pub(crate) fn has_voice_for_region(&self, region_index: usize) -> bool {
        self.state
            .lock()
            .voices
            .iter()
            .any(|v| v.region_index() == region_index)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("regions", &self.instrument.regions.len())
            .field("active_voices", &self.active_voice_count())
            .finish()
    }
}

/// Checks the key predicate: a defined `key` pins both ends of the range.
fn key_matches(scope: &Scope, note: u8) -> bool {
    let key = scope.get_note("key", -1);
    let (lokey, hikey) = if key >= 0 {
        (key, key)
    } else {
        (scope.get_note("lokey", 0), scope.get_note("hikey", 127))
    };
    (lokey..=hikey).contains(&i32::from(note))
}

/// Checks the keyswitch predicate: regions gate on it only when both ends of
/// the window are defined.
fn keyswitch_matches(scope: &Scope, current_keyswitch: u8) -> bool {
    let sw_lokey = scope.get_note("sw_lokey", -1);
    let sw_hikey = scope.get_note("sw_hikey", -1);
    if sw_lokey >= 0 && sw_hikey >= 0 {
        (sw_lokey..=sw_hikey).contains(&i32::from(current_keyswitch))
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn test_unity_playback() {
        let sample = testutil::sine_sample(44100, 1);
        let engine = testutil::build_engine(
            "<region>\nsample=s.wav\nkey=60\npitch_keycenter=60\n",
            sample.clone(),
        );

        engine.note_on(60, 127);
        assert_eq!(engine.active_voice_count(), 1);

        let mut output = vec![0.0f32; 4096];
        engine.render(&mut output);

        // Past the 1 ms attack the output tracks the source exactly: unity
        // pitch, unity gain, sustain at 100%.
        for i in 50..4096 {
            assert!(
                (f64::from(output[i]) - sample.data()[i]).abs() < 1e-4,
                "frame {} diverged",
                i
            );
        }
        // The attack ramp is still rising near the start.
        assert!(f64::from(output[10]).abs() < sample.data()[10].abs() + 1e-9);
    }

    #[test]
    fn test_note_without_matching_region_is_skipped() {
        let engine = testutil::build_engine(
            "<region>\nsample=s.wav\nkey=60\n",
            testutil::sine_sample(1024, 1),
        );
        engine.note_on(61, 100);
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn test_key_matching_ignores_range_when_key_is_set() {
        // A defined key pins the range regardless of lokey/hikey.
        let engine = testutil::build_engine(
            "<region>\nsample=s.wav\nkey=60\nlokey=0\nhikey=127\nlovel=20\nhivel=100\n",
            testutil::sine_sample(1024, 1),
        );

        engine.note_on(72, 50);
        assert_eq!(engine.active_voice_count(), 0);

        engine.note_on(60, 10);
        assert_eq!(engine.active_voice_count(), 0);
        engine.note_on(60, 101);
        assert_eq!(engine.active_voice_count(), 0);

        engine.note_on(60, 20);
        engine.note_on(60, 100);
        assert_eq!(engine.active_voice_count(), 2);
    }

    #[test]
    fn test_velocity_scaling_of_parallel_regions() {
        let sample = testutil::sine_sample(44100, 1);
        let sfz = "<region>\nsample=s.wav\nkey=60\npitch_keycenter=60\nvolume=0\n\
                   <region>\nsample=s.wav\nkey=60\npitch_keycenter=60\nvolume=-6\n";
        let engine = testutil::build_engine(sfz, sample.clone());

        engine.note_on(60, 127);
        assert_eq!(engine.active_voice_count(), 2);

        let mut output = vec![0.0f32; 2048];
        engine.render(&mut output);

        let expected_gain = 1.0 + 10.0_f64.powf(-6.0 / 20.0);
        for i in 100..2048 {
            let expected = sample.data()[i] * expected_gain;
            assert!(
                (f64::from(output[i]) - expected).abs() < 1e-3,
                "frame {} diverged",
                i
            );
        }
    }

    #[test]
    fn test_group_exclusion() {
        // A note-on in group 1 removes every voice declaring off_by=1.
        let sfz = "<region>\nsample=s.wav\nkey=60\ngroup=1\n\
                   <region>\nsample=s.wav\nkey=62\noff_by=1\n";
        let engine = testutil::build_engine(sfz, testutil::sine_sample(44100, 1));

        engine.note_on(62, 100);
        assert!(engine.has_voice_for_note(62));

        let mut output = vec![0.0f32; 100];
        engine.render(&mut output);

        engine.note_on(60, 100);
        assert!(!engine.has_voice_for_note(62));
        assert!(engine.has_voice_for_note(60));
    }

    #[test]
    fn test_keyswitch_gate() {
        let sfz = "<region>\nsample=s.wav\nkey=60\nsw_lokey=24\nsw_hikey=24\n\
                   <region>\nsample=s.wav\nkey=60\nsw_lokey=25\nsw_hikey=25\n";
        let engine = testutil::build_engine(sfz, testutil::sine_sample(1024, 1));

        engine.note_on(24, 1);
        engine.note_on(60, 100);
        assert!(engine.has_voice_for_region(0));
        assert!(!engine.has_voice_for_region(1));

        engine.note_on(25, 1);
        engine.note_on(60, 100);
        assert!(engine.has_voice_for_region(1));
    }

    #[test]
    fn test_keyswitch_absent_means_no_gate() {
        let engine = testutil::build_engine(
            "<region>\nsample=s.wav\nkey=60\n",
            testutil::sine_sample(1024, 1),
        );
        engine.note_on(60, 100);
        assert_eq!(engine.active_voice_count(), 1);
    }

    #[test]
    fn test_first_and_legato_triggers() {
        let sfz = "<region>\nsample=s.wav\nlokey=0\nhikey=127\ntrigger=first\n\
                   <region>\nsample=s.wav\nlokey=0\nhikey=127\ntrigger=legato\n";
        let engine = testutil::build_engine(sfz, testutil::sine_sample(44100, 1));

        // First note: only the `first` region fires.
        engine.note_on(60, 100);
        assert!(engine.has_voice_for_region(0));
        assert!(!engine.has_voice_for_region(1));

        // Second note while the first is held: only `legato` fires.
        engine.note_on(64, 100);
        assert!(engine.has_voice_for_region(1));

        // Release both; the next note is `first` again.
        engine.note_off(60);
        engine.note_off(64);
        let mut output = vec![0.0f32; 8192];
        engine.render(&mut output);
        engine.render(&mut output);

        let before = engine.active_voice_count();
        engine.note_on(62, 100);
        assert!(engine.active_voice_count() > before);
        assert!(engine.has_voice_for_note(62));
    }

    #[test]
    fn test_release_trigger_fires_on_note_off() {
        let sfz = "<region>\nsample=s.wav\nkey=60\ntrigger=release\n";
        let engine = testutil::build_engine(sfz, testutil::sine_sample(44100, 1));

        engine.note_on(60, 100);
        assert_eq!(engine.active_voice_count(), 0);

        engine.note_off(60);
        assert_eq!(engine.active_voice_count(), 1);

        // The release voice has note_on=false: a further note-off for the
        // same note must not re-release or remove it.
        engine.note_off(60);
        let mut output = vec![0.0f32; 512];
        engine.render(&mut output);
        assert_eq!(engine.active_voice_count(), 2);
    }

    #[test]
    fn test_polyphony_cap_evicts_oldest() {
        // The voice count never exceeds the cap.
        let instrument = crate::sfz::parser::parse_sfz("<region>\nsample=s.wav\nlokey=0\nhikey=127\n");
        let samples = vec![Some(testutil::sine_sample(44100, 1))];
        let engine = Engine::new(instrument, samples, 44100, 4);

        for note in 60..70u8 {
            engine.note_on(note, 100);
            assert!(engine.active_voice_count() <= 4);
        }
        assert_eq!(engine.active_voice_count(), 4);

        // The oldest notes were evicted FIFO.
        assert!(!engine.has_voice_for_note(60));
        assert!(!engine.has_voice_for_note(65));
        assert!(engine.has_voice_for_note(66));
        assert!(engine.has_voice_for_note(69));
    }

    #[test]
    fn test_voice_removed_after_release_completes() {
        // After note-off plus the release time, the voice is gone.
        let sfz = "<region>\nsample=s.wav\nkey=60\nloop_mode=loop_continuous\nampeg_release=0.01\n";
        let engine = testutil::build_engine(sfz, testutil::sine_sample(44100, 1));

        engine.note_on(60, 100);
        let mut output = vec![0.0f32; 512];
        engine.render(&mut output);
        assert_eq!(engine.active_voice_count(), 1);

        engine.note_off(60);
        // 10 ms at 44.1 kHz is 441 samples; one 512-frame buffer covers it.
        engine.render(&mut output);
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn test_looping_voice_survives_long_render() {
        let sfz = "<region>\nsample=s.wav\nkey=60\nloop_mode=loop_continuous\nloop_start=100\nloop_end=200\n";
        let engine = testutil::build_engine(sfz, testutil::sine_sample(1000, 1));

        engine.note_on(60, 100);
        let mut output = vec![0.0f32; 512];
        for _ in 0..20 {
            engine.render(&mut output);
        }
        // Ten thousand frames in, the loop is still feeding the voice.
        assert_eq!(engine.active_voice_count(), 1);
    }

    #[test]
    fn test_reverb_passthrough_when_send_is_zero() {
        // With send=0 the rendered buffer is the pre-reverb mix bitwise,
        // no matter how the reverb is configured.
        let sfz = "<region>\nsample=s.wav\nkey=60\npitch_keycenter=60\n";
        let sample = testutil::sine_sample(44100, 1);

        let plain = testutil::build_engine(sfz, sample.clone());
        let configured = testutil::build_engine(sfz, sample);
        configured.set_reverb_room_size(1.0);
        configured.set_reverb_wet(1.0);
        configured.set_reverb_damping(0.1);

        plain.note_on(60, 127);
        configured.note_on(60, 127);

        let mut a = vec![0.0f32; 2048];
        let mut b = vec![0.0f32; 2048];
        plain.render(&mut a);
        configured.render(&mut b);

        assert_eq!(a, b);
    }

    #[test]
    fn test_reverb_send_changes_output() {
        let sfz = "<region>\nsample=s.wav\nkey=60\npitch_keycenter=60\n";
        let sample = testutil::sine_sample(44100, 1);

        let dry = testutil::build_engine(sfz, sample.clone());
        let wet = testutil::build_engine(sfz, sample);
        wet.set_reverb_send(0.5);
        wet.set_reverb_wet(1.0);

        dry.note_on(60, 127);
        wet.note_on(60, 127);

        let mut a = vec![0.0f32; 4096];
        let mut b = vec![0.0f32; 4096];
        dry.render(&mut a);
        wet.render(&mut b);

        assert_ne!(a, b);
        // Post-reverb output stays in [-1, +1].
        assert!(b.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_control_change_reverb_mapping() {
        let engine = testutil::build_engine(
            "<region>\nsample=s.wav\nkey=60\n",
            testutil::sine_sample(1024, 1),
        );

        engine.control_change(91, 127);
        assert_eq!(engine.reverb_send(), 1.0);
        engine.control_change(92, 0);
        assert_eq!(engine.reverb_room_size(), 0.0);
        engine.control_change(93, 127);
        assert_eq!(engine.reverb_damping(), 1.0);
        engine.control_change(94, 64);
        assert!((engine.reverb_wet() - 64.0 / 127.0).abs() < 1e-9);
        engine.control_change(95, 32);
        assert!((engine.reverb_dry() - 32.0 / 127.0).abs() < 1e-9);

        // An unmapped CC leaves everything untouched.
        engine.control_change(1, 127);
        assert_eq!(engine.reverb_send(), 1.0);
    }

    #[test]
    fn test_pitch_bend_is_clamped_and_applied_to_new_voices() {
        let sfz = "<region>\nsample=s.wav\nkey=60\npitch_keycenter=60\n";
        let sample = testutil::sine_sample(44100, 1);

        let bent = testutil::build_engine(sfz, sample.clone());
        bent.pitch_bend(8192); // clamps to 8191
        bent.note_on(60, 127);

        let straight = testutil::build_engine(sfz, sample);
        straight.note_on(60, 127);

        let mut a = vec![0.0f32; 1024];
        let mut b = vec![0.0f32; 1024];
        bent.render(&mut a);
        straight.render(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_sample_rate_change_preserves_reverb_parameters() {
        let engine = testutil::build_engine(
            "<region>\nsample=s.wav\nkey=60\n",
            testutil::sine_sample(1024, 1),
        );
        engine.set_reverb_room_size(0.8);
        engine.set_reverb_wet(0.4);

        engine.set_sample_rate(48000);
        assert_eq!(engine.sample_rate(), 48000);
        assert!((engine.reverb_room_size() - 0.8).abs() < 1e-9);
        assert!((engine.reverb_wet() - 0.4).abs() < 1e-9);
    }
}
