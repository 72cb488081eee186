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

//! Opcode storage and the Region → Group → Global inheritance model.
//!
//! Opcode values are kept as raw text and parsed on demand through typed
//! accessors with caller-supplied defaults, so a malformed value degrades to
//! the default instead of failing the whole instrument.

use std::collections::HashMap;

use tracing::warn;

use super::note::note_to_midi;

/// The kind of section an opcode bag belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionKind {
    Global,
    Group,
    Region,
}

/// A single SFZ section: a typed bag of opcodes. Immutable after parsing.
#[derive(Clone, Debug)]
pub struct Section {
    kind: SectionKind,
    opcodes: HashMap<String, String>,
}

impl Section {
    /// Creates an empty section of the given kind.
    pub fn new(kind: SectionKind) -> Self {
        Self {
            kind,
            opcodes: HashMap::new(),
        }
    }

    /// Stores an opcode. Names are expected to be case-folded by the parser.
    pub fn insert(&mut self, name: &str, value: &str) {
        self.opcodes.insert(name.to_string(), value.to_string());
    }

    /// Returns the raw value of an opcode defined directly on this section.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.opcodes.get(name).map(String::as_str)
    }

    /// Returns an integer opcode defined directly on this section, or the
    /// default if absent or malformed.
    pub fn get_i32(&self, name: &str, default: i32) -> i32 {
        match self.opcodes.get(name) {
            Some(value) => parse_i32(name, value, default),
            None => default,
        }
    }

    /// Returns a float opcode defined directly on this section, or the
    /// default if absent or malformed.
    pub fn get_f64(&self, name: &str, default: f64) -> f64 {
        match self.opcodes.get(name) {
            Some(value) => parse_f64(name, value, default),
            None => default,
        }
    }

    /// Returns the number of opcodes stored on this section.
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    /// Returns true if this section holds no opcodes.
    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }
}

/// A region and the index of the group it was parsed under, if any. The
/// group and global back-references are stable indices resolved through the
/// owning [`Instrument`].
#[derive(Clone, Debug)]
pub struct Region {
    pub section: Section,
    pub group: Option<usize>,
}

/// A parsed SFZ instrument: one optional global section, the groups and the
/// regions in file order. Region order is the tie-break for equally matching
/// regions, so it is preserved exactly.
#[derive(Clone, Debug, Default)]
pub struct Instrument {
    pub global: Option<Section>,
    pub groups: Vec<Section>,
    pub regions: Vec<Region>,
}

impl Instrument {
    /// Returns the inheritance scope for the given region: the region's own
    /// opcodes, its parent group (if any) and the global section.
    pub fn scope<'a>(&'a self, region: &'a Region) -> Scope<'a> {
        Scope {
            region: &region.section,
            group: region.group.and_then(|idx| self.groups.get(idx)),
            global: self.global.as_ref(),
        }
    }
}

/// An inherited-lookup view over a region. Lookups try the region, then the
/// parent group, then the global section, returning the first definition.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    region: &'a Section,
    group: Option<&'a Section>,
    global: Option<&'a Section>,
}

impl<'a> Scope<'a> {
    fn lookup(&self, name: &str) -> Option<&'a str> {
        if let Some(value) = self.region.get_str(name) {
            return Some(value);
        }
        if let Some(value) = self.group.and_then(|g| g.get_str(name)) {
            return Some(value);
        }
        self.global.and_then(|g| g.get_str(name))
    }

    /// Returns the inherited raw value of an opcode, if any scope defines it.
    pub fn get_str(&self, name: &str) -> Option<&'a str> {
        self.lookup(name)
    }

    /// Returns an inherited integer opcode, or the default.
    pub fn get_i32(&self, name: &str, default: i32) -> i32 {
        match self.lookup(name) {
            Some(value) => parse_i32(name, value, default),
            None => default,
        }
    }

    /// Returns an inherited float opcode, or the default.
    pub fn get_f64(&self, name: &str, default: f64) -> f64 {
        match self.lookup(name) {
            Some(value) => parse_f64(name, value, default),
            None => default,
        }
    }

    /// Returns an inherited note-typed opcode. Values may be numeric MIDI
    /// note numbers or note names like `c4`.
    pub fn get_note(&self, name: &str, default: i32) -> i32 {
        match self.lookup(name) {
            Some(value) => {
                if let Ok(number) = value.parse::<i32>() {
                    return number;
                }
                match note_to_midi(value) {
                    Some(note) => note,
                    None => {
                        warn!(opcode = name, value, "Invalid note value for opcode");
                        default
                    }
                }
            }
            None => default,
        }
    }
}

fn parse_i32(name: &str, value: &str, default: i32) -> i32 {
    match value.parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(opcode = name, value, "Invalid integer value for opcode");
            default
        }
    }
}

fn parse_f64(name: &str, value: &str, default: f64) -> f64 {
    match value.parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(opcode = name, value, "Invalid float value for opcode");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section_with(kind: SectionKind, opcodes: &[(&str, &str)]) -> Section {
        let mut section = Section::new(kind);
        for (name, value) in opcodes {
            section.insert(name, value);
        }
        section
    }

    #[test]
    fn test_typed_accessors() {
        let section = section_with(
            SectionKind::Region,
            &[
                ("lokey", "36"),
                ("volume", "-6.5"),
                ("sample", "kick.wav"),
                ("hivel", "not-a-number"),
            ],
        );

        assert_eq!(section.get_str("sample"), Some("kick.wav"));
        assert_eq!(section.get_i32("lokey", 0), 36);
        assert_eq!(section.get_f64("volume", 0.0), -6.5);

        // Malformed and missing values fall back to the default.
        assert_eq!(section.get_i32("hivel", 127), 127);
        assert_eq!(section.get_i32("lovel", 1), 1);
        assert_eq!(section.get_f64("pan", 0.0), 0.0);
    }

    #[test]
    fn test_inheritance_closest_scope_wins() {
        let mut instrument = Instrument {
            global: Some(section_with(
                SectionKind::Global,
                &[("volume", "-12"), ("ampeg_release", "0.5"), ("tune", "10")],
            )),
            groups: vec![section_with(
                SectionKind::Group,
                &[("volume", "-6"), ("lovel", "64")],
            )],
            regions: Vec::new(),
        };
        instrument.regions.push(Region {
            section: section_with(SectionKind::Region, &[("volume", "0")]),
            group: Some(0),
        });

        let scope = instrument.scope(&instrument.regions[0]);

        // Region wins over group and global.
        assert_eq!(scope.get_f64("volume", -99.0), 0.0);
        // Group wins over global when the region is silent.
        assert_eq!(scope.get_i32("lovel", 1), 64);
        // Global is consulted last.
        assert_eq!(scope.get_f64("ampeg_release", 0.1), 0.5);
        assert_eq!(scope.get_i32("tune", 0), 10);
        // Nothing defines it: the default applies.
        assert_eq!(scope.get_i32("transpose", 0), 0);
    }

    #[test]
    fn test_inheritance_without_group() {
        let mut instrument = Instrument {
            global: Some(section_with(SectionKind::Global, &[("hivel", "100")])),
            groups: Vec::new(),
            regions: Vec::new(),
        };
        instrument.regions.push(Region {
            section: section_with(SectionKind::Region, &[]),
            group: None,
        });

        let scope = instrument.scope(&instrument.regions[0]);
        assert_eq!(scope.get_i32("hivel", 127), 100);
        assert_eq!(scope.get_i32("lovel", 1), 1);
    }

    #[test]
    fn test_note_typed_values() {
        let section = section_with(
            SectionKind::Region,
            &[("key", "c4"), ("sw_lokey", "24"), ("pitch_keycenter", "xyz")],
        );
        let instrument = Instrument {
            global: None,
            groups: Vec::new(),
            regions: vec![Region {
                section,
                group: None,
            }],
        };

        let scope = instrument.scope(&instrument.regions[0]);
        assert_eq!(scope.get_note("key", -1), 60);
        assert_eq!(scope.get_note("sw_lokey", -1), 24);
        assert_eq!(scope.get_note("pitch_keycenter", -1), -1);
        assert_eq!(scope.get_note("sw_hikey", -1), -1);
    }
}
