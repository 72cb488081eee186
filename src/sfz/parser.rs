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

//! Line-oriented SFZ text parser.
//!
//! Only failing to read the file is an error. Anything wrong inside the file
//! (unknown opcodes, unknown sections, opcodes outside a section, malformed
//! lines) is logged as a warning and dropped.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use super::error::SfzError;
use super::section::{Instrument, Region, Section, SectionKind};

/// The opcodes this sampler understands. Unknown opcodes are dropped with a
/// warning so typos surface in the logs instead of silently changing sound.
const KNOWN_OPCODES: &[&str] = &[
    // Critical core
    "sample",
    // Key/velocity mapping
    "lokey",
    "hikey",
    "lovel",
    "hivel",
    "key",
    // Basic playback
    "volume",
    "pitch_keycenter",
    // Envelope
    "ampeg_attack",
    "ampeg_decay",
    "ampeg_sustain",
    "ampeg_release",
    // Common adjustments
    "tune",
    "pan",
    "transpose",
    "pitch",
    // Looping
    "loop_mode",
    "loop_start",
    "loop_end",
    // Keyswitching
    "sw_lokey",
    "sw_hikey",
    // Groups and exclusion
    "group",
    "off_by",
    // Trigger modes
    "trigger",
    // Pitch bend
    "bend_up",
    "bend_down",
    // Reverb
    "reverb_send",
    "reverb_room_size",
    "reverb_damping",
    "reverb_wet",
    "reverb_dry",
    "reverb_width",
];

/// Where opcodes on the current line land.
enum Target {
    None,
    Global,
    Group(usize),
    Region(usize),
    /// A recognized-but-ignored or unknown section: opcodes are dropped.
    Ignored,
}

/// Parses an SFZ file into an [`Instrument`].
pub fn parse_sfz_file(path: &Path) -> Result<Instrument, SfzError> {
    debug!(path = ?path, "Parsing SFZ file");

    let content = fs::read_to_string(path).map_err(|source| SfzError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let instrument = parse_sfz(&content);

    debug!(
        path = ?path,
        regions = instrument.regions.len(),
        groups = instrument.groups.len(),
        "SFZ parse complete"
    );

    Ok(instrument)
}

/// Parses SFZ text. Split from the file wrapper so tests can feed strings.
pub fn parse_sfz(content: &str) -> Instrument {
    let mut instrument = Instrument::default();
    let mut target = Target::None;
    let mut current_group: Option<usize> = None;

    for (line_number, raw_line) in content.lines().enumerate() {
        let line_number = line_number + 1;
        let line = raw_line.trim();

        // Skip empty lines and comments.
        if line.is_empty() || line.starts_with("//") {
            continue;
        }

        // Section headers.
        if line.starts_with('<') && line.ends_with('>') {
            let name = line.trim_matches(['<', '>']).to_lowercase();
            target = match name.as_str() {
                "global" => {
                    if instrument.global.is_none() {
                        instrument.global = Some(Section::new(SectionKind::Global));
                    }
                    Target::Global
                }
                "group" => {
                    instrument.groups.push(Section::new(SectionKind::Group));
                    current_group = Some(instrument.groups.len() - 1);
                    Target::Group(instrument.groups.len() - 1)
                }
                "region" => {
                    instrument.regions.push(Region {
                        section: Section::new(SectionKind::Region),
                        group: current_group,
                    });
                    Target::Region(instrument.regions.len() - 1)
                }
                _ => {
                    warn!(line = line_number, section = name, "Unknown section type");
                    Target::Ignored
                }
            };
            continue;
        }

        parse_opcode_line(line, line_number, &mut instrument, &target);
    }

    instrument
}

/// Parses a line of whitespace-separated `name=value` opcodes into the
/// current section. A `//` token ends the line early.
fn parse_opcode_line(line: &str, line_number: usize, instrument: &mut Instrument, target: &Target) {
    for part in line.split_whitespace() {
        if part.starts_with("//") {
            break;
        }

        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        let name = name.trim().to_lowercase();
        // The value runs to the next whitespace or an inline comment.
        let value = match value.find("//") {
            Some(comment) => value[..comment].trim(),
            None => value.trim(),
        };

        if !KNOWN_OPCODES.contains(&name.as_str()) {
            warn!(line = line_number, opcode = name, "Unknown opcode");
            continue;
        }

        let section = match target {
            Target::Global => instrument.global.as_mut(),
            Target::Group(idx) => instrument.groups.get_mut(*idx),
            Target::Region(idx) => instrument.regions.get_mut(*idx).map(|r| &mut r.section),
            Target::Ignored => continue,
            Target::None => {
                warn!(line = line_number, opcode = name, "Opcode outside of any section");
                continue;
            }
        };

        if let Some(section) = section {
            section.insert(&name, value);
        }
    }
}
