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

//! MIDI input: midir port handling and raw event dispatch into the engine.

use std::error::Error;
use std::sync::Arc;

use midir::{MidiInput, MidiInputConnection};
use midly::live::LiveEvent;
use midly::MidiMessage;
use tracing::{debug, info};

use crate::sampler::Engine;

/// Lists the available MIDI input ports.
pub fn list_devices() -> Result<Vec<String>, Box<dyn Error>> {
    let input = MidiInput::new("sfzplay port scan")?;
    let mut names = Vec::new();
    for port in input.ports() {
        names.push(input.port_name(&port)?);
    }
    Ok(names)
}

/// A live MIDI input connection feeding the engine. Dropping it disconnects.
pub struct InputConnection {
    port_name: String,
    _connection: MidiInputConnection<()>,
}

impl InputConnection {
    /// Returns the name of the connected port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// Connects to a MIDI input port by name, or the first available port, and
/// forwards every raw event to the engine.
pub fn connect(port_name: Option<&str>, engine: Arc<Engine>) -> Result<InputConnection, Box<dyn Error>> {
    let input = MidiInput::new("sfzplay input")?;
    let ports = input.ports();

    let port = match port_name {
        Some(name) => ports
            .iter()
            .find(|port| {
                input
                    .port_name(port)
                    .map(|n| n.trim() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| format!("no MIDI input port found with name {}", name))?,
        None => ports.first().ok_or("no MIDI input ports available")?,
    };
    let port_name = input.port_name(port)?;

    info!(port = port_name, "Connecting MIDI input");

    let connection = input
        .connect(
            port,
            "sfzplay input watcher",
            move |_, raw_event, _| {
                dispatch_raw(&engine, raw_event);
            },
            (),
        )
        .map_err(|e| format!("failed to connect MIDI input: {}", e))?;

    Ok(InputConnection {
        port_name,
        _connection: connection,
    })
}

/// Decodes a raw MIDI event and dispatches it to the engine. A note-on with
/// velocity zero is a note-off; pitch bend is 14-bit, LSB first on the wire.
pub fn dispatch_raw(engine: &Engine, raw: &[u8]) {
    let event = match LiveEvent::parse(raw) {
        Ok(event) => event,
        Err(e) => {
            debug!(err = e.to_string(), "Failed to parse MIDI event");
            return;
        }
    };

    let LiveEvent::Midi { message, .. } = event else {
        return;
    };

    match message {
        MidiMessage::NoteOn { key, vel } => {
            if u8::from(vel) == 0 {
                engine.note_off(u8::from(key));
            } else {
                engine.note_on(u8::from(key), u8::from(vel));
            }
        }
        MidiMessage::NoteOff { key, .. } => {
            engine.note_off(u8::from(key));
        }
        MidiMessage::Controller { controller, value } => {
            engine.control_change(u8::from(controller), u8::from(value));
        }
        MidiMessage::PitchBend { bend } => {
            engine.pitch_bend(bend.as_int());
        }
        _ => {}
    }
}
