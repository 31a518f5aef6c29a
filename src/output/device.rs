use midir::{MidiOutput, MidiOutputConnection};

use super::sink::OutputSink;
use crate::error::{MidiError, Result};
use crate::events::MidiMessage;

fn device_error(e: impl std::fmt::Display) -> MidiError {
    MidiError::Device(e.to_string())
}

pub fn output_port_names(client_name: &str) -> Result<Vec<String>> {
    let midi_out = MidiOutput::new(client_name).map_err(device_error)?;
    Ok(midi_out
        .ports()
        .iter()
        .map(|p| midi_out.port_name(p).unwrap_or_default())
        .collect())
}

/// Output sink backed by a system MIDI port.
pub struct MidirSink {
    connection: MidiOutputConnection,
    port_name: String,
}

impl MidirSink {
    /// Connects to the first port whose name contains `port_hint`, or to
    /// the first port when there is no hint or no match.
    pub fn connect(client_name: &str, port_hint: Option<&str>) -> Result<Self> {
        let midi_out = MidiOutput::new(client_name).map_err(device_error)?;
        let ports = midi_out.ports();

        let matched = port_hint.and_then(|hint| {
            ports
                .iter()
                .find(|p| midi_out.port_name(p).unwrap_or_default().contains(hint))
        });
        if let (Some(hint), None) = (port_hint, matched) {
            tracing::warn!(hint, "no output port matches, using the first one");
        }
        let port = matched
            .or_else(|| ports.first())
            .ok_or_else(|| MidiError::Device("no MIDI output port found".into()))?;

        let port_name = midi_out.port_name(port).map_err(device_error)?;
        let connection = midi_out
            .connect(port, "midiplay-output")
            .map_err(device_error)?;
        tracing::info!(port = %port_name, "connected to MIDI output");

        Ok(Self {
            connection,
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn send(&mut self, message: MidiMessage) -> Result<()> {
        self.connection
            .send(&message.to_bytes())
            .map_err(device_error)
    }
}

impl OutputSink for MidirSink {
    fn send_note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        self.send(MidiMessage::NoteOn {
            channel,
            note,
            velocity,
        })
    }

    fn send_note_off(&mut self, channel: u8, note: u8) -> Result<()> {
        self.send(MidiMessage::NoteOff { channel, note })
    }

    fn send_program_change(&mut self, channel: u8, program: u8) -> Result<()> {
        self.send(MidiMessage::ProgramChange { channel, program })
    }

    fn send_control_change(&mut self, channel: u8, controller: u8, value: u8) -> Result<()> {
        self.send(MidiMessage::ControlChange {
            channel,
            controller,
            value,
        })
    }
}
