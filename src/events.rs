use serde::{Deserialize, Serialize};

use crate::error::{MidiError, Result};

pub const MAX_CHANNEL: u8 = 15;
pub const MAX_DATA: u8 = 127;
pub const DEFAULT_VELOCITY: u8 = 64;
/// Controller 123, "all notes off".
pub const ALL_NOTES_OFF: u8 = 123;

pub(crate) fn check_channel(channel: u8) -> Result<u8> {
    if channel > MAX_CHANNEL {
        return Err(MidiError::invalid("channel", channel, "0..=15"));
    }
    Ok(channel)
}

pub(crate) fn check_data(field: &'static str, value: u8) -> Result<u8> {
    if value > MAX_DATA {
        return Err(MidiError::invalid(field, value, "0..=127"));
    }
    Ok(value)
}

pub(crate) fn check_time(field: &'static str, seconds: f64) -> Result<f64> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(MidiError::invalid(field, seconds, "a finite number >= 0"));
    }
    Ok(seconds)
}

pub(crate) fn check_duration(seconds: f64) -> Result<f64> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(MidiError::invalid("duration", seconds, "a finite number > 0"));
    }
    Ok(seconds)
}

/// The four messages the output sink understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ProgramChange { channel: u8, program: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
}

impl MidiMessage {
    pub fn channel(&self) -> u8 {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ControlChange { channel, .. } => channel,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_channel(self.channel())?;
        match *self {
            MidiMessage::NoteOn { note, velocity, .. } => {
                check_data("note", note)?;
                check_data("velocity", velocity)?;
            }
            MidiMessage::NoteOff { note, .. } => {
                check_data("note", note)?;
            }
            MidiMessage::ProgramChange { program, .. } => {
                check_data("program", program)?;
            }
            MidiMessage::ControlChange {
                controller, value, ..
            } => {
                check_data("controller", controller)?;
                check_data("value", value)?;
            }
        }
        Ok(())
    }

    /// A note-on with velocity 0 is a release on the wire.
    pub fn sounds_note(&self) -> Option<(u8, u8)> {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } if velocity > 0 => Some((channel, note)),
            _ => None,
        }
    }

    pub fn releases_note(&self) -> Option<(u8, u8)> {
        match *self {
            MidiMessage::NoteOff { channel, note } => Some((channel, note)),
            MidiMessage::NoteOn {
                channel,
                note,
                velocity: 0,
            } => Some((channel, note)),
            _ => None,
        }
    }

    pub fn status(&self) -> u8 {
        let kind = match self {
            MidiMessage::NoteOff { .. } => 0x80,
            MidiMessage::NoteOn { .. } => 0x90,
            MidiMessage::ControlChange { .. } => 0xB0,
            MidiMessage::ProgramChange { .. } => 0xC0,
        };
        kind | (self.channel() & 0x0F)
    }

    pub fn data(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOn { note, velocity, .. } => vec![note, velocity],
            // Release velocity is not modelled; 64 is the conventional default.
            MidiMessage::NoteOff { note, .. } => vec![note, 0x40],
            MidiMessage::ProgramChange { program, .. } => vec![program],
            MidiMessage::ControlChange {
                controller, value, ..
            } => vec![controller, value],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(3);
        bytes.push(self.status());
        bytes.extend(self.data());
        bytes
    }
}

/// A message stamped with its absolute time in seconds.
///
/// Fields are private so every `Event` in existence has passed range checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEvent")]
pub struct Event {
    time: f64,
    message: MidiMessage,
}

#[derive(Deserialize)]
struct RawEvent {
    time: f64,
    message: MidiMessage,
}

impl TryFrom<RawEvent> for Event {
    type Error = MidiError;

    fn try_from(raw: RawEvent) -> Result<Self> {
        Event::new(raw.time, raw.message)
    }
}

impl Event {
    pub fn new(time: f64, message: MidiMessage) -> Result<Self> {
        check_time("time", time)?;
        message.validate()?;
        Ok(Self { time, message })
    }

    pub fn note_on(time: f64, channel: u8, note: u8, velocity: u8) -> Result<Self> {
        Self::new(
            time,
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            },
        )
    }

    pub fn note_off(time: f64, channel: u8, note: u8) -> Result<Self> {
        Self::new(time, MidiMessage::NoteOff { channel, note })
    }

    pub fn program_change(time: f64, channel: u8, program: u8) -> Result<Self> {
        Self::new(time, MidiMessage::ProgramChange { channel, program })
    }

    pub fn control_change(time: f64, channel: u8, controller: u8, value: u8) -> Result<Self> {
        Self::new(
            time,
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            },
        )
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn message(&self) -> &MidiMessage {
        &self.message
    }

    pub fn channel(&self) -> u8 {
        self.message.channel()
    }
}
