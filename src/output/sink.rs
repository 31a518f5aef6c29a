use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::Result;
use crate::events::MidiMessage;

/// The four primitive operations of a MIDI output.
///
/// Arguments arrive range-checked; implementations do not re-validate.
pub trait OutputSink: Send {
    fn send_note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<()>;
    fn send_note_off(&mut self, channel: u8, note: u8) -> Result<()>;
    fn send_program_change(&mut self, channel: u8, program: u8) -> Result<()>;
    fn send_control_change(&mut self, channel: u8, controller: u8, value: u8) -> Result<()>;
}

pub(crate) fn send_message(sink: &mut dyn OutputSink, message: &MidiMessage) -> Result<()> {
    match *message {
        MidiMessage::NoteOn {
            channel,
            note,
            velocity,
        } => sink.send_note_on(channel, note, velocity),
        MidiMessage::NoteOff { channel, note } => sink.send_note_off(channel, note),
        MidiMessage::ProgramChange { channel, program } => {
            sink.send_program_change(channel, program)
        }
        MidiMessage::ControlChange {
            channel,
            controller,
            value,
        } => sink.send_control_change(channel, controller, value),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentMessage {
    pub at: Instant,
    pub message: MidiMessage,
}

/// Keeps every message it receives. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<Vec<SentMessage>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.log.lock().clone()
    }

    pub fn messages(&self) -> Vec<MidiMessage> {
        self.log.lock().iter().map(|s| s.message).collect()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    fn record(&self, message: MidiMessage) -> Result<()> {
        self.log.lock().push(SentMessage {
            at: Instant::now(),
            message,
        });
        Ok(())
    }
}

impl OutputSink for RecordingSink {
    fn send_note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        self.record(MidiMessage::NoteOn {
            channel,
            note,
            velocity,
        })
    }

    fn send_note_off(&mut self, channel: u8, note: u8) -> Result<()> {
        self.record(MidiMessage::NoteOff { channel, note })
    }

    fn send_program_change(&mut self, channel: u8, program: u8) -> Result<()> {
        self.record(MidiMessage::ProgramChange { channel, program })
    }

    fn send_control_change(&mut self, channel: u8, controller: u8, value: u8) -> Result<()> {
        self.record(MidiMessage::ControlChange {
            channel,
            controller,
            value,
        })
    }
}

/// Writes every message to the log instead of a device.
#[derive(Debug, Default)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn send_note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        tracing::info!(channel, note, velocity, "note on");
        Ok(())
    }

    fn send_note_off(&mut self, channel: u8, note: u8) -> Result<()> {
        tracing::info!(channel, note, "note off");
        Ok(())
    }

    fn send_program_change(&mut self, channel: u8, program: u8) -> Result<()> {
        tracing::info!(channel, program, "program change");
        Ok(())
    }

    fn send_control_change(&mut self, channel: u8, controller: u8, value: u8) -> Result<()> {
        tracing::info!(channel, controller, value, "control change");
        Ok(())
    }
}
