//! The path from the core to a MIDI device.
//!
//! [`Output`] wraps one [`OutputSink`] behind a lock so that only one
//! message is in flight at a time, and keeps the [`StuckNoteGuard`] in step
//! with what actually reached the sink. Direct commands and scheduled
//! playback share the same `Output`.

mod device;
mod guard;
mod sink;

pub use device::{MidirSink, output_port_names};
pub use guard::StuckNoteGuard;
pub use sink::{LogSink, OutputSink, RecordingSink, SentMessage};

use parking_lot::Mutex;

use crate::error::Result;
use crate::events::MidiMessage;

pub struct Output {
    sink: Mutex<Box<dyn OutputSink>>,
    guard: StuckNoteGuard,
}

impl Output {
    pub fn new(sink: impl OutputSink + 'static) -> Self {
        Self {
            sink: Mutex::new(Box::new(sink)),
            guard: StuckNoteGuard::new(),
        }
    }

    pub fn guard(&self) -> &StuckNoteGuard {
        &self.guard
    }

    /// Sends one message. The registry is only updated once the sink
    /// accepted the message; lock order is sink, then registry.
    pub fn dispatch(&self, message: &MidiMessage) -> Result<()> {
        message.validate()?;
        let mut sink = self.sink.lock();
        sink::send_message(sink.as_mut(), message)?;
        self.guard.observe(message);
        Ok(())
    }

    pub fn note_on(&self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        self.dispatch(&MidiMessage::NoteOn {
            channel,
            note,
            velocity,
        })
    }

    pub fn note_off(&self, channel: u8, note: u8) -> Result<()> {
        self.dispatch(&MidiMessage::NoteOff { channel, note })
    }

    pub fn program_change(&self, channel: u8, program: u8) -> Result<()> {
        self.dispatch(&MidiMessage::ProgramChange { channel, program })
    }

    pub fn control_change(&self, channel: u8, controller: u8, value: u8) -> Result<()> {
        self.dispatch(&MidiMessage::ControlChange {
            channel,
            controller,
            value,
        })
    }

    /// See [`StuckNoteGuard::all_notes_off`]. `None` means every channel.
    pub fn all_notes_off(&self, channels: Option<&[u8]>) -> usize {
        let mut sink = self.sink.lock();
        self.guard.all_notes_off(sink.as_mut(), channels)
    }
}
