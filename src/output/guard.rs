use std::collections::BTreeSet;

use parking_lot::Mutex;

use super::sink::OutputSink;
use crate::events::{ALL_NOTES_OFF, MAX_CHANNEL, MidiMessage};

/// Registry of (channel, note) pairs currently believed to be sounding.
///
/// Shared by the direct-command path and scheduled playback; every
/// mutation goes through one lock.
#[derive(Debug, Default)]
pub struct StuckNoteGuard {
    sounding: Mutex<BTreeSet<(u8, u8)>>,
}

impl StuckNoteGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_sounded(&self, channel: u8, note: u8) {
        self.sounding.lock().insert((channel, note));
    }

    pub fn note_released(&self, channel: u8, note: u8) {
        self.sounding.lock().remove(&(channel, note));
    }

    /// Updates the registry from a message that reached the sink.
    pub fn observe(&self, message: &MidiMessage) {
        if let Some((channel, note)) = message.sounds_note() {
            self.note_sounded(channel, note);
        } else if let Some((channel, note)) = message.releases_note() {
            self.note_released(channel, note);
        }
    }

    pub fn sounding(&self) -> Vec<(u8, u8)> {
        self.sounding.lock().iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sounding.lock().is_empty()
    }

    fn take_channel(&self, channel: u8) -> Vec<u8> {
        let mut sounding = self.sounding.lock();
        let notes: Vec<u8> = sounding
            .range((channel, 0)..=(channel, u8::MAX))
            .map(|&(_, note)| note)
            .collect();
        for note in &notes {
            sounding.remove(&(channel, *note));
        }
        notes
    }

    /// Releases every registered note in scope, then sends controller 123
    /// on each channel in scope whether or not anything was registered.
    ///
    /// Never fails: send errors are logged and the registry is emptied for
    /// the scope regardless. Returns the number of explicit note-offs sent.
    pub fn all_notes_off(&self, sink: &mut dyn OutputSink, channels: Option<&[u8]>) -> usize {
        let scope: BTreeSet<u8> = match channels {
            Some(channels) => channels
                .iter()
                .copied()
                .filter(|&channel| {
                    if channel > MAX_CHANNEL {
                        tracing::warn!(channel, "ignoring out-of-range channel in all notes off");
                        return false;
                    }
                    true
                })
                .collect(),
            None => (0..=MAX_CHANNEL).collect(),
        };
        tracing::info!(channels = ?scope, "all notes off");

        let mut released = 0;
        for channel in scope {
            for note in self.take_channel(channel) {
                match sink.send_note_off(channel, note) {
                    Ok(()) => released += 1,
                    Err(e) => tracing::warn!(channel, note, "note off failed: {}", e),
                }
            }
            if let Err(e) = sink.send_control_change(channel, ALL_NOTES_OFF, 0) {
                tracing::warn!(channel, "all notes off controller failed: {}", e);
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RecordingSink;

    #[test]
    fn test_register_and_release() {
        let guard = StuckNoteGuard::new();
        guard.note_sounded(0, 60);
        guard.note_sounded(0, 64);
        guard.note_sounded(3, 60);
        guard.note_released(0, 60);

        assert_eq!(guard.sounding(), vec![(0, 64), (3, 60)]);
    }

    #[test]
    fn test_observe_treats_zero_velocity_as_release() {
        let guard = StuckNoteGuard::new();
        guard.observe(&MidiMessage::NoteOn {
            channel: 1,
            note: 50,
            velocity: 80,
        });
        assert!(!guard.is_empty());
        guard.observe(&MidiMessage::NoteOn {
            channel: 1,
            note: 50,
            velocity: 0,
        });
        assert!(guard.is_empty());
    }

    #[test]
    fn test_all_notes_off_scoped() {
        let guard = StuckNoteGuard::new();
        let mut sink = RecordingSink::new();
        guard.note_sounded(0, 60);
        guard.note_sounded(2, 62);
        guard.note_sounded(2, 67);

        let released = guard.all_notes_off(&mut sink, Some(&[2]));
        assert_eq!(released, 2);
        assert_eq!(guard.sounding(), vec![(0, 60)]);
        assert_eq!(
            sink.messages(),
            vec![
                MidiMessage::NoteOff { channel: 2, note: 62 },
                MidiMessage::NoteOff { channel: 2, note: 67 },
                MidiMessage::ControlChange {
                    channel: 2,
                    controller: ALL_NOTES_OFF,
                    value: 0
                },
            ]
        );
    }

    #[test]
    fn test_all_notes_off_with_empty_registry_still_sends_controller() {
        let guard = StuckNoteGuard::new();
        let mut sink = RecordingSink::new();

        let released = guard.all_notes_off(&mut sink, None);
        assert_eq!(released, 0);
        let messages = sink.messages();
        assert_eq!(messages.len(), 16);
        assert!(messages.iter().all(|m| matches!(
            m,
            MidiMessage::ControlChange {
                controller: ALL_NOTES_OFF,
                ..
            }
        )));
    }

    #[test]
    fn test_all_notes_off_ignores_invalid_channels() {
        let guard = StuckNoteGuard::new();
        let mut sink = RecordingSink::new();
        guard.note_sounded(15, 1);

        guard.all_notes_off(&mut sink, Some(&[15, 16, 200]));
        assert!(guard.is_empty());
        assert_eq!(sink.messages().len(), 2);
    }
}
