use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{MidiError, Result};
use crate::events::{DEFAULT_VELOCITY, Event, MidiMessage, check_duration, check_time};

pub const DEFAULT_TEMPO: f64 = 120.0;

/// Authoring convenience: expands to a NoteOn at `start` and a NoteOff at
/// `start + duration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    /// Seconds
    pub start: f64,
    /// Seconds
    pub duration: f64,
    pub velocity: u8,
    pub channel: u8,
}

impl Note {
    pub fn new(pitch: u8, start: f64, duration: f64) -> Self {
        Self {
            pitch,
            start,
            duration,
            velocity: DEFAULT_VELOCITY,
            channel: 0,
        }
    }

    pub fn with_velocity(mut self, velocity: u8) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn on_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    fn to_events(&self) -> Result<[Event; 2]> {
        check_time("start", self.start)?;
        check_duration(self.duration)?;
        let on = Event::note_on(self.start, self.channel, self.pitch, self.velocity)?;
        let off = Event::note_off(self.end(), self.channel, self.pitch)?;
        Ok([on, off])
    }
}

/// Several pitches sharing start, duration, velocity and channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chord {
    pub pitches: Vec<u8>,
    pub start: f64,
    pub duration: f64,
    pub velocity: u8,
    pub channel: u8,
}

impl Chord {
    pub fn new(pitches: Vec<u8>, start: f64, duration: f64) -> Self {
        Self {
            pitches,
            start,
            duration,
            velocity: DEFAULT_VELOCITY,
            channel: 0,
        }
    }

    pub fn with_velocity(mut self, velocity: u8) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn on_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    fn notes(&self) -> impl Iterator<Item = Note> + '_ {
        let mut seen = [false; 128];
        self.pitches
            .iter()
            .filter(move |&&pitch| {
                // Out-of-range pitches are kept so validation can reject them.
                let Some(slot) = seen.get_mut(pitch as usize) else {
                    return true;
                };
                !std::mem::replace(slot, true)
            })
            .map(|&pitch| Note {
                pitch,
                start: self.start,
                duration: self.duration,
                velocity: self.velocity,
                channel: self.channel,
            })
    }
}

/// A named song: events ordered by time, ties kept in insertion order.
///
/// Event times are already in seconds; `tempo` is kept for display and
/// for deriving ticks when the timeline is written to a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeline")]
pub struct Timeline {
    name: String,
    tempo: f64,
    events: Vec<Event>,
}

#[derive(Deserialize)]
struct RawTimeline {
    name: String,
    tempo: f64,
    events: Vec<Event>,
}

impl TryFrom<RawTimeline> for Timeline {
    type Error = MidiError;

    fn try_from(raw: RawTimeline) -> Result<Self> {
        let mut timeline = Timeline::with_tempo(raw.name, raw.tempo)?;
        for event in raw.events {
            timeline.append(event);
        }
        Ok(timeline)
    }
}

fn check_tempo(bpm: f64) -> Result<f64> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return Err(MidiError::invalid("tempo", bpm, "a finite BPM > 0"));
    }
    Ok(bpm)
}

impl Timeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tempo: DEFAULT_TEMPO,
            events: Vec::new(),
        }
    }

    pub fn with_tempo(name: impl Into<String>, tempo: f64) -> Result<Self> {
        let mut timeline = Self::new(name);
        timeline.set_tempo(tempo)?;
        Ok(timeline)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn set_tempo(&mut self, tempo: f64) -> Result<()> {
        self.tempo = check_tempo(tempo)?;
        Ok(())
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Time of the last event, in seconds.
    pub fn duration(&self) -> f64 {
        self.events.last().map_or(0.0, Event::time)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Inserts after every event at the same or an earlier time.
    pub fn append(&mut self, event: Event) {
        let idx = self.events.partition_point(|e| e.time() <= event.time());
        self.events.insert(idx, event);
    }

    pub fn append_note(&mut self, note: &Note) -> Result<()> {
        let [on, off] = note.to_events()?;
        self.append(on);
        self.append(off);
        Ok(())
    }

    /// All pitches are validated before any event is inserted.
    pub fn append_chord(&mut self, chord: &Chord) -> Result<()> {
        let pairs = chord
            .notes()
            .map(|note| note.to_events())
            .collect::<Result<Vec<_>>>()?;
        for [on, _] in &pairs {
            self.append(*on);
        }
        for [_, off] in pairs {
            self.append(off);
        }
        Ok(())
    }

    pub fn add_note(
        &mut self,
        pitch: u8,
        time: f64,
        duration: f64,
        velocity: u8,
        channel: u8,
    ) -> Result<()> {
        self.append_note(&Note {
            pitch,
            start: time,
            duration,
            velocity,
            channel,
        })
    }

    pub fn add_program_change(&mut self, time: f64, program: u8, channel: u8) -> Result<()> {
        self.append(Event::program_change(time, channel, program)?);
        Ok(())
    }

    pub fn add_control_change(
        &mut self,
        time: f64,
        controller: u8,
        value: u8,
        channel: u8,
    ) -> Result<()> {
        self.append(Event::control_change(time, channel, controller, value)?);
        Ok(())
    }

    /// Pairs each NoteOn with the next release of the same channel and
    /// pitch. Notes still sounding at the end are left out.
    pub fn notes(&self) -> Vec<Note> {
        let mut open: HashMap<(u8, u8), VecDeque<(f64, u8)>> = HashMap::new();
        let mut result = Vec::new();

        for event in &self.events {
            match *event.message() {
                MidiMessage::NoteOn {
                    channel,
                    note,
                    velocity,
                } if velocity > 0 => {
                    open.entry((channel, note))
                        .or_default()
                        .push_back((event.time(), velocity));
                    continue;
                }
                _ => {}
            }
            if let Some(key @ (channel, pitch)) = event.message().releases_note() {
                if let Some((start, velocity)) = open.get_mut(&key).and_then(VecDeque::pop_front) {
                    result.push(Note {
                        pitch,
                        start,
                        duration: event.time() - start,
                        velocity,
                        channel,
                    });
                }
            }
        }

        result.sort_by(|a, b| a.start.total_cmp(&b.start));
        result
    }

    pub fn to_ron(&self) -> Result<String> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    pub fn from_ron(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(MidiError::Document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_sorted(timeline: &Timeline) -> bool {
        timeline
            .events()
            .windows(2)
            .all(|w| w[0].time() <= w[1].time())
    }

    #[test]
    fn test_append_note_expands_to_pair() {
        let mut song = Timeline::new("test");
        song.append_note(&Note::new(60, 0.5, 1.0).with_velocity(90).on_channel(2))
            .unwrap();

        assert_eq!(song.len(), 2);
        assert_eq!(
            *song.events()[0].message(),
            MidiMessage::NoteOn {
                channel: 2,
                note: 60,
                velocity: 90
            }
        );
        assert_eq!(song.events()[0].time(), 0.5);
        assert_eq!(
            *song.events()[1].message(),
            MidiMessage::NoteOff {
                channel: 2,
                note: 60
            }
        );
        assert_eq!(song.events()[1].time(), 1.5);
    }

    #[test]
    fn test_out_of_order_appends_stay_sorted() {
        let mut song = Timeline::new("test");
        song.add_note(67, 2.0, 0.5, 64, 0).unwrap();
        song.add_note(60, 0.0, 3.0, 64, 0).unwrap();
        song.add_program_change(1.0, 5, 1).unwrap();
        song.append_chord(&Chord::new(vec![48, 52, 55], 0.25, 0.25))
            .unwrap();
        song.add_control_change(0.0, 7, 100, 0).unwrap();

        assert!(is_sorted(&song));
        assert_eq!(song.len(), 2 + 2 + 1 + 6 + 1);
        assert_eq!(song.duration(), 3.0);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut song = Timeline::new("ties");
        song.add_program_change(1.0, 1, 0).unwrap();
        song.add_program_change(1.0, 2, 0).unwrap();
        song.add_program_change(1.0, 3, 0).unwrap();

        let programs: Vec<u8> = song
            .events()
            .iter()
            .map(|e| match *e.message() {
                MidiMessage::ProgramChange { program, .. } => program,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(programs, vec![1, 2, 3]);
    }

    #[test]
    fn test_failed_append_leaves_timeline_untouched() {
        let mut song = Timeline::new("test");
        song.add_note(60, 0.0, 1.0, 64, 0).unwrap();

        assert!(song.add_note(60, 0.0, 0.0, 64, 0).is_err());
        assert!(song.add_note(60, -1.0, 1.0, 64, 0).is_err());
        assert!(song.add_note(128, 0.0, 1.0, 64, 0).is_err());
        assert!(
            song.append_chord(&Chord::new(vec![60, 64, 200], 0.0, 1.0))
                .is_err()
        );
        assert_eq!(song.len(), 2);
    }

    #[test]
    fn test_chord_ons_precede_offs() {
        let mut song = Timeline::new("chord");
        song.append_chord(&Chord::new(vec![60, 64, 67, 64], 0.0, 1.0))
            .unwrap();

        // Duplicate pitch is collapsed.
        assert_eq!(song.len(), 6);
        assert!(
            song.events()[..3]
                .iter()
                .all(|e| e.message().sounds_note().is_some())
        );
        assert!(
            song.events()[3..]
                .iter()
                .all(|e| e.message().releases_note().is_some())
        );
    }

    #[test]
    fn test_notes_pairs_events_back() {
        let mut song = Timeline::new("pairs");
        song.add_note(60, 0.0, 0.5, 70, 0).unwrap();
        song.add_note(60, 0.5, 0.25, 80, 0).unwrap();
        song.add_note(62, 0.1, 1.0, 90, 3).unwrap();

        let notes = song.notes();
        assert_eq!(notes.len(), 3);
        assert_eq!(notes[0], Note::new(60, 0.0, 0.5).with_velocity(70));
        assert_eq!(notes[1].pitch, 62);
        assert_eq!(notes[1].channel, 3);
        assert_eq!(notes[2].start, 0.5);
        assert_eq!(notes[2].duration, 0.25);
    }

    #[test]
    fn test_tempo_must_be_positive() {
        assert!(Timeline::with_tempo("a", 0.0).is_err());
        assert!(Timeline::with_tempo("a", -10.0).is_err());
        assert!(Timeline::with_tempo("a", 90.0).is_ok());
    }

    #[test]
    fn test_ron_round_trip() {
        let mut song = Timeline::with_tempo("ron", 96.0).unwrap();
        song.add_note(60, 0.0, 1.0, 64, 0).unwrap();
        song.add_program_change(0.0, 24, 1).unwrap();

        let text = song.to_ron().unwrap();
        let back = Timeline::from_ron(&text).unwrap();
        assert_eq!(back, song);
    }

    #[test]
    fn test_bad_document_is_a_document_error() {
        assert!(matches!(
            Timeline::from_ron("(name: \"x\", tempo: 120.0"),
            Err(MidiError::Document(_))
        ));
        // Out-of-range values are rejected while reading.
        let text = "(name: \"x\", tempo: 120.0, events: [(time: 0.0, message: ProgramChange(channel: 16, program: 0))])";
        assert!(matches!(Timeline::from_ron(text), Err(MidiError::Document(_))));
    }
}
