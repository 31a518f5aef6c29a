use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Chord, Note, Timeline};
use crate::error::{MidiError, Result};
use crate::events::check_duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleKind {
    Major,
    Minor,
    Pentatonic,
    Blues,
    Chromatic,
}

impl ScaleKind {
    /// Semitone offsets from the root, one octave, root included once.
    pub fn intervals(&self) -> &'static [u8] {
        match self {
            ScaleKind::Major => &[0, 2, 4, 5, 7, 9, 11],
            ScaleKind::Minor => &[0, 2, 3, 5, 7, 8, 10],
            ScaleKind::Pentatonic => &[0, 2, 4, 7, 9],
            ScaleKind::Blues => &[0, 3, 5, 6, 7, 10],
            ScaleKind::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        }
    }
}

impl FromStr for ScaleKind {
    type Err = MidiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "major" => Ok(ScaleKind::Major),
            "minor" => Ok(ScaleKind::Minor),
            "pentatonic" => Ok(ScaleKind::Pentatonic),
            "blues" => Ok(ScaleKind::Blues),
            "chromatic" => Ok(ScaleKind::Chromatic),
            _ => Err(MidiError::invalid(
                "scale",
                s,
                "major, minor, pentatonic, blues or chromatic",
            )),
        }
    }
}

/// Ascending scale: `octaves` repetitions of the pattern, note `i` at
/// `i * duration`.
pub fn create_scale(
    name: &str,
    root: u8,
    kind: ScaleKind,
    octaves: u32,
    duration: f64,
) -> Result<Timeline> {
    if octaves == 0 {
        return Err(MidiError::invalid("octaves", octaves, ">= 1"));
    }
    check_duration(duration)?;

    let mut song = Timeline::new(name);
    let mut index = 0u32;
    for octave in 0..octaves {
        for &interval in kind.intervals() {
            let pitch = root as u32 + octave * 12 + interval as u32;
            let pitch = u8::try_from(pitch)
                .map_err(|_| MidiError::invalid("note", pitch, "0..=127"))?;
            song.append_note(&Note::new(pitch, index as f64 * duration, duration))?;
            index += 1;
        }
    }
    Ok(song)
}

/// Back-to-back notes, one duration per pitch.
pub fn create_melody(name: &str, pitches: &[u8], durations: &[f64]) -> Result<Timeline> {
    if pitches.len() != durations.len() {
        return Err(MidiError::invalid(
            "durations",
            durations.len(),
            "one duration per pitch",
        ));
    }

    let mut song = Timeline::new(name);
    let mut time = 0.0;
    for (&pitch, &duration) in pitches.iter().zip(durations) {
        song.append_note(&Note::new(pitch, time, duration))?;
        time += duration;
    }
    Ok(song)
}

/// Back-to-back chords; each chord lists semitone offsets from `root`.
pub fn create_chord_progression(
    name: &str,
    root: u8,
    chords: &[Vec<u8>],
    durations: &[f64],
) -> Result<Timeline> {
    if chords.len() != durations.len() {
        return Err(MidiError::invalid(
            "durations",
            durations.len(),
            "one duration per chord",
        ));
    }

    let mut song = Timeline::new(name);
    let mut time = 0.0;
    for (intervals, &duration) in chords.iter().zip(durations) {
        let pitches = intervals
            .iter()
            .map(|&interval| {
                let pitch = root as u16 + interval as u16;
                u8::try_from(pitch).map_err(|_| MidiError::invalid("note", pitch, "0..=127"))
            })
            .collect::<Result<Vec<_>>>()?;
        song.append_chord(&Chord::new(pitches, time, duration))?;
        time += duration;
    }
    Ok(song)
}
