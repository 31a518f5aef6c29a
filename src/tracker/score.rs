use super::TrackerConfig;
use super::parser::MAX_LANES;
use crate::error::Result;
use crate::events::{DEFAULT_VELOCITY, Event};
use crate::timing::Timeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum NoteCommand {
    #[default]
    Empty,
    Play(u8),
    Release,
}

/// Letter plus hex argument. Kept for completeness, never affects timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Effect {
    pub code: char,
    pub argument: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Cell {
    pub note: NoteCommand,
    pub instrument: Option<u8>,
    pub volume: Option<u8>,
    pub effect: Option<Effect>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Row {
    /// 1-based source line
    pub line: usize,
    pub cells: Vec<Cell>,
}

/// Intermediate grid, lowered straight into a [`Timeline`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TrackerScore {
    pub title: String,
    pub tempo: f64,
    pub rows_per_beat: u32,
    pub sustain_rows: Option<u32>,
    /// (lane, program) from `INSTRUMENT` directives
    pub instruments: Vec<(u8, u8)>,
    pub rows: Vec<Row>,
}

impl TrackerScore {
    pub(crate) fn from_config(config: &TrackerConfig) -> Self {
        Self {
            title: config.name.clone(),
            tempo: config.tempo,
            rows_per_beat: config.rows_per_beat,
            sustain_rows: config.sustain_rows,
            instruments: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub(crate) fn row_duration(&self) -> f64 {
        60.0 / self.tempo / f64::from(self.rows_per_beat)
    }

    fn sustain(&self) -> usize {
        self.sustain_rows.unwrap_or(self.rows_per_beat) as usize
    }

    /// Each lane is monophonic on the channel of the same index. A note is
    /// released by the next note or `OFF` on its lane, or after the sustain,
    /// whichever comes first. Within a row: releases, then program changes,
    /// then note-ons.
    pub(crate) fn into_timeline(self) -> Result<Timeline> {
        let mut timeline = Timeline::with_tempo(self.title.clone(), self.tempo)?;
        let row_duration = self.row_duration();
        let at = |row: usize| row as f64 * row_duration;
        let sustain = self.sustain();

        for &(lane, program) in &self.instruments {
            timeline.add_program_change(0.0, program, lane)?;
        }

        // (pitch, row at which the sustain runs out)
        let mut sounding: [Option<(u8, usize)>; MAX_LANES] = [None; MAX_LANES];

        for (index, row) in self.rows.iter().enumerate() {
            for (lane, slot) in sounding.iter_mut().enumerate() {
                let Some((pitch, until)) = *slot else {
                    continue;
                };
                let interrupted = row
                    .cells
                    .get(lane)
                    .is_some_and(|cell| cell.note != NoteCommand::Empty);
                if until <= index || interrupted {
                    timeline.append(Event::note_off(at(until.min(index)), lane as u8, pitch)?);
                    *slot = None;
                }
            }

            let time = at(index);
            for (lane, cell) in row.cells.iter().enumerate() {
                if let Some(program) = cell.instrument {
                    timeline.add_program_change(time, program, lane as u8)?;
                }
                if let Some(effect) = cell.effect {
                    tracing::trace!(
                        line = row.line,
                        lane,
                        code = %effect.code,
                        argument = effect.argument,
                        "ignoring effect"
                    );
                }
            }

            for (lane, cell) in row.cells.iter().enumerate() {
                if let NoteCommand::Play(pitch) = cell.note {
                    let velocity = cell.volume.unwrap_or(DEFAULT_VELOCITY);
                    timeline.append(Event::note_on(time, lane as u8, pitch, velocity)?);
                    sounding[lane] = Some((pitch, index + sustain));
                }
            }
        }

        for (lane, slot) in sounding.iter().enumerate() {
            if let Some((pitch, until)) = *slot {
                timeline.append(Event::note_off(at(until), lane as u8, pitch)?);
            }
        }

        Ok(timeline)
    }
}
