//! Text tracker scores.
//!
//! A score is a grid: one line per row, cells separated by `|`, one cell per
//! channel lane. Each cell reads `NOTE[:INSTRUMENT][:VOLUME][:EFFECT]`:
//!
//! ```text
//! # comment
//! TITLE: Demo
//! TEMPO: 120
//! ROWS_PER_BEAT: 4
//! INSTRUMENT 1: 33 bass
//! C-4:00:64 | C-2
//! ---       | ---
//! OFF       | E-2::90:F06
//! ```
//!
//! Framed tables are read too. A `|Ch1 |Ch2 |` header before the first row
//! and the `|----|----|` rule under it are skipped, as are `| Row 4 |  |`
//! marker lines and a trailing `| Row 04` annotation:
//!
//! ```text
//! INSTRUMENT 0: Acoustic Grand Piano
//! |Ch1   |Ch2   |
//! |------|------|
//! |C-4 00|..... | Row 00
//! |..... |G-2 01| Row 01
//! ```
//!
//! An `INSTRUMENT` line without a program number selects the program
//! numbered like its lane.
//!
//! Rows advance by `60 / tempo / rows_per_beat` seconds. Parsing is strict:
//! any malformed cell aborts with the line number.

mod parser;
mod score;

use crate::error::Result;
use crate::timing::{DEFAULT_TEMPO, Timeline};

pub use parser::MAX_LANES;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Used unless the score has a `TITLE` directive.
    pub name: String,
    pub tempo: f64,
    pub rows_per_beat: u32,
    /// How long a note rings when nothing on its lane releases it.
    /// `None` means one beat.
    pub sustain_rows: Option<u32>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            name: "Untitled".to_string(),
            tempo: DEFAULT_TEMPO,
            rows_per_beat: 4,
            sustain_rows: None,
        }
    }
}

impl TrackerConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

pub fn parse_tracker(text: &str, config: &TrackerConfig) -> Result<Timeline> {
    let score = parser::parse_score(text, config)?;
    tracing::debug!(
        rows = score.rows.len(),
        tempo = score.tempo,
        rows_per_beat = score.rows_per_beat,
        "parsed tracker score"
    );
    score.into_timeline()
}
