//! Songs, tracker scores and Standard MIDI Files turned into one time-ordered
//! event stream and played against a MIDI output in real time.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod output;
pub mod smf;
pub mod timing;
pub mod tracker;

pub use config::Settings;
pub use engine::Engine;
pub use error::{MidiError, Result};
pub use events::{Event, MidiMessage};
pub use output::{LogSink, MidirSink, Output, OutputSink, RecordingSink, StuckNoteGuard};
pub use smf::{EncodeOptions, FileInfo, Format, LoadedFile};
pub use timing::{
    Chord, Note, PlaybackUpdate, ScaleKind, Scheduler, SessionOutcome, Timeline,
};
pub use tracker::{TrackerConfig, parse_tracker};
