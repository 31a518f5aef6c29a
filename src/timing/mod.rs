mod patterns;
mod scheduler;
mod sequence;

pub use patterns::{ScaleKind, create_chord_progression, create_melody, create_scale};
pub use scheduler::{
    NowPlaying, PlaybackUpdate, Scheduler, SessionId, SessionOutcome, UPDATE_BACKLOG,
};
pub use sequence::{Chord, DEFAULT_TEMPO, Note, Timeline};
