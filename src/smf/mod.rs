//! Standard MIDI File codec.
//!
//! The header chunk is `MThd` with a length of 6 followed by format, track
//! count and division. Each track chunk is `MTrk` with a length followed by
//! (delta time, event) pairs, delta times written as variable-length
//! quantities. Chunks with any other id are skipped.
//!
//! Formats 0 and 1 with metrical timing are supported. Decoding is strict
//! and never returns a partial file.

mod decode;
mod encode;
mod reader;
mod tempo;

pub use decode::{ChannelEvent, FileInfo, LoadedFile, Track, TrackEvent, TrackEventKind};
pub use encode::{EncodeOptions, encode};
pub use tempo::{DEFAULT_TEMPO_USPQ, TempoMap, bpm_to_uspq, uspq_to_bpm};

pub(crate) mod meta {
    pub const TRACK_NAME: u8 = 0x03;
    pub const END_OF_TRACK: u8 = 0x2F;
    pub const SET_TEMPO: u8 = 0x51;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Format 0
    SingleTrack,
    /// Format 1
    #[default]
    Parallel,
}

impl Format {
    pub fn code(&self) -> u16 {
        match self {
            Format::SingleTrack => 0,
            Format::Parallel => 1,
        }
    }
}
