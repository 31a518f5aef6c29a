//! Error types shared by every layer of the crate.
//!
//! Failures carry enough context to report precisely: the offending field
//! and its bound for parameters, the 1-based line for tracker scores, and
//! the byte offset for binary files.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MidiError>;

#[derive(Error, Debug)]
pub enum MidiError {
    /// A numeric field fell outside its allowed range. Values are never clamped.
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidParameter {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    /// A tracker score line could not be parsed. The whole parse is aborted.
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// The binary file is truncated, mislabelled or uses an unsupported variant.
    #[error("Corrupt file at byte {offset}: {reason}")]
    CorruptFile { offset: usize, reason: String },

    /// A status byte that is neither a channel, meta nor sysex event, or a
    /// data byte with no running status to reuse.
    #[error("Unknown event status 0x{status:02X} at byte {offset}")]
    UnknownEvent { offset: usize, status: u8 },

    #[error("No song named '{0}'")]
    SongNotFound(String),

    #[error("No loaded file named '{0}'")]
    FileNotFound(String),

    #[error("MIDI device error: {0}")]
    Device(String),

    #[error("Invalid base64 payload: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ron::error::SpannedError),

    #[error("Invalid timeline document: {0}")]
    Document(ron::error::SpannedError),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] ron::Error),
}

impl MidiError {
    pub(crate) fn invalid(
        field: &'static str,
        value: impl ToString,
        expected: &'static str,
    ) -> Self {
        MidiError::InvalidParameter {
            field,
            value: value.to_string(),
            expected,
        }
    }

    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        MidiError::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        MidiError::CorruptFile {
            offset,
            reason: reason.into(),
        }
    }
}
