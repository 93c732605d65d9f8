//! Error types for jazz

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JazzError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unexpected end of stream")]
    UnexpectedEof,
    #[error("Not a jazz song stream")]
    BadHeader,
    #[error("Unknown status byte: {0:#04x}")]
    UnknownStatus(u8),
    #[error("Bad payload for status {status:#04x}: {len} bytes")]
    BadPayload { status: u8, len: usize },
    #[error("Time signature numerator must be non-zero")]
    InvalidMeter,
    #[error("Track not found: {0}")]
    TrackOutOfRange(usize),
    #[error("{0} does not fit the file format")]
    OutOfRange(&'static str),
    #[error("Standard MIDI file error: {0}")]
    Smf(String),
}

pub type Result<T> = std::result::Result<T, JazzError>;
