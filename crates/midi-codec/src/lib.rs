//! Standard MIDI File (SMF) codec.
//!
//! Decodes format 0/1 files into a [`Score`] of absolute-tick [`Note`]s and
//! encodes a [`Score`] back into a format 1 file. The two directions agree:
//! `decode(&encode(&score)?)? == score` for any score whose tracks are in
//! canonical order (see [`Track::new`]).

pub mod decode;
pub mod encode;
pub mod note;

pub use decode::decode;
pub use encode::encode;
pub use note::{Note, Score, TempoChange, TimeSignature, Track};

/// Errors from MIDI decoding and encoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("malformed MIDI input at byte {offset}: {reason}")]
    MalformedInput { offset: usize, reason: String },

    #[error("track {track} encodes to {len} bytes, which overflows the 32-bit chunk length")]
    TrackTooLarge { track: usize, len: usize },

    #[error("track {track} has a delta time of {delta} ticks, beyond the 28-bit VLQ range")]
    DeltaOutOfRange { track: usize, delta: u64 },

    #[error("score has {0} tracks, more than a MIDI header can declare")]
    TooManyTracks(usize),
}

impl Error {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Error::MalformedInput {
            offset,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
