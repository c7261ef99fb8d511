/// Errors from harmonization. Client errors describe bad input; the rest
/// mean the generated score could not be written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarmonizeError {
    #[error("malformed MIDI input at byte {offset}: {reason}")]
    MalformedInput { offset: usize, reason: String },

    #[error("melody track contains no notes")]
    EmptyMelody,

    #[error("unsupported style '{0}' (expected pop, jazz, classical or blues)")]
    UnsupportedStyle(String),

    #[error("unsupported complexity '{0}' (expected simple, medium or complex)")]
    UnsupportedComplexity(String),

    #[error("track {track} encodes to {len} bytes, which overflows the 32-bit chunk length")]
    TrackTooLarge { track: usize, len: usize },

    #[error("track {track} has a delta time of {delta} ticks, beyond the 28-bit VLQ range")]
    DeltaOutOfRange { track: usize, delta: u64 },

    #[error("score has {0} tracks, more than a MIDI header can declare")]
    TooManyTracks(usize),
}

impl HarmonizeError {
    /// True for errors caused by the caller's input (400-class).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            HarmonizeError::MalformedInput { .. }
                | HarmonizeError::EmptyMelody
                | HarmonizeError::UnsupportedStyle(_)
                | HarmonizeError::UnsupportedComplexity(_)
        )
    }
}

impl From<midi_codec::Error> for HarmonizeError {
    fn from(err: midi_codec::Error) -> Self {
        match err {
            midi_codec::Error::MalformedInput { offset, reason } => {
                HarmonizeError::MalformedInput { offset, reason }
            }
            midi_codec::Error::TrackTooLarge { track, len } => {
                HarmonizeError::TrackTooLarge { track, len }
            }
            midi_codec::Error::DeltaOutOfRange { track, delta } => {
                HarmonizeError::DeltaOutOfRange { track, delta }
            }
            midi_codec::Error::TooManyTracks(count) => HarmonizeError::TooManyTracks(count),
        }
    }
}

pub type Result<T> = std::result::Result<T, HarmonizeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_errors_keep_their_kind() {
        let err: HarmonizeError = midi_codec::Error::MalformedInput {
            offset: 4,
            reason: "bad".into(),
        }
        .into();
        assert_eq!(
            err,
            HarmonizeError::MalformedInput {
                offset: 4,
                reason: "bad".into()
            }
        );

        let err: HarmonizeError = midi_codec::Error::TrackTooLarge { track: 1, len: 9 }.into();
        assert!(matches!(err, HarmonizeError::TrackTooLarge { track: 1, len: 9 }));
    }

    #[test]
    fn client_errors_are_classified() {
        assert!(HarmonizeError::EmptyMelody.is_client_error());
        assert!(HarmonizeError::UnsupportedStyle("polka".into()).is_client_error());
        assert!(!HarmonizeError::TooManyTracks(70_000).is_client_error());
        assert!(!HarmonizeError::DeltaOutOfRange { track: 0, delta: 1 << 30 }.is_client_error());
    }
}
