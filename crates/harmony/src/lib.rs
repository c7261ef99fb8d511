//! Melody harmonization.
//!
//! Takes a single melodic line as Standard MIDI File bytes and returns a new
//! file holding the melody plus one to three generated harmony voices:
//!
//! 1. [`key::analyze`] infers the key from a duration-weighted pitch profile
//! 2. [`progression::generate`] fits one chord per measure, biased by [`Style`]
//! 3. [`voicing::arrange`] voices the chords below the melody, per [`Complexity`]
//!
//! [`analysis::analyze_melody`] adds phrases and cadences to the key and
//! chords reported by [`HarmonizationEngine::analyze`].
//!
//! [`HarmonizationEngine`] sequences the stages between `midi_codec::decode`
//! and `midi_codec::encode`.

pub mod analysis;
pub mod engine;
pub mod error;
pub mod key;
pub mod progression;
pub mod types;
pub mod voicing;

pub use analysis::{Cadence, CadenceKind, MelodyAnalysis, Phrase, StyleFeatures, TensionPoint};
pub use engine::{
    melody_track, Analysis, HarmonizationEngine, HarmonizedScore, Harmonizer, RuleBasedHarmonizer,
};
pub use error::{HarmonizeError, Result};
pub use types::{
    pitch_class_name, Chord, ChordProgression, ChordQuality, ChordSpan, Complexity,
    HarmonizationSettings, Key, KeyDetection, KeyMode, MelodyContext, Style,
};
pub use voicing::{Arrangement, Constraint, Relaxation};

/// Harmonize a MIDI file with the default configuration.
pub fn harmonize(bytes: &[u8], style: Style, complexity: Complexity) -> Result<Vec<u8>> {
    HarmonizationEngine::default().harmonize(bytes, HarmonizationSettings::new(style, complexity))
}

/// Harmonize with style and complexity given by name ("pop", "simple").
/// Names are checked before the bytes are decoded.
pub fn harmonize_named(bytes: &[u8], style: &str, complexity: &str) -> Result<Vec<u8>> {
    let settings = HarmonizationSettings::parse(style, complexity)?;
    HarmonizationEngine::default().harmonize(bytes, settings)
}
