use std::sync::Arc;

use harmonyconf::HarmonyConfig;
use midi_codec::{Score, Track};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{HarmonizeError, Result};
use crate::types::{
    ChordProgression, Complexity, HarmonizationSettings, Key, KeyDetection, MelodyContext, Style,
};
use crate::analysis::{self, MelodyAnalysis};
use crate::voicing::{Arrangement, Relaxation};
use crate::{key, progression, voicing};

/// Trait for harmonization backends.
///
/// `RuleBasedHarmonizer` covers every stage with deterministic music-theory
/// rules. Other backends can replace any stage; the engine only sequences
/// them around the MIDI codec.
pub trait Harmonizer: Send + Sync {
    fn analyze_key(&self, melody: &Track) -> KeyDetection;

    fn generate_progression(
        &self,
        melody: &Track,
        context: &MelodyContext,
        key: Key,
        style: Style,
    ) -> Result<ChordProgression>;

    fn arrange(
        &self,
        melody: &Track,
        progression: &ChordProgression,
        complexity: Complexity,
    ) -> Arrangement;
}

/// Krumhansl-Schmuckler key detection, measure-window chord fitting and
/// constraint-based voice leading, tuned by [`HarmonyConfig`].
#[derive(Debug, Clone, Default)]
pub struct RuleBasedHarmonizer {
    config: HarmonyConfig,
}

impl RuleBasedHarmonizer {
    pub fn new(config: HarmonyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarmonyConfig {
        &self.config
    }
}

impl Harmonizer for RuleBasedHarmonizer {
    fn analyze_key(&self, melody: &Track) -> KeyDetection {
        key::detect_key(&melody.notes)
    }

    fn generate_progression(
        &self,
        melody: &Track,
        context: &MelodyContext,
        key: Key,
        style: Style,
    ) -> Result<ChordProgression> {
        progression::generate(melody, context, key, style, &self.config.progression)
    }

    fn arrange(
        &self,
        melody: &Track,
        progression: &ChordProgression,
        complexity: Complexity,
    ) -> Arrangement {
        voicing::arrange_detailed(melody, progression, complexity, &self.config.voicing)
    }
}

/// Key, chords and phrase structure of a melody, without any voices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub key: KeyDetection,
    pub progression: ChordProgression,
    pub melody: MelodyAnalysis,
    pub ticks_per_quarter: u16,
}

/// Output of one harmonization before encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonizedScore {
    /// Melody track first, then one track per harmony voice
    pub score: Score,
    pub key: KeyDetection,
    pub progression: ChordProgression,
    pub relaxations: Vec<Relaxation>,
}

/// Decode, analyze, generate, arrange, encode.
///
/// Holds only immutable configuration, so one engine can serve concurrent
/// callers.
#[derive(Clone)]
pub struct HarmonizationEngine {
    backend: Arc<dyn Harmonizer>,
}

impl HarmonizationEngine {
    pub fn new(config: HarmonyConfig) -> Self {
        Self::with_backend(Arc::new(RuleBasedHarmonizer::new(config)))
    }

    pub fn with_backend(backend: Arc<dyn Harmonizer>) -> Self {
        Self { backend }
    }

    /// Harmonize a MIDI file, returning a new format 1 file.
    pub fn harmonize(&self, bytes: &[u8], settings: HarmonizationSettings) -> Result<Vec<u8>> {
        let score = midi_codec::decode(bytes)?;
        let harmonized = self.harmonize_score(&score, settings)?;
        let out = midi_codec::encode(&harmonized.score)?;

        info!(
            key = %harmonized.key.key,
            style = %settings.style,
            complexity = %settings.complexity,
            chords = harmonized.progression.len(),
            relaxations = harmonized.relaxations.len(),
            bytes_in = bytes.len(),
            bytes_out = out.len(),
            "harmonized melody"
        );
        Ok(out)
    }

    /// Harmonize an already decoded score.
    pub fn harmonize_score(
        &self,
        score: &Score,
        settings: HarmonizationSettings,
    ) -> Result<HarmonizedScore> {
        let melody = melody_track(score)?;
        let context = MelodyContext::from_score(score);

        let key = self.backend.analyze_key(melody);
        debug!(key = %key.key, confidence = key.confidence, "detected key");

        let progression =
            self.backend
                .generate_progression(melody, &context, key.key, settings.style)?;
        let arrangement = self
            .backend
            .arrange(melody, &progression, settings.complexity);

        let mut out = Score::new(score.ticks_per_quarter);
        out.tempo_map = score.tempo_map.clone();
        out.time_signatures = score.time_signatures.clone();
        out.tracks.push(melody.clone());
        out.tracks.extend(arrangement.tracks);

        Ok(HarmonizedScore {
            score: out,
            key,
            progression,
            relaxations: arrangement.relaxations,
        })
    }

    /// Key, chord progression and melodic analysis for a MIDI file.
    pub fn analyze(&self, bytes: &[u8], style: Style) -> Result<Analysis> {
        let score = midi_codec::decode(bytes)?;
        let melody = melody_track(&score)?;
        let context = MelodyContext::from_score(&score);

        let key = self.backend.analyze_key(melody);
        let progression = self
            .backend
            .generate_progression(melody, &context, key.key, style)?;
        let melody = analysis::analyze_melody(melody, &context, &progression);

        Ok(Analysis {
            key,
            progression,
            melody,
            ticks_per_quarter: score.ticks_per_quarter,
        })
    }
}

impl Default for HarmonizationEngine {
    fn default() -> Self {
        Self::new(HarmonyConfig::default())
    }
}

impl std::fmt::Debug for HarmonizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarmonizationEngine").finish_non_exhaustive()
    }
}

/// The melody is the first track with notes; format 0 files have only one.
pub fn melody_track(score: &Score) -> Result<&Track> {
    score
        .tracks
        .iter()
        .find(|t| !t.is_empty())
        .ok_or(HarmonizeError::EmptyMelody)
}
