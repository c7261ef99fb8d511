use std::fmt;
use std::str::FromStr;

use midi_codec::note::time_signature_at;
use midi_codec::{Score, TimeSignature};
use serde::{Deserialize, Serialize};

use crate::error::HarmonizeError;

const MAJOR_SCALE: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];
const NATURAL_MINOR_SCALE: [u8; 7] = [0, 2, 3, 5, 7, 8, 10];

const NOTE_NAMES_SHARP: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
const NOTE_NAMES_FLAT: [&str; 12] = ["C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B"];

/// Pitch classes conventionally spelled with flats.
const FLAT_ROOTS: [u8; 6] = [1, 3, 5, 6, 8, 10]; // Db, Eb, F, Gb, Ab, Bb

const NUMERALS: [&str; 7] = ["I", "II", "III", "IV", "V", "VI", "VII"];

/// Conventional spelling of a pitch class: "C", "Db", "F#".
pub fn pitch_class_name(pitch_class: u8) -> &'static str {
    let pc = pitch_class % 12;
    if FLAT_ROOTS.contains(&pc) {
        NOTE_NAMES_FLAT[pc as usize]
    } else {
        NOTE_NAMES_SHARP[pc as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    Major,
    Minor,
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMode::Major => write!(f, "major"),
            KeyMode::Minor => write!(f, "minor"),
        }
    }
}

/// A tonal key: root pitch class plus mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    /// Pitch class 0-11 (C=0, C#=1, ...)
    pub root: u8,
    pub mode: KeyMode,
}

impl Key {
    pub const C_MAJOR: Key = Key {
        root: 0,
        mode: KeyMode::Major,
    };

    pub fn new(root: u8, mode: KeyMode) -> Self {
        Self {
            root: root % 12,
            mode,
        }
    }

    /// The seven diatonic pitch classes, tonic first. Minor keys use the
    /// natural minor scale.
    pub fn scale(&self) -> [u8; 7] {
        let intervals = match self.mode {
            KeyMode::Major => MAJOR_SCALE,
            KeyMode::Minor => NATURAL_MINOR_SCALE,
        };
        intervals.map(|i| (self.root + i) % 12)
    }

    /// Pitch class of a scale degree (0 = tonic).
    pub fn degree_pitch_class(&self, degree: u8) -> u8 {
        self.scale()[(degree % 7) as usize]
    }

    pub fn degree_of(&self, pitch_class: u8) -> Option<u8> {
        let pc = pitch_class % 12;
        self.scale().iter().position(|&s| s == pc).map(|d| d as u8)
    }

    pub fn contains(&self, pitch_class: u8) -> bool {
        self.degree_of(pitch_class).is_some()
    }

    /// Raised seventh degree, used by the minor-key dominant.
    pub fn leading_tone(&self) -> u8 {
        (self.root + 11) % 12
    }

    pub fn root_name(&self) -> &'static str {
        pitch_class_name(self.root)
    }
}

impl Default for Key {
    fn default() -> Self {
        Key::C_MAJOR
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.root_name(), self.mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyDetection {
    pub key: Key,
    /// Pearson correlation with the best-matching key profile
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordQuality {
    /// Diatonic triad stacked in thirds from the scale.
    Triad,
    /// Diatonic seventh chord stacked in thirds from the scale.
    Seventh,
    Diminished,
    Augmented,
    /// Major triad plus a minor seventh on any degree, as blues uses it.
    DominantSeventh,
}

/// A chord named by scale degree, so the same progression can be
/// realized in any key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chord {
    /// 0-6, 0 = tonic
    pub root_degree: u8,
    pub quality: ChordQuality,
    /// 0 = root position, 1 = first inversion, ...
    pub inversion: u8,
    /// For an applied dominant, the degree it resolves to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_of: Option<u8>,
}

impl Chord {
    pub fn triad(degree: u8) -> Self {
        Self {
            root_degree: degree % 7,
            quality: ChordQuality::Triad,
            inversion: 0,
            secondary_of: None,
        }
    }

    pub fn seventh(degree: u8) -> Self {
        Self {
            quality: ChordQuality::Seventh,
            ..Self::triad(degree)
        }
    }

    pub fn dominant_seventh(degree: u8) -> Self {
        Self {
            quality: ChordQuality::DominantSeventh,
            ..Self::triad(degree)
        }
    }

    /// Dominant of `target` (V/x or V7/x): a major triad a fifth above it,
    /// with a minor seventh when `seventh` is set.
    pub fn secondary_dominant(target: u8, seventh: bool) -> Self {
        let target = target % 7;
        Self {
            root_degree: (target + 4) % 7,
            quality: if seventh {
                ChordQuality::Seventh
            } else {
                ChordQuality::Triad
            },
            inversion: 0,
            secondary_of: Some(target),
        }
    }

    pub fn with_inversion(mut self, inversion: u8) -> Self {
        self.inversion = inversion.min(3);
        self
    }

    pub fn is_secondary(&self) -> bool {
        self.secondary_of.is_some()
    }

    pub fn root_pitch_class(&self, key: &Key) -> u8 {
        match self.secondary_of {
            Some(target) => (key.degree_pitch_class(target) + 7) % 12,
            None => key.degree_pitch_class(self.root_degree),
        }
    }

    /// Chord tones as pitch classes, root first.
    pub fn pitch_classes(&self, key: &Key) -> Vec<u8> {
        let root = self.root_pitch_class(key);

        if self.secondary_of.is_some() {
            let mut pcs = vec![root, (root + 4) % 12, (root + 7) % 12];
            if self.quality == ChordQuality::Seventh {
                pcs.push((root + 10) % 12);
            }
            return pcs;
        }

        match self.quality {
            ChordQuality::Triad | ChordQuality::Seventh => {
                let scale = key.scale();
                let degree = self.root_degree as usize;
                let steps: &[usize] = if self.quality == ChordQuality::Seventh {
                    &[0, 2, 4, 6]
                } else {
                    &[0, 2, 4]
                };
                let mut pcs: Vec<u8> = steps.iter().map(|s| scale[(degree + s) % 7]).collect();

                if key.mode == KeyMode::Minor && self.root_degree == 4 {
                    let subtonic = (key.root + 10) % 12;
                    for pc in &mut pcs {
                        if *pc == subtonic {
                            *pc = key.leading_tone();
                        }
                    }
                }
                pcs
            }
            ChordQuality::Diminished => vec![root, (root + 3) % 12, (root + 6) % 12],
            ChordQuality::Augmented => vec![root, (root + 4) % 12, (root + 8) % 12],
            ChordQuality::DominantSeventh => {
                vec![root, (root + 4) % 12, (root + 7) % 12, (root + 10) % 12]
            }
        }
    }

    pub fn contains(&self, key: &Key, pitch_class: u8) -> bool {
        self.pitch_classes(key).contains(&(pitch_class % 12))
    }

    /// Pitch class that belongs in the bass for this inversion.
    pub fn bass_pitch_class(&self, key: &Key) -> u8 {
        let pcs = self.pitch_classes(key);
        pcs[self.inversion as usize % pcs.len()]
    }

    /// Intervals above the root: (third, fifth, seventh).
    fn intervals(&self, key: &Key) -> (u8, u8, Option<u8>) {
        let pcs = self.pitch_classes(key);
        let above = |pc: u8| (pc + 12 - pcs[0]) % 12;
        (above(pcs[1]), above(pcs[2]), pcs.get(3).map(|&pc| above(pc)))
    }

    /// Roman numeral with figured-bass inversion: "IV", "vii°6", "ii7", "V7/ii".
    pub fn numeral(&self, key: &Key) -> String {
        if let Some(target) = self.secondary_of {
            let figure = if self.quality == ChordQuality::Seventh { "7" } else { "" };
            return format!("V{figure}/{}", Chord::triad(target).numeral(key));
        }

        let (third, fifth, seventh) = self.intervals(key);
        let base = NUMERALS[(self.root_degree % 7) as usize];
        let mut numeral = if third == 4 {
            base.to_string()
        } else {
            base.to_lowercase()
        };
        match (fifth, seventh) {
            (6, Some(10)) => numeral.push('ø'),
            (6, _) => numeral.push('°'),
            (8, _) => numeral.push('+'),
            _ => {}
        }

        let figure = match (seventh.is_some(), self.inversion) {
            (false, 0) => "",
            (false, 1) => "6",
            (false, _) => "64",
            (true, 0) => "7",
            (true, 1) => "65",
            (true, 2) => "43",
            (true, _) => "42",
        };
        numeral.push_str(figure);
        numeral
    }

    /// Lead-sheet symbol: "C", "Dm7", "Bdim", "G7".
    pub fn name(&self, key: &Key) -> String {
        let root = pitch_class_name(self.root_pitch_class(key));
        let (third, fifth, seventh) = self.intervals(key);
        let suffix = match (third, fifth, seventh) {
            (4, 7, None) => "",
            (3, 7, None) => "m",
            (3, 6, None) => "dim",
            (4, 8, None) => "aug",
            (4, 7, Some(10)) => "7",
            (4, 7, Some(11)) => "maj7",
            (3, 7, Some(10)) => "m7",
            (3, 7, Some(11)) => "mMaj7",
            (3, 6, Some(10)) => "m7b5",
            (3, 6, Some(9)) => "dim7",
            (4, 8, Some(_)) => "aug7",
            _ => "?",
        };
        format!("{root}{suffix}")
    }
}

/// One chord held over `[start_tick, end_tick)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordSpan {
    pub start_tick: u64,
    pub end_tick: u64,
    pub chord: Chord,
}

impl ChordSpan {
    pub fn duration_ticks(&self) -> u64 {
        self.end_tick.saturating_sub(self.start_tick)
    }

    pub fn contains_tick(&self, tick: u64) -> bool {
        self.start_tick <= tick && tick < self.end_tick
    }
}

/// Chords covering a melody, in time order, in the key they were chosen for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordProgression {
    pub key: Key,
    pub spans: Vec<ChordSpan>,
}

impl ChordProgression {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            spans: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn end_tick(&self) -> u64 {
        self.spans.last().map(|s| s.end_tick).unwrap_or(0)
    }

    /// Span sounding at `tick`, if any.
    pub fn span_at(&self, tick: u64) -> Option<&ChordSpan> {
        let idx = self.spans.partition_point(|s| s.end_tick <= tick);
        self.spans.get(idx).filter(|s| s.contains_tick(tick))
    }

    /// True when the spans tile `[0, end)` exactly, without gaps or overlaps.
    pub fn covers(&self, end: u64) -> bool {
        let mut cursor = 0;
        for span in &self.spans {
            if span.start_tick != cursor || span.end_tick <= span.start_tick {
                return false;
            }
            cursor = span.end_tick;
        }
        cursor == end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Pop,
    Jazz,
    Classical,
    Blues,
}

impl Style {
    pub const ALL: [Style; 4] = [Style::Pop, Style::Jazz, Style::Classical, Style::Blues];

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Pop => "pop",
            Style::Jazz => "jazz",
            Style::Classical => "classical",
            Style::Blues => "blues",
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Style {
    type Err = HarmonizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Style::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| HarmonizeError::UnsupportedStyle(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub const ALL: [Complexity; 3] = [Complexity::Simple, Complexity::Medium, Complexity::Complex];

    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }

    /// Number of generated harmony voices.
    pub fn voice_count(&self) -> usize {
        match self {
            Complexity::Simple => 1,
            Complexity::Medium => 2,
            Complexity::Complex => 3,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Complexity {
    type Err = HarmonizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Complexity::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| HarmonizeError::UnsupportedComplexity(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HarmonizationSettings {
    pub style: Style,
    pub complexity: Complexity,
}

impl HarmonizationSettings {
    pub fn new(style: Style, complexity: Complexity) -> Self {
        Self { style, complexity }
    }

    /// Parse both settings from their names, style first.
    pub fn parse(style: &str, complexity: &str) -> Result<Self, HarmonizeError> {
        Ok(Self {
            style: style.parse()?,
            complexity: complexity.parse()?,
        })
    }
}

/// Score-level timing the progression generator needs to size measures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MelodyContext {
    pub ticks_per_quarter: u16,
    pub time_signatures: Vec<TimeSignature>,
}

impl MelodyContext {
    pub fn new(ticks_per_quarter: u16) -> Self {
        Self {
            ticks_per_quarter,
            time_signatures: Vec::new(),
        }
    }

    pub fn from_score(score: &Score) -> Self {
        Self {
            ticks_per_quarter: score.ticks_per_quarter,
            time_signatures: score.time_signatures.clone(),
        }
    }

    pub fn time_signature_at(&self, tick: u64) -> TimeSignature {
        time_signature_at(&self.time_signatures, tick)
    }

    /// First time-signature change strictly after `tick`.
    pub fn next_change_after(&self, tick: u64) -> Option<u64> {
        self.time_signatures
            .iter()
            .map(|ts| ts.tick)
            .find(|&t| t > tick)
    }
}
