//! Melodic analysis: phrases, cadences, tension and style features.
//!
//! Works on the melody's top line, one note per onset. Measures are the
//! progression's spans, so beats line up with the chords reported alongside.

use std::collections::HashSet;
use std::fmt;

use midi_codec::{Note, Track};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Chord, ChordProgression, Key, MelodyContext};

/// A phrase closes after this many notes even without a breathing point.
pub const MAX_PHRASE_NOTES: usize = 8;

/// Short-short-long endings, in quarter notes.
const CADENTIAL_RHYTHMS: [[f64; 3]; 3] = [[1.0, 1.0, 2.0], [0.5, 0.5, 2.0], [1.0, 2.0, 2.0]];

/// Durations closer than this (in quarters) count as the same rhythm.
const RHYTHM_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MelodyAnalysis {
    pub phrases: Vec<Phrase>,
    pub cadences: Vec<Cadence>,
    /// Direction of each step of the line: 1 up, -1 down, 0 repeated
    pub contour: Vec<i8>,
    pub tension: Vec<TensionPoint>,
    pub features: StyleFeatures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    pub start_tick: u64,
    pub end_tick: u64,
    pub notes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceKind {
    /// Dominant resolving to the tonic
    Authentic,
    /// Phrase stopping on the dominant
    Half,
    /// Dominant moving to the submediant instead of the tonic
    Deceptive,
}

impl fmt::Display for CadenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CadenceKind::Authentic => write!(f, "PAC"),
            CadenceKind::Half => write!(f, "HC"),
            CadenceKind::Deceptive => write!(f, "DC"),
        }
    }
}

/// Cadence at the final note of a phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cadence {
    pub tick: u64,
    pub kind: CadenceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TensionPoint {
    pub tick: u64,
    pub pitch: u8,
    /// 0.0 (at rest) to 1.0
    pub tension: f64,
}

/// Style indicators, each normalized to 0.0..=1.0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StyleFeatures {
    /// Distinct per-measure rhythms, saturating at ten
    pub rhythmic_complexity: f64,
    /// Melodic range, saturating at two octaves
    pub pitch_range: f64,
    /// Share of notes of a quarter or longer that start off the beat
    pub syncopation: f64,
}

/// Analyze `melody` against the key and measures of `progression`.
pub fn analyze_melody(
    melody: &Track,
    context: &MelodyContext,
    progression: &ChordProgression,
) -> MelodyAnalysis {
    let line = top_line(melody);
    if line.is_empty() {
        return MelodyAnalysis::default();
    }

    let tpq = u64::from(context.ticks_per_quarter.max(1));
    let key = progression.key;
    let phrases = detect_phrases(&line, tpq);
    let cadences = phrases
        .iter()
        .filter_map(|range| detect_cadence(&line[range.clone()], &key))
        .collect();
    let phrases: Vec<Phrase> = phrases
        .into_iter()
        .map(|range| Phrase {
            start_tick: line[range.start].start_tick,
            end_tick: line[range.start..range.end]
                .iter()
                .map(Note::end_tick)
                .max()
                .unwrap_or(line[range.start].start_tick),
            notes: range.len(),
        })
        .collect();

    let analysis = MelodyAnalysis {
        phrases,
        cadences,
        contour: line
            .windows(2)
            .map(|pair| (pair[1].pitch as i8 - pair[0].pitch as i8).signum())
            .collect(),
        tension: tension(&line, &key),
        features: style_features(&line, context, progression),
    };

    debug!(
        phrases = analysis.phrases.len(),
        cadences = analysis.cadences.len(),
        "analyzed melody"
    );
    analysis
}

/// Highest note of every onset, in time order.
fn top_line(melody: &Track) -> Vec<Note> {
    let mut notes = melody.notes.clone();
    notes.sort_by_key(|n| (n.start_tick, n.pitch));

    let mut line: Vec<Note> = Vec::with_capacity(notes.len());
    for note in notes {
        match line.last_mut() {
            Some(last) if last.start_tick == note.start_tick => *last = note,
            _ => line.push(note),
        }
    }
    line
}

/// Split the line wherever a phrase can end.
fn detect_phrases(line: &[Note], tpq: u64) -> Vec<std::ops::Range<usize>> {
    let mut phrases = Vec::new();
    let mut start = 0;

    for i in 0..line.len() - 1 {
        let current = &line[start..=i];
        if is_breathing_point(&line[i], &line[i + 1], tpq)
            || is_cadential_rhythm(current, tpq)
            || current.len() > MAX_PHRASE_NOTES
        {
            phrases.push(start..i + 1);
            start = i + 1;
        }
    }
    phrases.push(start..line.len());
    phrases
}

/// A rest of a sixteenth or more, a note more than twice as long as the
/// next, or a drop wider than a fifth.
fn is_breathing_point(current: &Note, next: &Note, tpq: u64) -> bool {
    let rest = next.start_tick.saturating_sub(current.end_tick()) >= (tpq / 4).max(1);
    let long_then_short = current.duration_ticks > next.duration_ticks.saturating_mul(2);
    let falls = i16::from(current.pitch) - i16::from(next.pitch) > 7;
    rest || long_then_short || falls
}

fn is_cadential_rhythm(phrase: &[Note], tpq: u64) -> bool {
    let Some(last_three) = phrase.len().checked_sub(3).map(|i| &phrase[i..]) else {
        return false;
    };
    let quarters: Vec<f64> = last_three
        .iter()
        .map(|n| n.duration_ticks as f64 / tpq as f64)
        .collect();
    CADENTIAL_RHYTHMS.iter().any(|pattern| {
        pattern
            .iter()
            .zip(&quarters)
            .all(|(p, q)| (p - q).abs() < RHYTHM_TOLERANCE)
    })
}

/// Classify the last two notes of a phrase. The approach counts as dominant
/// when it is any tone of the V chord, so ^2-^1 and ^7-^1 close authentically.
fn detect_cadence(phrase: &[Note], key: &Key) -> Option<Cadence> {
    let [.., approach, last] = phrase else {
        return None;
    };
    let dominant_chord = Chord::triad(4);
    let from_dominant = dominant_chord.contains(key, approach.pitch_class());
    let tonic = key.root;
    let dominant = key.degree_pitch_class(4);
    let submediant = key.degree_pitch_class(5);

    let kind = match last.pitch_class() {
        pc if pc == tonic => from_dominant.then_some(CadenceKind::Authentic)?,
        pc if pc == dominant => CadenceKind::Half,
        pc if pc == submediant && from_dominant => CadenceKind::Deceptive,
        _ => return None,
    };
    Some(Cadence {
        tick: last.start_tick,
        kind,
    })
}

/// Leap size and height above middle C, plus a fixed step for out-of-key notes.
fn tension(line: &[Note], key: &Key) -> Vec<TensionPoint> {
    line.iter()
        .enumerate()
        .map(|(i, note)| {
            let mut tension = 0.0;
            if !key.contains(note.pitch_class()) {
                tension += 0.5;
            }
            if let Some(previous) = i.checked_sub(1).map(|p| &line[p]) {
                tension += f64::from(note.pitch.abs_diff(previous.pitch)) / 12.0;
            }
            tension += (f64::from(note.pitch) - 60.0) / 24.0;
            TensionPoint {
                tick: note.start_tick,
                pitch: note.pitch,
                tension: tension.clamp(0.0, 1.0),
            }
        })
        .collect()
}

fn style_features(
    line: &[Note],
    context: &MelodyContext,
    progression: &ChordProgression,
) -> StyleFeatures {
    let tpq = u64::from(context.ticks_per_quarter.max(1));

    // Onset offsets and durations within each measure
    let patterns: HashSet<Vec<(u64, u64)>> = progression
        .spans
        .iter()
        .map(|span| {
            line.iter()
                .filter(|n| span.contains_tick(n.start_tick))
                .map(|n| (n.start_tick - span.start_tick, n.duration_ticks))
                .collect::<Vec<_>>()
        })
        .filter(|pattern| !pattern.is_empty())
        .collect();

    let (low, high) = line
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), n| (lo.min(n.pitch), hi.max(n.pitch)));

    let syncopated = line
        .iter()
        .filter(|n| {
            let signature = context.time_signature_at(n.start_tick);
            let beat = (tpq * 4 / u64::from(signature.denominator.max(1))).max(1);
            let measure_start = progression.span_at(n.start_tick).map_or(0, |s| s.start_tick);
            (n.start_tick - measure_start) % beat != 0 && n.duration_ticks >= tpq
        })
        .count();

    StyleFeatures {
        rhythmic_complexity: (patterns.len() as f64 / 10.0).min(1.0),
        pitch_range: (f64::from(high.saturating_sub(low)) / 24.0).min(1.0),
        syncopation: (syncopated as f64 / line.len() as f64).min(1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChordSpan, KeyMode};
    use pretty_assertions::assert_eq;

    const TPQ: u64 = 480;

    fn line(notes: &[(u8, u64, u64)]) -> Track {
        Track::new(
            None,
            notes
                .iter()
                .map(|&(pitch, start, duration)| Note::new(pitch, 90, start, duration, 0))
                .collect(),
        )
    }

    fn quarters(pitches: &[u8]) -> Track {
        let notes: Vec<(u8, u64, u64)> = pitches
            .iter()
            .enumerate()
            .map(|(i, &p)| (p, i as u64 * TPQ, TPQ))
            .collect();
        line(&notes)
    }

    /// One tonic chord per 4/4 measure up to `end`.
    fn measures(key: Key, end: u64) -> ChordProgression {
        let mut progression = ChordProgression::new(key);
        progression.spans = (0..end.div_ceil(4 * TPQ))
            .map(|m| ChordSpan {
                start_tick: m * 4 * TPQ,
                end_tick: ((m + 1) * 4 * TPQ).min(end),
                chord: Chord::triad(0),
            })
            .collect();
        progression
    }

    fn analyze(melody: &Track, key: Key) -> MelodyAnalysis {
        let progression = measures(key, melody.end_tick());
        analyze_melody(melody, &MelodyContext::new(TPQ as u16), &progression)
    }

    fn twinkle() -> Track {
        let mut notes = Vec::new();
        for (p, pitches) in [[60, 60, 67, 67, 69, 69, 67], [65, 65, 64, 64, 62, 62, 60]]
            .iter()
            .enumerate()
        {
            for (i, &pitch) in pitches.iter().enumerate() {
                let len = if i == 6 { 2 * TPQ } else { TPQ };
                notes.push((pitch, p as u64 * 8 * TPQ + i as u64 * TPQ, len));
            }
        }
        line(&notes)
    }

    #[test]
    fn twinkle_has_two_phrases_with_half_and_authentic_cadences() {
        let analysis = analyze(&twinkle(), Key::C_MAJOR);
        assert_eq!(
            analysis.phrases,
            vec![
                Phrase {
                    start_tick: 0,
                    end_tick: 3840,
                    notes: 7
                },
                Phrase {
                    start_tick: 3840,
                    end_tick: 7680,
                    notes: 7
                },
            ]
        );
        assert_eq!(
            analysis.cadences,
            vec![
                Cadence {
                    tick: 2880,
                    kind: CadenceKind::Half
                },
                Cadence {
                    tick: 6720,
                    kind: CadenceKind::Authentic
                },
            ]
        );
        assert_eq!(analysis.cadences[1].kind.to_string(), "PAC");
    }

    #[test]
    fn rests_and_drops_end_phrases() {
        // Rest after the second note, then a drop of a sixth
        let melody = line(&[
            (64, 0, 480),
            (62, 480, 240),
            (67, 960, 480),
            (72, 1440, 480),
            (62, 1920, 480),
        ]);
        let notes: Vec<usize> = analyze(&melody, Key::C_MAJOR)
            .phrases
            .iter()
            .map(|p| p.notes)
            .collect();
        assert_eq!(notes, vec![2, 2, 1]);
    }

    #[test]
    fn long_runs_are_split() {
        let melody = quarters(&[60, 62, 64, 65, 67, 69, 71, 72, 74, 76, 77, 79]);
        let notes: Vec<usize> = analyze(&melody, Key::C_MAJOR)
            .phrases
            .iter()
            .map(|p| p.notes)
            .collect();
        assert_eq!(notes, vec![MAX_PHRASE_NOTES + 1, 3]);
    }

    #[test]
    fn deceptive_cadence_lands_on_the_submediant() {
        let melody = line(&[(67, 0, 480), (71, 480, 480), (69, 960, 960)]);
        let analysis = analyze(&melody, Key::C_MAJOR);
        assert_eq!(
            analysis.cadences,
            vec![Cadence {
                tick: 960,
                kind: CadenceKind::Deceptive
            }]
        );

        // In A minor the leading tone resolves to the tonic
        let melody = line(&[(72, 0, 480), (68, 480, 480), (69, 960, 960)]);
        let analysis = analyze(&melody, Key::new(9, KeyMode::Minor));
        assert_eq!(analysis.cadences[0].kind, CadenceKind::Authentic);
    }

    #[test]
    fn tension_grows_with_leaps_register_and_chromatics() {
        let analysis = analyze(&quarters(&[60, 64, 62, 61, 48]), Key::C_MAJOR);
        let tension: Vec<f64> = analysis.tension.iter().map(|t| t.tension).collect();
        let expected = [0.0, 0.5, 0.25, 0.625, 7.0 / 12.0];
        for (got, want) in tension.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{tension:?}");
        }
        assert_eq!(analysis.contour, vec![1, -1, -1, -1]);
    }

    #[test]
    fn chords_in_the_melody_use_their_top_note() {
        let melody = line(&[(60, 0, 480), (67, 0, 480), (64, 0, 480), (65, 480, 480)]);
        let analysis = analyze(&melody, Key::C_MAJOR);
        let pitches: Vec<u8> = analysis.tension.iter().map(|t| t.pitch).collect();
        assert_eq!(pitches, vec![67, 65]);
    }

    #[test]
    fn style_features_measure_range_rhythm_and_syncopation() {
        // Off-beat quarter at 240 is the only syncopation
        let melody = line(&[(60, 0, 240), (62, 240, 480), (64, 720, 240), (72, 960, 960)]);
        let features = analyze(&melody, Key::C_MAJOR).features;
        assert_eq!(features.pitch_range, 0.5);
        assert_eq!(features.syncopation, 0.25);
        assert!((features.rhythmic_complexity - 0.1).abs() < 1e-9);

        let empty = analyze_melody(
            &Track::default(),
            &MelodyContext::new(480),
            &ChordProgression::new(Key::C_MAJOR),
        );
        assert_eq!(empty, MelodyAnalysis::default());
    }
}
