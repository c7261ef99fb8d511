//! Voice arrangement: turns a chord progression into harmony tracks.
//!
//! Every voice gets one pitch per slot. Simple arrangements use one slot per
//! chord; medium and complex ones re-trigger at every melody onset, and
//! complex ones split leaps in the melody with a passing tone.
//!
//! Hard rules, in the order they are given up when nothing satisfies them:
//! no parallel perfect fifths or octaves across a chord change, then no
//! voice crossing.

use harmonyconf::VoicingConfig;
use midi_codec::{Note, Track};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Chord, ChordProgression, Complexity, Key};

/// General MIDI percussion channel, never used for harmony.
pub const PERCUSSION_CHANNEL: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    ParallelPerfects,
    VoiceCrossing,
}

/// A voice-leading rule the arranger had to break at one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relaxation {
    pub tick: u64,
    /// 0 = highest harmony voice
    pub voice: usize,
    pub constraint: Constraint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arrangement {
    pub tracks: Vec<Track>,
    pub relaxations: Vec<Relaxation>,
}

/// Time span over which every voice holds one chord tone.
#[derive(Debug, Clone, Copy)]
struct Slot {
    start: u64,
    end: u64,
    /// Melody pitch the voices hang below
    reference: u8,
    chord: Chord,
}

/// A part already placed in the current slot.
#[derive(Debug, Clone, Copy)]
struct Part {
    previous: Option<u8>,
    current: u8,
}

/// Harmony tracks for `melody`, one per voice.
pub fn arrange(
    melody: &Track,
    progression: &ChordProgression,
    complexity: Complexity,
    config: &VoicingConfig,
) -> Vec<Track> {
    arrange_detailed(melody, progression, complexity, config).tracks
}

/// Like [`arrange`], also reporting every relaxed voice-leading rule.
pub fn arrange_detailed(
    melody: &Track,
    progression: &ChordProgression,
    complexity: Complexity,
    config: &VoicingConfig,
) -> Arrangement {
    let key = progression.key;
    let voices = complexity.voice_count();
    let slots = match complexity {
        Complexity::Simple => block_slots(melody, progression),
        Complexity::Medium | Complexity::Complex => onset_slots(melody, progression),
    };

    let mut pitches: Vec<Vec<u8>> = vec![Vec::with_capacity(slots.len()); voices];
    let mut relaxations = Vec::new();

    for (s, slot) in slots.iter().enumerate() {
        let chord_changed = s > 0 && slots[s - 1].chord != slot.chord;
        let mut placed: Vec<Part> = melody_part(melody, slot.start).into_iter().collect();
        let mut covered = vec![slot.reference % 12];
        let mut upper = slot.reference;

        for v in 0..voices {
            let previous = s.checked_sub(1).map(|p| pitches[v][p]);
            let lowest = v == voices - 1;
            let bass = (lowest && slot.chord.inversion > 0)
                .then(|| slot.chord.bass_pitch_class(&key));
            let prefer_uncovered = voices == 3 && lowest;
            let candidates = candidate_pitches(
                &key,
                slot,
                config,
                config.offset(v),
                previous,
                bass,
                prefer_uncovered.then_some(covered.as_slice()),
            );

            let (pitch, relaxed) = choose(&candidates, upper, previous, chord_changed, &placed);
            if let Some(constraint) = relaxed {
                warn!(
                    tick = slot.start,
                    voice = v,
                    ?constraint,
                    "relaxed voice-leading constraint"
                );
                relaxations.push(Relaxation {
                    tick: slot.start,
                    voice: v,
                    constraint,
                });
            }

            pitches[v].push(pitch);
            placed.push(Part {
                previous,
                current: pitch,
            });
            covered.push(pitch % 12);
            upper = pitch;
        }
    }

    let passing = if complexity == Complexity::Complex {
        passing_tones(melody, &key, &slots, &pitches, config)
    } else {
        vec![vec![None; slots.len()]; voices]
    };

    let channels = harmony_channels(melody.channel(), voices);
    let velocity = config.velocity.max(1);
    let tracks: Vec<Track> = (0..voices)
        .map(|v| {
            let mut notes = Vec::with_capacity(slots.len());
            for (s, slot) in slots.iter().enumerate() {
                let pitch = pitches[v][s];
                match passing[v][s] {
                    Some(passing_pitch) => {
                        let mid = midpoint(slot);
                        notes.push(Note::new(pitch, velocity, slot.start, mid - slot.start, channels[v]));
                        notes.push(Note::new(passing_pitch, velocity, mid, slot.end - mid, channels[v]));
                    }
                    None => {
                        notes.push(Note::new(pitch, velocity, slot.start, slot.end - slot.start, channels[v]));
                    }
                }
            }
            Track::new(Some(format!("Harmony {}", v + 1)), notes).with_program(config.program)
        })
        .collect();

    debug!(
        voices,
        slots = slots.len(),
        relaxations = relaxations.len(),
        "arranged harmony voices"
    );

    Arrangement {
        tracks,
        relaxations,
    }
}

/// Lowest melody pitch sounding at `tick`.
fn melody_at(melody: &Track, tick: u64) -> Option<u8> {
    melody
        .notes
        .iter()
        .filter(|n| n.sounds_at(tick))
        .map(|n| n.pitch)
        .min()
}

/// The melody as a part moving into `tick`, when it sounds there.
fn melody_part(melody: &Track, tick: u64) -> Option<Part> {
    let current = melody_at(melody, tick)?;
    Some(Part {
        previous: tick.checked_sub(1).and_then(|t| melody_at(melody, t)),
        current,
    })
}

/// One slot per chord span, hanging below the lowest melody pitch in it.
fn block_slots(melody: &Track, progression: &ChordProgression) -> Vec<Slot> {
    progression
        .spans
        .iter()
        .map(|span| {
            let lowest = melody
                .notes
                .iter()
                .filter(|n| {
                    n.overlap(span.start_tick, span.end_tick) > 0
                        || (n.duration_ticks == 0 && span.contains_tick(n.start_tick))
                })
                .map(|n| n.pitch)
                .min();
            Slot {
                start: span.start_tick,
                end: span.end_tick,
                reference: lowest.unwrap_or_else(|| recent_pitch(melody, span.start_tick)),
                chord: span.chord,
            }
        })
        .collect()
}

/// A slot at every chord start and every distinct melody onset.
fn onset_slots(melody: &Track, progression: &ChordProgression) -> Vec<Slot> {
    let end = progression.end_tick();
    let mut boundaries: Vec<u64> = progression
        .spans
        .iter()
        .map(|s| s.start_tick)
        .chain(melody.notes.iter().map(|n| n.start_tick))
        .filter(|&t| t < end)
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    boundaries
        .iter()
        .enumerate()
        .filter_map(|(i, &start)| {
            let span = progression.span_at(start)?;
            let reference = melody
                .notes
                .iter()
                .filter(|n| n.sounds_at(start))
                .map(|n| n.pitch)
                .min()
                .unwrap_or_else(|| recent_pitch(melody, start));
            Some(Slot {
                start,
                end: boundaries.get(i + 1).copied().unwrap_or(end),
                reference,
                chord: span.chord,
            })
        })
        .collect()
}

/// Lowest pitch of the latest onset at or before `tick`, else the first note.
fn recent_pitch(melody: &Track, tick: u64) -> u8 {
    let idx = melody.notes.partition_point(|n| n.start_tick <= tick);
    if idx > 0 {
        let onset = melody.notes[idx - 1].start_tick;
        if let Some(pitch) = melody.notes[..idx]
            .iter()
            .rev()
            .take_while(|n| n.start_tick == onset)
            .map(|n| n.pitch)
            .min()
        {
            return pitch;
        }
    }
    melody.notes.first().map(|n| n.pitch).unwrap_or(60)
}

/// Chord tones within an octave centred on the voice's target, best first.
/// With `bass` set, that pitch class leads, and it is also offered an octave
/// lower so it can stay under the parts above.
fn candidate_pitches(
    key: &Key,
    slot: &Slot,
    config: &VoicingConfig,
    offset: u8,
    previous: Option<u8>,
    bass: Option<u8>,
    covered: Option<&[u8]>,
) -> Vec<u8> {
    let target = (slot.reference as i16 - offset as i16).max(config.min_pitch as i16);
    let lo = (target - 6).max(config.min_pitch as i16).clamp(0, 116);
    let anchor = previous.map(i16::from).unwrap_or(target);

    let mut candidates: Vec<u8> = (lo..lo + 12)
        .map(|p| p as u8)
        .filter(|p| slot.chord.contains(key, p % 12))
        .collect();

    if let Some(bass) = bass {
        let lower = candidates
            .iter()
            .find(|&&p| p % 12 == bass && p >= config.min_pitch.saturating_add(12))
            .map(|&p| p - 12);
        candidates.extend(lower);
    }

    candidates.sort_by_key(|&p| {
        (
            bass.is_some_and(|b| p % 12 != b),
            covered.is_some_and(|pcs| pcs.contains(&(p % 12))),
            (p as i16 - anchor).abs(),
            (p as i16 - target).abs(),
            p,
        )
    });
    candidates
}

/// First candidate that passes every rule, relaxing parallels and then crossing.
fn choose(
    candidates: &[u8],
    upper: u8,
    previous: Option<u8>,
    chord_changed: bool,
    placed: &[Part],
) -> (u8, Option<Constraint>) {
    let below = |p: u8| p < upper;
    let independent = |p: u8| {
        !chord_changed
            || placed
                .iter()
                .all(|part| !parallel_perfect(part, previous, p))
    };

    if let Some(&p) = candidates.iter().find(|&&p| below(p) && independent(p)) {
        return (p, None);
    }
    if let Some(&p) = candidates.iter().find(|&&p| below(p)) {
        return (p, Some(Constraint::ParallelPerfects));
    }
    let fallback = candidates.first().copied().unwrap_or(upper.saturating_sub(12));
    (fallback, Some(Constraint::VoiceCrossing))
}

/// True when moving from `previous` to `current` forms a parallel unison,
/// octave or fifth with `other`.
fn parallel_perfect(other: &Part, previous: Option<u8>, current: u8) -> bool {
    let (Some(other_prev), Some(prev)) = (other.previous, previous) else {
        return false;
    };
    let before = other_prev.abs_diff(prev) % 12;
    let after = other.current.abs_diff(current) % 12;
    let is_perfect = after == 0 || after == 7;
    let motion = (current as i16 - prev as i16).signum();
    let other_motion = (other.current as i16 - other_prev as i16).signum();

    is_perfect && before == after && motion != 0 && motion == other_motion
}

fn midpoint(slot: &Slot) -> u64 {
    slot.start + (slot.end - slot.start) / 2
}

/// Passing or neighbour tones at the midpoint of slots followed by a melodic
/// leap wider than the configured threshold.
///
/// Each tone sits between the part above and the voice below, and is dropped
/// when every option would move in parallel fifths or octaves into the next
/// chord. The bass of an inverted chord keeps its note.
fn passing_tones(
    melody: &Track,
    key: &Key,
    slots: &[Slot],
    pitches: &[Vec<u8>],
    config: &VoicingConfig,
) -> Vec<Vec<Option<u8>>> {
    let voices = pitches.len();
    let mut passing = vec![vec![None; slots.len()]; voices];

    for s in 0..slots.len().saturating_sub(1) {
        let (slot, next) = (&slots[s], &slots[s + 1]);
        if slot.reference.abs_diff(next.reference) <= config.passing_tone_threshold
            || slot.end - slot.start < 2
        {
            continue;
        }

        let mid = midpoint(slot);
        let chord_changes = slot.chord != next.chord;
        let melody_into_next = melody_part(melody, next.start);

        for v in 0..voices {
            if v == voices - 1 && slot.chord.inversion > 0 {
                continue;
            }

            let ceiling = if v == 0 {
                melody_at(melody, mid).unwrap_or(slot.reference)
            } else {
                passing[v - 1][s].unwrap_or(pitches[v - 1][s])
            };
            let floor = match pitches.get(v + 1) {
                Some(below) => below[s].saturating_add(1).max(config.min_pitch),
                None => config.min_pitch,
            };

            // What the other parts sound leaving this slot and entering the next
            let others: Vec<Part> = melody_into_next
                .into_iter()
                .chain((0..voices).filter(|&w| w != v).map(|w| Part {
                    previous: Some(passing[w][s].unwrap_or(pitches[w][s])),
                    current: pitches[w][s + 1],
                }))
                .collect();

            let (from, to) = (pitches[v][s], pitches[v][s + 1]);
            passing[v][s] = passing_candidates(key, &slot.chord, from, to, floor, ceiling)
                .into_iter()
                .find(|&p| {
                    !chord_changes
                        || others
                            .iter()
                            .all(|part| !parallel_perfect(part, Some(p), to))
                });
        }
    }

    passing
}

/// Chord tones and scale steps in `[floor, ceiling)` other than `from` and
/// `to`, nearest the midpoint of the two first.
fn passing_candidates(
    key: &Key,
    chord: &Chord,
    from: u8,
    to: u8,
    floor: u8,
    ceiling: u8,
) -> Vec<u8> {
    let mid = (from as i16 + to as i16) / 2;
    let mut candidates: Vec<u8> = (mid - 6..=mid + 6)
        .filter(|&p| p >= floor as i16 && p < ceiling as i16 && (0..=127).contains(&p))
        .map(|p| p as u8)
        .filter(|&p| p != from && p != to)
        .filter(|&p| chord.contains(key, p % 12) || key.contains(p % 12))
        .collect();
    candidates.sort_by_key(|&p| ((p as i16 - mid).abs(), p));
    candidates
}

/// Channels for harmony voices, skipping the melody's and percussion.
fn harmony_channels(melody_channel: u8, count: usize) -> Vec<u8> {
    (0..16u8)
        .filter(|&c| c != melody_channel && c != PERCUSSION_CHANNEL)
        .take(count)
        .collect()
}
