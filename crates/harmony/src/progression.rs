//! Chord progression generation.
//!
//! The melody is cut into one-measure windows. Each window scores the seven
//! diatonic chords by how much melody time falls on chord tones, then the
//! style decides between close candidates:
//!
//! - Pop: triads, with steps outside the transition whitelist penalized
//! - Jazz: seventh chords, ii-V-I substitution and applied dominants
//! - Classical: bounded repetition and a closing V-I cadence
//! - Blues: the twelve-bar skeleton over every complete twelve-measure block,
//!   with dominant sevenths on the major chords

use harmonyconf::ProgressionConfig;
use midi_codec::Track;
use tracing::debug;

use crate::error::{HarmonizeError, Result};
use crate::types::{Chord, ChordProgression, ChordQuality, ChordSpan, Key, MelodyContext, Style};

/// Scores closer than this count as a tie.
const EPSILON: f64 = 1e-9;

/// Most measure windows one melody may span. A few notes with huge tick
/// values at a tiny division would otherwise cost work per empty measure.
pub const MAX_MEASURES: usize = 65_536;

/// Melody weight per pitch class inside one measure window.
#[derive(Debug, Clone)]
struct Window {
    start: u64,
    end: u64,
    weights: [f64; 12],
    total: f64,
}

impl Window {
    fn fit(&self, chord: &Chord, key: &Key) -> f64 {
        chord
            .pitch_classes(key)
            .iter()
            .map(|&pc| self.weights[pc as usize])
            .sum()
    }
}

/// End of the range a progression must cover: the latest note end, and
/// always past the last onset so zero-length notes get a window.
pub fn melody_end(melody: &Track) -> u64 {
    let last_onset = melody.notes.iter().map(|n| n.start_tick).max().unwrap_or(0);
    melody.end_tick().max(last_onset + 1)
}

/// Choose one chord per measure of `melody` in `key`.
pub fn generate(
    melody: &Track,
    context: &MelodyContext,
    key: Key,
    style: Style,
    config: &ProgressionConfig,
) -> Result<ChordProgression> {
    if melody.is_empty() {
        return Err(HarmonizeError::EmptyMelody);
    }

    let end = melody_end(melody);
    let windows = profile_windows(&measure_bounds(context, end)?, melody);

    let chords = match style {
        Style::Pop => pop(&windows, &key, config),
        Style::Jazz => jazz(&windows, &key, config),
        Style::Classical => classical(&windows, &key, config),
        Style::Blues => blues(&windows, &key, config),
    };

    let spans = windows
        .iter()
        .zip(chords)
        .map(|(window, chord)| ChordSpan {
            start_tick: window.start,
            end_tick: window.end,
            chord: match style {
                Style::Pop | Style::Classical if chord.quality == ChordQuality::Diminished => {
                    chord.with_inversion(1)
                }
                _ => chord,
            },
        })
        .collect();

    let progression = ChordProgression { key, spans };
    debug_assert!(progression.covers(end));

    debug!(
        %key,
        %style,
        windows = progression.len(),
        end_tick = end,
        "generated chord progression"
    );
    Ok(progression)
}

/// One-measure windows over `[0, end)`. Measure length follows the time
/// signature at each window start; a window never straddles a signature
/// change and the last one is clipped to `end`.
fn measure_bounds(context: &MelodyContext, end: u64) -> Result<Vec<(u64, u64)>> {
    let mut bounds = Vec::new();
    let mut start = 0u64;

    while start < end {
        if bounds.len() == MAX_MEASURES {
            return Err(HarmonizeError::MalformedInput {
                offset: 0,
                reason: format!("melody spans more than {MAX_MEASURES} measures (ends at tick {end})"),
            });
        }
        let measure = context
            .time_signature_at(start)
            .measure_ticks(context.ticks_per_quarter);
        let mut stop = start.saturating_add(measure);
        if let Some(change) = context.next_change_after(start) {
            stop = stop.min(change);
        }
        stop = stop.min(end);
        bounds.push((start, stop));
        start = stop;
    }

    Ok(bounds)
}

fn profile_windows(bounds: &[(u64, u64)], melody: &Track) -> Vec<Window> {
    let mut windows: Vec<Window> = bounds
        .iter()
        .map(|&(start, end)| Window {
            start,
            end,
            weights: [0.0; 12],
            total: 0.0,
        })
        .collect();

    for note in &melody.notes {
        let first = windows.partition_point(|w| w.end <= note.start_tick);
        let pc = note.pitch_class() as usize;

        if note.duration_ticks == 0 {
            if let Some(window) = windows.get_mut(first) {
                window.weights[pc] += 1.0;
                window.total += 1.0;
            }
            continue;
        }

        for window in windows[first..].iter_mut() {
            if window.start >= note.end_tick() {
                break;
            }
            let overlap = note.overlap(window.start, window.end) as f64;
            window.weights[pc] += overlap;
            window.total += overlap;
        }
    }

    windows
}

/// Triad on `degree` built from the scale, labelled diminished or augmented
/// when its fifth is.
fn diatonic_triad(key: &Key, degree: u8) -> Chord {
    let chord = Chord::triad(degree);
    let pcs = chord.pitch_classes(key);
    let fifth = (pcs[2] + 12 - pcs[0]) % 12;
    let quality = match fifth {
        6 => ChordQuality::Diminished,
        8 => ChordQuality::Augmented,
        _ => ChordQuality::Triad,
    };
    Chord { quality, ..chord }
}

fn triads(key: &Key) -> Vec<Chord> {
    (0..7).map(|degree| diatonic_triad(key, degree)).collect()
}

fn sevenths() -> Vec<Chord> {
    (0..7).map(Chord::seventh).collect()
}

/// Highest scoring candidate. `adjust` returns the penalty for a candidate,
/// or `None` to rule it out. Candidates are in degree order, so ties keep
/// the tonic and then the lowest degree.
fn best_chord<F>(window: &Window, key: &Key, candidates: &[Chord], mut adjust: F) -> Option<Chord>
where
    F: FnMut(&Chord) -> Option<f64>,
{
    let mut best: Option<(Chord, f64)> = None;
    for chord in candidates {
        let Some(penalty) = adjust(chord) else {
            continue;
        };
        let score = window.fit(chord, key) - penalty;
        match best {
            Some((_, best_score)) if score <= best_score + EPSILON => {}
            _ => best = Some((*chord, score)),
        }
    }
    best.map(|(chord, _)| chord)
}

fn generic(windows: &[Window], key: &Key, candidates: &[Chord]) -> Vec<Chord> {
    windows
        .iter()
        .map(|w| best_chord(w, key, candidates, |_| Some(0.0)).unwrap_or(candidates[0]))
        .collect()
}

fn pop(windows: &[Window], key: &Key, config: &ProgressionConfig) -> Vec<Chord> {
    let candidates = triads(key);
    let mut chords: Vec<Chord> = Vec::with_capacity(windows.len());

    for window in windows {
        let previous = chords.last().map(|c| c.root_degree);
        let chord = best_chord(window, key, &candidates, |c| {
            Some(match previous {
                Some(from) if !config.pop_allows(from, c.root_degree) => {
                    config.transition_penalty * window.total
                }
                _ => 0.0,
            })
        })
        .unwrap_or(candidates[0]);
        chords.push(chord);
    }

    chords
}

fn jazz(windows: &[Window], key: &Key, config: &ProgressionConfig) -> Vec<Chord> {
    let mut chords = generic(windows, key, &sevenths());
    let n = chords.len();

    // IV before V-I becomes ii
    for i in 0..n.saturating_sub(2) {
        let degrees = (chords[i].root_degree, chords[i + 1].root_degree, chords[i + 2].root_degree);
        if degrees == (3, 4, 0) {
            chords[i] = Chord::seventh(1);
        }
    }

    if !config.secondary_dominants {
        return chords;
    }

    for w in 0..n.saturating_sub(1) {
        if w > 0 && chords[w - 1].is_secondary() {
            continue;
        }
        let target = chords[w + 1];
        if target.is_secondary()
            || target.root_degree == 0
            || target.root_degree == chords[w].root_degree
            || diatonic_triad(key, target.root_degree).quality == ChordQuality::Diminished
        {
            continue;
        }

        let applied = Chord::secondary_dominant(target.root_degree, true);
        if windows[w].fit(&applied, key) + EPSILON >= windows[w].fit(&chords[w], key) {
            debug!(window = w, target = target.root_degree, "inserted secondary dominant");
            chords[w] = applied;
        }
    }

    chords
}

fn classical(windows: &[Window], key: &Key, config: &ProgressionConfig) -> Vec<Chord> {
    let candidates = triads(key);
    let n = windows.len();
    let tonic = candidates[0];
    let dominant = candidates[4];

    let mut forced: Vec<Option<Chord>> = vec![None; n];
    match n {
        0 => {}
        1 => forced[0] = Some(tonic),
        _ => {
            forced[n - 2] = Some(dominant);
            forced[n - 1] = Some(tonic);
        }
    }

    let max_repeats = config.classical_max_repeats.max(1);
    let mut chords: Vec<Chord> = Vec::with_capacity(n);

    for (i, window) in windows.iter().enumerate() {
        if let Some(chord) = forced[i] {
            chords.push(chord);
            continue;
        }

        let chord = best_chord(window, key, &candidates, |c| {
            let behind = chords
                .iter()
                .rev()
                .take_while(|p| p.root_degree == c.root_degree)
                .count();
            let ahead = forced[i + 1..]
                .iter()
                .take_while(|f| f.map(|f| f.root_degree) == Some(c.root_degree))
                .count();
            (behind + 1 + ahead <= max_repeats).then_some(0.0)
        })
        .unwrap_or(tonic);
        chords.push(chord);
    }

    chords
}

fn blues(windows: &[Window], key: &Key, config: &ProgressionConfig) -> Vec<Chord> {
    let candidates = triads(key);
    let skeleton = &config.blues_skeleton;
    let mut chords = if windows.len() < 12 || skeleton.is_empty() {
        generic(windows, key, &candidates)
    } else {
        let blocked = windows.len() / 12 * 12;
        let mut chords: Vec<Chord> = (0..blocked)
            .map(|i| diatonic_triad(key, skeleton[i % skeleton.len()] % 7))
            .collect();
        chords.extend(generic(&windows[blocked..], key, &candidates));
        chords
    };

    if config.blues_sevenths {
        for chord in &mut chords {
            *chord = blues_seventh(key, *chord);
        }
    }
    chords
}

/// Major triads take a flat seventh and minor triads a diatonic one;
/// diminished and augmented triads are left alone.
fn blues_seventh(key: &Key, chord: Chord) -> Chord {
    if chord.quality != ChordQuality::Triad {
        return chord;
    }
    let pcs = chord.pitch_classes(key);
    match (pcs[1] + 12 - pcs[0]) % 12 {
        4 => Chord::dominant_seventh(chord.root_degree),
        _ => Chord::seventh(chord.root_degree),
    }
}
