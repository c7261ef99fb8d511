use midi_codec::{Note, Track};

use crate::types::{Key, KeyDetection, KeyMode};

/// Krumhansl-Kessler major key profile (duration-weighted perception studies).
const MAJOR_PROFILE: [f64; 12] = [6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88];

/// Krumhansl-Kessler minor key profile.
const MINOR_PROFILE: [f64; 12] = [6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17];

/// Correlations closer than this count as a tie.
const TIE_EPSILON: f64 = 1e-12;

/// Infer the key of a melody. Never fails; an empty melody is C major.
pub fn analyze(melody: &Track) -> Key {
    detect_key(&melody.notes).key
}

/// Detect the key of a note set using the Krumhansl-Schmuckler algorithm.
///
/// Builds a duration-weighted pitch-class histogram (every note weighs at
/// least one tick) and correlates it against all 24 major/minor profiles.
/// Ties go to major over minor, then to the lower root.
pub fn detect_key(notes: &[Note]) -> KeyDetection {
    let histogram = pitch_class_histogram(notes);
    if histogram.iter().sum::<f64>() == 0.0 {
        return KeyDetection {
            key: Key::C_MAJOR,
            confidence: 0.0,
        };
    }

    let mut best = Key::C_MAJOR;
    let mut best_corr = f64::NEG_INFINITY;

    for (mode, profile) in [(KeyMode::Major, &MAJOR_PROFILE), (KeyMode::Minor, &MINOR_PROFILE)] {
        for root in 0..12u8 {
            // Rotate histogram so root = index 0
            let rotated: [f64; 12] = std::array::from_fn(|i| histogram[(i + root as usize) % 12]);
            let corr = pearson(&rotated, profile);
            if corr > best_corr + TIE_EPSILON {
                best_corr = corr;
                best = Key::new(root, mode);
            }
        }
    }

    KeyDetection {
        key: best,
        confidence: (best_corr * 10000.0).round() / 10000.0,
    }
}

fn pitch_class_histogram(notes: &[Note]) -> [f64; 12] {
    let mut histogram = [0.0_f64; 12];
    for note in notes {
        histogram[note.pitch_class() as usize] += note.duration_ticks.max(1) as f64;
    }
    histogram
}

/// Pearson correlation coefficient between two 12-element arrays.
fn pearson(x: &[f64; 12], y: &[f64; 12]) -> f64 {
    let x_mean: f64 = x.iter().sum::<f64>() / 12.0;
    let y_mean: f64 = y.iter().sum::<f64>() / 12.0;

    let mut num = 0.0;
    let mut x_sq = 0.0;
    let mut y_sq = 0.0;

    for i in 0..12 {
        let xd = x[i] - x_mean;
        let yd = y[i] - y_mean;
        num += xd * yd;
        x_sq += xd * xd;
        y_sq += yd * yd;
    }

    let denom = (x_sq * y_sq).sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    num / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale_notes(pitches: &[u8], step: u64) -> Vec<Note> {
        pitches
            .iter()
            .enumerate()
            .map(|(i, &p)| Note::new(p, 80, i as u64 * step, step, 0))
            .collect()
    }

    #[test]
    fn empty_melody_is_c_major() {
        let result = detect_key(&[]);
        assert_eq!(result.key, Key::C_MAJOR);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(analyze(&Track::default()), Key::C_MAJOR);
    }

    #[test]
    fn c_major_arpeggio_detected() {
        let notes = scale_notes(&[60, 64, 67, 72], 480);
        let result = detect_key(&notes);
        assert_eq!(result.key, Key::C_MAJOR);
        assert!(result.confidence > 0.5, "confidence {}", result.confidence);
    }

    #[test]
    fn c_major_scale_detected() {
        let notes = scale_notes(&[60, 62, 64, 65, 67, 69, 71], 480);
        let result = detect_key(&notes);
        assert_eq!(result.key, Key::C_MAJOR);
        assert!(result.confidence > 0.7, "confidence {}", result.confidence);
    }

    #[test]
    fn minor_tonic_weighting_detected() {
        // A harmonic minor, with the tonic held longest
        let mut notes = scale_notes(&[57, 59, 60, 62, 64, 65, 68], 240);
        notes.push(Note::new(57, 80, 1680, 1920, 0));
        notes.push(Note::new(64, 80, 3600, 960, 0));
        notes.push(Note::new(60, 80, 4560, 960, 0));
        let result = detect_key(&notes);
        assert_eq!(result.key, Key::new(9, KeyMode::Minor));
    }

    #[test]
    fn transposition_moves_the_root() {
        let notes = scale_notes(&[62, 64, 66, 67, 69, 71, 73], 480);
        assert_eq!(detect_key(&notes).key, Key::new(2, KeyMode::Major));
    }

    #[test]
    fn zero_length_notes_still_count() {
        let notes = vec![Note::new(67, 80, 0, 0, 0)];
        let result = detect_key(&notes);
        assert!(result.confidence > 0.0);
    }

    #[test]
    fn flat_histogram_breaks_ties_toward_c_major() {
        let notes: Vec<Note> = (60..72).map(|p| Note::new(p, 80, 0, 100, 0)).collect();
        assert_eq!(detect_key(&notes).key, Key::C_MAJOR);
    }

    #[test]
    fn pearson_identical_arrays() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let r = pearson(&a, &a);
        assert!((r - 1.0).abs() < 1e-10, "self-correlation should be 1.0, got {}", r);
    }
}
