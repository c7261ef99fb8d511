//! Harmonization policy - the tunable constants of chord choice and voicing.

use serde::{Deserialize, Serialize};

/// Voice placement and output settings for generated harmony tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoicingConfig {
    /// Semitones below the melody each harmony voice aims for, top voice first.
    /// Default: [4, 9, 16] (third/fourth, fifth/octave, filler)
    #[serde(default = "VoicingConfig::default_register_offsets")]
    pub register_offsets: Vec<u8>,

    /// Lowest pitch a harmony voice may take.
    /// Default: 36 (C2)
    #[serde(default = "VoicingConfig::default_min_pitch")]
    pub min_pitch: u8,

    /// Velocity of generated notes.
    /// Default: 72
    #[serde(default = "VoicingConfig::default_velocity")]
    pub velocity: u8,

    /// General MIDI program for harmony tracks.
    /// Default: 48 (String Ensemble 1)
    #[serde(default = "VoicingConfig::default_program")]
    pub program: u8,

    /// Complex arrangements add passing tones when consecutive melody notes
    /// are further apart than this many semitones.
    /// Default: 2 (a whole step)
    #[serde(default = "VoicingConfig::default_passing_tone_threshold")]
    pub passing_tone_threshold: u8,
}

impl VoicingConfig {
    fn default_register_offsets() -> Vec<u8> {
        vec![4, 9, 16]
    }

    fn default_min_pitch() -> u8 {
        36
    }

    fn default_velocity() -> u8 {
        72
    }

    fn default_program() -> u8 {
        48
    }

    fn default_passing_tone_threshold() -> u8 {
        2
    }

    /// Offset for a voice, extending the last configured step for extra voices.
    pub fn offset(&self, voice: usize) -> u8 {
        match self.register_offsets.get(voice) {
            Some(&offset) => offset,
            None => {
                let last = self.register_offsets.last().copied().unwrap_or(4);
                let extra = (voice + 1 - self.register_offsets.len()) as u8;
                last.saturating_add(extra.saturating_mul(7))
            }
        }
    }
}

impl Default for VoicingConfig {
    fn default() -> Self {
        Self {
            register_offsets: Self::default_register_offsets(),
            min_pitch: Self::default_min_pitch(),
            velocity: Self::default_velocity(),
            program: Self::default_program(),
            passing_tone_threshold: Self::default_passing_tone_threshold(),
        }
    }
}

/// Chord-selection policy. Degrees are 0-based (0 = I, 4 = V).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionConfig {
    /// Degree transitions pop progressions move along without penalty.
    /// Repeating the previous chord is always allowed.
    #[serde(default = "ProgressionConfig::default_pop_transitions")]
    pub pop_transitions: Vec<[u8; 2]>,

    /// Penalty for a pop step outside the whitelist, as a fraction of the
    /// window's total melody weight.
    /// Default: 0.5
    #[serde(default = "ProgressionConfig::default_transition_penalty")]
    pub transition_penalty: f64,

    /// Classical progressions never hold one chord for more windows than this.
    /// Default: 2
    #[serde(default = "ProgressionConfig::default_classical_max_repeats")]
    pub classical_max_repeats: usize,

    /// Twelve-bar skeleton applied to blues melodies of twelve or more measures.
    /// Default: I I I I IV IV I I V IV I I
    #[serde(default = "ProgressionConfig::default_blues_skeleton")]
    pub blues_skeleton: Vec<u8>,

    /// Blues progressions color major triads as dominant sevenths (I7, IV7,
    /// V7) and minor triads as minor sevenths.
    /// Default: true
    #[serde(default = "ProgressionConfig::default_blues_sevenths")]
    pub blues_sevenths: bool,

    /// Let jazz progressions insert secondary dominants.
    /// Default: true
    #[serde(default = "ProgressionConfig::default_secondary_dominants")]
    pub secondary_dominants: bool,
}

impl ProgressionConfig {
    fn default_pop_transitions() -> Vec<[u8; 2]> {
        vec![
            [0, 4],
            [0, 5],
            [0, 3],
            [0, 1],
            [4, 5],
            [4, 0],
            [4, 3],
            [5, 3],
            [5, 1],
            [5, 4],
            [3, 0],
            [3, 4],
            [3, 1],
            [1, 4],
            [2, 5],
            [2, 3],
            [6, 0],
        ]
    }

    fn default_transition_penalty() -> f64 {
        0.5
    }

    fn default_classical_max_repeats() -> usize {
        2
    }

    fn default_blues_skeleton() -> Vec<u8> {
        vec![0, 0, 0, 0, 3, 3, 0, 0, 4, 3, 0, 0]
    }

    fn default_blues_sevenths() -> bool {
        true
    }

    fn default_secondary_dominants() -> bool {
        true
    }

    pub fn pop_allows(&self, from: u8, to: u8) -> bool {
        from == to || self.pop_transitions.contains(&[from, to])
    }
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            pop_transitions: Self::default_pop_transitions(),
            transition_penalty: Self::default_transition_penalty(),
            classical_max_repeats: Self::default_classical_max_repeats(),
            blues_skeleton: Self::default_blues_skeleton(),
            blues_sevenths: Self::default_blues_sevenths(),
            secondary_dominants: Self::default_secondary_dominants(),
        }
    }
}

/// Logging configuration for binaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_whitelist_allows_repeats_and_listed_steps() {
        let config = ProgressionConfig::default();
        assert!(config.pop_allows(2, 2));
        assert!(config.pop_allows(0, 4));
        assert!(config.pop_allows(4, 5));
        assert!(!config.pop_allows(4, 1));
    }

    #[test]
    fn offsets_extend_past_configured_voices() {
        let config = VoicingConfig {
            register_offsets: vec![3, 8],
            ..VoicingConfig::default()
        };
        assert_eq!(config.offset(0), 3);
        assert_eq!(config.offset(1), 8);
        assert_eq!(config.offset(2), 15);
    }
}
