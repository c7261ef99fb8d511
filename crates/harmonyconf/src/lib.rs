//! Configuration loading for the melody harmonizer.
//!
//! The harmonizer's chord-selection and voicing constants are policy, not law:
//! they live here so deployments can tune them without a rebuild.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/melody-harmonizer/config.toml` (system)
//! 2. `~/.config/melody-harmonizer/config.toml` (user)
//! 3. `./harmonizer.toml` (local override, replaced by an explicit path)
//! 4. Environment variables (`HARMONIZER_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [voicing]
//! register_offsets = [3, 8, 15]
//! velocity = 80
//! program = 52
//!
//! [progression]
//! transition_penalty = 0.75
//! secondary_dominants = false
//!
//! [telemetry]
//! log_level = "debug"
//! ```

pub mod loader;
pub mod policy;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use policy::{ProgressionConfig, TelemetryConfig, VoicingConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("Failed to serialize config: {0}")]
    Serialize(String),
}

/// Complete harmonizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HarmonyConfig {
    #[serde(default)]
    pub voicing: VoicingConfig,

    #[serde(default)]
    pub progression: ProgressionConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl HarmonyConfig {
    /// Load configuration from all sources, with `config_path` replacing the
    /// local override file, and report where the values came from.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, sources.files.last().map(PathBuf::as_path))?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Parse a single TOML document on top of the compiled defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let path = Path::new("<inline>");
        let table = loader::parse_table(contents, path)?;
        let config = loader::from_table(table, Some(path))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the harmonizer cannot act on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let voicing = &self.voicing;
        if voicing.register_offsets.is_empty() {
            return Err(invalid("voicing.register_offsets", "at least one offset is required"));
        }
        if voicing.register_offsets.iter().any(|&o| o == 0 || o > 48) {
            return Err(invalid("voicing.register_offsets", "offsets must be within 1..=48"));
        }
        if voicing.min_pitch > 127 {
            return Err(invalid("voicing.min_pitch", "must be a MIDI pitch (0-127)"));
        }
        if !(1..=127).contains(&voicing.velocity) {
            return Err(invalid("voicing.velocity", "must be within 1..=127"));
        }
        if voicing.program > 127 {
            return Err(invalid("voicing.program", "must be a General MIDI program (0-127)"));
        }

        let progression = &self.progression;
        if progression.pop_transitions.iter().flatten().any(|&d| d > 6) {
            return Err(invalid("progression.pop_transitions", "degrees must be within 0..=6"));
        }
        if !progression.transition_penalty.is_finite() || progression.transition_penalty < 0.0 {
            return Err(invalid("progression.transition_penalty", "must be a non-negative number"));
        }
        if progression.classical_max_repeats == 0 {
            return Err(invalid("progression.classical_max_repeats", "must be at least 1"));
        }
        if progression.blues_skeleton.len() != 12 || progression.blues_skeleton.iter().any(|&d| d > 6) {
            return Err(invalid(
                "progression.blues_skeleton",
                "must list 12 degrees within 0..=6",
            ));
        }

        Ok(())
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let body = toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        Ok(format!("# Melody Harmonizer Configuration\n\n{body}"))
    }
}

fn invalid(field: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HarmonyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.voicing.register_offsets, vec![4, 9, 16]);
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn test_to_toml_round_trips() {
        let config = HarmonyConfig::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[voicing]"));
        assert!(toml.contains("[progression]"));
        assert_eq!(HarmonyConfig::from_toml_str(&toml).unwrap(), config);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = HarmonyConfig::from_toml_str(
            r#"
[voicing]
velocity = 90
"#,
        )
        .unwrap();
        assert_eq!(config.voicing.velocity, 90);
        assert_eq!(config.voicing.program, 48);
        assert_eq!(config.progression, ProgressionConfig::default());
    }

    #[test]
    fn test_rejects_out_of_range_degree() {
        let err = HarmonyConfig::from_toml_str(
            r#"
[progression]
pop_transitions = [[0, 9]]
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "progression.pop_transitions",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_short_blues_skeleton() {
        let err = HarmonyConfig::from_toml_str(
            r#"
[progression]
blues_skeleton = [0, 3, 4]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("blues_skeleton"));
    }

    #[test]
    fn test_rejects_zero_velocity() {
        let mut config = HarmonyConfig::default();
        config.voicing.velocity = 0;
        assert!(config.validate().is_err());
    }
}
