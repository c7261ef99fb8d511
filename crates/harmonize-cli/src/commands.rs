use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use harmony::{
    Analysis, HarmonizationEngine, HarmonizationSettings, HarmonizeError, Phrase, Style,
    StyleFeatures,
};
use harmonyconf::{ConfigSources, HarmonyConfig};
use serde::Serialize;
use tracing::info;

/// Harmonize `input` and write the result next to it (or to `output`).
pub fn run(
    config: HarmonyConfig,
    input: &Path,
    output: Option<PathBuf>,
    style: &str,
    complexity: &str,
) -> Result<()> {
    let settings = HarmonizationSettings::parse(style, complexity)?;
    let bytes = read_midi(input)?;

    let score = midi_codec::decode(&bytes).map_err(HarmonizeError::from)?;
    let harmonized = HarmonizationEngine::new(config).harmonize_score(&score, settings)?;
    let out = midi_codec::encode(&harmonized.score).map_err(HarmonizeError::from)?;

    let output = output.unwrap_or_else(|| default_output(input));
    std::fs::write(&output, &out)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(path = %output.display(), bytes = out.len(), "wrote harmonized file");
    println!(
        "{} in {}: {} chords, {} harmony voice(s) -> {}",
        input.display(),
        harmonized.key.key,
        harmonized.progression.len(),
        settings.complexity.voice_count(),
        output.display()
    );
    for relaxation in &harmonized.relaxations {
        println!(
            "  note: voice {} relaxed {:?} at tick {}",
            relaxation.voice + 1,
            relaxation.constraint,
            relaxation.tick
        );
    }

    Ok(())
}

/// Print the key, chord progression and phrase structure for `input`.
pub fn analyze(config: HarmonyConfig, input: &Path, style: &str, json: bool) -> Result<()> {
    let style: Style = style.parse()?;
    let bytes = read_midi(input)?;
    let analysis = HarmonizationEngine::new(config).analyze(&bytes, style)?;
    let report = AnalysisReport::new(&analysis, style);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Key:   {} (confidence {:.2})", report.key, report.confidence);
    println!("Style: {}", report.style);
    println!();
    println!("{:>4}  {:>8}  {:>8}  {:<8}  {}", "bar", "start", "end", "numeral", "chord");
    for (i, chord) in report.chords.iter().enumerate() {
        println!(
            "{:>4}  {:>8}  {:>8}  {:<8}  {}",
            i + 1,
            chord.start_tick,
            chord.end_tick,
            chord.numeral,
            chord.name
        );
    }

    println!();
    println!("{:>6}  {:>8}  {:>8}  {:>5}  {}", "phrase", "start", "end", "notes", "cadence");
    for (i, phrase) in report.phrases.iter().enumerate() {
        let cadence = report
            .cadences
            .iter()
            .find(|c| c.tick >= phrase.start_tick && c.tick < phrase.end_tick)
            .map_or("-", |c| c.kind.as_str());
        println!(
            "{:>6}  {:>8}  {:>8}  {:>5}  {}",
            i + 1,
            phrase.start_tick,
            phrase.end_tick,
            phrase.notes,
            cadence
        );
    }
    println!(
        "Range {:.2}  rhythmic complexity {:.2}  syncopation {:.2}",
        report.features.pitch_range,
        report.features.rhythmic_complexity,
        report.features.syncopation
    );
    Ok(())
}

/// Print the merged configuration as TOML, prefixed by its sources.
pub fn show_config(config: &HarmonyConfig, sources: &ConfigSources) -> Result<()> {
    if sources.files.is_empty() {
        println!("# Loaded from: built-in defaults");
    } else {
        for file in &sources.files {
            println!("# Loaded from: {}", file.display());
        }
    }
    if !sources.env_overrides.is_empty() {
        println!("# Environment overrides: {}", sources.env_overrides.join(", "));
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

fn read_midi(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// `song.mid` -> `song_harmonized.mid`, in the same directory.
fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "melody".to_string());
    input.with_file_name(format!("{stem}_harmonized.mid"))
}

#[derive(Debug, Serialize)]
struct AnalysisReport {
    key: String,
    root: u8,
    mode: harmony::KeyMode,
    confidence: f64,
    style: Style,
    ticks_per_quarter: u16,
    chords: Vec<ChordReport>,
    phrases: Vec<Phrase>,
    cadences: Vec<CadenceReport>,
    features: StyleFeatures,
}

#[derive(Debug, Serialize)]
struct ChordReport {
    start_tick: u64,
    end_tick: u64,
    numeral: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct CadenceReport {
    tick: u64,
    /// PAC, HC or DC
    kind: String,
}

impl AnalysisReport {
    fn new(analysis: &Analysis, style: Style) -> Self {
        let key = analysis.progression.key;
        Self {
            key: key.to_string(),
            root: key.root,
            mode: key.mode,
            confidence: analysis.key.confidence,
            style,
            ticks_per_quarter: analysis.ticks_per_quarter,
            chords: analysis
                .progression
                .spans
                .iter()
                .map(|span| ChordReport {
                    start_tick: span.start_tick,
                    end_tick: span.end_tick,
                    numeral: span.chord.numeral(&key),
                    name: span.chord.name(&key),
                })
                .collect(),
            phrases: analysis.melody.phrases.clone(),
            cadences: analysis
                .melody
                .cadences
                .iter()
                .map(|c| CadenceReport {
                    tick: c.tick,
                    kind: c.kind.to_string(),
                })
                .collect(),
            features: analysis.melody.features,
        }
    }
}
