//! harmonize - add generated harmony voices to a MIDI melody
//!
//! Subcommands:
//! - `harmonize run <input>` - Write `<input>_harmonized.mid`
//! - `harmonize analyze <input>` - Print the detected key and chords
//! - `harmonize config` - Print the effective configuration

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use harmony::HarmonizeError;
use harmonyconf::HarmonyConfig;

mod commands;

#[derive(Parser)]
#[command(name = "harmonize")]
#[command(about = "Generate harmony voices for a MIDI melody")]
#[command(version)]
struct Cli {
    /// Config file, replacing ./harmonizer.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harmonize a melody and write the result
    Run {
        /// Input MIDI file (format 0 or 1)
        input: PathBuf,

        /// Output path (default: <input stem>_harmonized.mid)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// pop, jazz, classical or blues
        #[arg(short, long, default_value = "pop")]
        style: String,

        /// simple, medium or complex
        #[arg(short, long, default_value = "simple")]
        complexity: String,
    },

    /// Show the key and chord progression for a melody
    Analyze {
        /// Input MIDI file (format 0 or 1)
        input: PathBuf,

        /// pop, jazz, classical or blues
        #[arg(short, long, default_value = "pop")]
        style: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration and where it came from
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            exit_code(&err)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let (config, sources) = HarmonyConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.telemetry.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::debug!(files = ?sources.files, env = ?sources.env_overrides, "loaded configuration");

    match cli.command {
        Commands::Run {
            input,
            output,
            style,
            complexity,
        } => commands::run(config, &input, output, &style, &complexity),
        Commands::Analyze { input, style, json } => commands::analyze(config, &input, &style, json),
        Commands::Config => commands::show_config(&config, &sources),
    }
}

/// 2 when the input was at fault, 1 for everything else.
fn exit_code(err: &anyhow::Error) -> ExitCode {
    let client_error = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<HarmonizeError>())
        .is_some_and(HarmonizeError::is_client_error);

    if client_error {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}
