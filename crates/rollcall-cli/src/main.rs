mod auth;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::OnnxExtractor;
use rollcall_engine::{open_identity_store, Config, ConfigError, Engine, Registry};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance for classrooms")]
struct Cli {
    /// Bearer token (HS256 JWT)
    #[arg(long, global = true, env = "ROLLCALL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a student from a photo containing only their face
    Register {
        /// Student ID (letters and numbers only)
        id: String,
        /// Display name
        name: String,
        /// Path to the photo
        image: PathBuf,
    },
    /// Take attendance for a subject from a classroom photo
    Attendance {
        /// Subject or class name
        subject: String,
        /// Path to the classroom photo
        image: PathBuf,
        /// Session date (YYYY-MM-DD)
        date: String,
    },
    /// List registered students
    List,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(result) => {
            println!("{result}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "critical failure");
            eprintln!("{}", output::critical(&e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<Value> {
    let config = Config::load();

    let secret = signing_secret(&config, |key| std::env::var(key).ok());
    if !auth::authorize(cli.token.as_deref(), secret.as_deref()) {
        return Ok(output::unauthorized());
    }
    let config = config.context("loading configuration")?;

    match cli.command {
        Commands::Register { id, name, image } => {
            let engine = open_engine(&config)?;
            tracing::info!(id = %id, image = %image.display(), "registering student");
            Ok(match engine.register(&id, &name, &image) {
                Ok(identity) => output::registered(&identity),
                Err(e) => output::failure(&e),
            })
        }
        Commands::Attendance { subject, image, date } => {
            let engine = open_engine(&config)?;
            tracing::info!(subject = %subject, image = %image.display(), date = %date, "taking attendance");
            Ok(match engine.take_attendance(&subject, &image, &date) {
                Ok(outcome) => output::attendance(&outcome),
                Err(e) => output::failure(&e),
            })
        }
        Commands::List => {
            // Listing needs no models.
            let registry = Registry::open(open_identity_store(&config.store_path), config.thresholds());
            Ok(output::roster(&registry.list(), registry.load_error()))
        }
    }
}

/// Secret for token checks. Auth runs even when the config file is broken,
/// from the environment alone.
fn signing_secret(config: &Result<Config, ConfigError>, env: impl Fn(&str) -> Option<String>) -> Option<String> {
    match config {
        Ok(config) => config.jwt_secret.clone(),
        Err(_) => env("ROLLCALL_JWT_SECRET").filter(|s| !s.is_empty()),
    }
}

/// Load the models, then open the store. Model failures are critical.
fn open_engine(config: &Config) -> Result<Engine<OnnxExtractor>> {
    let extractor = OnnxExtractor::load(&config.model_dir, config.detection_confidence)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;
    tracing::info!(dir = %config.model_dir.display(), "face models loaded");

    Ok(Engine::from_config(config, extractor))
}
