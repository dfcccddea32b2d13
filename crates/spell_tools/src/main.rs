//! Spell engine development tools.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use spell_core::config::EngineConfig;
use spell_tools::duel::{run_duel, DuelOptions};
use spell_tools::validate::{load_book, load_config, validate_data_directory};
use spell_tools::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "spelltool")]
#[command(about = "Development tools for the spell engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate spell data files
    Validate {
        /// Path to spell data directory
        #[arg(default_value = "assets/data/spells")]
        path: PathBuf,
    },
    /// Parse an engine config and print it with defaults filled in
    CheckConfig {
        /// Path to config file
        #[arg(default_value = "assets/config/engine.ron")]
        path: PathBuf,
    },
    /// Run a scripted duel and print the chat log
    Duel {
        /// Spell the attacker casts
        spell: u32,
        /// Path to spell data directory
        #[arg(long, default_value = "assets/data/spells")]
        data: PathBuf,
        /// Engine config; defaults when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Roller seed
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Distance between the duellists
        #[arg(long, default_value_t = 500)]
        distance: i32,
        /// Give up after this many seconds of zone time
        #[arg(long, default_value_t = 60)]
        max_seconds: u64,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn run(command: Commands) -> Result<bool> {
    match command {
        Commands::Validate { path } => {
            tracing::info!("Validating spell data in: {}", path.display());
            let report = validate_data_directory(&path)?;
            for issue in &report.issues {
                println!("{issue}");
            }
            println!(
                "{} files, {} spells, {} issues",
                report.files,
                report.spells,
                report.issues.len()
            );
            Ok(report.is_clean())
        }
        Commands::CheckConfig { path } => {
            let config = load_config(&path)?;
            let pretty = ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::default())?;
            println!("{pretty}");
            Ok(true)
        }
        Commands::Duel {
            spell,
            data,
            config,
            seed,
            distance,
            max_seconds,
            json,
        } => {
            let book = load_book(&data)?;
            let config = match config {
                Some(path) => load_config(&path)?,
                None => EngineConfig::default(),
            };
            let options = DuelOptions {
                spell,
                seed,
                distance,
                max_ms: max_seconds * 1000,
                ..DuelOptions::default()
            };
            let report = run_duel(book, config, &options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for line in &report.log {
                    println!("{line}");
                }
                println!(
                    "{} casts in {} ms; defender at {} health ({})",
                    report.casts,
                    report.elapsed_ms,
                    report.defender_health,
                    if report.defender_alive { "alive" } else { "dead" }
                );
            }
            Ok(true)
        }
    }
}

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli.command) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
