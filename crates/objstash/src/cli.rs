//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use objstash_service::config::Config;

use crate::inspect;
use crate::logging;

/// How `inspect` prints the entries of a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One row per entry, with a short summary of the value.
    Table,
    /// All entries with their full values as JSON.
    Json,
    /// All entries with the debug representation of their values.
    Debug,
}

/// objstash commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Print the entries of a snapshot file.
    ///
    /// Values are decoded without access to the types that produced them, so all objects are
    /// shown as mutable objects of open types.
    Inspect {
        /// Path to the snapshot file.
        snapshot: PathBuf,

        /// The output format.
        #[arg(long, short, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Validate the configuration and print the effective configuration.
    CheckConfig,
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    // SAFETY: This is called at the very start of the program, before any other threads are spawned.
    unsafe { logging::init_logging(&config) };

    match cli.command {
        Command::Inspect { snapshot, format } => {
            let output = inspect::inspect(&snapshot, &config, format)
                .with_context(|| format!("failed to inspect `{}`", snapshot.display()))?;
            print!("{output}");
        }
        Command::CheckConfig => {
            let output =
                serde_yaml::to_string(&config).context("failed to serialize configuration")?;
            print!("{output}");
        }
    }

    Ok(())
}
