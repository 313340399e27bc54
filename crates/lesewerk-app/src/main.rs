// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lesewerk — column-aware page preprocessing and OCR orchestration.
//
// Entry point. Initialises logging, resolves the configuration, and runs one
// subcommand, printing its JSON report to stdout.

mod commands;
mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lesewerk_core::error::Result;
use serde_json::Value;

use services::data_dir;

#[derive(Debug, Parser)]
#[command(name = "lesewerk", version, about)]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/lesewerk/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the preprocessing pipeline on an image.
    Preprocess {
        image: PathBuf,
        /// Write the prepared page as PNG.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print detected skew and column splits.
    Layout { image: PathBuf },
    /// Align recognised words (JSON) against a corrected transcription.
    Align {
        #[arg(long)]
        words: PathBuf,
        #[arg(long)]
        text: PathBuf,
    },
    /// Print the effective configuration.
    Config {
        /// Also write it to the config file.
        #[arg(long)]
        save: bool,
    },
    /// Recognise image files as the pages of one document.
    #[cfg(feature = "ocr")]
    Ocr {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Persist recognised words to this SQLite database
        /// (default: $XDG_DATA_HOME/lesewerk/words.db).
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot encode report");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Value> {
    let config = data_dir::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Preprocess { image, out } => commands::preprocess(&image, out.as_deref(), &config),
        Command::Layout { image } => commands::layout(&image, &config),
        Command::Align { words, text } => commands::align(&words, &text, &config),
        Command::Config { save } => {
            let target = save.then(|| cli.config.clone().unwrap_or_else(data_dir::default_config_path));
            commands::config(&config, target.as_deref())
        }
        #[cfg(feature = "ocr")]
        Command::Ocr { images, db } => {
            let db = data_dir::word_db_path(db);
            commands::ocr(images, &db, config).await
        }
    }
}
