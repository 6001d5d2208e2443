mod cli;
mod output;

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use torchstack_core::{AnalysisConfig, TraceSession};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_session(path: &Path, config: &AnalysisConfig) -> Result<TraceSession> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let session = TraceSession::from_json(&data, config)
        .with_context(|| format!("analysing {}", path.display()))?;
    if session.skipped_records() > 0 {
        tracing::warn!(
            skipped = session.skipped_records(),
            "some records were malformed and left out"
        );
    }
    Ok(session)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Command::Folded {
            trace,
            full,
            weight,
        } => {
            if full {
                config.export.module_only = false;
            }
            if weight.is_some() {
                config.export.weight = weight;
            }
            let session = load_session(&trace.path, &config)?;
            output::write_folded(&mut out, &session, &config.export)?;
        }
        Command::Leaves {
            trace,
            memory_history,
        } => {
            if memory_history {
                config.export.include_memory_history = true;
            }
            let session = load_session(&trace.path, &config)?;
            output::write_leaves(&mut out, &session, &config.export)?;
        }
        Command::Memory {
            trace,
            unfreed_only,
        } => {
            let session = load_session(&trace.path, &config)?;
            output::write_memory(&mut out, &session, unfreed_only)?;
        }
    }
    out.flush()?;
    Ok(())
}
