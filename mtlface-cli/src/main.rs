//! MTLFace CLI: launches a multi-task FR / FAS training run.
//!
//! Flags are layered over the config file and environment, validated, and
//! handed to the orchestrator running on the simulated backend.

mod args;

use anyhow::Context;
use args::Cli;
use clap::Parser;
use mtlface_core::sim::SimBackend;
use mtlface_core::{MtlFace, load_options};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "mtlface", "mtlface")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "mtlface.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let options = load_options(cli.config.as_deref(), Some(&cli.train))
        .context("Configuration error")?;
    let config = options.validate().context("Invalid training options")?;

    let mut mtl = MtlFace::new(config, &SimBackend).context("Failed to build sub-trainers")?;
    let report = mtl.fit().context("Training failed")?;

    info!(
        iterations = report.iterations,
        fr_rows = report.fr.as_ref().map_or(0, |r| r.len()),
        fas_rows = report.fas.as_ref().map_or(0, |r| r.len()),
        best_fr_loss = ?report.best_fr_loss,
        fr_checkpoints = report.fr_checkpoint_calls,
        fas_checkpoints = report.fas_checkpoint_calls,
        loss_path = %report.loss_path.display(),
        "training finished"
    );
    Ok(())
}
