//! memcload: load installed-apps logs into sharded memcached.
//!
//! Reads every file matching the input pattern, stores one protobuf value per
//! device in the memcached shard of its device type, and marks each finished
//! file by renaming it with a leading dot.

use clap::Parser;
use snafu::prelude::*;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use memcload::config::{CliArgs, Config};
use memcload::error::{AddressParseSnafu, LoaderError, LogFileSnafu, MetricsSnafu};
use memcload::pipeline::RunProgress;
use memcload::{metrics, record, run_loader};

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), LoaderError> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    if args.test {
        let checked = record::self_check()?;
        info!("Self-check passed for {} sample lines", checked);
        return Ok(());
    }

    info!("memcload started with options: {:?}", args);

    let config = build_config(&args)?;

    let progress = Arc::new(RunProgress::default());

    // Initialize metrics if enabled
    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr, progress.clone()).context(MetricsSnafu)?;
    }

    run_loader(config, progress).await?;
    Ok(())
}

/// Log to `--log` if given, otherwise to stderr. `RUST_LOG` wins over `--log-level`.
fn init_tracing(args: &CliArgs) -> Result<(), LoaderError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.default_log_level()));

    match &args.log {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context(LogFileSnafu {
                    path: path.display().to_string(),
                })?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
        }
    }
    Ok(())
}

/// Defaults, then the YAML file if given, then command-line flags.
fn build_config(args: &CliArgs) -> Result<Config, LoaderError> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    args.apply_to(&mut config);
    config.validate()?;
    Ok(config)
}
