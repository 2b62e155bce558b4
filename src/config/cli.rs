//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;

use super::Config;

/// Load installed-apps logs into sharded memcached.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "memcload")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Optional YAML configuration file; flags below override it.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Round-trip the built-in sample through encode/decode and exit.
    #[arg(short, long)]
    pub test: bool,

    /// Write logs to this file instead of stderr.
    #[arg(short, long)]
    pub log: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Defaults to debug with --dry.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log intended writes instead of sending them.
    #[arg(long)]
    pub dry: bool,

    /// Glob pattern for input files.
    #[arg(long)]
    pub pattern: Option<String>,

    /// Memcached address for idfa devices.
    #[arg(long)]
    pub idfa: Option<String>,

    /// Memcached address for gaid devices.
    #[arg(long)]
    pub gaid: Option<String>,

    /// Memcached address for adid devices.
    #[arg(long)]
    pub adid: Option<String>,

    /// Memcached address for dvid devices.
    #[arg(long)]
    pub dvid: Option<String>,

    /// Number of files processed concurrently.
    #[arg(long)]
    pub workers: Option<usize>,
}

impl CliArgs {
    /// Overlay explicitly given flags on top of `config`.
    pub fn apply_to(&self, config: &mut Config) {
        if self.dry {
            config.store.dry_run = true;
        }
        if let Some(pattern) = &self.pattern {
            config.source.pattern = pattern.clone();
        }
        let shards = [
            (&self.idfa, &mut config.shards.idfa),
            (&self.gaid, &mut config.shards.gaid),
            (&self.adid, &mut config.shards.adid),
            (&self.dvid, &mut config.shards.dvid),
        ];
        for (flag, slot) in shards {
            if let Some(address) = flag {
                *slot = address.clone();
            }
        }
        if let Some(workers) = self.workers {
            config.loader.workers = workers;
        }
    }

    /// Log level to use when `RUST_LOG` is not set.
    pub fn default_log_level(&self) -> &str {
        match &self.log_level {
            Some(level) => level,
            None if self.dry => "debug",
            None => "info",
        }
    }
}
