//! memcload: a library for loading installed-apps logs into sharded memcached.
//!
//! This library provides components for reading compressed TSV logs,
//! routing each record to a memcached shard by device type, and writing
//! records in bounded batches with retries.
//!
//! # Example
//!
//! ```ignore
//! use memcload::{Config, run_loader, error::LoaderError};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), LoaderError> {
//!     let config = Config::from_file("memcload.yaml")?;
//!     let stats = run_loader(config, Arc::default()).await?;
//!     println!("Processed {} records", stats.processed);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod shard;
pub mod sink;
pub mod source;

// Re-export main types
pub use config::Config;
pub use pipeline::{Loader, ProcessingResult, RunStats, run_loader};
pub use record::{Record, parse_line};
pub use shard::{DeviceType, ShardRouter};
