//! File pool dispatcher.
//!
//! Lists the input files and runs one [`FileWorker`] per file, keeping at
//! most `workers` files in flight. Files finish in any order; each one is
//! judged on its own error rate and then marked processed by renaming it
//! with a leading dot.
//!
//! # Architecture
//!
//! - **Dispatcher**: a `FuturesUnordered` of file futures, refilled as they complete
//! - **Per file**: a blocking reader thread and `threads_in_worker` executor tasks
//!   sharing per-shard buffers (see [`worker`])

mod buffer;
mod signal;
mod stats;
mod worker;

pub use buffer::{Batch, ShardBuffers};
pub use stats::{ProcessingResult, RunProgress, RunStats, Verdict};
pub use worker::{FileReport, FileWorker};

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::emit;
use crate::error::LoaderError;
use crate::metrics::events::{ActiveFiles, FileProcessed, FileStatus};
use crate::sink::{StorePool, StorePoolRef, StoreWriter};
use crate::source::{dot_rename, list_files};

/// Future type for one file.
type FileFuture = Pin<Box<dyn Future<Output = FileOutcome> + Send>>;

/// How a file ended, as seen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    /// Read to the end and renamed.
    Done(ProcessingResult),
    /// Stopped early by cancellation or a decode error, or the rename failed.
    Incomplete(ProcessingResult),
    /// Could not be opened; left in place.
    FailedOpen,
}

/// Runs a whole load: every matching file, bounded concurrency, one summary.
pub struct Loader {
    config: Config,
    pool: StorePoolRef,
    shutdown: CancellationToken,
    progress: Arc<RunProgress>,
}

impl Loader {
    /// Create a loader writing to memcached.
    pub fn new(config: Config, shutdown: CancellationToken) -> Self {
        let pool = Arc::new(StorePool::memcache(&config.store));
        Self::with_pool(config, pool, shutdown)
    }

    /// Create a loader writing through an existing pool.
    pub fn with_pool(config: Config, pool: StorePoolRef, shutdown: CancellationToken) -> Self {
        Self {
            config,
            pool,
            shutdown,
            progress: Arc::default(),
        }
    }

    /// Publish file counters to `progress` while running.
    pub fn with_progress(mut self, progress: Arc<RunProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Process every matching file once.
    pub async fn run(&self) -> Result<RunStats, LoaderError> {
        let pattern = &self.config.source.pattern;
        let files = list_files(pattern)?;
        let mut stats = RunStats {
            files_found: files.len(),
            ..Default::default()
        };

        if files.is_empty() {
            info!("No files found for pattern {}", pattern);
            self.progress.finish();
            return Ok(stats);
        }
        info!("Found {} files for pattern {}", files.len(), pattern);

        if self.config.store.dry_run {
            info!("Dry run: records will be logged, not stored");
        }

        let writer = StoreWriter::new(self.pool.clone(), &self.config.store);
        let worker = Arc::new(FileWorker::new(
            self.config.shards.router(),
            writer,
            &self.config.loader,
            &self.config.source,
        ));
        let threshold = self.config.loader.normal_err_rate;
        let max_concurrent = self.config.loader.workers.max(1);

        let mut in_flight: FuturesUnordered<FileFuture> = FuturesUnordered::new();
        let mut pending = files.into_iter();

        for path in pending.by_ref().take(max_concurrent) {
            in_flight.push(self.spawn_file(&worker, path, threshold));
        }
        emit!(ActiveFiles {
            count: in_flight.len()
        });
        self.progress.update(&stats, in_flight.len());

        while let Some(outcome) = in_flight.next().await {
            match outcome {
                FileOutcome::Done(result) => stats.record_file(result),
                FileOutcome::Incomplete(result) => {
                    stats.processed += result.processed;
                    stats.errors += result.errors;
                    stats.record_failure();
                }
                FileOutcome::FailedOpen => stats.record_failure(),
            }

            if self.shutdown.is_cancelled() {
                debug!("Shutdown requested, not starting new files");
            } else if let Some(path) = pending.next() {
                in_flight.push(self.spawn_file(&worker, path, threshold));
            }
            emit!(ActiveFiles {
                count: in_flight.len()
            });
            self.progress.update(&stats, in_flight.len());
        }

        let skipped = pending.count();
        if skipped > 0 {
            warn!("{} files left unprocessed after shutdown", skipped);
        }

        self.progress.finish();
        stats.log_summary();
        Ok(stats)
    }

    fn spawn_file(&self, worker: &Arc<FileWorker>, path: PathBuf, threshold: f64) -> FileFuture {
        debug!("Starting {}", path.display());
        Box::pin(process_file(
            worker.clone(),
            path,
            self.shutdown.clone(),
            threshold,
        ))
    }
}

/// Load one file, log its verdict and mark it processed.
async fn process_file(
    worker: Arc<FileWorker>,
    path: PathBuf,
    shutdown: CancellationToken,
    threshold: f64,
) -> FileOutcome {
    let start = Instant::now();
    let name = path.display().to_string();

    let report = match worker.process(&path, &shutdown).await {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            emit!(FileProcessed {
                status: FileStatus::FailedOpen,
                duration: start.elapsed(),
            });
            return FileOutcome::FailedOpen;
        }
    };

    if report.interrupted {
        warn!(
            "{} was interrupted after {} records, leaving it in place",
            name, report.result.processed
        );
        emit!(FileProcessed {
            status: FileStatus::Interrupted,
            duration: start.elapsed(),
        });
        return FileOutcome::Incomplete(report.result);
    }
    if report.read_failed {
        error!(
            "{} could not be read to the end ({} records stored), leaving it in place",
            name, report.result.processed
        );
        emit!(FileProcessed {
            status: FileStatus::ReadFailed,
            duration: start.elapsed(),
        });
        return FileOutcome::Incomplete(report.result);
    }

    let verdict = report.result.log_verdict(&name, threshold);
    let status = if verdict.is_acceptable() {
        FileStatus::Accepted
    } else {
        FileStatus::HighErrorRate
    };
    emit!(FileProcessed {
        status,
        duration: start.elapsed(),
    });

    match dot_rename(&path) {
        Ok(renamed) => {
            debug!("Renamed {} to {}", name, renamed.display());
            FileOutcome::Done(report.result)
        }
        Err(e) => {
            error!("Failed to mark {} processed: {}", name, e);
            FileOutcome::Incomplete(report.result)
        }
    }
}

/// Run the loader with the given configuration until done or interrupted.
pub async fn run_loader(
    config: Config,
    progress: Arc<RunProgress>,
) -> Result<RunStats, LoaderError> {
    let shutdown = CancellationToken::new();

    // Set up signal handler for graceful shutdown
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            signal::shutdown_signal().await;
            shutdown.cancel();
        }
    });

    Loader::new(config, shutdown)
        .with_progress(progress)
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::sink::KvStoreRef;
    use crate::sink::writer::tests::ScriptedStore;
    use std::io::Write;
    use std::time::Duration;

    fn scripted_worker(store: Arc<ScriptedStore>, config: &Config) -> Arc<FileWorker> {
        let pool = StorePool::with_factory(Arc::new(
            move |_address: &str| -> Result<KvStoreRef, StoreError> { Ok(store.clone()) },
        ));
        Arc::new(FileWorker::new(
            config.shards.router(),
            StoreWriter::new(Arc::new(pool), &config.store),
            &config.loader,
            &config.source,
        ))
    }

    fn write_gz(path: &std::path::Path, lines: usize) {
        let mut encoder = flate2::write::GzEncoder::new(
            std::fs::File::create(path).unwrap(),
            flate2::Compression::default(),
        );
        for i in 0..lines {
            writeln!(encoder, "idfa\tdevice{i}\t1\t2\t{i}").unwrap();
        }
        encoder.finish().unwrap();
    }

    #[tokio::test]
    async fn test_no_files_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.source.pattern = format!("{}/*.tsv.gz", dir.path().display());
        let progress = Arc::new(RunProgress::default());

        let stats = Loader::new(config, CancellationToken::new())
            .with_progress(progress.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(stats, RunStats::default());
        assert!(progress.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_keeps_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20170929000000.tsv.gz");
        write_gz(&path, 20);
        let mut config = Config::default();
        config.loader.max_batch_size = 5;
        config.loader.file_timeout_secs = Some(1);
        let worker = scripted_worker(ScriptedStore::slow(Duration::from_secs(10)), &config);

        let outcome = process_file(worker, path.clone(), CancellationToken::new(), 0.01).await;

        assert!(matches!(outcome, FileOutcome::Incomplete(result) if result.processed == 0));
        assert!(path.exists());
        assert!(!dir.path().join(".20170929000000.tsv.gz").exists());
    }

    #[tokio::test]
    async fn test_truncated_file_keeps_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20170929000000.tsv.gz");
        write_gz(&path, 5000);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        let config = Config::default();
        let store = ScriptedStore::new(vec![]);

        let outcome = process_file(
            scripted_worker(store, &config),
            path.clone(),
            CancellationToken::new(),
            0.01,
        )
        .await;

        assert!(matches!(outcome, FileOutcome::Incomplete(result) if result.processed > 0));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_unopenable_file_keeps_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20170929000000.tsv.gz");
        let config = Config::default();
        let pool = Arc::new(StorePool::memcache(&config.store));
        let worker = Arc::new(FileWorker::new(
            config.shards.router(),
            StoreWriter::new(pool, &config.store),
            &config.loader,
            &config.source,
        ));

        let outcome = process_file(worker, path, CancellationToken::new(), 0.01).await;

        assert_eq!(outcome, FileOutcome::FailedOpen);
        assert!(!dir.path().join(".20170929000000.tsv.gz").exists());
    }

    #[tokio::test]
    async fn test_bad_pattern_is_fatal() {
        let mut config = Config::default();
        config.source.pattern = "data/[*.tsv.gz".to_string();

        let err = Loader::new(config, CancellationToken::new())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, LoaderError::Pattern { .. }));
    }
}
