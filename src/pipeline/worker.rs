//! Processing of a single input file.
//!
//! One blocking reader thread streams lines into a bounded job channel. A
//! fixed number of executor tasks consume it: parse, route, append to the
//! shared shard buffers, and flush whichever buffer fills up. When the
//! reader drops its sender the channel closes and the executors exit. Once
//! all of them are joined, the leftovers in the buffers are flushed.

use async_channel::Receiver;
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{LoaderConfig, SourceConfig};
use crate::emit;
use crate::error::ReaderError;
use crate::metrics::events::{RecordRejected, RecordsParsed, RejectReason};
use crate::record::parse_line;
use crate::shard::ShardRouter;
use crate::sink::StoreWriter;
use crate::source::{open_lines, pump_lines};

use super::buffer::{Batch, ShardBuffers};
use super::stats::ProcessingResult;

/// How far a file got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileReport {
    pub result: ProcessingResult,
    /// The run or the file deadline was cancelled before the file was fully read.
    pub interrupted: bool,
    /// Decoding failed before the end of the file, so some records were never read.
    pub read_failed: bool,
}

/// Everything needed to load one file; shared by all files of a run.
#[derive(Debug, Clone)]
pub struct FileWorker {
    router: Arc<ShardRouter>,
    writer: StoreWriter,
    threads: usize,
    max_batch_size: usize,
    job_queue_size: usize,
    file_timeout: Option<Duration>,
}

impl FileWorker {
    pub fn new(
        router: ShardRouter,
        writer: StoreWriter,
        loader: &LoaderConfig,
        source: &SourceConfig,
    ) -> Self {
        Self {
            router: Arc::new(router),
            writer,
            threads: loader.threads_in_worker.max(1),
            max_batch_size: loader.max_batch_size.max(1),
            job_queue_size: source.job_queue_size.max(1),
            file_timeout: loader.file_timeout(),
        }
    }

    /// Load `path`, returning the merged counts of all executors.
    ///
    /// Fails only when the file cannot be opened or its first block decoded.
    pub async fn process(
        &self,
        path: &Path,
        shutdown: &CancellationToken,
    ) -> Result<FileReport, ReaderError> {
        let lines = open_lines(path)?;
        let name: Arc<str> = Arc::from(path.display().to_string());
        info!("Processing {}", name);

        let cancel = shutdown.child_token();
        let deadline = self.file_timeout.map(|timeout| {
            let cancel = cancel.clone();
            let name = name.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        warn!("{} exceeded its {:?} deadline, stopping", name, timeout);
                        cancel.cancel();
                    }
                }
            })
        });

        let (jobs_tx, jobs_rx) = async_channel::bounded(self.job_queue_size);
        let buffers = Arc::new(ShardBuffers::new(
            self.router.addresses(),
            self.max_batch_size,
        ));

        let reader = {
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || pump_lines(lines, jobs_tx, &cancel))
        };

        let executors: Vec<JoinHandle<ProcessingResult>> = (0..self.threads)
            .map(|id| {
                let executor = Executor {
                    id,
                    file: name.clone(),
                    jobs: jobs_rx.clone(),
                    router: self.router.clone(),
                    buffers: buffers.clone(),
                    writer: self.writer.clone(),
                    cancel: cancel.clone(),
                };
                tokio::spawn(executor.run())
            })
            .collect();
        // Only executors may hold receivers, or the reader could block forever.
        drop(jobs_rx);

        let mut result = ProcessingResult::default();
        for handle in executors {
            match handle.await {
                Ok(partial) => result += partial,
                Err(e) => error!("Executor for {} failed: {}", name, e),
            }
        }

        // No executor appends past this point, so each leftover is flushed once.
        let leftovers = buffers.drain_all().await;
        result += join_all(
            leftovers
                .into_iter()
                .map(|batch| flush_batch(&self.writer, &name, batch, &cancel)),
        )
        .await
        .into_iter()
        .sum::<ProcessingResult>();

        let read_errors = match reader.await {
            Ok(summary) => summary.read_errors,
            Err(e) => {
                error!("Reader for {} failed: {}", name, e);
                1
            }
        };
        for _ in 0..read_errors {
            emit!(RecordRejected {
                reason: RejectReason::Read
            });
        }
        result.errors += read_errors;

        let interrupted = cancel.is_cancelled();
        if let Some(handle) = deadline {
            handle.abort();
        }

        debug!(
            "{} done: {} processed, {} errors",
            name, result.processed, result.errors
        );
        Ok(FileReport {
            result,
            interrupted,
            read_failed: read_errors > 0,
        })
    }
}

/// One consumer of a file's job channel.
struct Executor {
    id: usize,
    file: Arc<str>,
    jobs: Receiver<String>,
    router: Arc<ShardRouter>,
    buffers: Arc<ShardBuffers>,
    writer: StoreWriter,
    cancel: CancellationToken,
}

impl Executor {
    async fn run(self) -> ProcessingResult {
        debug!("[{}] executor {} started", self.file, self.id);
        let mut result = ProcessingResult::default();

        loop {
            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                job = self.jobs.recv() => match job {
                    Ok(line) => line,
                    // Closed and empty: the reader is done.
                    Err(_) => break,
                },
            };
            result += self.handle_line(&line).await;
        }

        debug!(
            "[{}] executor {} finished: {} processed, {} errors",
            self.file, self.id, result.processed, result.errors
        );
        result
    }

    async fn handle_line(&self, line: &str) -> ProcessingResult {
        let record = match parse_line(line) {
            Ok(record) => record,
            Err(e) => {
                debug!("[{}] skipping line ({}): `{}`", self.file, e, line);
                emit!(RecordRejected {
                    reason: RejectReason::Parse
                });
                return ProcessingResult::new(0, 1);
            }
        };
        emit!(RecordsParsed { count: 1 });

        let address = match self.router.route(record.device_type()) {
            Ok(address) => address,
            Err(e) => {
                error!("[{}] {}", self.file, e);
                emit!(RecordRejected {
                    reason: RejectReason::UnknownShard
                });
                return ProcessingResult::new(0, 1);
            }
        };

        match self.buffers.append(address, record).await {
            Some(batch) => self.flush(batch).await,
            None => ProcessingResult::default(),
        }
    }

    async fn flush(&self, batch: Batch) -> ProcessingResult {
        flush_batch(&self.writer, &self.file, batch, &self.cancel).await
    }
}

/// Write one batch, counting every record as processed or lost.
async fn flush_batch(
    writer: &StoreWriter,
    file: &str,
    batch: Batch,
    cancel: &CancellationToken,
) -> ProcessingResult {
    let outcome = writer.flush(&batch, cancel).await;
    if outcome.ok {
        return ProcessingResult::new(batch.len(), 0);
    }

    match &outcome.last_error {
        Some(e) => error!(
            "[{}] lost {} records for {} after {} attempts: {}",
            file,
            batch.len(),
            batch.address,
            outcome.attempts,
            e
        ),
        None => error!(
            "[{}] lost {} records for {} after {} attempts",
            file,
            batch.len(),
            batch.address,
            outcome.attempts
        ),
    }
    ProcessingResult::new(0, batch.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::error::StoreError;
    use crate::sink::writer::tests::ScriptedStore;
    use crate::sink::{KvStoreRef, StorePool};
    use std::io::Write;

    fn router() -> ShardRouter {
        ShardRouter::new([
            ("idfa", "127.0.0.1:33013"),
            ("gaid", "127.0.0.1:33014"),
            ("adid", "127.0.0.1:33015"),
            ("dvid", "127.0.0.1:33016"),
        ])
    }

    fn worker(store: Arc<ScriptedStore>, store_config: StoreConfig) -> FileWorker {
        worker_with(store, store_config, LoaderConfig::default())
    }

    fn worker_with(
        store: Arc<ScriptedStore>,
        store_config: StoreConfig,
        loader: LoaderConfig,
    ) -> FileWorker {
        let pool = StorePool::with_factory(Arc::new(
            move |_address: &str| -> Result<KvStoreRef, StoreError> { Ok(store.clone()) },
        ));
        let writer = StoreWriter::new(Arc::new(pool), &store_config);
        FileWorker::new(router(), writer, &loader, &SourceConfig::default())
    }

    fn write_gz(dir: &Path, name: &str, lines: &[String]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut encoder = flate2::write::GzEncoder::new(
            std::fs::File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        for line in lines {
            writeln!(encoder, "{line}").unwrap();
        }
        encoder.finish().unwrap();
        path
    }

    fn idfa_lines(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("idfa\tdevice{i}\t55.55\t42.42\t{i},7"))
            .collect()
    }

    #[tokio::test]
    async fn test_one_fifty_records_flush_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_gz(dir.path(), "20170929000000.tsv.gz", &idfa_lines(150));
        let store = ScriptedStore::new(vec![]);

        let report = worker(store.clone(), StoreConfig::default())
            .process(&path, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.result, ProcessingResult::new(150, 0));
        assert!(!report.interrupted);
        let mut sizes: Vec<usize> = store.calls.lock().unwrap().iter().map(Vec::len).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![50, 100]);
    }

    #[tokio::test]
    async fn test_leftovers_flushed_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut lines = idfa_lines(3);
        lines.extend((0..3).map(|i| format!("gaid\tdevice{i}\t1\t2\t{i}")));
        let path = write_gz(dir.path(), "small.tsv.gz", &lines);
        let store = ScriptedStore::new(vec![]);

        let report = worker(store.clone(), StoreConfig::default())
            .process(&path, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.result, ProcessingResult::new(6, 0));
        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|batch| batch.len() == 3));
    }

    #[tokio::test]
    async fn test_unstorable_id_costs_one_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut lines = idfa_lines(99);
        lines.push("idfa\tab cd\t1\t2\t3".to_string());
        let path = write_gz(dir.path(), "spaces.tsv.gz", &lines);
        let store = ScriptedStore::new(vec![]);

        let report = worker(store.clone(), StoreConfig::default())
            .process(&path, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.result, ProcessingResult::new(99, 1));
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test]
    async fn test_truncated_file_reports_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_gz(dir.path(), "cut.tsv.gz", &idfa_lines(5000));
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        let store = ScriptedStore::new(vec![]);

        let report = worker(store, StoreConfig::default())
            .process(&path, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.read_failed);
        assert!(!report.interrupted);
        assert!(report.result.processed < 5000);
        assert_eq!(report.result.errors, 1);
    }

    #[tokio::test]
    async fn test_errors_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let mut lines = idfa_lines(3);
        lines.push("xxxx\tdevice\t1\t2\t3".to_string());
        lines.push("garbage".to_string());
        lines.push(String::new());
        lines.push("gaid\tdevice\tnorth\tsouth\t1,a,2".to_string());
        let path = write_gz(dir.path(), "mixed.tsv.gz", &lines);
        let store = ScriptedStore::new(vec![]);

        let report = worker(store, StoreConfig::default())
            .process(&path, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.result, ProcessingResult::new(4, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_counts_all_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_gz(dir.path(), "fail.tsv.gz", &idfa_lines(10));
        let io = || {
            Err(StoreError::Timeout {
                address: "127.0.0.1:33013".to_string(),
            })
        };
        let store = ScriptedStore::new(vec![io(), io(), io()]);

        let report = worker(store.clone(), StoreConfig::default())
            .process(&path, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.result, ProcessingResult::new(0, 10));
        assert_eq!(store.call_count(), 3);
    }

    #[tokio::test]
    async fn test_missing_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptedStore::new(vec![]);

        let err = worker(store.clone(), StoreConfig::default())
            .process(&dir.path().join("gone.tsv.gz"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ReaderError::FileOpen { .. }));
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_gz(dir.path(), "cut.tsv.gz", &idfa_lines(20));
        let store = ScriptedStore::new(vec![]);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let report = worker(store.clone(), StoreConfig::default())
            .process(&path, &shutdown)
            .await
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.result.processed, 0);
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_slow_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_gz(dir.path(), "slow.tsv.gz", &idfa_lines(20));
        let store = ScriptedStore::slow(Duration::from_secs(10));
        let loader = LoaderConfig {
            max_batch_size: 5,
            file_timeout_secs: Some(1),
            ..LoaderConfig::default()
        };

        let start = tokio::time::Instant::now();
        let report = worker_with(store.clone(), StoreConfig::default(), loader)
            .process(&path, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.result.processed, 0);
        assert!(store.call_count() > 0);
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
