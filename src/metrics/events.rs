//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the loader.
//! Events implement the `InternalEvent` trait which records the
//! corresponding metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Non-blank lines handed from the reader to the executors.
pub struct LinesRead {
    pub count: u64,
}

impl InternalEvent for LinesRead {
    fn emit(self) {
        trace!(count = self.count, "Lines read");
        counter!("memcload_lines_read_total").increment(self.count);
    }
}

/// Lines that parsed into a record.
pub struct RecordsParsed {
    pub count: u64,
}

impl InternalEvent for RecordsParsed {
    fn emit(self) {
        trace!(count = self.count, "Records parsed");
        counter!("memcload_records_parsed_total").increment(self.count);
    }
}

/// Why a record was dropped before reaching a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Parse,
    UnknownShard,
    Read,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Parse => "parse",
            RejectReason::UnknownShard => "unknown_shard",
            RejectReason::Read => "read",
        }
    }
}

/// A line or record counted as an error before any store write.
pub struct RecordRejected {
    pub reason: RejectReason,
}

impl InternalEvent for RecordRejected {
    fn emit(self) {
        trace!(reason = self.reason.as_str(), "Record rejected");
        counter!("memcload_records_rejected_total", "reason" => self.reason.as_str()).increment(1);
    }
}

/// Outcome of a batch flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    Stored,
    DryRun,
    Failed,
}

impl FlushStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushStatus::Stored => "stored",
            FlushStatus::DryRun => "dry_run",
            FlushStatus::Failed => "failed",
        }
    }
}

/// Emitted once per batch handed to the store writer.
pub struct BatchFlushed {
    pub status: FlushStatus,
    pub records: u64,
    pub duration: Duration,
}

impl InternalEvent for BatchFlushed {
    fn emit(self) {
        trace!(
            status = self.status.as_str(),
            records = self.records,
            duration_ms = self.duration.as_millis(),
            "Batch flushed"
        );
        counter!("memcload_batches_total", "status" => self.status.as_str()).increment(1);
        counter!("memcload_batch_records_total", "status" => self.status.as_str())
            .increment(self.records);
        histogram!("memcload_flush_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// A bulk-set attempt after the first one.
pub struct StoreRetry {
    pub attempt: usize,
}

impl InternalEvent for StoreRetry {
    fn emit(self) {
        trace!(attempt = self.attempt, "Store retry");
        counter!("memcload_store_retries_total").increment(1);
    }
}

/// Status of a finished input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Loaded with an acceptable error rate.
    Accepted,
    /// Loaded, but the error rate exceeded the threshold.
    HighErrorRate,
    /// Could not be opened; left in place.
    FailedOpen,
    /// Decoding failed part way through; left in place.
    ReadFailed,
    /// Stopped by shutdown or its deadline; left in place.
    Interrupted,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Accepted => "accepted",
            FileStatus::HighErrorRate => "high_error_rate",
            FileStatus::FailedOpen => "failed_open",
            FileStatus::ReadFailed => "read_failed",
            FileStatus::Interrupted => "interrupted",
        }
    }
}

/// Emitted when a file worker finishes.
pub struct FileProcessed {
    pub status: FileStatus,
    pub duration: Duration,
}

impl InternalEvent for FileProcessed {
    fn emit(self) {
        trace!(
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "File processed"
        );
        counter!("memcload_files_processed_total", "status" => self.status.as_str()).increment(1);
        histogram!("memcload_file_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Number of files currently being processed.
pub struct ActiveFiles {
    pub count: usize,
}

impl InternalEvent for ActiveFiles {
    fn emit(self) {
        trace!(count = self.count, "Active files");
        gauge!("memcload_active_files").set(self.count as f64);
    }
}

/// Connections opened to a shard.
pub struct StoreConnected;

impl InternalEvent for StoreConnected {
    fn emit(self) {
        trace!("Store connection opened");
        counter!("memcload_store_connections_total").increment(1);
    }
}
