//! Per-file and per-run counters, and the error-rate verdict.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{error, info, warn};

/// Records stored and records lost for one executor, one file, or a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingResult {
    pub processed: usize,
    pub errors: usize,
}

impl ProcessingResult {
    pub fn new(processed: usize, errors: usize) -> Self {
        Self { processed, errors }
    }

    /// Lines accounted for, stored or not.
    pub fn total(&self) -> usize {
        self.processed + self.errors
    }

    /// `errors / processed`, or `None` when nothing was processed.
    pub fn error_rate(&self) -> Option<f64> {
        (self.processed > 0).then(|| self.errors as f64 / self.processed as f64)
    }

    /// Judge the file against `threshold`.
    pub fn verdict(&self, threshold: f64) -> Verdict {
        match self.error_rate() {
            Some(rate) if rate < threshold => Verdict::Acceptable { rate },
            Some(rate) => Verdict::High { rate, threshold },
            None => Verdict::Undefined {
                errors: self.errors,
            },
        }
    }

    /// Compute and log the verdict for `path`.
    pub fn log_verdict(&self, path: &str, threshold: f64) -> Verdict {
        let verdict = self.verdict(threshold);
        match verdict {
            Verdict::Acceptable { .. } => info!("{}: {}. Successfully load", path, verdict),
            Verdict::High { .. } => error!("{}: {}. Failed load", path, verdict),
            Verdict::Undefined { .. } => warn!("{}: {}", path, verdict),
        }
        verdict
    }
}

impl Add for ProcessingResult {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            processed: self.processed + rhs.processed,
            errors: self.errors + rhs.errors,
        }
    }
}

impl AddAssign for ProcessingResult {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for ProcessingResult {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Advisory outcome of a file load. The file is marked processed either way.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Acceptable { rate: f64 },
    High { rate: f64, threshold: f64 },
    /// Nothing was processed, so there is no rate.
    Undefined { errors: usize },
}

impl Verdict {
    pub fn is_acceptable(&self) -> bool {
        match self {
            Verdict::Acceptable { .. } => true,
            Verdict::High { .. } => false,
            Verdict::Undefined { errors } => *errors == 0,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Acceptable { rate } => write!(f, "Acceptable error rate ({rate})"),
            Verdict::High { rate, threshold } => {
                write!(f, "High error rate ({rate} > {threshold})")
            }
            Verdict::Undefined { errors } => {
                write!(f, "No records processed ({errors} errors), error rate undefined")
            }
        }
    }
}

/// Totals for a whole run, logged at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub files_found: usize,
    /// Files that were read to the end and marked processed.
    pub files_processed: usize,
    /// Files that could not be opened, or were marked but failed to rename.
    pub files_failed: usize,
    pub processed: usize,
    pub errors: usize,
}

impl RunStats {
    /// Fold a completed file into the totals.
    pub fn record_file(&mut self, result: ProcessingResult) {
        self.files_processed += 1;
        self.processed += result.processed;
        self.errors += result.errors;
    }

    pub fn record_failure(&mut self) {
        self.files_failed += 1;
    }

    pub fn totals(&self) -> ProcessingResult {
        ProcessingResult::new(self.processed, self.errors)
    }

    pub fn log_summary(&self) {
        info!("Run completed");
        info!("  Files found: {}", self.files_found);
        info!("  Files processed: {}", self.files_processed);
        info!("  Files failed: {}", self.files_failed);
        info!("  Records processed: {}", self.processed);
        info!("  Errors: {}", self.errors);
    }
}

/// File counters of a run in progress, readable from other tasks.
#[derive(Debug, Default)]
pub struct RunProgress {
    files_found: AtomicUsize,
    files_active: AtomicUsize,
    files_processed: AtomicUsize,
    files_failed: AtomicUsize,
    finished: AtomicBool,
}

impl RunProgress {
    /// Publish the totals so far and the number of files in flight.
    pub fn update(&self, stats: &RunStats, active: usize) {
        self.files_found.store(stats.files_found, Ordering::Relaxed);
        self.files_processed
            .store(stats.files_processed, Ordering::Relaxed);
        self.files_failed.store(stats.files_failed, Ordering::Relaxed);
        self.files_active.store(active, Ordering::Relaxed);
    }

    pub fn finish(&self) {
        self.files_active.store(0, Ordering::Relaxed);
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// One `name: value` line per counter.
    pub fn render(&self) -> String {
        let status = if self.is_finished() {
            "finished"
        } else {
            "loading"
        };
        format!(
            "status: {}\nfiles_found: {}\nfiles_active: {}\nfiles_processed: {}\nfiles_failed: {}\n",
            status,
            self.files_found.load(Ordering::Relaxed),
            self.files_active.load(Ordering::Relaxed),
            self.files_processed.load(Ordering::Relaxed),
            self.files_failed.load(Ordering::Relaxed),
        )
    }
}
