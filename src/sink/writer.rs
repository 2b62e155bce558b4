//! Batch writer with bounded retries.
//!
//! A batch is serialized once and sent as a single bulk set. Failed attempts
//! are retried with a linearly growing delay until `max_retries` attempts
//! have been made in total.

use bytes::Bytes;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::emit;
use crate::error::StoreError;
use crate::metrics::events::{BatchFlushed, FlushStatus, StoreRetry};
use crate::pipeline::Batch;

use super::pool::StorePoolRef;

/// Result of flushing one batch.
#[derive(Debug)]
pub struct WriteOutcome {
    /// Every record of the batch is considered stored.
    pub ok: bool,
    /// Bulk-set calls made, 0 in dry-run mode or when cancelled up front.
    pub attempts: usize,
    /// Error of the last failed attempt.
    pub last_error: Option<StoreError>,
}

impl WriteOutcome {
    fn stored(attempts: usize) -> Self {
        Self {
            ok: true,
            attempts,
            last_error: None,
        }
    }

    fn failed(attempts: usize, last_error: Option<StoreError>) -> Self {
        Self {
            ok: false,
            attempts,
            last_error,
        }
    }
}

/// Writes batches to the store their address points at.
#[derive(Debug, Clone)]
pub struct StoreWriter {
    pool: StorePoolRef,
    dry_run: bool,
    max_retries: usize,
    base_delay: Duration,
}

impl StoreWriter {
    pub fn new(pool: StorePoolRef, config: &StoreConfig) -> Self {
        Self {
            pool,
            dry_run: config.dry_run,
            max_retries: config.max_retries.max(1),
            base_delay: config.retry_base_delay(),
        }
    }

    pub fn pool(&self) -> &StorePoolRef {
        &self.pool
    }

    /// Delay before attempt `attempt` (0-based); the first attempt has none.
    pub fn backoff(&self, attempt: usize) -> Duration {
        self.base_delay.saturating_mul(attempt as u32)
    }

    /// Flush a batch, retrying until it is stored, attempts run out, or
    /// `cancel` fires.
    pub async fn flush(&self, batch: &Batch, cancel: &CancellationToken) -> WriteOutcome {
        let start = Instant::now();

        if self.dry_run {
            for record in &batch.records {
                debug!(
                    "{} - {} -> {:?}",
                    batch.address,
                    record.key(),
                    record.to_user_apps()
                );
            }
            emit!(BatchFlushed {
                status: FlushStatus::DryRun,
                records: batch.len() as u64,
                duration: start.elapsed(),
            });
            return WriteOutcome::stored(0);
        }

        let items: Vec<(String, Bytes)> = batch
            .records
            .iter()
            .map(|r| (r.key(), r.encode()))
            .collect();

        let outcome = self.write_with_retries(&batch.address, &items, cancel).await;

        let status = if outcome.ok {
            FlushStatus::Stored
        } else {
            FlushStatus::Failed
        };
        emit!(BatchFlushed {
            status,
            records: batch.len() as u64,
            duration: start.elapsed(),
        });
        outcome
    }

    async fn write_with_retries(
        &self,
        address: &str,
        items: &[(String, Bytes)],
        cancel: &CancellationToken,
    ) -> WriteOutcome {
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                emit!(StoreRetry { attempt });
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.backoff(attempt)) => {}
                }
            }
            if cancel.is_cancelled() {
                break;
            }

            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(StoreError::Cancelled {
                    address: address.to_string(),
                }),
                result = self.set_once(address, items) => result,
            };

            match result {
                Ok(()) => return WriteOutcome::stored(attempts),
                Err(e) => {
                    warn!(
                        "Attempt {}/{} to {} failed: {}",
                        attempts, self.max_retries, address, e
                    );
                    let cancelled = e.is_cancelled();
                    last_error = Some(e);
                    if cancelled {
                        break;
                    }
                }
            }
        }

        if cancel.is_cancelled() && last_error.is_none() {
            last_error = Some(StoreError::Cancelled {
                address: address.to_string(),
            });
        }
        WriteOutcome::failed(attempts, last_error)
    }

    async fn set_once(&self, address: &str, items: &[(String, Bytes)]) -> Result<(), StoreError> {
        let store = self.pool.get_or_create(address).await?;
        let rejected = store.set_multi(items).await?;
        match rejected.first() {
            None => Ok(()),
            Some(first) => Err(StoreError::Rejected {
                address: address.to_string(),
                count: rejected.len(),
                first: first.clone(),
            }),
        }
    }
}
