//! Per-shard record buffers shared by the executors of one file.
//!
//! Each shard address owns its own lock. A buffer that reaches
//! `max_batch_size` is swapped out under the lock and handed back to the
//! caller as a [`Batch`]; the flush itself happens after the lock is released.

use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::record::Record;

/// Records bound for one shard address, flushed together.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub address: String,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One bounded buffer per shard address.
#[derive(Debug)]
pub struct ShardBuffers {
    max_batch_size: usize,
    buffers: HashMap<String, Mutex<Vec<Record>>>,
}

impl ShardBuffers {
    /// Create empty buffers for every address.
    pub fn new<'a>(addresses: impl IntoIterator<Item = &'a str>, max_batch_size: usize) -> Self {
        let max_batch_size = max_batch_size.max(1);
        let buffers = addresses
            .into_iter()
            .map(|a| (a.to_string(), Mutex::new(Vec::with_capacity(max_batch_size))))
            .collect();
        Self {
            max_batch_size,
            buffers,
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Append a record, returning a full batch when the buffer hits the threshold.
    pub async fn append(&self, address: &str, record: Record) -> Option<Batch> {
        let Some(buffer) = self.buffers.get(address) else {
            // No buffer for this address: ship the record on its own.
            return Some(Batch {
                address: address.to_string(),
                records: vec![record],
            });
        };

        let mut buffer = buffer.lock().await;
        buffer.push(record);
        if buffer.len() < self.max_batch_size {
            return None;
        }
        let records = std::mem::replace(&mut *buffer, Vec::with_capacity(self.max_batch_size));
        Some(Batch {
            address: address.to_string(),
            records,
        })
    }

    /// Take every non-empty buffer, regardless of size.
    pub async fn drain_all(&self) -> Vec<Batch> {
        let mut batches = Vec::new();
        for (address, buffer) in &self.buffers {
            let records = std::mem::take(&mut *buffer.lock().await);
            if !records.is_empty() {
                batches.push(Batch {
                    address: address.clone(),
                    records,
                });
            }
        }
        batches
    }

    /// Records currently held across all buffers.
    pub async fn pending(&self) -> usize {
        let mut total = 0;
        for buffer in self.buffers.values() {
            total += buffer.lock().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.pending().await == 0
    }
}
