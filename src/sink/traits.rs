//! Traits for key-value store backends.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::error::StoreError;

/// Reference-counted handle to a [`KvStore`].
pub type KvStoreRef = Arc<dyn KvStore>;

/// A store that accepts many key/value pairs in one call.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Write every pair and return the keys the server refused.
    ///
    /// An `Err` means the whole call failed and nothing can be assumed
    /// about which keys were written.
    async fn set_multi(&self, items: &[(String, Bytes)]) -> Result<Vec<String>, StoreError>;

    /// Address this store writes to.
    fn address(&self) -> &str;
}
