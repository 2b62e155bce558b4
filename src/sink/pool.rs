//! Store pooling by shard address.
//!
//! Every file worker flushes to the same handful of addresses, so stores are
//! created lazily on first use and then shared by all workers of the run.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::StoreError;

use super::memcache::MemcacheClient;
use super::traits::KvStoreRef;

/// Reference-counted handle to a [`StorePool`].
pub type StorePoolRef = Arc<StorePool>;

/// Builds the store for an address the pool has not seen yet.
pub type StoreFactory = Arc<dyn Fn(&str) -> Result<KvStoreRef, StoreError> + Send + Sync>;

/// Pool of stores keyed by address.
pub struct StorePool {
    stores: RwLock<HashMap<String, KvStoreRef>>,
    factory: StoreFactory,
}

impl std::fmt::Debug for StorePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorePool").finish_non_exhaustive()
    }
}

impl StorePool {
    /// Pool of memcached clients built from the store settings.
    pub fn memcache(config: &StoreConfig) -> Self {
        let timeout = config.timeout();
        let max_idle = config.max_idle_connections;
        Self::with_factory(Arc::new(
            move |address: &str| -> Result<KvStoreRef, StoreError> {
                let client = MemcacheClient::new(address, timeout, max_idle)?;
                Ok(Arc::new(client))
            },
        ))
    }

    /// Pool using a custom factory.
    pub fn with_factory(factory: StoreFactory) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            factory,
        }
    }

    /// Get or create the store for `address`.
    pub async fn get_or_create(&self, address: &str) -> Result<KvStoreRef, StoreError> {
        // Fast path: already created
        {
            let stores = self.stores.read().await;
            if let Some(store) = stores.get(address) {
                return Ok(store.clone());
            }
        }

        // Slow path: re-check under the write lock so racing workers share one store
        let mut stores = self.stores.write().await;
        if let Some(store) = stores.get(address) {
            return Ok(store.clone());
        }
        let store = (self.factory)(address)?;
        debug!("Created store for {}", address);
        stores.insert(address.to_string(), store.clone());
        Ok(store)
    }

    /// Number of cached stores.
    pub async fn len(&self) -> usize {
        self.stores.read().await.len()
    }

    /// Returns true if no store has been created yet.
    pub async fn is_empty(&self) -> bool {
        self.stores.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::traits::KvStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullStore(String);

    #[async_trait]
    impl KvStore for NullStore {
        async fn set_multi(&self, _items: &[(String, Bytes)]) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }

        fn address(&self) -> &str {
            &self.0
        }
    }

    fn counting_pool() -> (StorePool, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let pool = StorePool::with_factory(Arc::new(
            move |address: &str| -> Result<KvStoreRef, StoreError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(NullStore(address.to_string())))
            },
        ));
        (pool, created)
    }

    #[tokio::test]
    async fn test_pool_reuses_store_for_same_address() {
        let (pool, created) = counting_pool();
        assert!(pool.is_empty().await);

        let a1 = pool.get_or_create("127.0.0.1:33013").await.unwrap();
        let a2 = pool.get_or_create("127.0.0.1:33013").await.unwrap();
        let b = pool.get_or_create("127.0.0.1:33014").await.unwrap();

        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(b.address(), "127.0.0.1:33014");
        assert_eq!(pool.len().await, 2);
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_creation_shares_one_store() {
        let (pool, created) = counting_pool();
        let pool = Arc::new(pool);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.get_or_create("127.0.0.1:33015").await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_memcache_pool_rejects_bad_address() {
        let pool = StorePool::memcache(&StoreConfig::default());
        let result = pool.get_or_create("no-port").await;
        assert!(matches!(result, Err(StoreError::InvalidAddress { .. })));
        assert!(pool.is_empty().await);
    }
}
