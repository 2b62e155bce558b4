//! Sink side of the loader: key-value stores and the batch writer.
//!
//! [`KvStore`] is the seam between the loader and the network. The
//! memcached client implements it for real runs; tests plug in their own.

pub mod memcache;
pub mod pool;
pub mod traits;
pub mod writer;

pub use memcache::MemcacheClient;
pub use pool::{StoreFactory, StorePool, StorePoolRef};
pub use traits::{KvStore, KvStoreRef};
pub use writer::{StoreWriter, WriteOutcome};
