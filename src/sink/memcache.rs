//! Minimal memcached text-protocol client.
//!
//! Only `set` is needed. A bulk set pipelines every `set` of the batch on one
//! connection, flushes once, then reads one reply line per key. Connections
//! are kept in a small idle list and reused; a connection that saw any error
//! is dropped instead of being returned.

use async_trait::async_trait;
use bytes::Bytes;
use snafu::prelude::*;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::emit;
use crate::error::{
    ConnectSnafu, InvalidAddressSnafu, InvalidKeySnafu, ProtocolSnafu, StoreError, StoreIoSnafu,
    TimeoutSnafu,
};
use crate::metrics::events::StoreConnected;
use crate::record::MAX_KEY_LEN;

use super::traits::KvStore;

type Connection = BufStream<TcpStream>;

/// A memcached server at one `host:port`.
pub struct MemcacheClient {
    address: String,
    timeout: Duration,
    max_idle: usize,
    idle: Mutex<Vec<Connection>>,
}

impl std::fmt::Debug for MemcacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcacheClient")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl MemcacheClient {
    /// Create a client. No connection is made until the first write.
    pub fn new(
        address: impl Into<String>,
        timeout: Duration,
        max_idle: usize,
    ) -> Result<Self, StoreError> {
        let address = address.into();
        let valid = address
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        ensure!(valid, InvalidAddressSnafu { address });

        Ok(Self {
            address,
            timeout,
            max_idle,
            idle: Mutex::new(Vec::new()),
        })
    }

    /// Number of idle connections currently pooled.
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn checkout(&self) -> Result<Connection, StoreError> {
        let pooled = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        if let Some(conn) = pooled {
            return Ok(conn);
        }

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| StoreError::Timeout {
                address: self.address.clone(),
            })?
            .context(ConnectSnafu {
                address: &self.address,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", self.address, e);
        }
        emit!(StoreConnected);
        debug!("Connected to {}", self.address);
        Ok(BufStream::new(stream))
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    /// Send every `set`, then collect the replies in order.
    async fn exchange(
        &self,
        conn: &mut Connection,
        items: &[&(String, Bytes)],
    ) -> Result<Vec<String>, StoreError> {
        let address = self.address.as_str();

        for (key, value) in items.iter().copied() {
            let header = format!("set {} 0 0 {}\r\n", key, value.len());
            conn.write_all(header.as_bytes())
                .await
                .context(StoreIoSnafu { address })?;
            conn.write_all(value).await.context(StoreIoSnafu { address })?;
            conn.write_all(b"\r\n")
                .await
                .context(StoreIoSnafu { address })?;
        }
        conn.flush().await.context(StoreIoSnafu { address })?;

        let mut rejected = Vec::new();
        let mut line = String::new();
        for (key, _) in items.iter().copied() {
            line.clear();
            let n = conn
                .read_line(&mut line)
                .await
                .context(StoreIoSnafu { address })?;
            if n == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof))
                    .context(StoreIoSnafu { address });
            }

            match line.trim_end() {
                "STORED" => {}
                "NOT_STORED" | "EXISTS" | "NOT_FOUND" => rejected.push(key.clone()),
                reply if reply.starts_with("SERVER_ERROR") => {
                    debug!("{} refused {}: {}", address, key, reply);
                    rejected.push(key.clone());
                }
                reply => {
                    return ProtocolSnafu {
                        address,
                        reply: reply.to_string(),
                    }
                    .fail();
                }
            }
        }
        Ok(rejected)
    }
}

/// Keys must be short and free of whitespace and control characters.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.chars().any(|c| c.is_whitespace() || c.is_control());
    ensure!(valid, InvalidKeySnafu { key });
    Ok(())
}

#[async_trait]
impl KvStore for MemcacheClient {
    async fn set_multi(&self, items: &[(String, Bytes)]) -> Result<Vec<String>, StoreError> {
        let mut rejected = Vec::new();
        let mut sendable = Vec::with_capacity(items.len());
        for item in items {
            match validate_key(&item.0) {
                Ok(()) => sendable.push(item),
                Err(e) => {
                    warn!("{}", e);
                    rejected.push(item.0.clone());
                }
            }
        }
        if sendable.is_empty() {
            return Ok(rejected);
        }

        let mut conn = self.checkout().await?;
        match tokio::time::timeout(self.timeout, self.exchange(&mut conn, &sendable)).await {
            Ok(Ok(refused)) => {
                self.checkin(conn);
                rejected.extend(refused);
                Ok(rejected)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => TimeoutSnafu {
                address: &self.address,
            }
            .fail(),
        }
    }

    fn address(&self) -> &str {
        &self.address
    }
}
