//! Redis-backed counter store.
//!
//! Maps the counter store contract onto single Redis commands:
//!
//! | operation         | command          |
//! |-------------------|------------------|
//! | `increment`       | `INCR`           |
//! | `get`             | `GET`            |
//! | `set_with_expiry` | `SET key v PX ms`|
//! | `delete`          | `DEL`            |
//! | `exists`          | `EXISTS`         |
//!
//! Each command is atomic on the server. Connections are multiplexed through
//! a `redis::aio::ConnectionManager`, which reconnects on its own after a
//! dropped connection; commands issued while disconnected fail and are
//! reported to the caller rather than retried.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tracing::{debug, info};

use super::{CounterStore, StoreError};

/// Connection settings for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Password for `AUTH`, if any
    pub password: Option<String>,
    /// Logical database index
    pub db: i64,
    /// Deadline applied to each command, if any
    pub timeout: Option<Duration>,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            timeout: None,
        }
    }
}

impl RedisStoreConfig {
    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }
}

/// Counter store backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    timeout: Option<Duration>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis and verify the server answers `PING`.
    ///
    /// # Errors
    /// Returns an error if the client cannot be created, the connection
    /// cannot be established, or the server does not answer the ping.
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.connection_info())?;
        let connection = ConnectionManager::new(client).await?;

        let store = Self {
            connection,
            timeout: config.timeout,
        };

        let mut conn = store.connection.clone();
        let pong: String = with_deadline(store.timeout, async move {
            redis::cmd("PING").query_async(&mut conn).await
        })
        .await?;
        debug!(reply = %pong, "Redis answered ping");

        info!(
            host = %config.host,
            port = config.port,
            db = config.db,
            "Connected to Redis"
        );
        Ok(store)
    }

}

/// Await a command, giving up with [`StoreError::Timeout`] once `timeout`
/// has elapsed.
async fn with_deadline<T, F>(timeout: Option<Duration>, command: F) -> Result<T, StoreError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, command)
            .await
            .map_err(|_| StoreError::Timeout(limit))?
            .map_err(StoreError::from),
        None => command.await.map_err(StoreError::from),
    }
}

/// `PX` takes whole milliseconds; round sub-millisecond remainders up so a
/// positive duration never becomes an invalid zero expiry.
fn expiry_millis(ttl: Duration) -> u64 {
    let millis = ttl.as_millis() + u128::from(ttl.subsec_nanos() % 1_000_000 != 0);
    u64::try_from(millis).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        with_deadline(self.timeout, async move { conn.incr(key, 1i64).await }).await
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.connection.clone();
        with_deadline(self.timeout, async move { conn.get(key).await }).await
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let millis = expiry_millis(ttl);
        with_deadline(self.timeout, async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(millis)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _removed: i64 = with_deadline(self.timeout, async move { conn.del(key).await }).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let count: i64 = with_deadline(self.timeout, async move { conn.exists(key).await }).await?;
        Ok(count > 0)
    }
}
