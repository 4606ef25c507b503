//! Counter store abstraction and its backing adapters.
//!
//! The rate limiter never touches a concrete store. It only consumes the
//! five-operation [`CounterStore`] contract, which every adapter implements on
//! top of a shared key-value store with expiring entries. Each operation is
//! expected to be atomic on its own; callers get no atomicity across calls.

mod memory;
mod redis_store;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};

/// Errors surfaced by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The Redis client reported a failure (connection, protocol, type mismatch).
    #[error("Redis error: {0}")]
    Backend(#[from] redis::RedisError),

    /// The operation did not complete within the configured deadline.
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store cannot serve the request for another reason.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Capability contract of a shared counter store.
///
/// Keys are opaque strings. Implementations must make `increment` an atomic
/// "increment or create at 1, return the new value" operation; the rate
/// limiter relies on it as its only synchronization point.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, creating it at 1 if absent.
    ///
    /// A newly created key carries no expiry.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Read the integer stored at `key`, or `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Unconditionally store `value` at `key`, expiring after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: i64, ttl: Duration)
        -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Whether `key` is currently present.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}
