//! In-process counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::{CounterStore, StoreError};

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: i64,
    /// `None` means the entry never expires
    expires_at: Option<Instant>,
}

impl Entry {
    fn persistent(value: i64) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// A counter store kept in local memory.
///
/// Expired entries are treated as absent on access and physically removed by
/// [`InMemoryStore::purge_expired`]. Cloning yields a handle to the same map,
/// so a single store can back a limiter and a sweeper task at once. State is
/// not shared between processes.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Spawn a background task that purges expired entries every `interval`.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = store.len(), "Purged expired entries");
                }
            }
        })
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn drop_if_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(Entry::persistent(0));

        if !entry.is_live(now) {
            *entry = Entry::persistent(0);
        }

        entry.value = entry.value.checked_add(1).ok_or_else(|| {
            StoreError::Unavailable(format!("increment of {key} would overflow"))
        })?;
        Ok(entry.value)
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .and_then(|entry| entry.is_live(now).then_some(entry.value));

        if value.is_none() {
            self.drop_if_expired(key, now);
        }
        Ok(value)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now.checked_add(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .map_or(false, |entry| entry.is_live(now));

        if !live {
            self.drop_if_expired(key, now);
        }
        Ok(live)
    }
}
