//! Test doubles for the counter store.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{CounterStore, InMemoryStore, StoreError};

/// A single call observed by [`RecordingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoreCall {
    Increment(String),
    Get(String),
    SetWithExpiry(String, i64, Duration),
    Delete(String),
    Exists(String),
}

impl StoreCall {
    pub(crate) fn is_exists(&self) -> bool {
        matches!(self, StoreCall::Exists(_))
    }
}

type FailurePredicate = Box<dyn Fn(&StoreCall) -> bool + Send + Sync>;

/// Wraps an [`InMemoryStore`], recording every call and optionally failing
/// the calls matched by a predicate.
pub(crate) struct RecordingStore {
    inner: InMemoryStore,
    calls: Mutex<Vec<StoreCall>>,
    fail_when: Option<FailurePredicate>,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            calls: Mutex::new(Vec::new()),
            fail_when: None,
        }
    }

    /// Fail every call for which `predicate` returns true. Failed calls are
    /// still recorded.
    pub(crate) fn failing_when<F>(predicate: F) -> Self
    where
        F: Fn(&StoreCall) -> bool + Send + Sync + 'static,
    {
        Self {
            fail_when: Some(Box::new(predicate)),
            ..Self::new()
        }
    }

    pub(crate) fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    pub(crate) fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: StoreCall) -> Result<(), StoreError> {
        let fail = self.fail_when.as_ref().is_some_and(|p| p(&call));
        self.calls.lock().unwrap().push(call);
        if fail {
            Err(StoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for RecordingStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.record(StoreCall::Increment(key.to_string()))?;
        self.inner.increment(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.record(StoreCall::Get(key.to_string()))?;
        self.inner.get(key).await
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.record(StoreCall::SetWithExpiry(key.to_string(), value, ttl))?;
        self.inner.set_with_expiry(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.record(StoreCall::Delete(key.to_string()))?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.record(StoreCall::Exists(key.to_string()))?;
        self.inner.exists(key).await
    }
}
