//! Core rate limiter implementation.

use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::category::Category;
use super::keys::KeyScheme;
use crate::config::RateLimitingConfig;
use crate::error::{Result, TollgateError};
use crate::store::CounterStore;

/// Value written to a block entry. Only its presence matters.
const BLOCK_SENTINEL: i64 = 1;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed
    Allowed,
    /// The request must be rejected
    Denied(DenyReason),
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// A block entry for the identifier is active
    Blocked,
    /// This request pushed the window count past the limit
    LimitExceeded,
}

/// Fixed-window rate limiter with a block penalty.
///
/// The limiter keeps no state of its own; counters and block markers live in
/// the [`CounterStore`], whose single-key atomic increment is the only
/// synchronization point. A limiter can therefore be shared freely across
/// tasks behind an `Arc`.
///
/// Per identifier the store moves through three states: free (no entries),
/// counting (a counter expiring with the window) and blocked (a block marker
/// expiring after the block duration). Blocking happens once per window, on
/// the request that pushes the count past the limit.
pub struct RateLimiter {
    /// Shared counter store
    store: Arc<dyn CounterStore>,
    /// Limits per category
    limits: RateLimitingConfig,
    /// Key derivation
    keys: KeyScheme,
}

impl RateLimiter {
    /// Create a new rate limiter over `store` using the default key scheme.
    pub fn new(store: Arc<dyn CounterStore>, limits: RateLimitingConfig) -> Self {
        Self {
            store,
            limits,
            keys: KeyScheme::default(),
        }
    }

    /// Replace the key scheme.
    pub fn with_key_scheme(mut self, keys: KeyScheme) -> Self {
        self.keys = keys;
        self
    }

    /// Decide whether a request from `identifier` in `category` may proceed.
    ///
    /// Every store failure is returned as an error, never folded into a
    /// decision. An error after the limit was exceeded means the request is
    /// still over the limit but the block/counter bookkeeping may be
    /// incomplete. Nothing is retried or rolled back, and no deadline is
    /// imposed beyond what the store and the caller apply.
    ///
    /// Concurrent requests for the same identifier are ordered only by the
    /// store's increment: a burst right at the limit can let more than one
    /// request observe an exceeded count before the block entry is visible,
    /// and the window expiry is attached in a separate call after the counter
    /// is created.
    #[instrument(level = "debug", skip_all, fields(category = %category))]
    pub async fn check(&self, identifier: &str, category: Category) -> Result<Decision> {
        if identifier.is_empty() {
            return Err(TollgateError::RateLimit(
                "identifier must not be empty".to_string(),
            ));
        }

        let limits = self.limits.limits_for(category);

        let blocked_key = self.keys.blocked(identifier);
        if self.store.exists(&blocked_key).await? {
            info!(category = %category, "Request denied, identifier is blocked");
            return Ok(Decision::Denied(DenyReason::Blocked));
        }

        let counter_key = self.keys.counter(category, identifier);
        let count = self.store.increment(&counter_key).await?;

        // INCR does not attach an expiry, so a fresh counter gets its window here.
        if count == 1 {
            self.store
                .set_with_expiry(&counter_key, 1, limits.window)
                .await?;
        }

        if exceeds(count, limits.max_requests) {
            self.store
                .set_with_expiry(&blocked_key, BLOCK_SENTINEL, limits.block_duration)
                .await?;
            self.store.delete(&counter_key).await?;

            info!(
                category = %category,
                count = count,
                limit = limits.max_requests,
                block_duration = ?limits.block_duration,
                "Request limit exceeded, identifier blocked"
            );
            return Ok(Decision::Denied(DenyReason::LimitExceeded));
        }

        debug!(count = count, limit = limits.max_requests, "Request allowed");
        Ok(Decision::Allowed)
    }
}

fn exceeds(count: i64, max_requests: u64) -> bool {
    u64::try_from(count).map_or(false, |count| count > max_requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitConfig;
    use crate::store::testing::{RecordingStore, StoreCall};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const IP: &str = "127.0.0.1";

    fn test_limits() -> RateLimitingConfig {
        RateLimitingConfig {
            ip: LimitConfig {
                max_requests: 5,
                window: Duration::from_secs(1),
                block_duration: Duration::from_secs(300),
            },
            token: LimitConfig {
                max_requests: 10,
                window: Duration::from_secs(1),
                block_duration: Duration::from_secs(300),
            },
        }
    }

    fn limiter_with(store: Arc<RecordingStore>) -> RateLimiter {
        RateLimiter::new(store, test_limits())
    }

    #[tokio::test]
    async fn test_first_request_sets_window() {
        let store = Arc::new(RecordingStore::new());
        let limiter = limiter_with(store.clone());

        let decision = assert_ok!(limiter.check(IP, Category::Ip).await);

        assert_eq!(decision, Decision::Allowed);
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::Exists("blocked:127.0.0.1".to_string()),
                StoreCall::Increment("counter:ip:127.0.0.1".to_string()),
                StoreCall::SetWithExpiry(
                    "counter:ip:127.0.0.1".to_string(),
                    1,
                    Duration::from_secs(1)
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_later_requests_only_increment() {
        let store = Arc::new(RecordingStore::new());
        let limiter = limiter_with(store.clone());

        assert_ok!(limiter.check(IP, Category::Ip).await);
        store.clear_calls();

        let decision = assert_ok!(limiter.check(IP, Category::Ip).await);

        assert!(decision.is_allowed());
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::Exists("blocked:127.0.0.1".to_string()),
                StoreCall::Increment("counter:ip:127.0.0.1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_limit_then_block_scenario() {
        let store = Arc::new(RecordingStore::new());
        let limiter = limiter_with(store.clone());

        for _ in 0..5 {
            let decision = assert_ok!(limiter.check(IP, Category::Ip).await);
            assert_eq!(decision, Decision::Allowed);
        }

        store.clear_calls();
        let decision = assert_ok!(limiter.check(IP, Category::Ip).await);
        assert_eq!(decision, Decision::Denied(DenyReason::LimitExceeded));
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::Exists("blocked:127.0.0.1".to_string()),
                StoreCall::Increment("counter:ip:127.0.0.1".to_string()),
                StoreCall::SetWithExpiry(
                    "blocked:127.0.0.1".to_string(),
                    1,
                    Duration::from_secs(300)
                ),
                StoreCall::Delete("counter:ip:127.0.0.1".to_string()),
            ]
        );
        assert!(assert_ok!(store.inner().exists("blocked:127.0.0.1").await));
        assert!(!assert_ok!(store.inner().exists("counter:ip:127.0.0.1").await));

        store.clear_calls();
        let decision = assert_ok!(limiter.check(IP, Category::Ip).await);
        assert_eq!(decision, Decision::Denied(DenyReason::Blocked));
        assert_eq!(
            store.calls(),
            vec![StoreCall::Exists("blocked:127.0.0.1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_existing_block_skips_counter() {
        let store = Arc::new(RecordingStore::new());
        assert_ok!(
            store
                .inner()
                .set_with_expiry("blocked:10.0.0.9", 1, Duration::from_secs(60))
                .await
        );
        let limiter = limiter_with(store.clone());

        for category in [Category::Ip, Category::Token] {
            let decision = assert_ok!(limiter.check("10.0.0.9", category).await);
            assert_eq!(decision, Decision::Denied(DenyReason::Blocked));
        }

        assert!(store.calls().iter().all(StoreCall::is_exists));
        assert_eq!(assert_ok!(store.inner().get("counter:ip:10.0.0.9").await), None);
    }

    #[tokio::test]
    async fn test_ip_and_token_counters_are_independent() {
        let store = Arc::new(RecordingStore::new());
        let limiter = limiter_with(store.clone());

        for _ in 0..5 {
            assert_ok!(limiter.check(IP, Category::Ip).await);
        }
        let decision = assert_ok!(limiter.check(IP, Category::Token).await);
        assert!(decision.is_allowed());

        assert_eq!(assert_ok!(store.inner().get("counter:ip:127.0.0.1").await), Some(5));
        assert_eq!(assert_ok!(store.inner().get("counter:token:127.0.0.1").await), Some(1));
    }

    #[tokio::test]
    async fn test_token_uses_token_limits() {
        let store = Arc::new(RecordingStore::new());
        let limiter = limiter_with(store);

        for _ in 0..10 {
            let decision = assert_ok!(limiter.check("secret-token", Category::Token).await);
            assert!(decision.is_allowed());
        }
        let decision = assert_ok!(limiter.check("secret-token", Category::Token).await);
        assert_eq!(decision, Decision::Denied(DenyReason::LimitExceeded));
    }

    #[tokio::test]
    async fn test_empty_identifier_rejected() {
        let store = Arc::new(RecordingStore::new());
        let limiter = limiter_with(store.clone());

        let err = assert_err!(limiter.check("", Category::Ip).await);
        assert!(matches!(err, TollgateError::RateLimit(_)));
        assert!(store.calls().is_empty());
    }

    async fn check_with_failure<F>(predicate: F, primed_count: Option<i64>) -> Result<Decision>
    where
        F: Fn(&StoreCall) -> bool + Send + Sync + 'static,
    {
        let store = Arc::new(RecordingStore::failing_when(predicate));
        if let Some(count) = primed_count {
            store
                .inner()
                .set_with_expiry("counter:ip:127.0.0.1", count, Duration::from_secs(1))
                .await
                .unwrap();
        }
        limiter_with(store).check(IP, Category::Ip).await
    }

    #[tokio::test]
    async fn test_store_errors_are_propagated() {
        let cases: Vec<(&str, Result<Decision>)> = vec![
            (
                "exists",
                check_with_failure(|c| matches!(c, StoreCall::Exists(_)), None).await,
            ),
            (
                "increment",
                check_with_failure(|c| matches!(c, StoreCall::Increment(_)), None).await,
            ),
            (
                "window expiry",
                check_with_failure(
                    |c| matches!(c, StoreCall::SetWithExpiry(k, _, _) if k.starts_with("counter:")),
                    None,
                )
                .await,
            ),
            (
                "block creation",
                check_with_failure(
                    |c| matches!(c, StoreCall::SetWithExpiry(k, _, _) if k.starts_with("blocked:")),
                    Some(5),
                )
                .await,
            ),
            (
                "counter delete",
                check_with_failure(|c| matches!(c, StoreCall::Delete(_)), Some(5)).await,
            ),
        ];

        for (step, result) in cases {
            assert!(
                matches!(result, Err(TollgateError::Store(_))),
                "failure during {step} was not surfaced: {result:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_resets_count() {
        let store = Arc::new(RecordingStore::new());
        let limiter = limiter_with(store.clone());

        for _ in 0..5 {
            assert_ok!(limiter.check(IP, Category::Ip).await);
        }

        tokio::time::advance(Duration::from_secs(1)).await;

        for _ in 0..5 {
            let decision = assert_ok!(limiter.check(IP, Category::Ip).await);
            assert!(decision.is_allowed());
        }
        assert!(!assert_ok!(store.inner().exists("blocked:127.0.0.1").await));
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_expires() {
        let store = Arc::new(RecordingStore::new());
        let limiter = limiter_with(store.clone());

        for _ in 0..6 {
            assert_ok!(limiter.check(IP, Category::Ip).await);
        }

        tokio::time::advance(Duration::from_secs(299)).await;
        let decision = assert_ok!(limiter.check(IP, Category::Ip).await);
        assert_eq!(decision, Decision::Denied(DenyReason::Blocked));

        tokio::time::advance(Duration::from_secs(1)).await;
        let decision = assert_ok!(limiter.check(IP, Category::Ip).await);
        assert_eq!(decision, Decision::Allowed);
        assert_eq!(assert_ok!(store.inner().get("counter:ip:127.0.0.1").await), Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_checks_share_store() {
        let store = Arc::new(RecordingStore::new());
        let limiter = Arc::new(limiter_with(store.clone()));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            tasks.spawn(async move { limiter.check(IP, Category::Ip).await });
        }

        let mut allowed = 0;
        while let Some(joined) = tasks.join_next().await {
            if assert_ok!(joined.unwrap()).is_allowed() {
                allowed += 1;
            }
        }

        // The current-thread test runtime runs the tasks one after another.
        assert_eq!(allowed, 5);
        assert!(assert_ok!(store.inner().exists("blocked:127.0.0.1").await));
    }

    #[test]
    fn test_exceeds() {
        assert!(!exceeds(5, 5));
        assert!(exceeds(6, 5));
        assert!(!exceeds(-1, 5));
    }
}
