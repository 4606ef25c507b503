//! Store key derivation.
//!
//! Counter keys are qualified by category, block keys are not:
//!
//! ```text
//! {prefix}counter:{category}:{identifier}
//! {prefix}blocked:{identifier}
//! ```
//!
//! The literal `counter:` and `blocked:` namespaces keep the two entry types
//! apart, and the category segment keeps an IP counter apart from a token
//! counter with the same literal identifier.

use super::category::Category;

const COUNTER_NAMESPACE: &str = "counter:";
const BLOCKED_NAMESPACE: &str = "blocked:";

/// Builds the store keys used by the rate limiter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyScheme {
    /// Prepended to every key, so deployments can share one store
    prefix: String,
}

impl KeyScheme {
    /// Create a key scheme with the given namespace prefix (may be empty).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Key of the per-window request counter for `identifier` in `category`.
    pub fn counter(&self, category: Category, identifier: &str) -> String {
        format!(
            "{}{}{}:{}",
            self.prefix,
            COUNTER_NAMESPACE,
            category.as_str(),
            identifier
        )
    }

    /// Key of the block marker for `identifier`, shared by all categories.
    pub fn blocked(&self, identifier: &str) -> String {
        format!("{}{}{}", self.prefix, BLOCKED_NAMESPACE, identifier)
    }
}
