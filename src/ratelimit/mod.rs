//! Rate decision logic.

mod category;
mod keys;
mod limiter;

pub use category::Category;
pub use keys::KeyScheme;
pub use limiter::{Decision, DenyReason, RateLimiter};
