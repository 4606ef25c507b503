//! HTTP boundary: request identification, the rate limiting middleware and
//! the server that hosts them.

mod identity;
mod middleware;
mod server;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

pub use identity::{IdentityPolicy, RequestIdentity};
pub use middleware::{rate_limit_middleware, RateLimitState, LIMIT_EXCEEDED_MESSAGE};
pub use server::HttpServer;

/// Wrap every route of `app` with the rate limiting middleware.
pub fn with_rate_limit(app: Router, state: RateLimitState) -> Router {
    app.layer(axum::middleware::from_fn_with_state(
        state,
        rate_limit_middleware,
    ))
}

/// The service's application router, rate limited.
pub fn router(state: RateLimitState) -> Router {
    with_rate_limit(Router::new().route("/", get(root)), state)
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Hello, World!" }))
}
