//! Rate limiting middleware for axum.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, error, warn};

use super::identity::IdentityPolicy;
use crate::ratelimit::{Category, Decision, RateLimiter};

/// Body message sent with a 429 response.
pub const LIMIT_EXCEEDED_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Shared state of the rate limiting middleware.
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<RateLimiter>,
    identity: Arc<IdentityPolicy>,
}

impl RateLimitState {
    pub fn new(limiter: Arc<RateLimiter>, identity: IdentityPolicy) -> Self {
        Self {
            limiter,
            identity: Arc::new(identity),
        }
    }
}

/// Check every request against the rate limiter before it reaches the
/// wrapped handlers.
///
/// A denied request is answered with 429. A limiter error fails closed with
/// 503 so that a store outage never lets traffic bypass its quota; the error
/// itself is only logged.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let Some(identity) = state.identity.identify(request.headers(), peer) else {
        warn!("Unable to determine client address, rejecting request");
        return message_response(StatusCode::INTERNAL_SERVER_ERROR, "unable to identify client");
    };

    match state
        .limiter
        .check(&identity.identifier, identity.category)
        .await
    {
        Ok(Decision::Allowed) => next.run(request).await,
        Ok(Decision::Denied(reason)) => {
            match identity.category {
                Category::Ip => debug!(
                    client = %identity.identifier,
                    reason = ?reason,
                    "Request rate limited"
                ),
                Category::Token => debug!(reason = ?reason, "Token request rate limited"),
            }
            message_response(StatusCode::TOO_MANY_REQUESTS, LIMIT_EXCEEDED_MESSAGE)
        }
        Err(e) => {
            error!(
                error = %e,
                category = %identity.category,
                "Rate limit check failed"
            );
            message_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "service temporarily unavailable",
            )
        }
    }
}

fn message_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}
