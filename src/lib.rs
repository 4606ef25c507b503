//! Tollgate - Request Quota Enforcement Service
//!
//! This crate enforces per-identifier request quotas on an HTTP request
//! stream. Each client address or API token gets a fixed-window request
//! counter in a shared expiring store; an identifier that exceeds its quota is
//! blocked for a configured duration. The limiter itself is stateless, so any
//! number of service instances can share one Redis store.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
