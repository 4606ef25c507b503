//! Request identity extraction.
//!
//! A request carrying a non-empty token header is limited as that token;
//! every other request is limited by client address.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::fmt::Write;
use std::net::SocketAddr;

use crate::config::ServerConfig;
use crate::error::{Result, TollgateError};
use crate::ratelimit::Category;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// The principal a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub identifier: String,
    pub category: Category,
}

/// Rules for turning a request into a [`RequestIdentity`].
#[derive(Debug, Clone)]
pub struct IdentityPolicy {
    token_header: HeaderName,
    trust_proxy_headers: bool,
}

impl IdentityPolicy {
    pub fn new(token_header: HeaderName, trust_proxy_headers: bool) -> Self {
        Self {
            token_header,
            trust_proxy_headers,
        }
    }

    /// Build the policy from server settings.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let token_header = HeaderName::from_bytes(config.token_header.as_bytes()).map_err(|e| {
            TollgateError::Config(format!(
                "invalid token header name '{}': {}",
                config.token_header, e
            ))
        })?;
        Ok(Self::new(token_header, config.trust_proxy_headers))
    }

    /// Identify a request from its headers and connection peer.
    ///
    /// Returns `None` when there is neither a token nor any usable address.
    pub fn identify(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<RequestIdentity> {
        if let Some(token) = headers.get(&self.token_header) {
            if !token.is_empty() {
                return Some(RequestIdentity {
                    identifier: token_identifier(token),
                    category: Category::Token,
                });
            }
        }

        self.client_address(headers, peer)
            .map(|identifier| RequestIdentity {
                identifier,
                category: Category::Ip,
            })
    }

    fn client_address(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
        if self.trust_proxy_headers {
            let forwarded = header_str(headers, X_FORWARDED_FOR)
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty());
            let real_ip = || header_str(headers, X_REAL_IP).map(str::trim).filter(|ip| !ip.is_empty());

            if let Some(ip) = forwarded.or_else(real_ip) {
                return Some(ip.to_string());
            }
        }
        peer.map(|addr| addr.ip().to_string())
    }
}

/// Render a token header as an identifier without losing bytes.
///
/// Printable ASCII is kept as is. `%` and every other byte become `%XX`, so
/// distinct header values always give distinct identifiers.
fn token_identifier(token: &HeaderValue) -> String {
    let bytes = token.as_bytes();
    let mut identifier = String::with_capacity(bytes.len());
    for &byte in bytes {
        if (b' '..=b'~').contains(&byte) && byte != b'%' {
            identifier.push(char::from(byte));
        } else {
            let _ = write!(identifier, "%{byte:02X}");
        }
    }
    identifier
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
