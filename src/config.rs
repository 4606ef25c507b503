//! Configuration management for Tollgate.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! environment variables. Command-line overrides are applied by the binary on
//! top of that, after which [`TollgateConfig::validate`] must pass before the
//! configuration is used.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Result, TollgateError};
use crate::ratelimit::Category;
use crate::store::RedisStoreConfig;

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`
    #[serde(default)]
    pub trust_proxy_headers: bool,

    /// Header carrying the API token
    #[serde(default = "default_token_header")]
    pub token_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            trust_proxy_headers: false,
            token_header: default_token_header(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_token_header() -> String {
    "API_KEY".to_string()
}

/// Which counter store backs the rate limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server
    #[default]
    Redis,
    /// Process-local memory; counters are not shared between instances
    Memory,
}

impl FromStr for StoreBackend {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(TollgateError::Config(format!(
                "unknown store backend '{other}'"
            ))),
        }
    }
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection settings
    #[serde(default)]
    pub redis: RedisConfig,

    /// Namespace prepended to every key
    #[serde(default)]
    pub key_prefix: String,

    /// Deadline for each store operation in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Expired-entry sweep interval for the memory backend
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis: RedisConfig::default(),
            key_prefix: String::new(),
            timeout_ms: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    30
}

impl StoreConfig {
    /// Connection settings for the Redis adapter.
    pub fn redis_store_config(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            host: self.redis.host.clone(),
            port: self.redis.port,
            password: self.redis.password.clone(),
            db: self.redis.db,
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
            db: 0,
        }
    }
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

/// Limits applied to one category of identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Requests allowed per window
    pub max_requests: u64,

    /// Length of the fixed counting window
    #[serde(default = "default_window", with = "duration_str")]
    pub window: Duration,

    /// How long an identifier stays blocked after exceeding the limit
    #[serde(default = "default_block_duration", with = "duration_str")]
    pub block_duration: Duration,
}

impl LimitConfig {
    fn validate(&self, category: Category) -> Result<()> {
        if self.max_requests == 0 {
            return Err(TollgateError::Config(format!(
                "{category} max_requests must be positive"
            )));
        }
        if self.window.is_zero() {
            return Err(TollgateError::Config(format!(
                "{category} window must be positive"
            )));
        }
        if self.block_duration.is_zero() {
            return Err(TollgateError::Config(format!(
                "{category} block_duration must be positive"
            )));
        }
        Ok(())
    }
}

fn default_window() -> Duration {
    Duration::from_secs(1)
}

fn default_block_duration() -> Duration {
    Duration::from_secs(300)
}

/// Rate limiting configuration, one limit set per category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Limits for requests identified by client address
    #[serde(default = "default_ip_limits")]
    pub ip: LimitConfig,

    /// Limits for requests identified by API token
    #[serde(default = "default_token_limits")]
    pub token: LimitConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            ip: default_ip_limits(),
            token: default_token_limits(),
        }
    }
}

fn default_ip_limits() -> LimitConfig {
    LimitConfig {
        max_requests: 5,
        window: default_window(),
        block_duration: default_block_duration(),
    }
}

fn default_token_limits() -> LimitConfig {
    LimitConfig {
        max_requests: 10,
        window: default_window(),
        block_duration: default_block_duration(),
    }
}

impl RateLimitingConfig {
    /// The limits that apply to `category`.
    pub fn limits_for(&self, category: Category) -> &LimitConfig {
        match category {
            Category::Ip => &self.ip,
            Category::Token => &self.token,
        }
    }

    fn limits_for_mut(&mut self, category: Category) -> &mut LimitConfig {
        match category {
            Category::Ip => &mut self.ip,
            Category::Token => &mut self.token,
        }
    }
}

impl TollgateConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration file");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load defaults or the given file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Values that fail to parse are ignored with a warning and the current
    /// setting is kept.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = parse_var(&lookup, "SERVER_PORT", |v| v.parse::<u16>().ok()) {
            self.server.listen_addr.set_port(port);
        }
        if let Some(trust) = parse_var(&lookup, "TRUST_PROXY_HEADERS", parse_bool) {
            self.server.trust_proxy_headers = trust;
        }
        if let Some(header) = lookup("TOKEN_HEADER") {
            self.server.token_header = header;
        }

        if let Some(backend) = parse_var(&lookup, "STORE_BACKEND", |v| v.parse::<StoreBackend>().ok()) {
            self.store.backend = backend;
        }
        if let Some(prefix) = lookup("STORE_KEY_PREFIX") {
            self.store.key_prefix = prefix;
        }
        if let Some(timeout) = parse_var(&lookup, "STORE_TIMEOUT_MS", |v| v.parse::<u64>().ok()) {
            self.store.timeout_ms = Some(timeout);
        }
        if let Some(host) = lookup("REDIS_HOST") {
            self.store.redis.host = host;
        }
        if let Some(port) = parse_var(&lookup, "REDIS_PORT", |v| v.parse::<u16>().ok()) {
            self.store.redis.port = port;
        }
        if let Some(password) = lookup("REDIS_PASSWORD") {
            self.store.redis.password = (!password.is_empty()).then_some(password);
        }
        if let Some(db) = parse_var(&lookup, "REDIS_DB", |v| v.parse::<i64>().ok()) {
            self.store.redis.db = db;
        }

        for (category, prefix) in [
            (Category::Ip, "RATE_LIMIT_IP"),
            (Category::Token, "RATE_LIMIT_TOKEN"),
        ] {
            let limits = self.rate_limiting.limits_for_mut(category);
            if let Some(max) =
                parse_var(&lookup, &format!("{prefix}_REQUESTS"), |v| v.parse::<u64>().ok())
            {
                limits.max_requests = max;
            }
            if let Some(window) = parse_var(&lookup, &format!("{prefix}_WINDOW"), |v| {
                parse_duration(v).ok()
            }) {
                limits.window = window;
            }
            if let Some(block) = parse_var(&lookup, &format!("{prefix}_BLOCK_DURATION"), |v| {
                parse_duration(v).ok()
            }) {
                limits.block_duration = block;
            }
        }
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.ip.validate(Category::Ip)?;
        self.rate_limiting.token.validate(Category::Token)?;

        if axum::http::HeaderName::from_bytes(self.server.token_header.as_bytes()).is_err() {
            return Err(TollgateError::Config(format!(
                "invalid token header name '{}'",
                self.server.token_header
            )));
        }
        if self.store.timeout_ms == Some(0) {
            return Err(TollgateError::Config(
                "store timeout_ms must be positive".to_string(),
            ));
        }
        if self.store.sweep_interval_secs == 0 {
            return Err(TollgateError::Config(
                "store sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T, L, P>(lookup: &L, key: &str, parse: P) -> Option<T>
where
    L: Fn(&str) -> Option<String>,
    P: FnOnce(&str) -> Option<T>,
{
    let raw = lookup(key)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!(variable = key, value = %raw, "Ignoring unparseable environment override");
    }
    parsed
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a compact duration such as `300ms`, `1s`, `5m` or `1h30m`.
///
/// Supported units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. Each
/// component may carry a fraction (`1.5s`). A bare `0` is accepted.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let err = || TollgateError::Config(format!("invalid duration '{input}'"));

    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(err());
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(err)?;
        if number_len == 0 {
            return Err(err());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| err())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(err()),
        };
        rest = &rest[unit_len..];

        total += value * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(err());
    }
    Ok(Duration::from_nanos(total.round() as u64))
}

/// Render a duration in the form accepted by [`parse_duration`].
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0".to_string();
    }
    if duration.subsec_nanos() == 0 {
        let secs = duration.as_secs();
        return if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        };
    }
    if duration.subsec_nanos() % 1_000_000 == 0 {
        return format!("{}ms", duration.as_millis());
    }
    format!("{}ns", duration.as_nanos())
}

/// Serde adapter storing durations as compact strings.
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
