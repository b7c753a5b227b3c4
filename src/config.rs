//! Configuration for the curl logging middleware.
//!
//! A [`CurlLoggerConfig`] is resolved once, before the layer is built. Values come from
//! three layers, highest precedence first:
//!
//! 1. explicit settings passed as [`ConfigOverrides`]
//! 2. environment variables (see the `ENV_*` constants)
//! 3. built-in defaults (or a deserialized file, since every type here is `serde`-ready)

use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

use crate::{
    sink::DEFAULT_QUEUE_CAPACITY,
    truncate::{TextEncoding, TruncationMode, TruncationPolicy},
};

/// `false` disables request logging entirely.
pub const ENV_ENABLED: &str = "ENABLE_REQUEST_LOGGING";
/// Response body limit in bytes.
pub const ENV_RESPONSE_LIMIT: &str = "REQUEST_CURL_RESPONSE_LIMIT";
/// Request body limit in bytes.
pub const ENV_REQUEST_LIMIT: &str = "REQUEST_CURL_REQUEST_LIMIT";
/// Placeholder text for oversize bodies.
pub const ENV_SIZE_MESSAGE: &str = "REQUEST_CURL_SIZE_MESSAGE";
/// Body text encoding.
pub const ENV_ENCODING: &str = "REQUEST_CURL_ENCODING";
/// `replace` or `prefix`.
pub const ENV_TRUNCATION_MODE: &str = "REQUEST_CURL_TRUNCATION_MODE";
/// Record queue capacity.
pub const ENV_QUEUE_CAPACITY: &str = "REQUEST_CURL_QUEUE_CAPACITY";
/// Watchdog timeout in whole seconds.
pub const ENV_WATCHDOG_SECS: &str = "REQUEST_CURL_WATCHDOG_SECS";

/// Errors produced while resolving configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Configuration for [`RequestCurlLayer`](crate::RequestCurlLayer).
///
/// # Examples
///
/// ```rust
/// use request_curl::{ConfigOverrides, CurlLoggerConfig};
///
/// let env = |key: &str| match key {
///     "REQUEST_CURL_RESPONSE_LIMIT" => Some("1024".to_owned()),
///     "REQUEST_CURL_REQUEST_LIMIT" => Some("512".to_owned()),
///     _ => None,
/// };
/// let overrides = ConfigOverrides {
///     request_body_limit: Some(256),
///     ..ConfigOverrides::default()
/// };
///
/// let config = CurlLoggerConfig::resolve(overrides, env).unwrap();
/// assert_eq!(config.policy.response_body_limit, 1024);
/// assert_eq!(config.policy.request_body_limit, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurlLoggerConfig {
    /// When false the layer passes requests straight through
    pub enabled: bool,
    /// Whether to tee and record request bodies
    pub capture_request_body: bool,
    /// Whether to tee and record response bodies
    pub capture_response_body: bool,
    /// Limits and display rules for captured bodies
    pub policy: TruncationPolicy,
    /// Records that may wait for the sink before new ones are dropped
    pub queue_capacity: usize,
    /// Longest an exchange may stay open before it is recorded as timed out
    #[serde(with = "duration_secs")]
    pub watchdog_timeout: Duration,
    /// Scheme used to make relative request URIs absolute
    pub default_scheme: String,
}

impl Default for CurlLoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capture_request_body: true,
            capture_response_body: true,
            policy: TruncationPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            watchdog_timeout: Duration::from_secs(60),
            default_scheme: "http".to_owned(),
        }
    }
}

/// Explicitly supplied settings. `None` falls through to the environment, then the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub enabled: Option<bool>,
    pub request_body_limit: Option<usize>,
    pub response_body_limit: Option<usize>,
    pub placeholder: Option<String>,
    pub encoding: Option<TextEncoding>,
    pub mode: Option<TruncationMode>,
    pub queue_capacity: Option<usize>,
    pub watchdog_timeout: Option<Duration>,
}

impl CurlLoggerConfig {
    /// Resolve from the defaults and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(ConfigOverrides::default(), |key| std::env::var(key).ok())
    }

    /// Resolve `overrides` on top of values found through `lookup`, on top of the defaults.
    pub fn resolve<F>(overrides: ConfigOverrides, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_env(&lookup)?;
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Overlay any environment values found through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_ENABLED) {
            // Anything but an explicit "false" leaves logging on
            self.enabled = !value.trim().eq_ignore_ascii_case("false");
        }
        if let Some(limit) = parse_env(&lookup, ENV_RESPONSE_LIMIT)? {
            self.policy.response_body_limit = limit;
        }
        if let Some(limit) = parse_env(&lookup, ENV_REQUEST_LIMIT)? {
            self.policy.request_body_limit = limit;
        }
        if let Some(message) = lookup(ENV_SIZE_MESSAGE) {
            self.policy.placeholder = message;
        }
        if let Some(encoding) = parse_env(&lookup, ENV_ENCODING)? {
            self.policy.encoding = encoding;
        }
        if let Some(mode) = parse_env(&lookup, ENV_TRUNCATION_MODE)? {
            self.policy.mode = mode;
        }
        if let Some(capacity) = parse_env(&lookup, ENV_QUEUE_CAPACITY)? {
            self.queue_capacity = capacity;
        }
        if let Some(secs) = parse_env::<u64, _>(&lookup, ENV_WATCHDOG_SECS)? {
            self.watchdog_timeout = Duration::from_secs(secs);
        }
        Ok(())
    }

    /// Overlay explicitly supplied settings.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides {
            enabled,
            request_body_limit,
            response_body_limit,
            placeholder,
            encoding,
            mode,
            queue_capacity,
            watchdog_timeout,
        } = overrides;

        self.enabled = enabled.unwrap_or(self.enabled);
        self.policy.request_body_limit = request_body_limit.unwrap_or(self.policy.request_body_limit);
        self.policy.response_body_limit =
            response_body_limit.unwrap_or(self.policy.response_body_limit);
        if let Some(placeholder) = placeholder {
            self.policy.placeholder = placeholder;
        }
        self.policy.encoding = encoding.unwrap_or(self.policy.encoding);
        self.policy.mode = mode.unwrap_or(self.policy.mode);
        self.queue_capacity = queue_capacity.unwrap_or(self.queue_capacity);
        self.watchdog_timeout = watchdog_timeout.unwrap_or(self.watchdog_timeout);
    }

    /// Check values that would make the middleware misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero("queue_capacity"));
        }
        if self.watchdog_timeout.is_zero() {
            return Err(ConfigError::Zero("watchdog_timeout"));
        }
        Ok(())
    }
}

fn parse_env<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    match value.trim().parse::<T>() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => Err(ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
