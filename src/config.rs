//! Relay configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Missing or unparsable numbers fall
//! back to their defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::RelayError;
use crate::event::RetrySettings;
use crate::sse::HubSettings;

/// Log output format of the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(RelayError::InvalidRequest(format!(
                "unknown log format: {other}"
            ))),
        }
    }
}

/// Top-level relay configuration.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8080`).
    pub listen_addr: SocketAddr,

    /// Retry attempts after the first failed publish.
    pub event_max_retries: u32,

    /// Base delay of the exponential retry backoff.
    pub event_retry_delay: Duration,

    /// Capacity of the retry queue.
    pub event_retry_queue_capacity: usize,

    /// Path of the dead-letter JSON Lines file.
    pub event_deadletter_path: PathBuf,

    /// Number of pool workers.
    pub worker_pool_size: usize,

    /// Capacity of the pool job queue.
    pub worker_queue_capacity: usize,

    /// Capacity of the hub broadcast channel.
    pub sse_broadcast_buffer: usize,

    /// Capacity of each stream client channel.
    pub sse_client_buffer: usize,

    /// Capacity of the hub registration channel.
    pub sse_registration_buffer: usize,

    /// Interval between keepalive frames on idle streams.
    pub sse_keepalive: Duration,

    /// Interval of the hub statistics job.
    pub hub_stats_interval: Duration,

    /// Per-component shutdown deadline.
    pub shutdown_timeout: Duration,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let retry = RetrySettings::default();
        let hub = HubSettings::default();
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            event_max_retries: retry.max_retries,
            event_retry_delay: retry.base_delay,
            event_retry_queue_capacity: retry.queue_capacity,
            event_deadletter_path: PathBuf::from("logs/event_deadletter.jsonl"),
            worker_pool_size: 5,
            worker_queue_capacity: 100,
            sse_broadcast_buffer: hub.broadcast_buffer,
            sse_client_buffer: hub.client_buffer,
            sse_registration_buffer: hub.registration_buffer,
            sse_keepalive: Duration::from_secs(30),
            hub_stats_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(10),
            log_format: LogFormat::Pretty,
        }
    }
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is present but invalid.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let listen_addr = match lookup("LISTEN_ADDR") {
            Some(raw) => raw
                .parse::<SocketAddr>()
                .map_err(|err| anyhow::anyhow!("invalid LISTEN_ADDR {raw:?}: {err}"))?,
            None => defaults.listen_addr,
        };

        let event_deadletter_path = lookup("EVENT_DEADLETTER_PATH")
            .filter(|p| !p.trim().is_empty())
            .map_or(defaults.event_deadletter_path, PathBuf::from);

        let log_format = parse_or(&lookup, "LOG_FORMAT", defaults.log_format);

        Ok(Self {
            listen_addr,
            event_max_retries: parse_or(&lookup, "EVENT_MAX_RETRIES", defaults.event_max_retries),
            event_retry_delay: Duration::from_millis(parse_or(
                &lookup,
                "EVENT_RETRY_DELAY_MS",
                millis(defaults.event_retry_delay),
            )),
            event_retry_queue_capacity: parse_or(
                &lookup,
                "EVENT_RETRY_QUEUE_CAPACITY",
                defaults.event_retry_queue_capacity,
            ),
            event_deadletter_path,
            worker_pool_size: parse_or(&lookup, "WORKER_POOL_SIZE", defaults.worker_pool_size),
            worker_queue_capacity: parse_or(
                &lookup,
                "WORKER_QUEUE_CAPACITY",
                defaults.worker_queue_capacity,
            ),
            sse_broadcast_buffer: parse_or(
                &lookup,
                "SSE_BROADCAST_BUFFER",
                defaults.sse_broadcast_buffer,
            ),
            sse_client_buffer: parse_or(&lookup, "SSE_CLIENT_BUFFER", defaults.sse_client_buffer),
            sse_registration_buffer: parse_or(
                &lookup,
                "SSE_REGISTRATION_BUFFER",
                defaults.sse_registration_buffer,
            ),
            sse_keepalive: Duration::from_secs(parse_or(
                &lookup,
                "SSE_KEEPALIVE_SECS",
                defaults.sse_keepalive.as_secs(),
            )),
            hub_stats_interval: Duration::from_secs(parse_or(
                &lookup,
                "HUB_STATS_INTERVAL_SECS",
                defaults.hub_stats_interval.as_secs(),
            )),
            shutdown_timeout: Duration::from_secs(parse_or(
                &lookup,
                "SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )),
            log_format,
        })
    }

    /// Retry settings for the resilient publisher.
    #[must_use]
    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            max_retries: self.event_max_retries,
            base_delay: self.event_retry_delay,
            queue_capacity: self.event_retry_queue_capacity,
        }
    }

    /// Channel bounds for the broadcast hub.
    #[must_use]
    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            broadcast_buffer: self.sse_broadcast_buffer,
            client_buffer: self.sse_client_buffer,
            registration_buffer: self.sse_registration_buffer,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Parses `key` as `T`, returning `default` on missing or invalid values.
fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "invalid configuration value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let Ok(config) = RelayConfig::from_lookup(lookup(&[])) else {
            panic!("defaults must load");
        };
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.event_max_retries, 5);
        assert_eq!(config.event_retry_delay, Duration::from_secs(2));
        assert_eq!(config.event_retry_queue_capacity, 1000);
        assert_eq!(
            config.event_deadletter_path,
            PathBuf::from("logs/event_deadletter.jsonl")
        );
        assert_eq!(config.hub_settings(), HubSettings::default());
        assert_eq!(config.sse_keepalive, Duration::from_secs(30));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn overrides_are_applied() {
        let Ok(config) = RelayConfig::from_lookup(lookup(&[
            ("LISTEN_ADDR", "127.0.0.1:9000"),
            ("EVENT_MAX_RETRIES", "2"),
            ("EVENT_RETRY_DELAY_MS", "250"),
            ("SSE_CLIENT_BUFFER", "8"),
            ("LOG_FORMAT", "JSON"),
        ])) else {
            panic!("config must load");
        };
        assert_eq!(config.listen_addr.port(), 9000);
        let retry = config.retry_settings();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.hub_settings().client_buffer, 8);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let Ok(config) = RelayConfig::from_lookup(lookup(&[
            ("WORKER_POOL_SIZE", "many"),
            ("LOG_FORMAT", "xml"),
        ])) else {
            panic!("config must load");
        };
        assert_eq!(config.worker_pool_size, 5);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn invalid_listen_addr_is_an_error() {
        assert!(RelayConfig::from_lookup(lookup(&[("LISTEN_ADDR", "nowhere")])).is_err());
    }
}
