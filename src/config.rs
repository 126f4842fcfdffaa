//! Configuration Module
//!
//! Loads server, cache and pagination settings from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::cache::CoordinatorConfig;

/// Shortest lock lease; a zero lease would switch stampede protection off
pub const MIN_LOCK_LEASE_MS: u64 = 1_000;
/// Shortest waiter polling window
pub const MIN_MAX_WAIT_MS: u64 = 100;
/// Shortest poll delay, so waiters never spin
pub const MIN_BACKOFF_MS: u64 = 1;

/// Process configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Maximum number of entries the in-memory store can hold
    pub max_entries: usize,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// Base TTL in seconds for cached feed pages, before jitter
    pub feed_ttl: u64,
    /// Lock lease in milliseconds; must comfortably exceed compute latency
    pub lock_lease_ms: u64,
    /// How long a waiter polls for another worker's value, in milliseconds
    pub max_wait_ms: u64,
    /// Lower bound of the randomized poll delay, in milliseconds
    pub backoff_min_ms: u64,
    /// Upper bound of the randomized poll delay, in milliseconds
    pub backoff_max_ms: u64,
    /// Page size used when the request does not name one
    pub default_limit: usize,
    /// Largest page size a request may ask for
    pub max_limit: usize,
    /// Users generated by the demo seeder
    pub seed_users: u64,
    /// Catalog items generated by the demo seeder
    pub seed_items: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `MAX_ENTRIES` - Maximum store entries (default: 10000)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 1)
    /// - `FEED_TTL` - Base feed TTL in seconds (default: 300)
    /// - `LOCK_LEASE_MS` - Compute lock lease (default: 10000)
    /// - `MAX_WAIT_MS` - Waiter polling window (default: 2000)
    /// - `BACKOFF_MIN_MS` / `BACKOFF_MAX_MS` - Poll delay range (default: 50..150)
    /// - `DEFAULT_LIMIT` / `MAX_LIMIT` - Page size default and cap (default: 20 / 100)
    /// - `SEED_USERS` / `SEED_ITEMS` - Demo data volume (default: 5 / 500)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: env_or("SERVER_PORT", defaults.server_port),
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            feed_ttl: env_or("FEED_TTL", defaults.feed_ttl),
            lock_lease_ms: env_or("LOCK_LEASE_MS", defaults.lock_lease_ms),
            max_wait_ms: env_or("MAX_WAIT_MS", defaults.max_wait_ms),
            backoff_min_ms: env_or("BACKOFF_MIN_MS", defaults.backoff_min_ms),
            backoff_max_ms: env_or("BACKOFF_MAX_MS", defaults.backoff_max_ms),
            default_limit: env_or("DEFAULT_LIMIT", defaults.default_limit),
            max_limit: env_or("MAX_LIMIT", defaults.max_limit),
            seed_users: env_or("SEED_USERS", defaults.seed_users),
            seed_items: env_or("SEED_ITEMS", defaults.seed_items),
        }
    }

    /// Coordinator timings derived from this configuration. Values below
    /// their minimum are raised to it with a warning.
    pub fn coordinator(&self) -> CoordinatorConfig {
        let lock_lease_ms = at_least("LOCK_LEASE_MS", self.lock_lease_ms, MIN_LOCK_LEASE_MS);
        let max_wait_ms = at_least("MAX_WAIT_MS", self.max_wait_ms, MIN_MAX_WAIT_MS);
        let backoff_min_ms = at_least("BACKOFF_MIN_MS", self.backoff_min_ms, MIN_BACKOFF_MS);
        CoordinatorConfig {
            lock_lease: Duration::from_millis(lock_lease_ms),
            max_wait: Duration::from_millis(max_wait_ms),
            backoff_min: Duration::from_millis(backoff_min_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms.max(backoff_min_ms)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            max_entries: 10_000,
            cleanup_interval: 1,
            feed_ttl: 300,
            lock_lease_ms: 10_000,
            max_wait_ms: 2_000,
            backoff_min_ms: 50,
            backoff_max_ms: 150,
            default_limit: 20,
            max_limit: 100,
            seed_users: 5,
            seed_items: 500,
        }
    }
}

fn at_least(name: &str, value: u64, min: u64) -> u64 {
    if value < min {
        warn!(setting = name, value, min, "Setting below minimum, using minimum");
        min
    } else {
        value
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
