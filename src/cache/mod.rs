//! Cache Module
//!
//! Cache-aside coordination with stampede protection, plus the store seam it
//! runs against and an in-memory store implementation.

mod coordinator;
mod entry;
mod jitter;
mod stats;
mod store;


// Re-export public types
pub use coordinator::{CacheCoordinator, CoordinatorConfig, LockToken};
pub use entry::{current_timestamp_ms, CacheEntry};
pub use jitter::TtlJitter;
pub use stats::{CoordinatorStats, StatsSnapshot};
pub use store::{KvStore, MemoryStore};

// == Public Constants ==
/// Suffix appended to a cache key to form its compute lock key
pub const LOCK_SUFFIX: &str = ":lock";

/// Smallest TTL in seconds a jittered value may be stored with
pub const MIN_TTL_SECS: u64 = 5;

/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 1024;

/// Maximum allowed value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB
