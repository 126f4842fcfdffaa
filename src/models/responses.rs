//! Response DTOs for the feed API

use serde::Serialize;

use crate::cache::StatsSnapshot;
use crate::feed::FeedItem;
use crate::pagination::Page;

/// Response body for `GET /v1/feed`
#[derive(Debug, Clone, Serialize)]
pub struct FeedResponse {
    pub data: Vec<FeedItem>,
    pub pagination: PaginationInfo,
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationInfo {
    /// Absent on the last page
    pub next_cursor: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMeta {
    pub response_time_ms: u64,
}

impl FeedResponse {
    pub fn new(page: Page<FeedItem>, limit: usize, response_time_ms: u64) -> Self {
        Self {
            data: page.items,
            pagination: PaginationInfo {
                next_cursor: page.next_cursor,
                limit,
            },
            meta: ResponseMeta { response_time_ms },
        }
    }
}

/// Response body for `GET /stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub counters: StatsSnapshot,
    /// hits / (hits + misses)
    pub hit_rate: f64,
    /// Live entries in the store, locks included
    pub total_entries: usize,
}

impl StatsResponse {
    pub fn new(counters: StatsSnapshot, total_entries: usize) -> Self {
        Self {
            hit_rate: counters.hit_rate(),
            counters,
            total_entries,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
