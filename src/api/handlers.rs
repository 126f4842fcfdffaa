//! API Handlers
//!
//! HTTP request handlers for each feed server endpoint.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::{CacheCoordinator, KvStore, MemoryStore};
use crate::config::Config;
use crate::error::Result;
use crate::feed::{FeedService, MemoryFeedSource, PageSource};
use crate::models::{FeedParams, FeedResponse, HealthResponse, StatsResponse};

/// Seed used for the demo catalog so every process serves the same data
const DEMO_SEED: u64 = 0x5eed;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub feed: FeedService,
    /// Store handle, kept for stats and the cleanup task
    pub store: Arc<MemoryStore>,
    /// Page size used when a request names none
    pub default_limit: usize,
    /// Fires on shutdown; in-flight feed requests stop waiting on it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(feed: FeedService, store: Arc<MemoryStore>, default_limit: usize) -> Self {
        Self {
            feed,
            store,
            default_limit: default_limit.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Builds the store, coordinator, seeded source and feed service from
    /// configuration.
    pub fn from_config(config: &Config) -> Self {
        let store = Arc::new(MemoryStore::new(config.max_entries));
        let kv: Arc<dyn KvStore> = store.clone();
        let coordinator = CacheCoordinator::new(kv, config.coordinator());

        let source = MemoryFeedSource::seeded(config.seed_users, config.seed_items, DEMO_SEED);
        info!(
            users = source.user_count(),
            items = source.catalog_len(),
            "Seeded feed source"
        );
        let source: Arc<dyn PageSource> = Arc::new(source);

        let feed = FeedService::new(coordinator, source, config.feed_ttl, config.max_limit);
        Self::new(feed, store, config.default_limit)
    }
}

/// Handler for GET /v1/feed
///
/// Serves one page of a user's feed with an `x-response-time` header.
pub async fn feed_handler(
    State(state): State<AppState>,
    Query(params): Query<FeedParams>,
) -> Result<Response> {
    let started = Instant::now();

    let query = params.into_query(state.default_limit)?;
    let limit = query.limit.min(state.feed.max_limit());
    let page = state
        .feed
        .get_feed_cancellable(&query, &state.shutdown)
        .await?;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let header = [("x-response-time", format!("{elapsed_ms}ms"))];
    Ok((header, Json(FeedResponse::new(page, limit, elapsed_ms))).into_response())
}

/// Handler for GET /stats
///
/// Returns coordinator counters and the live store size.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let counters = state.feed.coordinator().stats().snapshot();
    let total_entries = state.store.len().await;

    Json(StatsResponse::new(counters, total_entries))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;

    fn test_state() -> AppState {
        let config = Config {
            seed_users: 2,
            seed_items: 40,
            ..Config::default()
        };
        AppState::from_config(&config)
    }

    fn params(userid: &str, limit: &str) -> FeedParams {
        FeedParams {
            userid: Some(userid.to_string()),
            limit: Some(limit.to_string()),
            ..FeedParams::default()
        }
    }

    #[tokio::test]
    async fn test_feed_handler_sets_response_time_header() {
        let state = test_state();

        let response = feed_handler(State(state), Query(params("1", "5")))
            .await
            .unwrap();

        let header = response.headers().get("x-response-time").unwrap();
        assert!(header.to_str().unwrap().ends_with("ms"));
    }

    #[tokio::test]
    async fn test_feed_handler_rejects_missing_user() {
        let state = test_state();

        let result = feed_handler(State(state), Query(FeedParams::default())).await;
        assert!(matches!(result, Err(FeedError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_stats_handler_counts_requests() {
        let state = test_state();

        feed_handler(State(state.clone()), Query(params("1", "5")))
            .await
            .unwrap();
        feed_handler(State(state.clone()), Query(params("1", "5")))
            .await
            .unwrap();

        let response = stats_handler(State(state)).await;
        assert_eq!(response.counters.misses, 1);
        assert_eq!(response.counters.hits, 1);
        assert_eq!(response.total_entries, 1);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "healthy");
    }
}
