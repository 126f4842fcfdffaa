//! Feed Service
//!
//! Wires the keyset planner, the cursor codec and the cache coordinator
//! together: one cached [`Page`] per distinct feed query.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::CacheCoordinator;
use crate::error::{FeedError, PaginationError, Result};
use crate::feed::{FeedItem, FeedQuery, PageSource};
use crate::pagination::{Cursor, KeysetPlan, Page};

#[derive(Clone)]
pub struct FeedService {
    coordinator: CacheCoordinator,
    source: Arc<dyn PageSource>,
    base_ttl_secs: u64,
    max_limit: usize,
}

impl FeedService {
    pub fn new(
        coordinator: CacheCoordinator,
        source: Arc<dyn PageSource>,
        base_ttl_secs: u64,
        max_limit: usize,
    ) -> Self {
        Self {
            coordinator,
            source,
            base_ttl_secs,
            max_limit: max_limit.max(1),
        }
    }

    pub fn coordinator(&self) -> &CacheCoordinator {
        &self.coordinator
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    /// Serves one page of a feed, from cache when possible.
    pub async fn get_feed(&self, query: &FeedQuery) -> Result<Page<FeedItem>> {
        let (query, plan) = self.prepare(query)?;
        let key = query.cache_key();
        let source = Arc::clone(&self.source);

        self.coordinator
            .get_or_compute(&key, self.base_ttl_secs, move || {
                fetch_page(source, query, plan)
            })
            .await
    }

    /// Like [`get_feed`](Self::get_feed), abandoning the request once `cancel`
    /// fires.
    pub async fn get_feed_cancellable(
        &self,
        query: &FeedQuery,
        cancel: &CancellationToken,
    ) -> Result<Page<FeedItem>> {
        let (query, plan) = self.prepare(query)?;
        let key = query.cache_key();
        let source = Arc::clone(&self.source);

        self.coordinator
            .get_or_compute_cancellable(&key, self.base_ttl_secs, cancel, move || {
                fetch_page(source, query, plan)
            })
            .await
    }

    /// Validates the query, caps its limit and plans it. A cursor that does
    /// not decode, or that was issued for another feed kind's sort, is
    /// rejected before anything touches the cache.
    fn prepare(&self, query: &FeedQuery) -> Result<(FeedQuery, KeysetPlan)> {
        if query.user_id == 0 {
            return Err(FeedError::InvalidRequest(
                "userid must be a positive integer".to_string(),
            ));
        }
        if query.limit == 0 {
            return Err(FeedError::InvalidRequest(
                "limit must be at least 1".to_string(),
            ));
        }

        let query = FeedQuery {
            limit: query.limit.min(self.max_limit),
            ..query.clone()
        };

        let cursor = query.cursor.as_deref().map(Cursor::decode).transpose()?;
        let spec = query.kind.sort_spec();
        let plan = KeysetPlan::new(&spec, cursor.as_ref(), query.limit).map_err(|err| match err {
            PaginationError::ArityMismatch { .. } => FeedError::InvalidCursor(err.to_string()),
            other => other.into(),
        })?;

        Ok((query, plan))
    }
}

async fn fetch_page(
    source: Arc<dyn PageSource>,
    query: FeedQuery,
    plan: KeysetPlan,
) -> Result<Page<FeedItem>> {
    let rows = source
        .query(query.user_id, query.kind, &query.filters, &plan)
        .await?;
    let page = plan.paginate(rows)?;
    debug!(
        user_id = query.user_id,
        kind = %query.kind,
        items = page.items.len(),
        terminal = page.is_terminal(),
        "Feed page computed"
    );
    Ok(page)
}
