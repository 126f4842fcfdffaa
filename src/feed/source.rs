//! Paged query sources
//!
//! The [`PageSource`] seam is the only thing the feed service knows about the
//! source of truth. [`MemoryFeedSource`] is an in-process stand-in holding a
//! shared catalog and per-user materialized rows, with optional artificial
//! latency so stampede behavior is observable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::cache::current_timestamp_ms;
use crate::error::FeedError;
use crate::feed::{FeedFilters, FeedItem, FeedKind};
use crate::pagination::KeysetPlan;

pub const REGIONS: [&str; 5] = ["us", "eu", "in", "asia", "latam"];

pub const CATEGORIES: [&str; 6] = [
    "sports",
    "current_affairs",
    "technology",
    "entertainment",
    "top10",
    "general",
];

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const MAX_AGE_DAYS: i64 = 60;
const MAX_POPULARITY: i64 = 10_000;

/// Weight for categories a user expressed no preference for
const DEFAULT_PREF_WEIGHT: f64 = 0.1;

/// Source of truth for feed rows.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Rows for `user_id` matching `filters` and the plan's predicate, in plan
    /// order, at most `plan.fetch_limit()` of them.
    async fn query(
        &self,
        user_id: u64,
        kind: FeedKind,
        filters: &FeedFilters,
        plan: &KeysetPlan,
    ) -> Result<Vec<FeedItem>, FeedError>;
}

/// Ranking score of one item for one user: recency decaying over a week,
/// popularity relative to the catalog maximum, and category preference.
pub fn personalized_score(item: &FeedItem, now_ms: i64, max_popularity: i64, pref_weight: f64) -> f64 {
    let age_days = ((now_ms - item.ts) as f64 / DAY_MS as f64).max(0.0);
    let recency = (-age_days / 7.0).exp();
    let popularity = item.popularity as f64 / max_popularity.max(1) as f64;
    0.5 * recency + 0.35 * popularity + 0.15 * pref_weight
}

// == Memory Feed Source ==
#[derive(Debug, Default)]
pub struct MemoryFeedSource {
    catalog: Vec<FeedItem>,
    per_user: HashMap<u64, Vec<FeedItem>>,
    latency: Duration,
    queries: AtomicU64,
}

impl MemoryFeedSource {
    pub fn new(catalog: Vec<FeedItem>, per_user: HashMap<u64, Vec<FeedItem>>) -> Self {
        Self {
            catalog,
            per_user,
            latency: Duration::ZERO,
            queries: AtomicU64::new(0),
        }
    }

    /// Delays every query by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of queries served so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn catalog_len(&self) -> usize {
        self.catalog.len()
    }

    pub fn user_count(&self) -> usize {
        self.per_user.len()
    }

    /// Deterministic demo data: `items` catalog entries published within the
    /// last 60 days and scored rows for users `1..=users`.
    pub fn seeded(users: u64, items: usize, seed: u64) -> Self {
        Self::seeded_at(users, items, seed, current_timestamp_ms() as i64)
    }

    pub fn seeded_at(users: u64, items: usize, seed: u64, now_ms: i64) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);

        let catalog: Vec<FeedItem> = (0..items)
            .map(|i| {
                let category = CATEGORIES[rng.usize(..CATEGORIES.len())];
                FeedItem {
                    id: Uuid::from_u128(rng.u128(..)).to_string(),
                    title: format!("{} Post {i}", category.to_uppercase()),
                    category: category.to_string(),
                    region: REGIONS[rng.usize(..REGIONS.len())].to_string(),
                    score: 0.0,
                    popularity: rng.i64(0..=MAX_POPULARITY),
                    ts: now_ms - rng.i64(0..=MAX_AGE_DAYS * DAY_MS),
                }
            })
            .collect();

        let max_popularity = catalog.iter().map(|item| item.popularity).max().unwrap_or(1);

        let per_user = (1..=users)
            .map(|user_id| {
                let prefs = random_preferences(&mut rng);
                let rows = catalog
                    .iter()
                    .map(|item| {
                        let weight = prefs
                            .get(item.category.as_str())
                            .copied()
                            .unwrap_or(DEFAULT_PREF_WEIGHT);
                        FeedItem {
                            score: personalized_score(item, now_ms, max_popularity, weight),
                            ..item.clone()
                        }
                    })
                    .collect();
                (user_id, rows)
            })
            .collect();

        Self::new(catalog, per_user)
    }
}

/// Weights over three categories summing to one.
fn random_preferences(rng: &mut fastrand::Rng) -> HashMap<&'static str, f64> {
    let raw = [rng.f64() + 0.05, rng.f64() + 0.05, rng.f64() + 0.05];
    let total: f64 = raw.iter().sum();
    ["sports", "technology", "current_affairs"]
        .into_iter()
        .zip(raw)
        .map(|(category, weight)| (category, weight / total))
        .collect()
}

#[async_trait]
impl PageSource for MemoryFeedSource {
    async fn query(
        &self,
        user_id: u64,
        kind: FeedKind,
        filters: &FeedFilters,
        plan: &KeysetPlan,
    ) -> Result<Vec<FeedItem>, FeedError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let rows: &[FeedItem] = match kind {
            FeedKind::Global => &self.catalog,
            _ => self
                .per_user
                .get(&user_id)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        };

        let candidates: Vec<&FeedItem> = rows.iter().filter(|item| filters.matches(item)).collect();
        let selected = plan.select_from(&candidates)?;

        debug!(
            user_id,
            kind = %kind,
            candidates = candidates.len(),
            returned = selected.len(),
            "Source query served"
        );
        Ok(selected.into_iter().cloned().collect())
    }
}
