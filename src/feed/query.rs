//! Feed queries: sort variants, filters, and the canonical cache key.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::feed::FeedItem;
use crate::pagination::{SortField, SortSpec};

// == Feed Kind ==
/// Sort variant of a feed. Each kind has one fixed sort ending in `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Per-user rows by score, newest first among equal scores
    #[default]
    Personalized,
    /// Per-user rows by popularity
    Popular,
    /// Per-user rows by recency, score breaking ties
    Hot,
    /// Shared catalog by recency
    Global,
}

impl FeedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedKind::Personalized => "personalized",
            FeedKind::Popular => "popular",
            FeedKind::Hot => "hot",
            FeedKind::Global => "global",
        }
    }

    pub fn sort_spec(self) -> SortSpec {
        let fields = match self {
            FeedKind::Personalized => vec![SortField::desc("score"), SortField::desc("ts")],
            FeedKind::Popular => vec![SortField::desc("popularity"), SortField::desc("ts")],
            FeedKind::Hot => vec![SortField::desc("ts"), SortField::desc("score")],
            FeedKind::Global => vec![SortField::desc("ts")],
        };
        SortSpec::new(fields, SortField::desc("id"))
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedKind {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personalized" => Ok(FeedKind::Personalized),
            "popular" => Ok(FeedKind::Popular),
            "hot" => Ok(FeedKind::Hot),
            "global" => Ok(FeedKind::Global),
            other => Err(FeedError::InvalidRequest(format!("unknown feed kind '{other}'"))),
        }
    }
}

// == Feed Filters ==
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FeedFilters {
    pub region: Option<String>,
    pub category: Option<String>,
}

impl FeedFilters {
    pub fn matches(&self, item: &FeedItem) -> bool {
        self.region.as_deref().map_or(true, |r| item.region == r)
            && self.category.as_deref().map_or(true, |c| item.category == c)
    }
}

// == Feed Query ==
/// Everything that determines the contents of one feed page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub user_id: u64,
    pub kind: FeedKind,
    pub filters: FeedFilters,
    pub limit: usize,
    /// Opaque resume token from the previous page
    pub cursor: Option<String>,
}

impl FeedQuery {
    /// First page of the personalized feed with the default page size.
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            kind: FeedKind::default(),
            filters: FeedFilters::default(),
            limit: 20,
            cursor: None,
        }
    }

    pub fn with_kind(mut self, kind: FeedKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.filters.region = Some(region.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.filters.category = Some(category.into());
        self
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Cache key covering every parameter that changes the page.
    ///
    /// Free-form parts are escaped so `:` always separates components and
    /// `*` always means "absent".
    pub fn cache_key(&self) -> String {
        format!(
            "feed:v1:u={}:k={}:r={}:c={}:l={}:after={}",
            self.user_id,
            self.kind,
            key_part(self.filters.region.as_deref()),
            key_part(self.filters.category.as_deref()),
            self.limit,
            key_part(self.cursor.as_deref()),
        )
    }
}

fn key_part(value: Option<&str>) -> Cow<'_, str> {
    match value {
        None => Cow::Borrowed("*"),
        Some(v) if !v.contains(['%', ':', '*']) => Cow::Borrowed(v),
        Some(v) => Cow::Owned(
            v.replace('%', "%25")
                .replace(':', "%3A")
                .replace('*', "%2A"),
        ),
    }
}
