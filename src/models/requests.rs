//! Request DTOs for the feed API
//!
//! Query-string parameters are taken as raw strings so malformed values are
//! reported through the same JSON error body as every other failure.

use serde::Deserialize;

use crate::error::FeedError;
use crate::feed::{FeedKind, FeedQuery};

/// Query parameters of `GET /v1/feed`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedParams {
    /// Requesting user; required and positive
    pub userid: Option<String>,
    /// Sort variant; `segment` is accepted as an alias
    #[serde(default, alias = "segment")]
    pub kind: Option<String>,
    pub region: Option<String>,
    pub category: Option<String>,
    /// Page size; missing, zero or unparsable values use the default
    pub limit: Option<String>,
    /// Resume token from the previous page
    pub cursor: Option<String>,
}

impl FeedParams {
    /// Converts the parameters into a feed query.
    pub fn into_query(self, default_limit: usize) -> Result<FeedQuery, FeedError> {
        let user_id = self
            .userid
            .as_deref()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| FeedError::InvalidRequest("userid is required".to_string()))?;

        let kind = match non_empty(self.kind) {
            Some(raw) => raw.parse::<FeedKind>()?,
            None => FeedKind::default(),
        };

        let limit = self
            .limit
            .as_deref()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(default_limit);

        let mut query = FeedQuery::new(user_id)
            .with_kind(kind)
            .with_limit(limit)
            .with_cursor(non_empty(self.cursor));
        query.filters.region = non_empty(self.region);
        query.filters.category = non_empty(self.category);
        Ok(query)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
