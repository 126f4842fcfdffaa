//! Feed item model.

use serde::{Deserialize, Serialize};

use crate::pagination::{SortKeyed, SortValue};

/// One ranked feed row as served to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    pub category: String,
    pub region: String,
    /// Per-user ranking score; meaningful only for materialized user rows
    pub score: f64,
    pub popularity: i64,
    /// Publication time, unix milliseconds
    pub ts: i64,
}

impl SortKeyed for FeedItem {
    fn sort_value(&self, field: &str) -> Option<SortValue> {
        match field {
            "id" => Some(SortValue::Text(self.id.clone())),
            "score" => Some(SortValue::Float(self.score)),
            "popularity" => Some(SortValue::Int(self.popularity)),
            "ts" => Some(SortValue::Int(self.ts)),
            _ => None,
        }
    }
}
