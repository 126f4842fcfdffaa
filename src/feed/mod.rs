//! Feed Module
//!
//! Feed items, feed kinds and filters, the paged source seam, and the
//! service that caches feed pages.

mod model;
mod query;
mod service;
mod source;

pub use model::FeedItem;
pub use query::{FeedFilters, FeedKind, FeedQuery};
pub use service::FeedService;
pub use source::{personalized_score, MemoryFeedSource, PageSource, CATEGORIES, REGIONS};
