//! Feed Cache - a read-through cache for paged, ranked feeds
//!
//! Cache-aside coordination with stampede protection in front of a keyset
//! (cursor-based) paginated feed source.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod models;
pub mod pagination;
pub mod tasks;

pub use api::AppState;
pub use config::Config;
pub use tasks::spawn_cleanup_task;
