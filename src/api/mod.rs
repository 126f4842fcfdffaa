//! API Module
//!
//! HTTP handlers and routing for the feed server REST API.
//!
//! # Endpoints
//! - `GET /v1/feed` - Paged feed for a user
//! - `GET /stats` - Coordinator statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
