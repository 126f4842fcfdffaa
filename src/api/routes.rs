//! API Routes
//!
//! Configures the Axum router with all feed server endpoints.

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{feed_handler, health_handler, stats_handler, AppState};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /v1/feed` - One page of a user's feed
/// - `GET /stats` - Coordinator counters
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/feed", get(feed_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        let config = Config {
            seed_users: 1,
            seed_items: 30,
            ..Config::default()
        };
        create_router(AppState::from_config(&config))
    }

    async fn status_of(uri: &str) -> StatusCode {
        create_test_app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        assert_eq!(status_of("/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        assert_eq!(status_of("/stats").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_feed_endpoint() {
        assert_eq!(status_of("/v1/feed?userid=1&limit=3").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_feed_without_user_is_bad_request() {
        assert_eq!(status_of("/v1/feed").await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_route_not_found() {
        assert_eq!(status_of("/get/anything").await, StatusCode::NOT_FOUND);
    }
}
