//! Error types for the feed cache
//!
//! One thiserror enum per layer: store faults, pagination faults, and the
//! service-level error that is mapped onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Faults raised by a cache store.
///
/// These never reach an end caller: the coordinator treats all of them as a
/// reason to bypass the cache and compute directly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Store could not be reached or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Key or value rejected by the store
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

// == Pagination Error Enum ==
/// Cursor codec and keyset planner failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaginationError {
    /// Token is not a cursor this codec produced, or was made for another sort
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Cursor tuple length does not match the sort specification
    #[error("Cursor has {actual} values but the sort has {expected} fields")]
    ArityMismatch { expected: usize, actual: usize },

    /// NaN and infinities have no place in a total order
    #[error("Sort values must be finite")]
    NonFiniteValue,

    /// A row lacks one of the fields it is sorted by
    #[error("Row has no value for sort field '{0}'")]
    MissingSortValue(String),

    /// A page must hold at least one row
    #[error("Page limit must be at least 1")]
    ZeroLimit,
}

// == Cancelled ==
/// Returned when an external cancellation signal interrupts a cache operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Operation cancelled")]
pub struct Cancelled;

// == Feed Error Enum ==
/// Service-level error for feed requests.
#[derive(Error, Debug)]
pub enum FeedError {
    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Client supplied a cursor that does not decode
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Planner rejected the query or a row could not produce a cursor
    #[error("Pagination failed: {0}")]
    Pagination(PaginationError),

    /// Paged query source failed
    #[error("Source error: {0}")]
    Source(String),

    /// Request was cancelled before a value was produced
    #[error("Request cancelled")]
    Cancelled,
}

impl From<PaginationError> for FeedError {
    fn from(err: PaginationError) -> Self {
        match err {
            PaginationError::InvalidCursor(msg) => FeedError::InvalidCursor(msg),
            other => FeedError::Pagination(other),
        }
    }
}

impl From<Cancelled> for FeedError {
    fn from(_: Cancelled) -> Self {
        FeedError::Cancelled
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for FeedError {
    fn into_response(self) -> Response {
        let status = match &self {
            FeedError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            FeedError::InvalidCursor(_) => StatusCode::BAD_REQUEST,
            FeedError::Pagination(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FeedError::Source(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FeedError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        };

        // Source details stay in the logs
        let message = match &self {
            FeedError::Source(_) | FeedError::Pagination(_) => "failed to fetch feed".to_string(),
            other => other.to_string(),
        };

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;
