//! Pagination Module
//!
//! Keyset (cursor-based) pagination: sort specifications, the planner that
//! turns a sort and a resume point into a bounded query, and the opaque
//! cursor codec.

mod cursor;
mod keyset;


use serde::{Deserialize, Serialize};

pub use cursor::Cursor;
pub use keyset::{
    Comparison, Direction, KeysetPlan, KeysetPredicate, SortField, SortKeyed, SortSpec, SortValue,
};

// == Page ==
/// One page of results. An absent `next_cursor` means there is nothing after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// True when no further rows exist under the same filters.
    pub fn is_terminal(&self) -> bool {
        self.next_cursor.is_none()
    }
}
