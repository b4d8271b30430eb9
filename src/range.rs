//! Exclusive `(after, before)` bounds with an optional row limit

use serde::{Deserialize, Serialize};

/// Range used by paginated and historical reads.
///
/// Both bounds are optional; an absent bound is unbounded on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range<T> {
    pub after: Option<T>,
    pub before: Option<T>,
    pub limit: Option<usize>,
}

impl<T> Default for Range<T> {
    fn default() -> Self {
        Self {
            after: None,
            before: None,
            limit: None,
        }
    }
}

impl<T> Range<T> {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn between(after: T, before: T) -> Self {
        Self {
            after: Some(after),
            before: Some(before),
            limit: None,
        }
    }

    pub fn first(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn first_after(limit: usize, after: T) -> Self {
        Self {
            after: Some(after),
            before: None,
            limit: Some(limit),
        }
    }

    pub fn last_before(limit: usize, before: T) -> Self {
        Self {
            after: None,
            before: Some(before),
            limit: Some(limit),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
