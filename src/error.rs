use thiserror::Error;

use crate::models::Category;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The requested transition is not legal from the item's current state
    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No pending items left")]
    NoPendingItems,

    #[error("Not enough completed {category} items for a review session (need {needed}, have {available})")]
    InsufficientPool {
        category: Category,
        needed: usize,
        available: usize,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Expected outcomes a caller should present as ordinary states, as opposed
    /// to storage or environment failures.
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            Error::NotEligible(_)
                | Error::NotFound(_)
                | Error::NoPendingItems
                | Error::InsufficientPool { .. }
        )
    }

    /// "All caught up" style conditions that aren't really failures at all.
    pub fn is_empty_pool(&self) -> bool {
        matches!(self, Error::NoPendingItems | Error::InsufficientPool { .. })
    }
}
