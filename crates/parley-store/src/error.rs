//! Store error types.

use parley_core::error::ValidationError;
use thiserror::Error;

/// Errors raised by a [`MessageStore`](crate::MessageStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database failed or could not be reached.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store is not accepting requests.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A value violated a domain invariant.
    #[error("Invalid data: {0}")]
    Invalid(#[from] ValidationError),

    /// A referenced row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A stored row could not be mapped back to a domain value.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether the failure came from the backend rather than the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Unavailable(_))
    }
}
