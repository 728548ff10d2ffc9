//! Error types for refresh and read-through operations.

use std::sync::Arc;

use ritual_cache::CacheError;
use ritual_card_data::CardDataError;
use thiserror::Error;

/// Type alias for Result using [`RefreshError`].
pub type Result<T> = std::result::Result<T, RefreshError>;

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    CardData(#[from] CardDataError),

    #[error("Refresh interval must be one of: 'daily', 'weekly', 'monthly'.")]
    InvalidCadence(String),

    #[error("Port must be an integer between 1 and 65535.")]
    InvalidPort(String),

    /// A deduplicated refresh failed; every waiter shares the same error.
    #[error(transparent)]
    Shared(Arc<RefreshError>),

    /// The task running a deduplicated refresh did not finish.
    #[error("Refresh task aborted: {0}")]
    Aborted(String),
}
