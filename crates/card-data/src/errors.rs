//! Error types for upstream card data operations.

use thiserror::Error;

/// Type alias for Result using [`CardDataError`].
pub type Result<T> = std::result::Result<T, CardDataError>;

/// Errors that can occur while talking to the upstream card API.
#[derive(Error, Debug)]
pub enum CardDataError {
    /// A batch price lookup reported names it could not resolve.
    ///
    /// The whole batch fails, even when other names in it resolved.
    #[error("Scryfall could not find prices for: {}", .0.join(", "))]
    MissingPrices(Vec<String>),

    /// The provider rate limited the request (HTTP 429).
    #[error("Rate limited: {provider}")]
    RateLimited {
        /// The provider that rate limited the request
        provider: String,
    },

    /// The provider answered with a non-success status.
    #[error("Provider error: {provider} - {message}")]
    ProviderError {
        /// The provider that returned the error
        provider: String,
        /// Status line or error details returned by the provider
        message: String,
    },

    /// The provider response did not have the expected shape.
    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse {
        /// The provider that returned the payload
        provider: String,
        /// What was wrong with it
        message: String,
    },

    /// A network error occurred while communicating with the provider.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}
