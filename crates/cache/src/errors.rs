//! Error types for cache operations.

use thiserror::Error;

use crate::models::CacheSection;

/// Type alias for Result using [`CacheError`].
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid cache section: {0}")]
    InvalidSection(String),

    /// The configured cache server address cannot be turned into a base URL.
    #[error("{0}")]
    InvalidAddress(String),

    #[error("Cache server request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The cache server answered with a non-success status.
    #[error("Cache server request failed ({status}) {method} {url}{}", format_body(.body))]
    Remote {
        status: u16,
        method: String,
        url: String,
        body: String,
    },

    /// The cache server reported an error event on a price stream.
    #[error("Cache server stream error: {0}")]
    Stream(String),

    #[error("streamGetMany is only supported for the prices cache, not {0}")]
    UnsupportedStream(CacheSection),
}

fn format_body(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {}", body)
    }
}
