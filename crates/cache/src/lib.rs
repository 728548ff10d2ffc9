//! Ritual Cache Crate
//!
//! Persistent card and price cache plus the managers that expose it.
//!
//! # Overview
//!
//! - [`FileCacheStore`] - one JSON document on disk, partitioned by [`CacheSection`]
//! - [`CacheManager`] - section-typed contract every backend implements
//! - [`LocalCacheManager`] - in-process view over a shared store
//! - [`HttpCacheManager`] - client for a remote cache server
//! - [`RuntimeCacheManager`] - chooses local or remote from a [`CacheContext`]

pub mod config;
pub mod errors;
pub mod local;
pub mod manager;
pub mod models;
pub mod remote;
pub mod runtime;
pub mod store;

pub use config::{
    resolve_cache_server_address, to_cache_server_base_url, CacheContext, CACHE_SERVER_ENV,
};
pub use errors::{CacheError, Result};
pub use local::LocalCacheManager;
pub use manager::{stream_from_batch_results, CacheManager, OnStreamEntry};
pub use models::{
    CacheDocument, CacheEntry, CacheSection, SectionMetadata, SectionValue, StreamEntryMeta,
};
pub use remote::HttpCacheManager;
pub use runtime::RuntimeCacheManager;
pub use store::{now_millis, FileCacheStore, CACHE_FILE_NAME, DEFAULT_EXPIRATION_MS};
