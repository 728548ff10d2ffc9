//! Upstream card data providers.
//!
//! This module contains:
//! - The `CardDataProvider` trait the cache layers depend on
//! - The Scryfall implementation used in production

mod traits;

pub mod scryfall;

pub use traits::CardDataProvider;
