//! Ritual Card Data Crate
//!
//! Upstream lookups for card metadata and prices. The cache service treats
//! this crate as its only source of truth for data it does not have yet.
//!
//! # Overview
//!
//! - [`CardDataProvider`] - the backend contract the cache layers call into
//! - [`ScryfallProvider`] - reqwest-based implementation against api.scryfall.com
//! - [`RateLimiter`] - token bucket that spaces out upstream requests
//!
//! # Core Types
//!
//! - [`Card`] - one printing of a card as stored in the card cache
//! - [`PriceData`] - latest/min/max USD price record stored in the price cache
//! - [`PriceRange`] - min/max across all printings of a card name

pub mod errors;
pub mod models;
pub mod provider;
pub mod rate_limiter;

pub use errors::{CardDataError, Result};
pub use models::{Card, CardFace, CardPrices, ImageUris, PriceData, PriceRange};
pub use provider::scryfall::ScryfallProvider;
pub use provider::CardDataProvider;
pub use rate_limiter::{RateLimitConfig, RateLimiter};
