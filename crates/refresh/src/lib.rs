//! Ritual Refresh Crate
//!
//! Keeps the card and price caches filled and fresh.
//!
//! # Overview
//!
//! - [`read_through`] - fill cache misses from upstream, force early price refreshes
//! - [`PriceRefreshScheduler`] - bucketed background price refresh with per-key dedup
//! - [`SingleFlight`] - one in-flight operation per key
//! - [`DeckPricer`] - deck totals from cached and freshly fetched prices
//! - [`RefreshCadence`] - `daily`, `weekly` or `monthly`

pub mod cadence;
pub mod errors;
pub mod helpers;
pub mod pricing;
pub mod read_through;
pub mod scheduler;
pub mod single_flight;

#[cfg(test)]
mod testing;

pub use cadence::{
    parse_port, resolve_refresh_cadence, RefreshCadence, DAY_MS, MONTH_MS, PRICE_REFRESH_STAGGER,
    WEEK_MS,
};
pub use errors::{RefreshError, Result};
pub use helpers::{
    initial_price_refresh_at, is_older_than, log_cache_update, run_staggered_in_completion_order,
    should_force_price_refresh, staggered_in_completion_order,
};
pub use pricing::{DeckCard, DeckCardPrice, DeckPricer, DeckPricing, DECK_PRICING_SPACING};
pub use read_through::{
    refresh_price_entry, resolve_card, resolve_price, should_force_refresh, CachePriceRefresher,
    PriceLookup, PriceRefreshAction, PriceRefresher, RefreshReason,
};
pub use scheduler::{PriceRefreshSchedule, PriceRefreshScheduler};
pub use single_flight::SingleFlight;
