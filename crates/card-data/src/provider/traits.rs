//! Card data provider trait definitions.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{Card, PriceRange};

/// Trait for upstream card data backends.
///
/// The read-through resolver, the refresh scheduler and the server's preload
/// only ever talk to upstream through this trait, so tests can swap in a
/// counting mock.
#[async_trait]
pub trait CardDataProvider: Send + Sync {
    /// Unique identifier for this provider, used in logs and errors.
    fn id(&self) -> &'static str;

    /// Look up a card by its exact name.
    ///
    /// Returns `Ok(None)` when upstream does not know the name. For
    /// multi-faced names (`"Front // Back"`) only the front face is queried.
    async fn fetch_card_by_name(&self, name: &str) -> Result<Option<Card>>;

    /// Fetch the latest USD price for each name.
    ///
    /// Names without a USD price are absent from the result. If upstream
    /// reports any name as not found, the whole call fails.
    async fn fetch_latest_prices(&self, names: &[String]) -> Result<HashMap<String, f64>>;

    /// Cheapest and most expensive USD price across every printing of `name`.
    ///
    /// Lookup failures degrade to a zero range rather than an error.
    async fn fetch_min_max_price(&self, name: &str) -> Result<PriceRange>;

    /// Download every card upstream knows about, grouped by card name.
    async fn fetch_all_cards(&self) -> Result<HashMap<String, Vec<Card>>>;
}
