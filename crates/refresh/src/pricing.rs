//! Deck pricing on top of the price cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use ritual_cache::CacheManager;
use ritual_card_data::{CardDataProvider, PriceData};
use serde::Serialize;

use crate::errors::Result;
use crate::helpers::log_cache_update;
use crate::read_through::PriceRefreshAction;

/// Delay between per-card min/max lookups for cache misses.
pub const DECK_PRICING_SPACING: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeckCard {
    pub name: String,
    pub quantity: u32,
}

impl DeckCard {
    pub fn new(name: impl Into<String>, quantity: u32) -> Self {
        Self {
            name: name.into(),
            quantity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckCardPrice {
    pub name: String,
    pub quantity: u32,
    pub price: PriceData,
    /// True when the price was fetched upstream for this deck.
    pub fetched: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckPricing {
    pub total_latest: f64,
    pub total_min: f64,
    pub total_max: f64,
    /// One row per distinct card name, in first-seen order.
    pub breakdown: Vec<DeckCardPrice>,
}

pub struct DeckPricer {
    cache: Arc<dyn CacheManager<PriceData>>,
    provider: Arc<dyn CardDataProvider>,
    spacing: Duration,
}

impl DeckPricer {
    pub fn new(cache: Arc<dyn CacheManager<PriceData>>, provider: Arc<dyn CardDataProvider>) -> Self {
        Self {
            cache,
            provider,
            spacing: DECK_PRICING_SPACING,
        }
    }

    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing;
        self
    }

    /// Price every card in `deck`.
    ///
    /// Cached prices are read in one streamed batch. Remaining names are
    /// fetched upstream, cached, and counted at their fetched price.
    pub async fn price_deck(&self, deck: &[DeckCard]) -> Result<DeckPricing> {
        let mut names: Vec<String> = Vec::new();
        let mut quantities: HashMap<String, u32> = HashMap::new();
        for card in deck {
            let name = card.name.trim();
            if name.is_empty() {
                continue;
            }
            let quantity = quantities.entry(name.to_string()).or_insert_with(|| {
                names.push(name.to_string());
                0
            });
            *quantity += card.quantity;
        }

        let mut prices = self
            .cache
            .stream_get_many(&names, &mut |key, _, meta| {
                debug!("Deck price for '{}' (updated: {})", key, meta.updated);
            })
            .await?;

        let misses: Vec<String> = names
            .iter()
            .filter(|name| !prices.contains_key(*name))
            .cloned()
            .collect();
        let fetched = self.fetch_misses(&misses).await?;
        prices.extend(fetched);

        let mut pricing = DeckPricing::default();
        for name in names {
            let Some(price) = prices.get(&name).copied() else {
                continue;
            };
            let quantity = quantities.get(&name).copied().unwrap_or_default();
            let qty = f64::from(quantity);
            pricing.total_latest += price.latest * qty;
            pricing.total_min += price.min * qty;
            pricing.total_max += price.max * qty;
            pricing.breakdown.push(DeckCardPrice {
                fetched: misses.contains(&name),
                name,
                quantity,
                price,
            });
        }
        Ok(pricing)
    }

    async fn fetch_misses(&self, misses: &[String]) -> Result<HashMap<String, PriceData>> {
        if misses.is_empty() {
            return Ok(HashMap::new());
        }

        // A name upstream cannot find fails the whole batch before anything is cached.
        let latest = self.provider.fetch_latest_prices(misses).await?;

        let mut fetched = HashMap::new();
        for (index, name) in misses.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.spacing).await;
            }
            let range = self.provider.fetch_min_max_price(name).await?;
            let price = PriceData::from_lookup(latest.get(name).copied(), range);

            self.cache.set(name, price).await?;
            log_cache_update(format!(
                "section=prices action={} key='{}'",
                PriceRefreshAction::ReadThroughFill,
                name
            ));
            fetched.insert(name.clone(), price);
        }
        Ok(fetched)
    }
}
