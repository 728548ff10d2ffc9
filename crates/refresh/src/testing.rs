//! In-memory doubles for the upstream provider and the price refresher.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ritual_card_data::{Card, CardDataError, CardDataProvider, PriceData, PriceRange};

use crate::errors::{RefreshError, Result};
use crate::read_through::{PriceRefresher, RefreshReason};

pub fn card(name: &str) -> Card {
    serde_json::from_value(serde_json::json!({
        "id": format!("id-{}", name.to_lowercase()),
        "name": name,
        "type_line": "Artifact",
        "prices": { "usd": "1.00", "usd_foil": null, "usd_etched": null },
    }))
    .unwrap()
}

/// Provider answering from fixed tables and counting upstream calls.
///
/// Asking for the latest price of a name it has no entry for fails the
/// whole call, as upstream does for not-found names.
#[derive(Default)]
pub struct MockProvider {
    prices: HashMap<String, (Option<f64>, PriceRange)>,
    cards: HashMap<String, Card>,
    delay: Duration,
    latest_calls: AtomicUsize,
    card_calls: AtomicUsize,
}

impl MockProvider {
    pub fn with_price(mut self, name: &str, latest: Option<f64>, min: f64, max: f64) -> Self {
        self.prices
            .insert(name.to_string(), (latest, PriceRange { min, max }));
        self
    }

    pub fn with_card(mut self, card: Card) -> Self {
        self.cards.insert(card.name.clone(), card);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    pub fn card_calls(&self) -> usize {
        self.card_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CardDataProvider for MockProvider {
    fn id(&self) -> &'static str {
        "MOCK"
    }

    async fn fetch_card_by_name(&self, name: &str) -> ritual_card_data::Result<Option<Card>> {
        self.card_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.cards.get(name).cloned())
    }

    async fn fetch_latest_prices(
        &self,
        names: &[String],
    ) -> ritual_card_data::Result<HashMap<String, f64>> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let missing: Vec<String> = names
            .iter()
            .filter(|name| !self.prices.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(CardDataError::MissingPrices(missing));
        }

        Ok(names
            .iter()
            .filter_map(|name| {
                let (latest, _) = self.prices.get(name)?;
                latest.map(|latest| (name.clone(), latest))
            })
            .collect())
    }

    async fn fetch_min_max_price(&self, name: &str) -> ritual_card_data::Result<PriceRange> {
        Ok(self
            .prices
            .get(name)
            .map(|(_, range)| *range)
            .unwrap_or_default())
    }

    async fn fetch_all_cards(&self) -> ritual_card_data::Result<HashMap<String, Vec<Card>>> {
        Ok(self
            .cards
            .values()
            .map(|card| (card.name.clone(), vec![card.clone()]))
            .collect())
    }
}

/// Refresher that records each call and fails for chosen keys.
#[derive(Default)]
pub struct MockRefresher {
    calls: Mutex<HashMap<String, usize>>,
    call_times: Mutex<Vec<Instant>>,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
}

impl MockRefresher {
    pub fn fail_key(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self, key: &str) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl PriceRefresher for MockRefresher {
    async fn refresh(&self, key: &str, _reason: RefreshReason) -> Result<PriceData> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        self.call_times.lock().unwrap().push(Instant::now());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().unwrap().contains(key) {
            return Err(RefreshError::CardData(CardDataError::MissingPrices(vec![
                key.to_string(),
            ])));
        }
        Ok(PriceData {
            latest: count as f64,
            min: 0.5,
            max: 10.0,
        })
    }
}
