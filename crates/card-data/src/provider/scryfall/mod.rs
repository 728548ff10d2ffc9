//! Scryfall card data provider implementation.
//!
//! Endpoints used:
//! - `GET /cards/named?exact=` for single card lookups
//! - `POST /cards/collection` for batched latest prices (75 names per request)
//! - `GET /cards/search` with `unique:prints` ordered by USD for min/max prices
//! - `GET /bulk-data` plus the `default_cards` download for full preloads
//!
//! Scryfall asks for roughly ten requests per second; every request goes
//! through the provider's [`RateLimiter`].
//! API documentation: https://scryfall.com/docs/api

mod models;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::errors::{CardDataError, Result};
use crate::models::{Card, PriceRange};
use crate::provider::CardDataProvider;
use crate::rate_limiter::{RateLimitConfig, RateLimiter};

use models::{BulkDataItem, CollectionRequest, CollectionResponse, ListResponse, NameIdentifier};

pub const DEFAULT_BASE_URL: &str = "https://api.scryfall.com";
const PROVIDER_ID: &str = "SCRYFALL";

/// Maximum identifiers accepted by one `/cards/collection` request.
const COLLECTION_BATCH_SIZE: usize = 75;

/// Bulk data type holding every English printing.
const DEFAULT_CARDS_BULK_TYPE: &str = "default_cards";

const MULTI_FACE_SEPARATOR: &str = " // ";

/// Scryfall card data provider.
pub struct ScryfallProvider {
    client: Client,
    base_url: String,
    rate_limiter: RateLimiter,
}

impl ScryfallProvider {
    /// Create a provider against the public Scryfall API.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a provider against a different base URL (mirrors, tests).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self::with_config(base_url, RateLimitConfig::default())
    }

    pub fn with_config(base_url: impl Into<String>, rate_limit: RateLimitConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(agent) = HeaderValue::from_str(&user_agent()) {
            headers.insert(USER_AGENT, agent);
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: RateLimiter::new(rate_limit),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request once the rate limiter allows it.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.rate_limiter.acquire().await;
        Ok(request.send().await?)
    }

    /// Turn non-success statuses into provider errors.
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CardDataError::RateLimited {
                provider: PROVIDER_ID.to_string(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CardDataError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP {} - {}", status, body),
            });
        }

        Ok(response)
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| CardDataError::InvalidResponse {
            provider: PROVIDER_ID.to_string(),
            message: format!("Failed to parse {} response: {}", what, e),
        })
    }

    async fn fetch_latest_batch(&self, batch: &[String]) -> Result<HashMap<String, f64>> {
        let body = CollectionRequest {
            identifiers: batch
                .iter()
                .map(|name| NameIdentifier {
                    name: front_face_name(name).to_string(),
                })
                .collect(),
        };

        let request = self.client.post(self.url("/cards/collection")).json(&body);
        let response = Self::check_status(self.send(request).await?).await?;
        let collection: CollectionResponse = Self::parse_json(response, "collection").await?;

        let missing = collection.missing_names();
        if !missing.is_empty() {
            return Err(CardDataError::MissingPrices(missing));
        }

        Ok(batch
            .iter()
            .zip(collection.data.iter())
            .filter_map(|(name, card)| card.usd().map(|price| (name.clone(), price)))
            .collect())
    }

    async fn try_fetch_min_max(&self, name: &str) -> Result<PriceRange> {
        let query = format!("!\"{}\" unique:prints", name);
        let request = self
            .client
            .get(self.url("/cards/search"))
            .query(&[("q", query.as_str()), ("order", "usd"), ("dir", "asc")]);

        let response = Self::check_status(self.send(request).await?).await?;
        let list: ListResponse<Card> = Self::parse_json(response, "search").await?;
        Ok(price_range(&list.data))
    }
}

impl Default for ScryfallProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CardDataProvider for ScryfallProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn fetch_card_by_name(&self, name: &str) -> Result<Option<Card>> {
        let query_name = front_face_name(name);
        if query_name.is_empty() {
            return Ok(None);
        }

        debug!("Scryfall card lookup: {}", query_name);
        let request = self
            .client
            .get(self.url("/cards/named"))
            .query(&[("exact", query_name)]);
        let response = self.send(request).await?;

        if response.status() == StatusCode::NOT_FOUND {
            warn!("Failed to fetch card '{}': {}", name, response.status());
            return Ok(None);
        }

        let response = Self::check_status(response).await?;
        let card: Card = Self::parse_json(response, "named card").await?;
        Ok(Some(card))
    }

    async fn fetch_latest_prices(&self, names: &[String]) -> Result<HashMap<String, f64>> {
        let mut results = HashMap::with_capacity(names.len());
        for batch in names.chunks(COLLECTION_BATCH_SIZE) {
            results.extend(self.fetch_latest_batch(batch).await?);
        }
        Ok(results)
    }

    async fn fetch_min_max_price(&self, name: &str) -> Result<PriceRange> {
        match self.try_fetch_min_max(name).await {
            Ok(range) => Ok(range),
            Err(e) => {
                debug!("Min/max lookup for '{}' failed, using zero range: {}", name, e);
                Ok(PriceRange::default())
            }
        }
    }

    async fn fetch_all_cards(&self) -> Result<HashMap<String, Vec<Card>>> {
        info!("Fetching bulk data metadata from Scryfall...");
        let request = self.client.get(self.url("/bulk-data"));
        let response = Self::check_status(self.send(request).await?).await?;
        let bulk: ListResponse<BulkDataItem> = Self::parse_json(response, "bulk-data").await?;

        let item = bulk
            .data
            .into_iter()
            .find(|item| item.kind == DEFAULT_CARDS_BULK_TYPE)
            .ok_or_else(|| CardDataError::InvalidResponse {
                provider: PROVIDER_ID.to_string(),
                message: "Could not find default_cards bulk data URI".to_string(),
            })?;
        let download_uri = item
            .download_uri
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| CardDataError::InvalidResponse {
                provider: PROVIDER_ID.to_string(),
                message: "default_cards bulk data has no download URI".to_string(),
            })?;

        info!(
            "Downloading {} ({:.2} MiB)",
            download_uri,
            item.size as f64 / 1024.0 / 1024.0
        );
        let request = self.client.get(&download_uri);
        let response = Self::check_status(self.send(request).await?).await?;
        let cards: Vec<Card> = Self::parse_json(response, "bulk cards").await?;

        info!("Processing {} cards...", cards.len());
        Ok(group_by_name(cards))
    }
}

fn user_agent() -> String {
    format!("Ritual CLI/{}", env!("CARGO_PKG_VERSION"))
}

/// Name to query for a possibly multi-faced card: the front face only.
pub(crate) fn front_face_name(name: &str) -> &str {
    match name.split_once(MULTI_FACE_SEPARATOR) {
        Some((front, _)) => front.trim(),
        None => name.trim(),
    }
}

/// Min/max USD price across printings; printings without a price are skipped.
pub(crate) fn price_range(cards: &[Card]) -> PriceRange {
    let mut prices = cards.iter().filter_map(Card::usd);
    let Some(first) = prices.next() else {
        return PriceRange::default();
    };

    prices.fold(PriceRange { min: first, max: first }, |range, price| PriceRange {
        min: range.min.min(price),
        max: range.max.max(price),
    })
}

/// Group printings by card name, preserving upstream order within a name.
pub(crate) fn group_by_name(cards: Vec<Card>) -> HashMap<String, Vec<Card>> {
    let mut grouped: HashMap<String, Vec<Card>> = HashMap::new();
    for card in cards {
        grouped.entry(card.name.clone()).or_default().push(card);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str, name: &str, usd: Option<&str>) -> Card {
        let mut card: Card =
            serde_json::from_value(serde_json::json!({ "id": id, "name": name })).unwrap();
        card.prices.usd = usd.map(str::to_string);
        card
    }

    #[test]
    fn test_provider_id() {
        let provider = ScryfallProvider::new();
        assert_eq!(provider.id(), "SCRYFALL");
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let provider = ScryfallProvider::with_base_url("http://localhost:9999/");
        assert_eq!(provider.url("/bulk-data"), "http://localhost:9999/bulk-data");
    }

    #[test]
    fn test_user_agent_carries_version() {
        assert!(user_agent().starts_with("Ritual CLI/"));
    }

    #[test]
    fn test_front_face_name() {
        assert_eq!(front_face_name("Fire // Ice"), "Fire");
        assert_eq!(front_face_name("  Sol Ring "), "Sol Ring");
        assert_eq!(front_face_name("Who/What"), "Who/What");
    }

    #[test]
    fn test_price_range_skips_unpriced_printings() {
        let cards = vec![
            card("1", "Sol Ring", Some("1.50")),
            card("2", "Sol Ring", None),
            card("3", "Sol Ring", Some("0.99")),
            card("4", "Sol Ring", Some("12.00")),
        ];
        assert_eq!(price_range(&cards), PriceRange { min: 0.99, max: 12.0 });
    }

    #[test]
    fn test_price_range_without_prices_is_zero() {
        let cards = vec![card("1", "Island", None)];
        assert_eq!(price_range(&cards), PriceRange::default());
        assert_eq!(price_range(&[]), PriceRange::default());
    }

    #[test]
    fn test_group_by_name_keeps_every_printing() {
        let grouped = group_by_name(vec![
            card("a", "Island", None),
            card("b", "Forest", None),
            card("c", "Island", None),
        ]);

        assert_eq!(grouped.len(), 2);
        let islands: Vec<&str> = grouped["Island"].iter().map(|c| c.id.as_str()).collect();
        assert_eq!(islands, vec!["a", "c"]);
    }

    #[test]
    fn test_collection_missing_names_are_trimmed() {
        let response: CollectionResponse = serde_json::from_value(serde_json::json!({
            "data": [],
            "not_found": [{ "name": " Nope " }, { "name": "" }, {}]
        }))
        .unwrap();
        assert_eq!(response.missing_names(), vec!["Nope".to_string()]);
    }
}
