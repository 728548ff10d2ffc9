#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use clap::Parser;
use ritual_cache_server::{api::app_router, build_state_with_provider, config::Config, AppState};
use ritual_card_data::{Card, CardDataError, CardDataProvider, PriceRange};
use tower::ServiceExt;

/// Upstream stand-in with fixed prices and cards.
#[derive(Default)]
pub struct MockProvider {
    prices: HashMap<String, (f64, PriceRange)>,
    cards: HashMap<String, Card>,
    latest_calls: AtomicUsize,
}

impl MockProvider {
    pub fn with_price(mut self, name: &str, latest: f64, min: f64, max: f64) -> Self {
        self.prices
            .insert(name.to_string(), (latest, PriceRange { min, max }));
        self
    }

    pub fn with_card(mut self, name: &str) -> Self {
        self.cards.insert(name.to_string(), card(name));
        self
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CardDataProvider for MockProvider {
    fn id(&self) -> &'static str {
        "MOCK"
    }

    async fn fetch_card_by_name(&self, name: &str) -> ritual_card_data::Result<Option<Card>> {
        Ok(self.cards.get(name).cloned())
    }

    async fn fetch_latest_prices(
        &self,
        names: &[String],
    ) -> ritual_card_data::Result<HashMap<String, f64>> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        let missing: Vec<String> = names
            .iter()
            .filter(|name| !self.prices.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(CardDataError::MissingPrices(missing));
        }
        Ok(names
            .iter()
            .filter_map(|name| self.prices.get(name).map(|(latest, _)| (name.clone(), *latest)))
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
            .iter()
            .map(|(name, card)| (name.clone(), vec![card.clone()]))
            .collect())
    }
}

pub fn card(name: &str) -> Card {
    serde_json::from_value(serde_json::json!({
        "id": format!("id-{}", name.to_lowercase().replace(' ', "-")),
        "name": name,
        "type_line": "Artifact",
        "prices": { "usd": "1.00", "usd_foil": null, "usd_etched": null },
    }))
    .unwrap()
}

pub async fn test_state(
    dir: &Path,
    provider: Arc<MockProvider>,
    extra_args: &[&str],
) -> Arc<AppState> {
    let cache_dir = dir.to_string_lossy().to_string();
    let mut args = vec!["cache-server", "--cache-dir", cache_dir.as_str()];
    args.extend_from_slice(extra_args);
    let config = Config::try_parse_from(args).unwrap();
    build_state_with_provider(&config, provider).await.unwrap()
}

pub fn router(state: Arc<AppState>) -> Router {
    app_router(state)
}

pub async fn send(app: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// `(event, data)` pairs from an SSE body, keep-alive comments skipped.
pub fn sse_events(body: &str) -> Vec<(String, serde_json::Value)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event = Some(name.trim().to_string());
                } else if let Some(payload) = line.strip_prefix("data:") {
                    data = serde_json::from_str(payload.trim()).ok();
                }
            }
            Some((event?, data?))
        })
        .collect()
}
