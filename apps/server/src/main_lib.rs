use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ritual_cache::{now_millis, CacheManager, CacheSection, FileCacheStore, LocalCacheManager};
use ritual_card_data::{Card, CardDataProvider, PriceData, ScryfallProvider};
use ritual_refresh::{
    is_older_than, log_cache_update, CachePriceRefresher, PriceRefreshScheduler, RefreshCadence,
    PRICE_REFRESH_STAGGER, WEEK_MS,
};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

pub struct AppState {
    /// Shared by both section managers.
    pub store: Arc<FileCacheStore>,
    pub cards: Arc<LocalCacheManager<Vec<Card>>>,
    pub prices: Arc<LocalCacheManager<PriceData>>,
    pub provider: Arc<dyn CardDataProvider>,
    /// Present when a prices cadence is configured.
    pub scheduler: Option<PriceRefreshScheduler>,
    pub verbose: bool,
    /// Delay between upstream refreshes queued by one stream request.
    pub stagger: Duration,
}

pub fn init_tracing() {
    let log_format = std::env::var("RITUAL_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    build_state_with_provider(config, Arc::new(ScryfallProvider::new())).await
}

/// Wire caches, scheduler and background card reloads around `provider`.
pub async fn build_state_with_provider(
    config: &Config,
    provider: Arc<dyn CardDataProvider>,
) -> anyhow::Result<Arc<AppState>> {
    tokio::fs::create_dir_all(&config.cache_dir).await?;
    tracing::info!("Cache file in use: {}", config.cache_file().display());

    // With a prices cadence the scheduler decides freshness, not the TTL.
    let mut store = FileCacheStore::new(config.cache_file());
    if config.prices_refresh.is_some() {
        store = store.with_expiration(CacheSection::Prices, 0);
    }
    let store = Arc::new(store);
    let cards = Arc::new(LocalCacheManager::<Vec<Card>>::new(store.clone()));
    let prices = Arc::new(LocalCacheManager::<PriceData>::new(store.clone()));

    preload_if_needed(&cards, provider.as_ref(), config.cards_refresh).await;

    if let Some(cadence) = config.cards_refresh {
        start_card_refresh(cards.clone(), provider.clone(), cadence);
    }

    let scheduler = match config.prices_refresh {
        Some(cadence) => {
            let refresher = Arc::new(CachePriceRefresher::new(prices.clone(), provider.clone()));
            let scheduler =
                PriceRefreshScheduler::new(cadence.as_millis(), prices.clone(), refresher);
            scheduler.initialize_from_cache().await?;
            tracing::info!("Scheduled prices cache refresh enabled: {}", cadence);
            Some(scheduler)
        }
        None => None,
    };

    if config.verbose {
        tracing::info!("Verbose request logging enabled.");
    }

    Ok(Arc::new(AppState {
        store,
        cards,
        prices,
        provider,
        scheduler,
        verbose: config.verbose,
        stagger: PRICE_REFRESH_STAGGER,
    }))
}

/// Download every card and replace the card section with it.
pub async fn preload_cards(
    cards: &LocalCacheManager<Vec<Card>>,
    provider: &dyn CardDataProvider,
) -> anyhow::Result<usize> {
    let all_cards = provider.fetch_all_cards().await?;
    let count = all_cards.len();
    cards.bulk_set(all_cards.into_iter().collect::<BTreeMap<_, _>>()).await?;
    Ok(count)
}

async fn preload_if_needed(
    cards: &LocalCacheManager<Vec<Card>>,
    provider: &dyn CardDataProvider,
    cadence: Option<RefreshCadence>,
) {
    let reason = match card_cache_preload_reason(cards, cadence).await {
        Ok(Some(reason)) => reason,
        Ok(None) => return,
        Err(e) => {
            tracing::error!("Could not inspect card cache: {}", e);
            return;
        }
    };

    tracing::info!("Card cache is {}; running full preload...", reason);
    match preload_cards(cards, provider).await {
        Ok(count) => {
            log_cache_update(format!(
                "section=cards action=startup-preload reason={} count={}",
                reason, count
            ));
        }
        Err(e) => tracing::error!("Card cache preload failed: {}", e),
    }
}

async fn card_cache_preload_reason(
    cards: &LocalCacheManager<Vec<Card>>,
    cadence: Option<RefreshCadence>,
) -> anyhow::Result<Option<&'static str>> {
    if cards.is_empty().await? {
        return Ok(Some("empty"));
    }
    let threshold = cadence.map(|c| c.as_millis()).unwrap_or(WEEK_MS);
    let last_refreshed_at = cards.get_last_refreshed_at().await?;
    if is_older_than(last_refreshed_at, threshold, now_millis()) {
        return Ok(Some("stale"));
    }
    Ok(None)
}

fn start_card_refresh(
    cards: Arc<LocalCacheManager<Vec<Card>>>,
    provider: Arc<dyn CardDataProvider>,
    cadence: RefreshCadence,
) {
    tracing::info!("Scheduled cards cache refresh enabled: {}", cadence);
    tokio::spawn(async move {
        let mut reload = tokio::time::interval(cadence.as_duration());
        // The first tick completes immediately; startup already handled it.
        reload.tick().await;

        loop {
            reload.tick().await;
            match preload_cards(&cards, provider.as_ref()).await {
                Ok(count) => {
                    log_cache_update(format!(
                        "section=cards action=scheduled-preload count={}",
                        count
                    ));
                    tracing::info!("Scheduled cards cache refresh complete.");
                }
                Err(e) => tracing::error!("Scheduled cards cache refresh failed: {}", e),
            }
        }
    });
}
