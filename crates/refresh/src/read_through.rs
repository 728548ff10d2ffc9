//! Read-through resolution for the card and price sections.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ritual_cache::{now_millis, CacheManager};
use ritual_card_data::{Card, CardDataProvider, PriceData};

use crate::errors::Result;
use crate::helpers::{log_cache_update, should_force_price_refresh};
use crate::scheduler::PriceRefreshScheduler;

/// Why a price refresh was requested by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshReason {
    /// A bucket timer found the key due.
    Scheduled,
    /// A reader forced the refresh ahead of schedule.
    ManualOverride,
}

impl RefreshReason {
    pub fn action(&self) -> PriceRefreshAction {
        match self {
            RefreshReason::Scheduled => PriceRefreshAction::ScheduledRefresh,
            RefreshReason::ManualOverride => PriceRefreshAction::ManualRefresh,
        }
    }
}

/// How a price entry came to be written, as reported in cache update logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriceRefreshAction {
    ReadThroughFill,
    ScheduledRefresh,
    ManualRefresh,
}

impl PriceRefreshAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceRefreshAction::ReadThroughFill => "read-through-fill",
            PriceRefreshAction::ScheduledRefresh => "scheduled-refresh",
            PriceRefreshAction::ManualRefresh => "manual-refresh",
        }
    }
}

impl fmt::Display for PriceRefreshAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refreshes one price key from upstream. Used by the scheduler.
#[async_trait]
pub trait PriceRefresher: Send + Sync {
    async fn refresh(&self, key: &str, reason: RefreshReason) -> Result<PriceData>;
}

/// [`PriceRefresher`] that fetches from a provider and writes the price cache.
pub struct CachePriceRefresher {
    cache: Arc<dyn CacheManager<PriceData>>,
    provider: Arc<dyn CardDataProvider>,
}

impl CachePriceRefresher {
    pub fn new(cache: Arc<dyn CacheManager<PriceData>>, provider: Arc<dyn CardDataProvider>) -> Self {
        Self { cache, provider }
    }
}

#[async_trait]
impl PriceRefresher for CachePriceRefresher {
    async fn refresh(&self, key: &str, reason: RefreshReason) -> Result<PriceData> {
        refresh_price_entry(
            self.cache.as_ref(),
            self.provider.as_ref(),
            key,
            reason.action(),
        )
        .await
    }
}

/// Result of a price read-through.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceLookup {
    pub value: PriceData,
    /// True when the value was fetched upstream during this lookup.
    pub updated: bool,
}

/// Cached printings for `key`, fetching the card by exact name on a miss.
///
/// A fetched card is cached as `[card]`. The cache is read again afterwards
/// so a concurrent bulk load's richer list wins.
pub async fn resolve_card(
    cache: &dyn CacheManager<Vec<Card>>,
    provider: &dyn CardDataProvider,
    key: &str,
) -> Result<Option<Vec<Card>>> {
    if let Some(cached) = cache.get(key).await? {
        return Ok(Some(cached));
    }

    let Some(card) = provider.fetch_card_by_name(key).await? else {
        return Ok(None);
    };

    cache.set(key, vec![card.clone()]).await?;
    log_cache_update(format!("section=cards action=read-through-fill key='{}'", key));

    Ok(Some(cache.get(key).await?.unwrap_or_else(|| vec![card])))
}

/// Fetch the latest price and min/max range for `key` and cache the result.
///
/// A missing or zero latest price falls back to the range minimum.
pub async fn refresh_price_entry(
    cache: &dyn CacheManager<PriceData>,
    provider: &dyn CardDataProvider,
    key: &str,
    action: PriceRefreshAction,
) -> Result<PriceData> {
    let latest = provider.fetch_latest_prices(&[key.to_string()]).await?;
    let range = provider.fetch_min_max_price(key).await?;
    let value = PriceData::from_lookup(latest.get(key).copied(), range);

    cache.set(key, value).await?;
    log_cache_update(format!("section=prices action={} key='{}'", action, key));
    Ok(value)
}

/// Whether a cached price should be refreshed ahead of its schedule.
///
/// Makes sure the key has a schedule first, derived from its cache timestamp.
pub async fn should_force_refresh(
    cache: &dyn CacheManager<PriceData>,
    scheduler: &PriceRefreshScheduler,
    key: &str,
) -> Result<bool> {
    scheduler.ensure_scheduled_from_timestamp(key).await?;
    let last_updated_at = cache.get_timestamp(key).await?;
    let scheduled_at = scheduler.get_scheduled_refresh_at(key);

    Ok(should_force_price_refresh(
        scheduler.interval_ms(),
        last_updated_at,
        scheduled_at,
        now_millis(),
    ))
}

/// Cached price for `key`, filled from upstream on a miss.
///
/// With a scheduler attached, a hit that is stale by daily standards under a
/// longer cadence is refreshed immediately, and a miss is scheduled one
/// interval out. Upstream failures propagate.
pub async fn resolve_price(
    cache: &dyn CacheManager<PriceData>,
    provider: &dyn CardDataProvider,
    key: &str,
    scheduler: Option<&PriceRefreshScheduler>,
) -> Result<PriceLookup> {
    if let Some(cached) = cache.get(key).await? {
        if let Some(scheduler) = scheduler {
            if should_force_refresh(cache, scheduler, key).await? {
                let value = scheduler.force_refresh_now(key).await?;
                return Ok(PriceLookup {
                    value,
                    updated: true,
                });
            }
        }

        return Ok(PriceLookup {
            value: cached,
            updated: false,
        });
    }

    let value =
        refresh_price_entry(cache, provider, key, PriceRefreshAction::ReadThroughFill).await?;
    if let Some(scheduler) = scheduler {
        scheduler.schedule_from_now(key);
    }

    Ok(PriceLookup {
        value,
        updated: true,
    })
}
