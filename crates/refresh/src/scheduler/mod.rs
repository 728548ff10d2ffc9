//! Bucketed, deduplicated background refresh of cached prices.

mod buckets;

pub use buckets::PriceRefreshSchedule;

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use log::{debug, error, info};
use ritual_cache::{now_millis, CacheManager};
use ritual_card_data::PriceData;
use tokio::sync::Notify;

use crate::cadence::PRICE_REFRESH_STAGGER;
use crate::errors::{RefreshError, Result};
use crate::helpers::initial_price_refresh_at;
use crate::read_through::{PriceRefresher, RefreshReason};
use crate::single_flight::SingleFlight;

use buckets::ScheduleState;

type RefreshOutcome = std::result::Result<PriceData, Arc<RefreshError>>;

struct SchedulerInner {
    interval_ms: i64,
    stagger: Duration,
    cache: Arc<dyn CacheManager<PriceData>>,
    refresher: Arc<dyn PriceRefresher>,
    state: Mutex<ScheduleState>,
    wake: Arc<Notify>,
    in_flight: SingleFlight<String, RefreshOutcome>,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        // Let the timer loop observe that the scheduler is gone.
        self.wake.notify_one();
    }
}

/// Refreshes cached prices one interval after their last update.
///
/// Keys whose refresh times fall in the same `interval_ms` window share a
/// bucket with a single timer at the earliest of their times. When a bucket
/// fires, its due keys are refreshed one after another, `stagger` apart, and
/// each is rescheduled one interval out whether or not its refresh succeeded.
/// Concurrent refreshes of the same key collapse into one upstream call.
///
/// Cloning yields another handle to the same scheduler. Background timers stop
/// once every handle is dropped.
#[derive(Clone)]
pub struct PriceRefreshScheduler {
    inner: Arc<SchedulerInner>,
}

impl PriceRefreshScheduler {
    /// Must be called from within a Tokio runtime.
    pub fn new(
        interval_ms: i64,
        cache: Arc<dyn CacheManager<PriceData>>,
        refresher: Arc<dyn PriceRefresher>,
    ) -> Self {
        Self::with_stagger(interval_ms, PRICE_REFRESH_STAGGER, cache, refresher)
    }

    pub fn with_stagger(
        interval_ms: i64,
        stagger: Duration,
        cache: Arc<dyn CacheManager<PriceData>>,
        refresher: Arc<dyn PriceRefresher>,
    ) -> Self {
        let interval_ms = interval_ms.max(1);
        let wake = Arc::new(Notify::new());
        let inner = Arc::new(SchedulerInner {
            interval_ms,
            stagger,
            cache,
            refresher,
            state: Mutex::new(ScheduleState::new(interval_ms)),
            wake: wake.clone(),
            in_flight: SingleFlight::new(),
        });

        tokio::spawn(run_timer_loop(Arc::downgrade(&inner), wake));
        Self { inner }
    }

    pub fn interval_ms(&self) -> i64 {
        self.inner.interval_ms
    }

    pub fn stagger(&self) -> Duration {
        self.inner.stagger
    }

    fn lock_state(&self) -> MutexGuard<'_, ScheduleState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ScheduleState) -> R) -> R {
        let result = f(&mut self.lock_state());
        self.inner.wake.notify_one();
        result
    }

    /// Build the schedule from every key in the price cache.
    ///
    /// Keys stale by more than one interval are queued from now, `stagger`
    /// apart in key order; the rest refresh one interval after their last
    /// update. Keys without a timestamp are left unscheduled.
    pub async fn initialize_from_cache(&self) -> Result<()> {
        let keys = self.inner.cache.keys().await?;
        let now = now_millis();
        let stagger_ms = i64::try_from(self.inner.stagger.as_millis()).unwrap_or(i64::MAX);

        let mut stale_index = 0;
        for key in &keys {
            let Some(last_updated_at) = self.inner.cache.get_timestamp(key).await? else {
                self.unschedule_key(key);
                continue;
            };

            let refresh_at = initial_price_refresh_at(
                self.inner.interval_ms,
                last_updated_at,
                now,
                stale_index,
                stagger_ms,
            );
            if now - last_updated_at > self.inner.interval_ms {
                stale_index += 1;
            }
            self.schedule_at(key, refresh_at);
        }

        info!(
            "Scheduled {} cached price keys for refresh ({} stale)",
            self.scheduled_count(),
            stale_index
        );
        Ok(())
    }

    /// Schedule `key` at `refresh_at`, replacing any existing schedule.
    pub fn schedule_at(&self, key: &str, refresh_at: i64) {
        self.with_state(|state| state.schedule_at(key, refresh_at));
    }

    /// Schedule `key` one interval from now.
    pub fn schedule_from_now(&self, key: &str) {
        self.schedule_at(key, now_millis() + self.inner.interval_ms);
    }

    /// Schedule `key` one interval after its cache timestamp, or unschedule it
    /// when the cache has no timestamp.
    pub async fn schedule_from_timestamp(&self, key: &str) -> Result<()> {
        match self.inner.cache.get_timestamp(key).await? {
            Some(last_updated_at) => self.schedule_at(key, last_updated_at + self.inner.interval_ms),
            None => self.unschedule_key(key),
        }
        Ok(())
    }

    /// [`schedule_from_timestamp`](Self::schedule_from_timestamp) unless `key`
    /// is already scheduled.
    pub async fn ensure_scheduled_from_timestamp(&self, key: &str) -> Result<()> {
        if self.get_scheduled_refresh_at(key).is_some() {
            return Ok(());
        }
        self.schedule_from_timestamp(key).await
    }

    pub fn unschedule_key(&self, key: &str) {
        self.with_state(|state| state.unschedule(key));
    }

    /// Drop every schedule and bucket timer.
    pub fn clear_all(&self) {
        self.with_state(|state| state.clear());
        debug!("Cleared all scheduled price refreshes");
    }

    /// Refresh `key` immediately, ahead of any schedule.
    ///
    /// On success the key is rescheduled one interval out. On failure it
    /// stays unscheduled and the error is returned.
    pub async fn force_refresh_now(&self, key: &str) -> Result<PriceData> {
        self.unschedule_key(key);
        let value = self
            .run_refresh_with_dedup(key, RefreshReason::ManualOverride)
            .await?;
        self.schedule_from_now(key);
        Ok(value)
    }

    /// Run the refresher for `key`, joining a refresh already in flight.
    pub async fn run_refresh_with_dedup(
        &self,
        key: &str,
        reason: RefreshReason,
    ) -> Result<PriceData> {
        let refresher = Arc::clone(&self.inner.refresher);
        let owned_key = key.to_string();
        let outcome = self
            .inner
            .in_flight
            .run(key.to_string(), move || async move {
                refresher.refresh(&owned_key, reason).await.map_err(Arc::new)
            })
            .await?;
        outcome.map_err(RefreshError::Shared)
    }

    pub fn get_scheduled_refresh_at(&self, key: &str) -> Option<i64> {
        self.lock_state()
            .schedule_of(key)
            .map(|schedule| schedule.refresh_at)
    }

    pub fn get_schedule(&self, key: &str) -> Option<PriceRefreshSchedule> {
        self.lock_state().schedule_of(key).cloned()
    }

    /// Fire time of the bucket's armed timer.
    pub fn bucket_fire_at(&self, bucket_id: &str) -> Option<i64> {
        self.lock_state().bucket_timer(bucket_id)
    }

    /// Members of a bucket in name order.
    pub fn bucket_keys(&self, bucket_id: &str) -> Vec<String> {
        self.lock_state().bucket_keys(bucket_id)
    }

    pub fn bucket_count(&self) -> usize {
        self.lock_state().bucket_count()
    }

    pub fn scheduled_count(&self) -> usize {
        self.lock_state().scheduled_count()
    }

    pub fn is_refreshing(&self, key: &str) -> bool {
        self.inner.in_flight.is_in_flight(&key.to_string())
    }

    /// Run a fired bucket on its own task so a panic inside it cannot take
    /// the timer loop down; the bucket is rearmed if that happens.
    async fn run_bucket(self, bucket_id: String) {
        let scheduler = self.clone();
        let id = bucket_id.clone();
        let run = tokio::spawn(async move { scheduler.refresh_due_keys(&id).await });

        if let Err(e) = run.await {
            error!("Price refresh bucket {} failed: {}", bucket_id, e);
            self.with_state(|state| state.rearm(&bucket_id));
        }
    }

    async fn refresh_due_keys(&self, bucket_id: &str) {
        let due = self.with_state(|state| state.take_due_keys(bucket_id, now_millis()));
        debug!("Refreshing {} due price keys in bucket {}", due.len(), bucket_id);

        for (index, key) in due.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.inner.stagger).await;
            }
            if let Err(e) = self
                .run_refresh_with_dedup(key, RefreshReason::Scheduled)
                .await
            {
                error!("Scheduled price refresh failed for '{}': {}", key, e);
            }
            self.schedule_from_now(key);
        }

        self.with_state(|state| state.finish_bucket(bucket_id));
    }
}

async fn run_timer_loop(inner: Weak<SchedulerInner>, wake: Arc<Notify>) {
    loop {
        let next_fire_at = {
            let Some(inner) = inner.upgrade() else {
                debug!("Price refresh scheduler dropped; stopping timers");
                return;
            };
            let scheduler = PriceRefreshScheduler { inner };

            let (due, next_fire_at) = {
                let mut state = scheduler.lock_state();
                let due = state.pop_due(now_millis());
                (due, state.next_fire_at())
            };
            for bucket_id in due {
                tokio::spawn(scheduler.clone().run_bucket(bucket_id));
            }
            next_fire_at
        };

        match next_fire_at {
            Some(fire_at) => {
                let delay = Duration::from_millis((fire_at - now_millis()).max(0).unsigned_abs());
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wake.notified() => {}
                }
            }
            None => wake.notified().await,
        }
    }
}
