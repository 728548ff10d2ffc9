//! Staleness rules and staggered task execution.

use std::future::Future;
use std::time::Duration;

use futures::stream::{FuturesUnordered, Stream, StreamExt};
use log::info;

use crate::cadence::DAY_MS;

/// True when `timestamp` is missing or more than `max_age_ms` before `now`.
pub fn is_older_than(timestamp: Option<i64>, max_age_ms: i64, now: i64) -> bool {
    match timestamp {
        None => true,
        Some(timestamp) => now - timestamp > max_age_ms,
    }
}

/// Whether a cached price should jump the queue ahead of its schedule.
///
/// Only weekly and monthly cadences qualify, only once the entry is more than
/// a day old, and only while its scheduled refresh is still in the future.
pub fn should_force_price_refresh(
    cadence_ms: i64,
    last_updated_at: Option<i64>,
    scheduled_at: Option<i64>,
    now: i64,
) -> bool {
    if cadence_ms <= DAY_MS {
        return false;
    }
    let (Some(last_updated_at), Some(scheduled_at)) = (last_updated_at, scheduled_at) else {
        return false;
    };
    if now - last_updated_at <= DAY_MS {
        return false;
    }
    now < scheduled_at
}

/// First refresh time for a key found in the cache at startup.
///
/// Stale keys are queued `stale_index * stagger_ms` after `now`; fresh keys
/// refresh one cadence after their last update.
pub fn initial_price_refresh_at(
    cadence_ms: i64,
    last_updated_at: i64,
    now: i64,
    stale_index: usize,
    stagger_ms: i64,
) -> i64 {
    if now - last_updated_at > cadence_ms {
        now + stale_index as i64 * stagger_ms
    } else {
        last_updated_at + cadence_ms
    }
}

/// Start task `i` after `i * stagger` and yield `(i, output)` as each finishes.
///
/// Tasks run concurrently once started; output order is completion order.
pub fn staggered_in_completion_order<F, T>(
    tasks: Vec<F>,
    stagger: Duration,
) -> impl Stream<Item = (usize, T)>
where
    F: Future<Output = T>,
{
    tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| async move {
            if index > 0 {
                tokio::time::sleep(stagger * index as u32).await;
            }
            (index, task.await)
        })
        .collect::<FuturesUnordered<_>>()
}

/// Callback form of [`staggered_in_completion_order`] for fallible tasks.
///
/// `on_success` and `on_error` are awaited in completion order.
pub async fn run_staggered_in_completion_order<F, T, E, S, SFut, R, RFut>(
    tasks: Vec<F>,
    stagger: Duration,
    mut on_success: S,
    mut on_error: R,
) where
    F: Future<Output = Result<T, E>>,
    S: FnMut(T, usize) -> SFut,
    SFut: Future<Output = ()>,
    R: FnMut(E, usize) -> RFut,
    RFut: Future<Output = ()>,
{
    let mut completed = Box::pin(staggered_in_completion_order(tasks, stagger));
    while let Some((index, output)) = completed.next().await {
        match output {
            Ok(result) => on_success(result, index).await,
            Err(error) => on_error(error, index).await,
        }
    }
}

/// Log one cache mutation in the shared `cache update:` format.
pub fn log_cache_update(message: impl AsRef<str>) {
    info!(target: "cache_update", "cache update: {}", message.as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_is_older_than() {
        assert!(is_older_than(None, DAY_MS, NOW));
        assert!(is_older_than(Some(NOW - DAY_MS - 1), DAY_MS, NOW));
        assert!(!is_older_than(Some(NOW - DAY_MS), DAY_MS, NOW));
        assert!(!is_older_than(Some(NOW), DAY_MS, NOW));
    }

    #[test]
    fn test_force_refresh_never_applies_to_daily_cadence() {
        assert!(!should_force_price_refresh(
            DAY_MS,
            Some(NOW - 5 * DAY_MS),
            Some(NOW + DAY_MS),
            NOW
        ));
    }

    #[test]
    fn test_force_refresh_weekly_scenario() {
        let week = 7 * DAY_MS;
        let t0 = NOW;
        let scheduled = t0 + week;

        assert!(should_force_price_refresh(
            week,
            Some(t0),
            Some(scheduled),
            t0 + 2 * DAY_MS
        ));
        assert!(!should_force_price_refresh(
            week,
            Some(t0),
            Some(scheduled),
            t0 + 6 * 60 * 60 * 1000
        ));
    }

    #[test]
    fn test_force_refresh_requires_timestamps_and_future_schedule() {
        let month = 30 * DAY_MS;
        let last = Some(NOW - 3 * DAY_MS);
        assert!(!should_force_price_refresh(month, None, Some(NOW + 1), NOW));
        assert!(!should_force_price_refresh(month, last, None, NOW));
        assert!(!should_force_price_refresh(month, last, Some(NOW), NOW));
        assert!(should_force_price_refresh(month, last, Some(NOW + 1), NOW));
    }

    #[test]
    fn test_initial_refresh_staggers_stale_keys() {
        let week = 7 * DAY_MS;
        let stale = NOW - 8 * DAY_MS;
        for index in 0..4 {
            assert_eq!(
                initial_price_refresh_at(week, stale, NOW, index, 200),
                NOW + index as i64 * 200
            );
        }

        let fresh = NOW - DAY_MS;
        assert_eq!(initial_price_refresh_at(week, fresh, NOW, 3, 200), fresh + week);
    }

    #[tokio::test]
    async fn test_staggered_tasks_report_in_completion_order() {
        let slow_first = async {
            tokio::time::sleep(Duration::from_millis(120)).await;
            Ok::<_, String>("slow")
        };
        let fast_second = async { Ok::<_, String>("fast") };
        let failing_third = async { Err::<&str, _>("boom".to_string()) };
        type Task = std::pin::Pin<Box<dyn Future<Output = Result<&'static str, String>> + Send>>;
        let tasks: Vec<Task> = vec![
            Box::pin(slow_first),
            Box::pin(fast_second),
            Box::pin(failing_third),
        ];

        let events = Arc::new(Mutex::new(Vec::new()));
        let started = Instant::now();
        run_staggered_in_completion_order(
            tasks,
            Duration::from_millis(20),
            |value, index| {
                let events = events.clone();
                async move { events.lock().unwrap().push(format!("ok:{}:{}", index, value)) }
            },
            |error, index| {
                let events = events.clone();
                async move { events.lock().unwrap().push(format!("err:{}:{}", index, error)) }
            },
        )
        .await;

        assert_eq!(
            *events.lock().unwrap(),
            vec!["ok:1:fast", "err:2:boom", "ok:0:slow"]
        );
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
