//! Bucket and timer bookkeeping for the price refresh scheduler.
//!
//! Keys are grouped into buckets of `interval_ms` wide time windows. Each
//! bucket has at most one armed timer, firing at the earliest refresh time
//! among its keys. Armed timers live in a min-heap; cancelling or rearming a
//! bucket bumps its generation so older heap entries are skipped when popped.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Next refresh for one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriceRefreshSchedule {
    pub refresh_at: i64,
    pub bucket_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ArmedTimer {
    fire_at: i64,
    generation: u64,
}

#[derive(Debug, Default)]
struct Bucket {
    keys: HashSet<String>,
    timer: Option<ArmedTimer>,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
    fire_at: i64,
    generation: u64,
    bucket_id: String,
}

#[derive(Debug)]
pub(crate) struct ScheduleState {
    interval_ms: i64,
    schedules: HashMap<String, PriceRefreshSchedule>,
    buckets: HashMap<String, Bucket>,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    next_generation: u64,
}

impl ScheduleState {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            schedules: HashMap::new(),
            buckets: HashMap::new(),
            timers: BinaryHeap::new(),
            next_generation: 0,
        }
    }

    pub fn bucket_id(&self, refresh_at: i64) -> String {
        refresh_at.div_euclid(self.interval_ms).to_string()
    }

    /// Place `key` in the bucket for `refresh_at`, replacing any prior schedule.
    pub fn schedule_at(&mut self, key: &str, refresh_at: i64) {
        self.unschedule(key);

        let bucket_id = self.bucket_id(refresh_at);
        self.buckets
            .entry(bucket_id.clone())
            .or_default()
            .keys
            .insert(key.to_string());
        self.schedules.insert(
            key.to_string(),
            PriceRefreshSchedule {
                refresh_at,
                bucket_id: bucket_id.clone(),
            },
        );
        self.rearm(&bucket_id);
    }

    /// Remove `key` from scheduling. An emptied bucket is destroyed along
    /// with its timer; otherwise the bucket timer is recomputed.
    pub fn unschedule(&mut self, key: &str) {
        let Some(schedule) = self.schedules.remove(key) else {
            return;
        };
        let Some(bucket) = self.buckets.get_mut(&schedule.bucket_id) else {
            return;
        };

        bucket.keys.remove(key);
        if bucket.keys.is_empty() {
            self.buckets.remove(&schedule.bucket_id);
            return;
        }
        self.rearm(&schedule.bucket_id);
    }

    /// Drop every schedule, bucket and timer.
    pub fn clear(&mut self) {
        self.schedules.clear();
        self.buckets.clear();
        self.timers.clear();
    }

    /// Arm the bucket's timer at its earliest member refresh time, or destroy
    /// the bucket if no member still belongs to it.
    pub fn rearm(&mut self, bucket_id: &str) {
        let Some(bucket) = self.buckets.get_mut(bucket_id) else {
            return;
        };
        bucket.timer = None;

        let next_refresh_at = bucket
            .keys
            .iter()
            .filter_map(|key| self.schedules.get(key))
            .filter(|schedule| schedule.bucket_id == bucket_id)
            .map(|schedule| schedule.refresh_at)
            .min();

        let Some(fire_at) = next_refresh_at else {
            self.buckets.remove(bucket_id);
            return;
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        bucket.timer = Some(ArmedTimer { fire_at, generation });
        self.timers.push(Reverse(TimerEntry {
            fire_at,
            generation,
            bucket_id: bucket_id.to_string(),
        }));

        if self.timers.len() > 2 * self.buckets.len() + 64 {
            self.compact_timers();
        }
    }

    fn is_live(&self, entry: &TimerEntry) -> bool {
        self.buckets
            .get(&entry.bucket_id)
            .and_then(|bucket| bucket.timer)
            .is_some_and(|timer| timer.generation == entry.generation)
    }

    fn compact_timers(&mut self) {
        self.timers = self
            .buckets
            .iter()
            .filter_map(|(bucket_id, bucket)| {
                bucket.timer.map(|timer| {
                    Reverse(TimerEntry {
                        fire_at: timer.fire_at,
                        generation: timer.generation,
                        bucket_id: bucket_id.clone(),
                    })
                })
            })
            .collect();
    }

    /// Pop every live timer due at `now`, disarming its bucket.
    pub fn pop_due(&mut self, now: i64) -> Vec<String> {
        let mut due = Vec::new();
        while let Some(Reverse(top)) = self.timers.peek() {
            let live = self.is_live(top);
            let fire_at = top.fire_at;
            if live && fire_at > now {
                break;
            }

            let Some(Reverse(entry)) = self.timers.pop() else {
                break;
            };
            if !live {
                continue;
            }
            if let Some(bucket) = self.buckets.get_mut(&entry.bucket_id) {
                bucket.timer = None;
            }
            due.push(entry.bucket_id);
        }
        due
    }

    /// Fire time of the earliest live timer.
    pub fn next_fire_at(&mut self) -> Option<i64> {
        while let Some(Reverse(top)) = self.timers.peek() {
            if self.is_live(top) {
                return Some(top.fire_at);
            }
            self.timers.pop();
        }
        None
    }

    /// Start a bucket run: disarm its timer, drop members that moved to
    /// another bucket, and remove and return the keys due at `now`.
    pub fn take_due_keys(&mut self, bucket_id: &str, now: i64) -> Vec<String> {
        let Some(bucket) = self.buckets.get_mut(bucket_id) else {
            return Vec::new();
        };
        bucket.timer = None;

        let mut due = Vec::new();
        bucket.keys.retain(|key| match self.schedules.get(key) {
            Some(schedule) if schedule.bucket_id == bucket_id => {
                if schedule.refresh_at <= now {
                    due.push((schedule.refresh_at, key.clone()));
                    false
                } else {
                    true
                }
            }
            _ => false,
        });

        // Earliest due first, ties in name order.
        due.sort();
        due.into_iter()
            .map(|(_, key)| {
                self.schedules.remove(&key);
                key
            })
            .collect()
    }

    /// End a bucket run: destroy the bucket if it emptied, otherwise rearm.
    pub fn finish_bucket(&mut self, bucket_id: &str) {
        let is_empty = self
            .buckets
            .get(bucket_id)
            .is_some_and(|bucket| bucket.keys.is_empty());
        if is_empty {
            self.buckets.remove(bucket_id);
        } else {
            self.rearm(bucket_id);
        }
    }

    pub fn schedule_of(&self, key: &str) -> Option<&PriceRefreshSchedule> {
        self.schedules.get(key)
    }

    pub fn bucket_timer(&self, bucket_id: &str) -> Option<i64> {
        self.buckets
            .get(bucket_id)
            .and_then(|bucket| bucket.timer)
            .map(|timer| timer.fire_at)
    }

    pub fn bucket_keys(&self, bucket_id: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .buckets
            .get(bucket_id)
            .map(|bucket| bucket.keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn scheduled_count(&self) -> usize {
        self.schedules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: i64 = 1_000;

    #[test]
    fn test_keys_in_same_window_share_bucket_and_earliest_timer() {
        let mut state = ScheduleState::new(INTERVAL);
        state.schedule_at("a", 5_700);
        state.schedule_at("b", 5_200);

        let a = state.schedule_of("a").unwrap().clone();
        let b = state.schedule_of("b").unwrap().clone();
        assert_eq!(a.bucket_id, "5");
        assert_eq!(a.bucket_id, b.bucket_id);
        assert_eq!(state.bucket_timer("5"), Some(5_200));
        assert_eq!(state.bucket_count(), 1);
    }

    #[test]
    fn test_rescheduling_moves_key_and_destroys_empty_bucket() {
        let mut state = ScheduleState::new(INTERVAL);
        state.schedule_at("a", 5_700);
        state.schedule_at("a", 9_100);

        assert_eq!(state.bucket_count(), 1);
        assert_eq!(state.bucket_timer("5"), None);
        assert_eq!(state.bucket_timer("9"), Some(9_100));
        assert_eq!(state.scheduled_count(), 1);
    }

    #[test]
    fn test_unschedule_recomputes_bucket_timer() {
        let mut state = ScheduleState::new(INTERVAL);
        state.schedule_at("a", 5_100);
        state.schedule_at("b", 5_900);

        state.unschedule("a");
        assert_eq!(state.bucket_timer("5"), Some(5_900));

        state.unschedule("b");
        assert_eq!(state.bucket_count(), 0);
        assert_eq!(state.next_fire_at(), None);
    }

    #[test]
    fn test_pop_due_skips_cancelled_timers() {
        let mut state = ScheduleState::new(INTERVAL);
        state.schedule_at("a", 5_100);
        state.schedule_at("b", 7_300);
        state.unschedule("a");

        assert!(state.pop_due(6_000).is_empty());
        assert_eq!(state.next_fire_at(), Some(7_300));
        assert_eq!(state.pop_due(7_300), vec!["7".to_string()]);
        assert_eq!(state.bucket_timer("7"), None);
        assert_eq!(state.next_fire_at(), None);
    }

    #[test]
    fn test_take_due_keys_leaves_future_members() {
        let mut state = ScheduleState::new(INTERVAL);
        state.schedule_at("late", 5_900);
        state.schedule_at("b-early", 5_100);
        state.schedule_at("a-mid", 5_400);

        let due = state.take_due_keys("5", 5_500);
        assert_eq!(due, vec!["b-early".to_string(), "a-mid".to_string()]);
        assert!(state.schedule_of("b-early").is_none());
        assert_eq!(state.bucket_keys("5"), vec!["late".to_string()]);

        state.finish_bucket("5");
        assert_eq!(state.bucket_timer("5"), Some(5_900));
    }

    #[test]
    fn test_finish_bucket_destroys_emptied_bucket() {
        let mut state = ScheduleState::new(INTERVAL);
        state.schedule_at("a", 5_100);

        assert_eq!(state.take_due_keys("5", 6_000), vec!["a".to_string()]);
        state.finish_bucket("5");
        assert_eq!(state.bucket_count(), 0);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut state = ScheduleState::new(INTERVAL);
        state.schedule_at("a", 5_100);
        state.schedule_at("b", 8_100);
        state.clear();

        assert_eq!(state.bucket_count(), 0);
        assert_eq!(state.scheduled_count(), 0);
        assert_eq!(state.next_fire_at(), None);
    }

    #[test]
    fn test_heap_is_compacted_under_churn() {
        let mut state = ScheduleState::new(INTERVAL);
        for i in 0..1_000 {
            state.schedule_at("a", 5_000 + i % 900);
        }
        assert!(state.timers.len() <= 2 * state.bucket_count() + 65);
        assert_eq!(state.next_fire_at(), Some(5_000 + 999 % 900));
    }
}
