//! The cache manager contract shared by local and remote backends.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{SectionValue, StreamEntryMeta};

/// Callback invoked once per value produced by [`CacheManager::stream_get_many`].
pub type OnStreamEntry<'a, T> = dyn FnMut(&str, &T, StreamEntryMeta) + Send + 'a;

/// Uniform read/write/enumerate interface over one cache section.
///
/// Implemented by [`LocalCacheManager`](crate::LocalCacheManager) over the
/// file store and by [`HttpCacheManager`](crate::HttpCacheManager) against a
/// remote cache server, so callers never need to know which one backs them.
#[async_trait]
pub trait CacheManager<T: SectionValue>: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<T>>;

    async fn set(&self, key: &str, value: T) -> Result<()>;

    /// Write many entries at once and stamp the section's last-refreshed time.
    async fn bulk_set(&self, entries: BTreeMap<String, T>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;

    async fn values(&self) -> Result<Vec<T>>;

    async fn is_empty(&self) -> Result<bool>;

    async fn get_timestamp(&self, key: &str) -> Result<Option<i64>>;

    async fn get_last_refreshed_at(&self) -> Result<Option<i64>>;

    /// Batch lookup of `keys`, reporting each value through `on_entry` as it
    /// becomes available. Keys without a value are absent from the result.
    async fn stream_get_many(
        &self,
        keys: &[String],
        on_entry: &mut OnStreamEntry<'_, T>,
    ) -> Result<HashMap<String, T>>;
}

/// Report already-resolved batch results in input order, all marked as not
/// updated. Keys missing from `results` are skipped.
pub fn stream_from_batch_results<T: Clone>(
    keys: &[String],
    results: &HashMap<String, T>,
    on_entry: &mut OnStreamEntry<'_, T>,
) -> HashMap<String, T> {
    let mut streamed = HashMap::with_capacity(results.len());
    for key in keys {
        let Some(value) = results.get(key) else {
            continue;
        };
        on_entry(key, value, StreamEntryMeta { updated: false });
        streamed.insert(key.clone(), value.clone());
    }
    streamed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_from_batch_results_keeps_input_order() {
        let keys: Vec<String> = ["c", "a", "missing", "b"].iter().map(|k| k.to_string()).collect();
        let results: HashMap<String, u32> =
            [("a", 1), ("b", 2), ("c", 3)].iter().map(|(k, v)| (k.to_string(), *v)).collect();

        let mut seen = Vec::new();
        let streamed = stream_from_batch_results(&keys, &results, &mut |key, value, meta| {
            seen.push((key.to_string(), *value, meta.updated));
        });

        assert_eq!(
            seen,
            vec![
                ("c".to_string(), 3, false),
                ("a".to_string(), 1, false),
                ("b".to_string(), 2, false),
            ]
        );
        assert_eq!(streamed.len(), 3);
        assert!(!streamed.contains_key("missing"));
    }
}
