//! In-process cache manager over the file store.

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;
use crate::manager::{stream_from_batch_results, CacheManager, OnStreamEntry};
use crate::models::{CacheSection, SectionValue};
use crate::store::FileCacheStore;

/// Typed view of one section of a shared [`FileCacheStore`].
pub struct LocalCacheManager<T> {
    store: Arc<FileCacheStore>,
    _section: PhantomData<fn() -> T>,
}

impl<T: SectionValue> LocalCacheManager<T> {
    pub fn new(store: Arc<FileCacheStore>) -> Self {
        Self {
            store,
            _section: PhantomData,
        }
    }

    pub fn section(&self) -> CacheSection {
        T::SECTION
    }

    pub fn store(&self) -> &Arc<FileCacheStore> {
        &self.store
    }

    /// Write `value` with an explicit write time.
    pub async fn set_at(&self, key: &str, value: T, timestamp: i64) -> Result<()> {
        self.store.set_at(key, value, timestamp).await
    }
}

impl<T> Clone for LocalCacheManager<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _section: PhantomData,
        }
    }
}

#[async_trait]
impl<T: SectionValue> CacheManager<T> for LocalCacheManager<T> {
    async fn get(&self, key: &str) -> Result<Option<T>> {
        self.store.get(key).await
    }

    async fn set(&self, key: &str, value: T) -> Result<()> {
        self.store.set(key, value).await
    }

    async fn bulk_set(&self, entries: BTreeMap<String, T>) -> Result<()> {
        self.store.bulk_set(entries).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(T::SECTION, key).await
    }

    async fn clear(&self) -> Result<()> {
        self.store.clear(T::SECTION).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.store.keys(T::SECTION).await
    }

    async fn values(&self) -> Result<Vec<T>> {
        self.store.values().await
    }

    async fn is_empty(&self) -> Result<bool> {
        self.store.is_empty(T::SECTION).await
    }

    async fn get_timestamp(&self, key: &str) -> Result<Option<i64>> {
        self.store.get_timestamp(T::SECTION, key).await
    }

    async fn get_last_refreshed_at(&self) -> Result<Option<i64>> {
        self.store.get_last_refreshed_at(T::SECTION).await
    }

    async fn stream_get_many(
        &self,
        keys: &[String],
        on_entry: &mut OnStreamEntry<'_, T>,
    ) -> Result<HashMap<String, T>> {
        let mut results = HashMap::new();
        for key in keys {
            if let Some(value) = self.store.get(key).await? {
                results.insert(key.clone(), value);
            }
        }
        Ok(stream_from_batch_results(keys, &results, on_entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ritual_card_data::PriceData;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_stream_reports_hits_in_order() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileCacheStore::in_dir(dir.path()));
        let prices: LocalCacheManager<PriceData> = LocalCacheManager::new(store);

        let b = PriceData { latest: 2.0, min: 1.0, max: 3.0 };
        let a = PriceData { latest: 1.0, min: 1.0, max: 1.0 };
        prices.set("B", b).await.unwrap();
        prices.set("A", a).await.unwrap();

        let keys = vec!["B".to_string(), "X".to_string(), "A".to_string()];
        let mut order = Vec::new();
        let results = prices
            .stream_get_many(&keys, &mut |key, _, meta| {
                assert!(!meta.updated);
                order.push(key.to_string());
            })
            .await
            .unwrap();

        assert_eq!(order, vec!["B", "A"]);
        assert_eq!(results.get("A"), Some(&a));
        assert_eq!(results.get("X"), None);
    }

    #[tokio::test]
    async fn test_bulk_set_through_manager() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileCacheStore::in_dir(dir.path()));
        let prices: LocalCacheManager<PriceData> = LocalCacheManager::new(store);

        let entries: BTreeMap<String, PriceData> = ["A", "B", "C"]
            .iter()
            .map(|k| (k.to_string(), PriceData::default()))
            .collect();
        prices.bulk_set(entries).await.unwrap();

        assert_eq!(prices.keys().await.unwrap(), vec!["A", "B", "C"]);
        assert!(prices.get_last_refreshed_at().await.unwrap().is_some());
        assert!(!prices.is_empty().await.unwrap());

        prices.clear().await.unwrap();
        assert!(prices.is_empty().await.unwrap());
    }
}
