//! Cache manager that picks local or remote per call.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;

use crate::config::CacheContext;
use crate::errors::Result;
use crate::local::LocalCacheManager;
use crate::manager::{CacheManager, OnStreamEntry};
use crate::models::SectionValue;
use crate::remote::HttpCacheManager;
use crate::store::FileCacheStore;

/// Routes every call to the remote cache server when the context names one,
/// otherwise to the local file store.
///
/// One remote client is created per distinct base URL and reused.
pub struct RuntimeCacheManager<T> {
    local: Arc<LocalCacheManager<T>>,
    context: Arc<CacheContext>,
    remotes: Mutex<HashMap<String, Arc<HttpCacheManager<T>>>>,
}

impl<T: SectionValue> RuntimeCacheManager<T> {
    pub fn new(store: Arc<FileCacheStore>, context: Arc<CacheContext>) -> Self {
        Self {
            local: Arc::new(LocalCacheManager::new(store)),
            context,
            remotes: Mutex::new(HashMap::new()),
        }
    }

    /// The backend the next call will use.
    pub fn active(&self) -> Result<Arc<dyn CacheManager<T>>> {
        let Some(base_url) = self.context.base_url()? else {
            return Ok(self.local.clone());
        };

        let mut remotes = self
            .remotes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let remote = remotes
            .entry(base_url)
            .or_insert_with_key(|base_url| {
                debug!("Using remote {} cache at {}", T::SECTION, base_url);
                Arc::new(HttpCacheManager::new(base_url.clone()))
            })
            .clone();
        Ok(remote)
    }

    pub fn is_remote(&self) -> Result<bool> {
        Ok(self.context.base_url()?.is_some())
    }
}

#[async_trait]
impl<T: SectionValue> CacheManager<T> for RuntimeCacheManager<T> {
    async fn get(&self, key: &str) -> Result<Option<T>> {
        self.active()?.get(key).await
    }

    async fn set(&self, key: &str, value: T) -> Result<()> {
        self.active()?.set(key, value).await
    }

    async fn bulk_set(&self, entries: BTreeMap<String, T>) -> Result<()> {
        self.active()?.bulk_set(entries).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.active()?.delete(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.active()?.clear().await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.active()?.keys().await
    }

    async fn values(&self) -> Result<Vec<T>> {
        self.active()?.values().await
    }

    async fn is_empty(&self) -> Result<bool> {
        self.active()?.is_empty().await
    }

    async fn get_timestamp(&self, key: &str) -> Result<Option<i64>> {
        self.active()?.get_timestamp(key).await
    }

    async fn get_last_refreshed_at(&self) -> Result<Option<i64>> {
        self.active()?.get_last_refreshed_at().await
    }

    async fn stream_get_many(
        &self,
        keys: &[String],
        on_entry: &mut OnStreamEntry<'_, T>,
    ) -> Result<HashMap<String, T>> {
        self.active()?.stream_get_many(keys, on_entry).await
    }
}
