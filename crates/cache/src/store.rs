//! File-backed cache store.
//!
//! The whole cache lives in one JSON document. It is loaded lazily on first
//! access, kept in memory for the lifetime of the store, and rewritten in
//! full after every mutation (temp file, fsync, rename).

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};

use crate::errors::Result;
use crate::models::{CacheDocument, CacheEntry, CacheSection, SectionMetadata, SectionValue};

/// Default price TTL: 24 hours.
pub const DEFAULT_EXPIRATION_MS: i64 = 86_400_000;

pub const CACHE_FILE_NAME: &str = "cache.json";

/// Current wall clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Section-partitioned, timestamped key/value store persisted as one JSON file.
///
/// One store should own a given file; every section view over the file must
/// share the same instance (wrap it in an `Arc`).
pub struct FileCacheStore {
    path: PathBuf,
    document: Mutex<Option<CacheDocument>>,
    price_expiration_ms: i64,
    card_expiration_ms: i64,
}

impl FileCacheStore {
    /// Store backed by `path`. Prices expire after 24 hours, cards never do.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: Mutex::new(None),
            price_expiration_ms: DEFAULT_EXPIRATION_MS,
            card_expiration_ms: 0,
        }
    }

    /// Store backed by `<dir>/cache.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(CACHE_FILE_NAME))
    }

    /// Override a section's TTL. Zero means entries never expire.
    pub fn with_expiration(mut self, section: CacheSection, expiration_ms: i64) -> Self {
        let expiration_ms = expiration_ms.max(0);
        match section {
            CacheSection::Prices => self.price_expiration_ms = expiration_ms,
            CacheSection::Cards => self.card_expiration_ms = expiration_ms,
        }
        self
    }

    pub fn expiration_ms(&self, section: CacheSection) -> i64 {
        match section {
            CacheSection::Prices => self.price_expiration_ms,
            CacheSection::Cards => self.card_expiration_ms,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn lock(&self) -> MutexGuard<'_, Option<CacheDocument>> {
        let mut guard = self.document.lock().await;
        if guard.is_none() {
            *guard = Some(load_document(&self.path).await);
        }
        guard
    }

    /// Value stored under `key`, or `None` if absent or expired.
    ///
    /// Reading an expired entry deletes it.
    pub async fn get<T: SectionValue>(&self, key: &str) -> Result<Option<T>> {
        let expiration_ms = self.expiration_ms(T::SECTION);
        let mut guard = self.lock().await;
        let document = guard.get_or_insert_with(CacheDocument::default);

        let Some(entry) = T::entries(document).get(key) else {
            return Ok(None);
        };

        if expiration_ms > 0 && now_millis() - entry.timestamp > expiration_ms {
            debug!("Cache entry {}/{} expired", T::SECTION, key);
            T::entries_mut(document).remove(key);
            self.persist(document).await?;
            return Ok(None);
        }

        Ok(Some(entry.data.clone()))
    }

    pub async fn set<T: SectionValue>(&self, key: &str, value: T) -> Result<()> {
        self.set_at(key, value, now_millis()).await
    }

    /// Write `value` with an explicit write time instead of now.
    pub async fn set_at<T: SectionValue>(&self, key: &str, value: T, timestamp: i64) -> Result<()> {
        let mut guard = self.lock().await;
        let document = guard.get_or_insert_with(CacheDocument::default);
        T::entries_mut(document).insert(
            key.to_string(),
            CacheEntry {
                timestamp,
                data: value,
            },
        );
        self.persist(document).await
    }

    /// Write every entry with one timestamp and stamp the section's
    /// `lastRefreshedAt` with it.
    pub async fn bulk_set<T, I>(&self, entries: I) -> Result<()>
    where
        T: SectionValue,
        I: IntoIterator<Item = (String, T)> + Send,
        I::IntoIter: Send,
    {
        let now = now_millis();
        let mut guard = self.lock().await;
        let document = guard.get_or_insert_with(CacheDocument::default);

        let section = T::entries_mut(document);
        for (key, value) in entries {
            section.insert(
                key,
                CacheEntry {
                    timestamp: now,
                    data: value,
                },
            );
        }
        document.metadata.insert(
            T::SECTION,
            SectionMetadata {
                last_refreshed_at: Some(now),
            },
        );
        self.persist(document).await
    }

    pub async fn values<T: SectionValue>(&self) -> Result<Vec<T>> {
        let mut guard = self.lock().await;
        let document = guard.get_or_insert_with(CacheDocument::default);
        Ok(T::entries(document)
            .values()
            .map(|entry| entry.data.clone())
            .collect())
    }

    /// Remove one key. Missing keys are not an error and do not touch disk.
    pub async fn delete(&self, section: CacheSection, key: &str) -> Result<()> {
        let mut guard = self.lock().await;
        let document = guard.get_or_insert_with(CacheDocument::default);
        if document.remove(section, key) {
            self.persist(document).await?;
        }
        Ok(())
    }

    /// Drop every entry of a section along with its metadata.
    pub async fn clear(&self, section: CacheSection) -> Result<()> {
        let mut guard = self.lock().await;
        let document = guard.get_or_insert_with(CacheDocument::default);
        document.clear(section);
        self.persist(document).await
    }

    pub async fn keys(&self, section: CacheSection) -> Result<Vec<String>> {
        let mut guard = self.lock().await;
        let document = guard.get_or_insert_with(CacheDocument::default);
        Ok(document.keys(section))
    }

    pub async fn is_empty(&self, section: CacheSection) -> Result<bool> {
        let mut guard = self.lock().await;
        let document = guard.get_or_insert_with(CacheDocument::default);
        Ok(document.len(section) == 0)
    }

    /// Write time of `key`, regardless of expiry.
    pub async fn get_timestamp(&self, section: CacheSection, key: &str) -> Result<Option<i64>> {
        let mut guard = self.lock().await;
        let document = guard.get_or_insert_with(CacheDocument::default);
        Ok(document.timestamp(section, key))
    }

    pub async fn get_last_refreshed_at(&self, section: CacheSection) -> Result<Option<i64>> {
        let mut guard = self.lock().await;
        let document = guard.get_or_insert_with(CacheDocument::default);
        Ok(document
            .metadata
            .get(&section)
            .and_then(|metadata| metadata.last_refreshed_at))
    }

    async fn persist(&self, document: &CacheDocument) -> Result<()> {
        let json = serde_json::to_vec_pretty(document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

impl CacheDocument {
    fn remove(&mut self, section: CacheSection, key: &str) -> bool {
        match section {
            CacheSection::Prices => self.prices.remove(key).is_some(),
            CacheSection::Cards => self.cards.remove(key).is_some(),
        }
    }

    fn clear(&mut self, section: CacheSection) {
        match section {
            CacheSection::Prices => self.prices.clear(),
            CacheSection::Cards => self.cards.clear(),
        }
        self.metadata.remove(&section);
    }

    fn keys(&self, section: CacheSection) -> Vec<String> {
        match section {
            CacheSection::Prices => self.prices.keys().cloned().collect(),
            CacheSection::Cards => self.cards.keys().cloned().collect(),
        }
    }

    fn len(&self, section: CacheSection) -> usize {
        match section {
            CacheSection::Prices => self.prices.len(),
            CacheSection::Cards => self.cards.len(),
        }
    }

    fn timestamp(&self, section: CacheSection, key: &str) -> Option<i64> {
        match section {
            CacheSection::Prices => self.prices.get(key).map(|entry| entry.timestamp),
            CacheSection::Cards => self.cards.get(key).map(|entry| entry.timestamp),
        }
    }
}

async fn load_document(path: &Path) -> CacheDocument {
    match tokio::fs::read(path).await {
        Ok(bytes) => parse_document(&bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => CacheDocument::default(),
        Err(e) => {
            error!("Failed to load cache from {}, starting fresh: {}", path.display(), e);
            CacheDocument::default()
        }
    }
}

/// Parse a cache document, resetting whatever is structurally invalid.
///
/// A document that is not a JSON object resets entirely. A cards section in
/// the legacy single-object schema is discarded. Any other section that does
/// not match its schema is reset on its own.
pub(crate) fn parse_document(bytes: &[u8]) -> CacheDocument {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to parse cache file, starting fresh: {}", e);
            return CacheDocument::default();
        }
    };

    let Value::Object(mut root) = value else {
        warn!("Detected invalid cache format, resetting cache.");
        return CacheDocument::default();
    };

    let cards = root.remove("cards");
    let cards = if cards.as_ref().is_some_and(is_legacy_cards_section) {
        info!("Detected old cache schema (single objects). Resetting cards cache.");
        BTreeMap::new()
    } else {
        section_from_value(cards, CacheSection::Cards)
    };

    CacheDocument {
        prices: section_from_value(root.remove("prices"), CacheSection::Prices),
        cards,
        metadata: root
            .remove("metadata")
            .and_then(|metadata| match serde_json::from_value(metadata) {
                Ok(metadata) => Some(metadata),
                Err(e) => {
                    warn!("Ignoring invalid cache metadata: {}", e);
                    None
                }
            })
            .unwrap_or_default(),
    }
}

fn is_legacy_cards_section(cards: &Value) -> bool {
    cards
        .as_object()
        .and_then(|entries| entries.values().next())
        .is_some_and(|entry| !entry.get("data").is_some_and(Value::is_array))
}

fn section_from_value<T: DeserializeOwned>(
    value: Option<Value>,
    section: CacheSection,
) -> BTreeMap<String, CacheEntry<T>> {
    let Some(value) = value.filter(|value| !value.is_null()) else {
        return BTreeMap::new();
    };

    serde_json::from_value(value).unwrap_or_else(|e| {
        warn!("Resetting invalid {} cache section: {}", section, e);
        BTreeMap::new()
    })
}
