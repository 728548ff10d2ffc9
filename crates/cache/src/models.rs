//! Cache document model.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ritual_card_data::{Card, PriceData};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::CacheError;

/// Partition of the cache document. Each section has its own schema and TTL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSection {
    Cards,
    Prices,
}

impl CacheSection {
    pub const ALL: [CacheSection; 2] = [CacheSection::Cards, CacheSection::Prices];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheSection::Cards => "cards",
            CacheSection::Prices => "prices",
        }
    }
}

impl fmt::Display for CacheSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheSection {
    type Err = CacheError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "cards" => Ok(CacheSection::Cards),
            "prices" => Ok(CacheSection::Prices),
            other => Err(CacheError::InvalidSection(other.to_string())),
        }
    }
}

/// A cached value plus its write time in epoch milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub timestamp: i64,
    pub data: T,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionMetadata {
    /// Last time the whole section was written by a bulk set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refreshed_at: Option<i64>,
}

/// The on-disk JSON document: `{prices, cards, metadata}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheDocument {
    #[serde(default)]
    pub prices: BTreeMap<String, CacheEntry<PriceData>>,
    #[serde(default)]
    pub cards: BTreeMap<String, CacheEntry<Vec<Card>>>,
    #[serde(default)]
    pub metadata: BTreeMap<CacheSection, SectionMetadata>,
}

/// Ties a value type to the section that stores it.
pub trait SectionValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const SECTION: CacheSection;

    fn entries(document: &CacheDocument) -> &BTreeMap<String, CacheEntry<Self>>;

    fn entries_mut(document: &mut CacheDocument) -> &mut BTreeMap<String, CacheEntry<Self>>;
}

impl SectionValue for PriceData {
    const SECTION: CacheSection = CacheSection::Prices;

    fn entries(document: &CacheDocument) -> &BTreeMap<String, CacheEntry<Self>> {
        &document.prices
    }

    fn entries_mut(document: &mut CacheDocument) -> &mut BTreeMap<String, CacheEntry<Self>> {
        &mut document.prices
    }
}

impl SectionValue for Vec<Card> {
    const SECTION: CacheSection = CacheSection::Cards;

    fn entries(document: &CacheDocument) -> &BTreeMap<String, CacheEntry<Self>> {
        &document.cards
    }

    fn entries_mut(document: &mut CacheDocument) -> &mut BTreeMap<String, CacheEntry<Self>> {
        &mut document.cards
    }
}

/// Per-entry flags reported alongside streamed values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntryMeta {
    /// True when the value was fetched or refreshed upstream for this request.
    pub updated: bool,
}
