//! Scryfall API response structures.

use serde::{Deserialize, Serialize};

use crate::models::Card;

/// Generic paginated list returned by search endpoints.
#[derive(Debug, Deserialize)]
pub(super) struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// Request body for `POST /cards/collection`.
#[derive(Debug, Serialize)]
pub(super) struct CollectionRequest {
    pub identifiers: Vec<NameIdentifier>,
}

#[derive(Debug, Serialize)]
pub(super) struct NameIdentifier {
    pub name: String,
}

/// Response from `POST /cards/collection`.
///
/// `data` is positional: with no `not_found` entries, `data[i]` answers
/// `identifiers[i]`.
#[derive(Debug, Deserialize)]
pub(super) struct CollectionResponse {
    #[serde(default)]
    pub data: Vec<Card>,
    #[serde(default)]
    pub not_found: Vec<NotFoundIdentifier>,
}

impl CollectionResponse {
    /// Trimmed, non-empty names upstream could not resolve.
    pub fn missing_names(&self) -> Vec<String> {
        self.not_found
            .iter()
            .filter_map(|item| item.name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct NotFoundIdentifier {
    pub name: Option<String>,
}

/// One entry of `GET /bulk-data`.
#[derive(Debug, Deserialize)]
pub(super) struct BulkDataItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub download_uri: Option<String>,
    #[serde(default)]
    pub size: u64,
}
