use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Json, Router,
};
use ritual_cache::{CacheManager, CacheSection};
use ritual_card_data::{Card, PriceData};
use ritual_refresh::{log_cache_update, resolve_card, resolve_price};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::parse_section;
use crate::{
    error::{ApiError, ApiResult},
    main_lib::AppState,
};

#[derive(Serialize)]
struct ValueBody<T> {
    value: T,
}

#[derive(Serialize)]
struct TimestampBody {
    timestamp: Option<i64>,
}

#[derive(Serialize)]
struct KeysBody {
    keys: Vec<String>,
}

#[derive(Serialize)]
struct ValuesBody<T> {
    values: Vec<T>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IsEmptyBody {
    is_empty: bool,
}

#[derive(Deserialize)]
struct SetValueRequest<T> {
    value: T,
}

#[derive(Deserialize)]
struct BulkSetRequest<T> {
    entries: BTreeMap<String, T>,
}

pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes, message: &str) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|_| ApiError::BadRequest(message.to_string()))
}

/// Read-through get: misses are fetched upstream and cached.
async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path((section, key)): Path<(String, String)>,
) -> ApiResult<Response> {
    let response = match parse_section(&section)? {
        CacheSection::Cards => {
            let value = resolve_card(state.cards.as_ref(), state.provider.as_ref(), &key).await?;
            Json(ValueBody { value }).into_response()
        }
        CacheSection::Prices => {
            let lookup = resolve_price(
                state.prices.as_ref(),
                state.provider.as_ref(),
                &key,
                state.scheduler.as_ref(),
            )
            .await?;
            Json(ValueBody {
                value: lookup.value,
            })
            .into_response()
        }
    };
    Ok(response)
}

async fn set_entry(
    State(state): State<Arc<AppState>>,
    Path((section, key)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    const EXPECTED: &str = "Expected JSON body with 'value'.";

    let section = parse_section(&section)?;
    match section {
        CacheSection::Cards => {
            let request: SetValueRequest<Vec<Card>> = parse_body(&body, EXPECTED)?;
            state.cards.set(&key, request.value).await?;
        }
        CacheSection::Prices => {
            let request: SetValueRequest<PriceData> = parse_body(&body, EXPECTED)?;
            state.prices.set(&key, request.value).await?;
            if let Some(scheduler) = &state.scheduler {
                scheduler.schedule_from_now(&key);
            }
        }
    }

    log_cache_update(format!("section={} action=set key='{}'", section, key));
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path((section, key)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let section = parse_section(&section)?;
    state.store.delete(section, &key).await?;
    if section == CacheSection::Prices {
        if let Some(scheduler) = &state.scheduler {
            scheduler.unschedule_key(&key);
        }
    }

    log_cache_update(format!("section={} action=delete key='{}'", section, key));
    Ok(StatusCode::NO_CONTENT)
}

async fn get_timestamp(
    State(state): State<Arc<AppState>>,
    Path((section, key)): Path<(String, String)>,
) -> ApiResult<Json<TimestampBody>> {
    let section = parse_section(&section)?;
    let timestamp = state.store.get_timestamp(section, &key).await?;
    Ok(Json(TimestampBody { timestamp }))
}

/// Bulk upsert. Stamps the section's last refresh time; price keys are
/// scheduled one interval out.
async fn bulk_set(
    State(state): State<Arc<AppState>>,
    Path(section): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    const EXPECTED: &str = "Expected JSON body with 'entries' object.";

    let section = parse_section(&section)?;
    let count = match section {
        CacheSection::Cards => {
            let request: BulkSetRequest<Vec<Card>> = parse_body(&body, EXPECTED)?;
            let count = request.entries.len();
            state.cards.bulk_set(request.entries).await?;
            count
        }
        CacheSection::Prices => {
            let request: BulkSetRequest<PriceData> = parse_body(&body, EXPECTED)?;
            let keys: Vec<String> = request.entries.keys().cloned().collect();
            state.prices.bulk_set(request.entries).await?;
            if let Some(scheduler) = &state.scheduler {
                for key in &keys {
                    scheduler.schedule_from_now(key);
                }
            }
            keys.len()
        }
    };

    log_cache_update(format!("section={} action=bulk-set count={}", section, count));
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_section(
    State(state): State<Arc<AppState>>,
    Path(section): Path<String>,
) -> ApiResult<StatusCode> {
    let section = parse_section(&section)?;
    state.store.clear(section).await?;
    if section == CacheSection::Prices {
        if let Some(scheduler) = &state.scheduler {
            scheduler.clear_all();
        }
    }

    log_cache_update(format!("section={} action=clear", section));
    Ok(StatusCode::NO_CONTENT)
}

async fn list_keys(
    State(state): State<Arc<AppState>>,
    Path(section): Path<String>,
) -> ApiResult<Json<KeysBody>> {
    let section = parse_section(&section)?;
    let keys = state.store.keys(section).await?;
    Ok(Json(KeysBody { keys }))
}

async fn list_values(
    State(state): State<Arc<AppState>>,
    Path(section): Path<String>,
) -> ApiResult<Response> {
    let response = match parse_section(&section)? {
        CacheSection::Cards => Json(ValuesBody {
            values: state.cards.values().await?,
        })
        .into_response(),
        CacheSection::Prices => Json(ValuesBody {
            values: state.prices.values().await?,
        })
        .into_response(),
    };
    Ok(response)
}

async fn is_empty(
    State(state): State<Arc<AppState>>,
    Path(section): Path<String>,
) -> ApiResult<Json<IsEmptyBody>> {
    let section = parse_section(&section)?;
    let is_empty = state.store.is_empty(section).await?;
    Ok(Json(IsEmptyBody { is_empty }))
}

/// When the section was last bulk-loaded.
async fn metadata(
    State(state): State<Arc<AppState>>,
    Path(section): Path<String>,
) -> ApiResult<Json<TimestampBody>> {
    let section = parse_section(&section)?;
    let timestamp = state.store.get_last_refreshed_at(section).await?;
    Ok(Json(TimestampBody { timestamp }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/cache/{section}", delete(clear_section))
        .route("/cache/{section}/bulk", put(bulk_set))
        .route("/cache/{section}/keys", get(list_keys))
        .route("/cache/{section}/values", get(list_values))
        .route("/cache/{section}/is-empty", get(is_empty))
        .route("/cache/{section}/metadata", get(metadata))
        .route(
            "/cache/{section}/{key}",
            get(get_entry).put(set_entry).delete(delete_entry),
        )
        .route("/cache/{section}/{key}/timestamp", get(get_timestamp))
}
