//! Batch price lookups streamed as server-sent events.
//!
//! Cache hits are sent first, in request order. Misses and keys due for a
//! forced refresh are then resolved upstream, `stagger` apart, and sent as
//! each completes. A failing key produces an `error` event without stopping
//! the batch; `done` reports how many prices were sent.

use std::convert::Infallible;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Router,
};
use futures::StreamExt;
use ritual_cache::{CacheManager, CacheSection};
use ritual_card_data::PriceData;
use ritual_refresh::{resolve_price, should_force_refresh, staggered_in_completion_order};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{cache::parse_body, parse_section};
use crate::{
    error::{ApiError, ApiResult},
    main_lib::AppState,
};

#[derive(Deserialize)]
struct StreamRequest {
    keys: Vec<String>,
}

#[derive(Serialize)]
struct PricePayload<'a> {
    key: &'a str,
    value: PriceData,
    updated: bool,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    message: String,
}

#[derive(Serialize)]
struct DonePayload {
    count: usize,
}

/// Sending half of one stream response.
///
/// A client that disconnects only stops receiving; resolution keeps going so
/// fetched prices still land in the cache.
#[derive(Clone)]
struct PriceEvents {
    tx: mpsc::UnboundedSender<Event>,
}

impl PriceEvents {
    fn send<T: Serialize>(&self, name: &'static str, payload: T) {
        match Event::default().event(name).json_data(payload) {
            Ok(event) => {
                let _ = self.tx.send(event);
            }
            Err(e) => tracing::error!("Failed to serialize {} event: {}", name, e),
        }
    }

    fn price(&self, key: &str, value: PriceData, updated: bool) {
        self.send("price", PricePayload { key, value, updated });
    }

    fn error(&self, key: Option<&str>, message: String) {
        self.send("error", ErrorPayload { key, message });
    }

    fn done(&self, count: usize) {
        self.send("done", DonePayload { count });
    }
}

/// Request keys trimmed, blanks dropped.
fn parse_stream_keys(body: &Bytes) -> ApiResult<Vec<String>> {
    let request: StreamRequest = parse_body(body, "Expected JSON body with 'keys' string array.")?;
    let keys: Vec<String> = request
        .keys
        .iter()
        .map(|key| key.trim())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect();

    if keys.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one cache key is required.".to_string(),
        ));
    }
    Ok(keys)
}

async fn stream_prices(
    State(state): State<Arc<AppState>>,
    Path(section): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    if parse_section(&section)? != CacheSection::Prices {
        return Err(ApiError::BadRequest(
            "Streaming is only supported for the prices section.".to_string(),
        ));
    }
    let keys = parse_stream_keys(&body)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let events = PriceEvents { tx };
    tokio::spawn(async move {
        let worker = tokio::spawn(run_price_stream(state, keys, events.clone()));
        if let Err(e) = worker.await {
            events.error(None, e.to_string());
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );
    Ok(([(header::CACHE_CONTROL, "no-cache")], sse).into_response())
}

/// Cached value to send right away, or `None` to queue the key for resolution.
async fn cached_price(state: &AppState, key: &str) -> ritual_refresh::Result<Option<PriceData>> {
    let Some(cached) = state.prices.get(key).await? else {
        return Ok(None);
    };
    if let Some(scheduler) = &state.scheduler {
        if should_force_refresh(state.prices.as_ref(), scheduler, key).await? {
            return Ok(None);
        }
    }
    Ok(Some(cached))
}

async fn run_price_stream(state: Arc<AppState>, keys: Vec<String>, events: PriceEvents) {
    let mut sent = 0;
    let mut queue: Vec<String> = Vec::new();

    for key in &keys {
        match cached_price(&state, key).await {
            Ok(Some(value)) => {
                events.price(key, value, false);
                sent += 1;
            }
            Ok(None) => queue.push(key.clone()),
            Err(e) => events.error(Some(key.as_str()), e.to_string()),
        }
    }

    let tasks: Vec<_> = queue
        .iter()
        .map(|key| {
            resolve_price(
                state.prices.as_ref(),
                state.provider.as_ref(),
                key,
                state.scheduler.as_ref(),
            )
        })
        .collect();
    let mut completed = pin!(staggered_in_completion_order(tasks, state.stagger));
    while let Some((index, result)) = completed.next().await {
        let key = queue[index].as_str();
        match result {
            Ok(lookup) => {
                events.price(key, lookup.value, lookup.updated);
                sent += 1;
            }
            Err(e) => events.error(Some(key), e.to_string()),
        }
    }

    events.done(sent);
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/cache/{section}/stream", post(stream_prices))
}
