//! HTTP client for a remote cache server.

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{CacheError, Result};
use crate::manager::{CacheManager, OnStreamEntry};
use crate::models::{CacheSection, SectionValue, StreamEntryMeta};

#[derive(Deserialize)]
struct ValueResponse<T> {
    value: Option<T>,
}

#[derive(Deserialize)]
struct TimestampResponse {
    timestamp: Option<i64>,
}

#[derive(Deserialize)]
struct KeysResponse {
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct ValuesResponse<T> {
    values: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IsEmptyResponse {
    is_empty: bool,
}

#[derive(Serialize)]
struct SetRequest<'a, T> {
    value: &'a T,
}

#[derive(Serialize)]
struct BulkSetRequest<'a, T> {
    entries: &'a BTreeMap<String, T>,
}

#[derive(Serialize)]
struct StreamRequest<'a> {
    keys: &'a [String],
}

#[derive(Deserialize)]
struct StreamEntry<T> {
    key: String,
    value: Option<T>,
    #[serde(default)]
    updated: bool,
}

/// [`CacheManager`] that talks to a cache server over HTTP.
pub struct HttpCacheManager<T> {
    client: Client,
    base_url: String,
    _section: PhantomData<fn() -> T>,
}

impl<T: SectionValue> HttpCacheManager<T> {
    /// `base_url` is `scheme://host:port`, as produced by
    /// [`to_cache_server_base_url`](crate::to_cache_server_base_url).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            _section: PhantomData,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/cache/{}{}", self.base_url, T::SECTION, suffix)
    }

    fn key_path(key: &str, suffix: &str) -> String {
        format!("/{}{}", urlencoding::encode(key), suffix)
    }

    async fn send(
        &self,
        method: Method,
        suffix: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let url = self.url(suffix);
        debug!("Cache server request: {} {}", method, url);

        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CacheError::Remote {
                status,
                method: method.to_string(),
                url,
                body,
            });
        }

        Ok(response)
    }

    async fn request_json<R: DeserializeOwned>(&self, suffix: &str) -> Result<R> {
        let response = self.send(Method::GET, suffix, None).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn request_empty(
        &self,
        method: Method,
        suffix: &str,
        body: Option<serde_json::Value>,
    ) -> Result<()> {
        let response = self.send(method, suffix, body).await?;
        if response.status() != StatusCode::NO_CONTENT {
            // Drain the body so the connection can be reused.
            let _ = response.bytes().await?;
        }
        Ok(())
    }
}

impl<T> Clone for HttpCacheManager<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            _section: PhantomData,
        }
    }
}

#[async_trait]
impl<T: SectionValue> CacheManager<T> for HttpCacheManager<T> {
    async fn get(&self, key: &str) -> Result<Option<T>> {
        let response: ValueResponse<T> = self.request_json(&Self::key_path(key, "")).await?;
        Ok(response.value)
    }

    async fn set(&self, key: &str, value: T) -> Result<()> {
        let body = serde_json::to_value(SetRequest { value: &value })?;
        self.request_empty(Method::PUT, &Self::key_path(key, ""), Some(body))
            .await
    }

    async fn bulk_set(&self, entries: BTreeMap<String, T>) -> Result<()> {
        let body = serde_json::to_value(BulkSetRequest { entries: &entries })?;
        self.request_empty(Method::PUT, "/bulk", Some(body)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.request_empty(Method::DELETE, &Self::key_path(key, ""), None)
            .await
    }

    async fn clear(&self) -> Result<()> {
        self.request_empty(Method::DELETE, "", None).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let response: KeysResponse = self.request_json("/keys").await?;
        Ok(response.keys)
    }

    async fn values(&self) -> Result<Vec<T>> {
        let response: ValuesResponse<T> = self.request_json("/values").await?;
        Ok(response.values)
    }

    async fn is_empty(&self) -> Result<bool> {
        let response: IsEmptyResponse = self.request_json("/is-empty").await?;
        Ok(response.is_empty)
    }

    async fn get_timestamp(&self, key: &str) -> Result<Option<i64>> {
        let response: TimestampResponse = self
            .request_json(&Self::key_path(key, "/timestamp"))
            .await?;
        Ok(response.timestamp)
    }

    async fn get_last_refreshed_at(&self) -> Result<Option<i64>> {
        let response: TimestampResponse = self.request_json("/metadata").await?;
        Ok(response.timestamp)
    }

    /// Opens one server-sent-events connection for the whole batch.
    async fn stream_get_many(
        &self,
        keys: &[String],
        on_entry: &mut OnStreamEntry<'_, T>,
    ) -> Result<HashMap<String, T>> {
        if T::SECTION != CacheSection::Prices {
            return Err(CacheError::UnsupportedStream(T::SECTION));
        }
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let body = serde_json::to_value(StreamRequest { keys })?;
        let mut response = self.send(Method::POST, "/stream", Some(body)).await?;

        let mut parser = SseParser::default();
        let mut results = HashMap::new();
        while let Some(chunk) = response.chunk().await? {
            for event in parser.push(&chunk) {
                handle_stream_event(event, &mut results, on_entry)?;
            }
        }
        if let Some(event) = parser.finish() {
            handle_stream_event(event, &mut results, on_entry)?;
        }

        Ok(results)
    }
}

fn handle_stream_event<T: DeserializeOwned>(
    event: SseEvent,
    results: &mut HashMap<String, T>,
    on_entry: &mut OnStreamEntry<'_, T>,
) -> Result<()> {
    match event.event.as_str() {
        "price" => {
            let entry: StreamEntry<T> = serde_json::from_str(&event.data)?;
            if let Some(value) = entry.value {
                on_entry(
                    &entry.key,
                    &value,
                    StreamEntryMeta {
                        updated: entry.updated,
                    },
                );
                results.insert(entry.key, value);
            }
            Ok(())
        }
        "error" => Err(CacheError::Stream(event.data)),
        _ => Ok(()),
    }
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
///
/// Events are separated by a blank line. Comment lines (keep-alives) and
/// events without data are dropped.
#[derive(Default)]
pub(crate) struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feed bytes, returning every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(boundary) = find_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..boundary.end).collect();
            if let Some(event) = parse_block(&block[..boundary.start]) {
                events.push(event);
            }
        }
        events
    }

    /// Flush whatever is left once the body ends.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let block = std::mem::take(&mut self.buffer);
        parse_block(&block)
    }
}

fn find_boundary(buffer: &[u8]) -> Option<std::ops::Range<usize>> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| i..i + 2);
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i..i + 4);

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.start <= b.start { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_block(block: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(block);
    if text.trim().is_empty() {
        return None;
    }

    let mut event = "message".to_string();
    let mut data = Vec::new();
    for line in text.lines() {
        if let Some(name) = line.strip_prefix("event:") {
            event = name.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if data.is_empty() {
        return None;
    }

    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ritual_card_data::{Card, PriceData};

    #[test]
    fn test_url_encodes_keys_as_path_segments() {
        let manager: HttpCacheManager<PriceData> = HttpCacheManager::new("http://localhost:4000/");
        assert_eq!(
            manager.url(&HttpCacheManager::<PriceData>::key_path("Fire // Ice", "/timestamp")),
            "http://localhost:4000/cache/prices/Fire%20%2F%2F%20Ice/timestamp"
        );

        let cards: HttpCacheManager<Vec<Card>> = HttpCacheManager::new("http://localhost:4000");
        assert_eq!(cards.url(""), "http://localhost:4000/cache/cards");
    }

    #[test]
    fn test_parser_handles_events_split_across_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"event: price\ndata: {\"key\":\"A\"").is_empty());

        let events = parser.push(b",\"value\":null}\n\n: keep-alive\n\nevent: done\ndata: {\"count\":1}\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "price".into(),
                    data: "{\"key\":\"A\",\"value\":null}".into()
                },
                SseEvent {
                    event: "done".into(),
                    data: "{\"count\":1}".into()
                },
            ]
        );
        assert_eq!(parser.finish(), None);
    }

    #[test]
    fn test_parser_joins_multiline_data_and_flushes_tail() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"event: error\r\ndata: line one\r\ndata: line two").is_empty());
        assert_eq!(
            parser.finish(),
            Some(SseEvent {
                event: "error".into(),
                data: "line one\nline two".into()
            })
        );
    }

    #[test]
    fn test_price_events_are_collected_and_errors_fail() {
        let mut results: HashMap<String, PriceData> = HashMap::new();
        let mut seen = Vec::new();
        let mut on_entry = |key: &str, _: &PriceData, meta: StreamEntryMeta| {
            seen.push((key.to_string(), meta.updated));
        };

        let price = SseEvent {
            event: "price".into(),
            data: r#"{"key":"A","value":{"latest":1.0,"min":0.5,"max":2.0},"updated":true}"#.into(),
        };
        handle_stream_event(price, &mut results, &mut on_entry).unwrap();

        let error = SseEvent {
            event: "error".into(),
            data: r#"{"key":"B","message":"boom"}"#.into(),
        };
        let err = handle_stream_event(error, &mut results, &mut on_entry).unwrap_err();
        assert!(matches!(err, CacheError::Stream(data) if data.contains("boom")));

        assert_eq!(seen, vec![("A".to_string(), true)]);
        assert_eq!(results["A"].latest, 1.0);
    }

    #[tokio::test]
    async fn test_stream_rejects_card_section() {
        let cards: HttpCacheManager<Vec<Card>> = HttpCacheManager::new("http://127.0.0.1:9");
        let err = cards
            .stream_get_many(&["Island".to_string()], &mut |_, _, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedStream(CacheSection::Cards)));
    }
}
