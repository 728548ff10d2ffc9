mod common;

use std::sync::Arc;

use axum::http::{header, Method, StatusCode};
use common::{body_json, body_text, router, send, sse_events, test_state, MockProvider};
use ritual_cache::{now_millis, CacheManager};
use ritual_card_data::PriceData;
use ritual_refresh::DAY_MS;
use serde_json::json;
use tempfile::tempdir;

#[tokio::test]
async fn hit_then_miss_then_done() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(MockProvider::default().with_price("B", 2.0, 1.0, 3.0));
    let state = test_state(dir.path(), provider, &[]).await;
    state
        .prices
        .set("A", PriceData { latest: 5.0, min: 4.0, max: 6.0 })
        .await
        .unwrap();
    let app = router(state);

    let response = send(
        &app,
        Method::POST,
        "/cache/prices/stream",
        Some(json!({ "keys": ["A", "B"] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    let events = sse_events(&body_text(response).await);
    assert_eq!(
        events,
        vec![
            (
                "price".to_string(),
                json!({ "key": "A", "value": { "latest": 5.0, "min": 4.0, "max": 6.0 }, "updated": false })
            ),
            (
                "price".to_string(),
                json!({ "key": "B", "value": { "latest": 2.0, "min": 1.0, "max": 3.0 }, "updated": true })
            ),
            ("done".to_string(), json!({ "count": 2 })),
        ]
    );
}

#[tokio::test]
async fn failing_key_reports_error_and_batch_continues() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(MockProvider::default().with_price("Good", 1.0, 1.0, 1.0));
    let app = router(test_state(dir.path(), provider, &[]).await);

    let response = send(
        &app,
        Method::POST,
        "/cache/prices/stream",
        Some(json!({ "keys": ["Bad", "  ", "Good"] })),
    )
    .await;
    let events = sse_events(&body_text(response).await);

    assert_eq!(events.len(), 3);
    let error = events.iter().find(|(name, _)| name == "error").unwrap();
    assert_eq!(error.1["key"], "Bad");
    assert!(error.1["message"].as_str().unwrap().contains("Bad"));
    let price = events.iter().find(|(name, _)| name == "price").unwrap();
    assert_eq!(price.1["key"], "Good");
    assert_eq!(events[2], ("done".to_string(), json!({ "count": 1 })));
}

#[tokio::test]
async fn stale_weekly_hit_is_refreshed_in_stream() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(MockProvider::default().with_price("A", 7.0, 1.0, 9.0));
    let state = test_state(dir.path(), provider.clone(), &["--prices-refresh", "weekly"]).await;
    state
        .prices
        .set_at("A", PriceData::default(), now_millis() - 2 * DAY_MS)
        .await
        .unwrap();
    let app = router(state);

    let response = send(
        &app,
        Method::POST,
        "/cache/prices/stream",
        Some(json!({ "keys": ["A"] })),
    )
    .await;
    let events = sse_events(&body_text(response).await);

    assert_eq!(events[0].0, "price");
    assert_eq!(events[0].1["updated"], true);
    assert_eq!(events[0].1["value"]["latest"], 7.0);
    assert_eq!(provider.latest_calls(), 1);
}

#[tokio::test]
async fn stream_request_validation() {
    let dir = tempdir().unwrap();
    let app = router(test_state(dir.path(), Arc::new(MockProvider::default()), &[]).await);

    let response = send(
        &app,
        Method::POST,
        "/cache/prices/stream",
        Some(json!({ "keys": [" ", ""] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"],
        "At least one cache key is required."
    );

    let response = send(
        &app,
        Method::POST,
        "/cache/prices/stream",
        Some(json!({ "keys": [1, 2] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"],
        "Expected JSON body with 'keys' string array."
    );

    let response = send(
        &app,
        Method::POST,
        "/cache/cards/stream",
        Some(json!({ "keys": ["A"] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
