mod cache;
mod health;
mod stream;

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use ritual_cache::CacheSection;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{
    error::{ApiError, ApiResult},
    main_lib::AppState,
};

pub fn app_router(state: Arc<AppState>) -> Router {
    let routes = Router::new()
        .merge(health::router())
        .merge(cache::router())
        .merge(stream::router())
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed);

    catch_panics(routes)
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Turn a panicking handler into a 500 JSON error instead of a dropped connection.
fn catch_panics<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(CatchPanicLayer::custom(panic_response))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic".to_string()
    };
    ApiError::Panic(details).into_response()
}

pub(crate) fn parse_section(section: &str) -> ApiResult<CacheSection> {
    section.parse().map_err(|_| ApiError::InvalidSection)
}

async fn not_found(uri: Uri) -> Response {
    let mut segments = uri.path().split('/').filter(|s| !s.is_empty());
    if segments.next() != Some("cache") {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    }
    match parse_section(segments.next().unwrap_or_default()) {
        Ok(_) => ApiError::NotFound.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Log `<METHOD> <path> -> <status> (<ms>ms)` for every request when verbose.
async fn log_requests(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    if !state.verbose {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let started = Instant::now();

    let response = next.run(request).await;
    tracing::info!(
        "{} {} -> {} ({}ms)",
        method,
        target,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    async fn explode() -> &'static str {
        panic!("bucket state corrupted")
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_json_500() {
        let app = catch_panics(Router::new().route("/explode", get(explode)));

        let response = app
            .oneshot(Request::get("/explode").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Cache server request failed.");
        assert!(body["details"]
            .as_str()
            .unwrap()
            .contains("bucket state corrupted"));
    }
}
