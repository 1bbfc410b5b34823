//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Event injection is mounted under `/api/v1`; health and the event stream
//! live at the root.

pub mod dto;
pub mod handlers;
pub mod openapi;

use axum::Router;

use crate::app_state::AppState;

/// Builds the complete router: REST endpoints, the event stream and, with
/// the `swagger-ui` feature, the API docs.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
        .merge(crate::sse::handler::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(openapi::swagger_router());

    router
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::event::{Bus, EventType, MemoryBus, ResilientPublisher, RetrySettings, handler_fn};
    use crate::persistence::DeadLetterSink;
    use crate::sse::{BroadcastHub, HubSettings};

    struct Fixture {
        _dir: tempfile::TempDir,
        bus: Arc<MemoryBus>,
        state: AppState,
    }

    fn fixture() -> Fixture {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let Ok(sink) = DeadLetterSink::open(dir.path().join("dead.jsonl")) else {
            panic!("open sink");
        };
        let bus = Arc::new(MemoryBus::new());
        let shared: Arc<dyn Bus> = Arc::<MemoryBus>::clone(&bus);
        let publisher = Arc::new(ResilientPublisher::new(
            shared,
            Arc::new(sink),
            RetrySettings::default(),
        ));
        let state = AppState {
            publisher,
            hub: Arc::new(BroadcastHub::new(HubSettings::default())),
            keepalive: Duration::from_secs(30),
        };
        Fixture {
            _dir: dir,
            bus,
            state,
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let Ok(bytes) = to_bytes(response.into_body(), 64 * 1024).await else {
            panic!("read body");
        };
        let Ok(value) = serde_json::from_slice(&bytes) else {
            panic!("body is not JSON");
        };
        value
    }

    fn post_event(body: &Value) -> Request<Body> {
        let Ok(request) = Request::post("/api/v1/events")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
        else {
            panic!("build request");
        };
        request
    }

    #[tokio::test]
    async fn health_reports_counters() {
        let fx = fixture();
        let app = build_router().with_state(fx.state.clone());
        let Ok(request) = Request::get("/health").body(Body::empty()) else {
            panic!("build request");
        };
        let Ok(response) = app.oneshot(request).await else {
            panic!("router failed");
        };
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], json!("healthy"));
        assert_eq!(body["stream_clients"], json!(0));
        assert_eq!(body["dropped_events"], json!(0));
        assert_eq!(body["version"], json!(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn injected_event_reaches_bus_handlers() {
        let fx = fixture();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        fx.bus.subscribe(
            EventType::from("quest.completed"),
            handler_fn(move |event| {
                let counter = Arc::clone(&counter);
                async move {
                    assert_eq!(event.payload.to_json().ok(), Some(json!({"v": 1})));
                    assert!(event.metadata_str("request_id").is_some());
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(())
                }
            }),
        );

        let app = build_router().with_state(fx.state.clone());
        let Ok(response) = app
            .oneshot(post_event(&json!({"type": "quest.completed", "payload": {"v": 1}})))
            .await
        else {
            panic!("router failed");
        };
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["type"], json!("quest.completed"));
        assert_eq!(body["status"], json!("accepted"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_event_type_is_rejected() {
        let fx = fixture();
        let app = build_router().with_state(fx.state.clone());
        let Ok(response) = app.oneshot(post_event(&json!({"type": "  "}))).await else {
            panic!("router failed");
        };
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!(1001));
    }

    #[tokio::test]
    async fn stream_rejects_when_hub_stopped() {
        let fx = fixture();
        fx.state.hub.stop().await;
        let app = build_router().with_state(fx.state.clone());
        let Ok(request) = Request::get("/events?types=a,b").body(Body::empty()) else {
            panic!("build request");
        };
        let Ok(response) = app.oneshot(request).await else {
            panic!("router failed");
        };
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn stream_sets_event_stream_headers() {
        let fx = fixture();
        fx.state.hub.start().await;
        let app = build_router().with_state(fx.state.clone());
        let Ok(request) = Request::get("/events").body(Body::empty()) else {
            panic!("build request");
        };
        let Ok(response) = app.oneshot(request).await else {
            panic!("router failed");
        };
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok());
        assert_eq!(content_type, Some("text/event-stream"));
        let cache = response
            .headers()
            .get("cache-control")
            .and_then(|v| v.to_str().ok());
        assert_eq!(cache, Some("no-cache"));
        drop(response);
        fx.state.hub.stop().await;
    }
}
