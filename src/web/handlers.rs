//! HTTP request handlers.

use super::AppState;
use crate::registry::{validate_targets, Target};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::time::Duration;

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.targets().to_vec())
}

/// Replace the whole target list, persisting it before it takes effect.
pub async fn handle_put_targets(
    State(state): State<AppState>,
    Json(targets): Json<Vec<Target>>,
) -> impl IntoResponse {
    if let Err(e) = validate_targets(&targets) {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    if let Err(e) = state.store.save(&targets) {
        tracing::error!("Failed to save targets to {}: {}", state.store.path().display(), e);
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    match state.monitor.set_targets(targets) {
        Ok(report) => Json(report).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

pub async fn handle_refresh_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.monitor.refresh_target(&id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, "Target not found").into_response()
    }
}

pub async fn handle_refresh_all(State(state): State<AppState>) -> impl IntoResponse {
    state.monitor.refresh_all();
    StatusCode::NO_CONTENT
}

pub async fn handle_resume(State(state): State<AppState>) -> impl IntoResponse {
    state.monitor.on_resume();
    StatusCode::NO_CONTENT
}

// ============================================================================
// API: Statistics
// ============================================================================

pub async fn handle_get_summaries(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.summarize_all())
}

pub async fn handle_get_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.monitor.summarize(&id) {
        Some(summary) => Json(summary).into_response(),
        None => (StatusCode::NOT_FOUND, "Target not found").into_response(),
    }
}

// ============================================================================
// API: Probing
// ============================================================================

/// Probe an arbitrary target once without recording the result.
pub async fn handle_probe(
    State(state): State<AppState>,
    Json(target): Json<Target>,
) -> impl IntoResponse {
    if target.host.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Target host must not be empty").into_response();
    }
    Json(state.monitor.probe_once(&target).await).into_response()
}

pub async fn handle_capabilities(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.capabilities())
}

/// Live results as server-sent events named `probe`.
pub async fn handle_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let events = state
        .monitor
        .subscribe()
        .into_stream()
        .map(|result| Event::default().event("probe").json_data(result));

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub scheduler: crate::scheduler::SchedulerState,
    pub targets: usize,
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        scheduler: state.monitor.state(),
        targets: state.monitor.targets().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{Monitor, MonitorConfig};
    use crate::probe::testing::FakeProber;
    use crate::registry::TargetStore;
    use crate::web::router;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use axum::Router;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Fixture {
        app: Router,
        monitor: Arc<Monitor>,
        store: TargetStore,
        _dir: TempDir,
    }

    fn fixture(targets: Vec<Target>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = TargetStore::new(dir.path().join("targets.json"));
        let monitor = Arc::new(
            Monitor::with_prober(MonitorConfig::default(), targets, Arc::new(FakeProber::new(5.0))).unwrap(),
        );
        let app = router(AppState {
            monitor: monitor.clone(),
            store: store.clone(),
        });
        Fixture {
            app,
            monitor,
            store,
            _dir: dir,
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_get_targets() {
        let fx = fixture(vec![Target::tcp("web", "example.com", 443)]);
        let (status, json) = send(&fx.app, "GET", "/api/targets", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["id"], "web");
        assert_eq!(json[0]["probe_type"], "tcp");
    }

    #[tokio::test]
    async fn test_put_targets_saves_and_applies() {
        let fx = fixture(vec![Target::tcp("old", "example.com", 443)]);
        let body = serde_json::json!([
            {"id": "gw", "name": "Gateway", "host": "192.168.1.1", "probe_type": "icmp"},
            {"id": "dns", "name": "DNS", "host": "1.1.1.1", "port": 53}
        ]);

        let (status, json) = send(&fx.app, "PUT", "/api/targets", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["removed"][0], "old");

        let saved = fx.store.load().unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(*fx.monitor.targets(), saved);
    }

    #[tokio::test]
    async fn test_put_duplicate_ids_is_rejected_without_saving() {
        let fx = fixture(vec![Target::tcp("old", "example.com", 443)]);
        let body = serde_json::json!([
            {"id": "x", "name": "X", "host": "a", "port": 1},
            {"id": "x", "name": "X", "host": "b", "port": 2}
        ]);

        let (status, _) = send(&fx.app, "PUT", "/api/targets", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!fx.store.path().exists());
        assert_eq!(fx.monitor.targets()[0].id, "old");
    }

    #[tokio::test]
    async fn test_summary_routes() {
        let fx = fixture(vec![Target::tcp("web", "example.com", 443)]);

        let (status, json) = send(&fx.app, "GET", "/api/summary/web", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["health"], "unknown");
        assert_eq!(json["samples"], 0);
        assert!(json["success_rate"].is_null());

        let (status, _) = send(&fx.app, "GET", "/api/summary/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = send(&fx.app, "GET", "/api/summary", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["target_id"], "web");
    }

    #[tokio::test]
    async fn test_refresh_routes() {
        let fx = fixture(vec![Target::tcp("web", "example.com", 443)]);

        let (status, _) = send(&fx.app, "POST", "/api/targets/web/refresh", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&fx.app, "POST", "/api/targets/nope/refresh", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&fx.app, "POST", "/api/refresh", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&fx.app, "POST", "/api/resume", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_probe_once_route() {
        let fx = fixture(vec![]);
        let body = serde_json::json!({"id": "adhoc", "name": "Ad hoc", "host": "example.com", "port": 80});

        let (status, json) = send(&fx.app, "POST", "/api/probe", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
        assert_eq!(json["latency_ms"], 5.0);
        assert_eq!(json["endpoint"]["host"], "example.com");

        let empty = serde_json::json!({"id": "adhoc", "name": "Ad hoc", "host": " ", "port": 80});
        let (status, _) = send(&fx.app, "POST", "/api/probe", Some(empty)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_and_capabilities() {
        let fx = fixture(vec![Target::icmp("gw", "192.168.1.1")]);

        let (status, json) = send(&fx.app, "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["scheduler"]["state"], "stopped");
        assert_eq!(json["targets"], 1);

        let (status, json) = send(&fx.app, "GET", "/api/capabilities", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["tcp"], true);
        assert_eq!(json["icmp"], "unavailable");
    }

    #[tokio::test]
    async fn test_events_is_an_event_stream() {
        let fx = fixture(vec![]);
        let request = Request::builder().uri("/api/events").body(Body::empty()).unwrap();
        let response = fx.app.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/event-stream"));
    }
}
