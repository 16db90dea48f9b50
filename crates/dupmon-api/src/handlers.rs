//! HTTP handlers.
//!
//! The webhook answers in plain text because the backup tool only logs the
//! status line. Inspection routes use the `{success, data, error}` JSON
//! envelope.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use tracing::{debug, error, info, warn};

use dupmon_events::parse_report;
use dupmon_metrics::{CONTENT_TYPE, render_metrics};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Webhook ────────────────────────────────────────────────────

/// POST /
pub async fn receive_report(State(state): State<ApiState>, body: Bytes) -> impl IntoResponse {
    let report = match parse_report(&body, state.policy) {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "rejected webhook payload");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let backup = report.backup_name.clone();
    let result = report.result.clone();
    match state.engine.record_report(report) {
        Ok(()) => {
            info!(%backup, %result, "recorded backup report");
            (StatusCode::OK, "processed").into_response()
        }
        Err(e) => {
            error!(%backup, %result, error = %e, "engine rejected backup report");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    match render_metrics(&state.registry) {
        Ok(body) => {
            debug!(series = state.engine.len(), "served metrics scrape");
            (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

// ── Inspection ─────────────────────────────────────────────────

/// GET /api/v1/backups
pub async fn list_backups(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.engine.snapshots())
}

/// GET /api/v1/backups/{name}
pub async fn get_backup(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.engine.snapshot(&name) {
        Some(snapshot) => ApiResponse::ok(snapshot).into_response(),
        None => error_response("backup not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use dupmon_events::{MissingResultPolicy, ResultState};
    use dupmon_metrics::MetricsEngine;

    fn test_state() -> ApiState {
        let engine = Arc::new(MetricsEngine::new(Duration::from_secs(30)).unwrap());
        ApiState::new(engine, MissingResultPolicy::default())
    }

    fn webhook(name: &str, result: &str) -> Bytes {
        Bytes::from(
            serde_json::json!({
                "Extra": { "backup-name": name },
                "Data": {
                    "ParsedResult": result,
                    "AddedFiles": "5",
                    "SizeOfAddedFiles": "100",
                }
            })
            .to_string(),
        )
    }

    async fn body_text(resp: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn webhook_records_report() {
        let state = test_state();
        let resp = receive_report(State(state.clone()), webhook("nightly", "Success"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "processed");

        let snapshot = state.engine.snapshot("nightly").unwrap();
        assert_eq!(snapshot.counts.get(&ResultState::Success), Some(&1));
        let files = snapshot.files.unwrap();
        assert_eq!(files.added.count, 5);
        assert_eq!(files.added.size, Some(100));
    }

    #[tokio::test]
    async fn webhook_without_name_is_rejected() {
        let state = test_state();
        let body = Bytes::from_static(br#"{"Extra": {}, "Data": {"ParsedResult": "Success"}}"#);
        let resp = receive_report(State(state.clone()), body).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(resp).await, "Invalid json. No backup name found");
        assert!(state.engine.is_empty());
    }

    #[tokio::test]
    async fn webhook_with_garbage_body_is_rejected() {
        let state = test_state();
        let resp = receive_report(State(state.clone()), Bytes::from_static(b"not json"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(resp).await.starts_with("Invalid json."));
        assert!(state.engine.is_empty());
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_openmetrics() {
        let state = test_state();
        state.engine.preseed("weekly").unwrap();
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("application/openmetrics-text"));

        let body = body_text(resp).await;
        assert!(body.contains("duplicati_backup_result_count_total{backup=\"weekly\",result=\"Success\"} 0"));
    }

    #[tokio::test]
    async fn list_backups_returns_snapshots() {
        let state = test_state();
        state.engine.preseed("a").unwrap();
        state.engine.preseed("b").unwrap();
        let resp = list_backups(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"].as_array().unwrap().len(), 2);
        assert_eq!(json["data"][0]["backup_name"], "a");
    }

    #[tokio::test]
    async fn get_nonexistent_backup() {
        let state = test_state();
        let resp = get_backup(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "backup not found");
    }

    #[tokio::test]
    async fn get_backup_reports_ratio_as_of_last_report() {
        let state = test_state();
        receive_report(State(state.clone()), webhook("nightly", "Error")).await;

        let resp = get_backup(State(state), Path("nightly".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["data"]["success_ratio"], 0.0);
        assert_eq!(json["data"]["counts"]["Error"], 1);
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        assert_eq!(healthz().await, "ok");
    }
}
