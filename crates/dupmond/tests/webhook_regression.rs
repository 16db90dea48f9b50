//! End-to-end regression tests.
//!
//! Drives the full router the daemon serves: webhook in, OpenMetrics out.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeDelta, Utc};
use tokio::sync::watch;
use tower::ServiceExt;

use dupmon_api::{ApiState, build_router};
use dupmon_events::{MissingResultPolicy, ResultState};
use dupmon_metrics::{MetricsEngine, RetentionMaintainer};

fn app(window: Duration, policy: MissingResultPolicy) -> (Arc<MetricsEngine>, Router) {
    let engine = Arc::new(MetricsEngine::new(window).unwrap());
    let router = build_router(ApiState::new(Arc::clone(&engine), policy));
    (engine, router)
}

fn default_app() -> (Arc<MetricsEngine>, Router) {
    app(Duration::from_secs(30), MissingResultPolicy::Reject)
}

async fn post(router: &Router, body: serde_json::Value) -> (StatusCode, String) {
    let req = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn scrape(router: &Router) -> String {
    let req = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Value of the sample whose name and labels are exactly `series`.
fn sample(output: &str, series: &str) -> Option<f64> {
    output
        .lines()
        .find_map(|line| line.strip_prefix(series)?.strip_prefix(' '))
        .and_then(|v| v.trim().parse().ok())
}

fn report(name: &str, result: &str) -> serde_json::Value {
    serde_json::json!({
        "Extra": { "backup-name": name, "OperationName": "Backup" },
        "Data": { "ParsedResult": result }
    })
}

#[tokio::test]
async fn successful_report_is_exposed() {
    let (engine, router) = default_app();

    let (status, body) = post(
        &router,
        serde_json::json!({
            "Extra": { "backup-name": "nightly" },
            "Data": {
                "ParsedResult": "Success",
                "AddedFiles": "5",
                "SizeOfAddedFiles": "100"
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "processed");

    let metrics = scrape(&router).await;
    assert_eq!(
        sample(
            &metrics,
            "duplicati_backup_result_count_total{backup=\"nightly\",result=\"Success\"}"
        ),
        Some(1.0)
    );
    assert_eq!(
        sample(&metrics, "duplicati_files{backup=\"nightly\",operation=\"added\"}"),
        Some(5.0)
    );
    assert_eq!(
        sample(&metrics, "duplicati_files_size{backup=\"nightly\",operation=\"added\"}"),
        Some(100.0)
    );
    assert_eq!(
        sample(
            &metrics,
            "duplicati_backup_result_last_success_percent_gauge{backup=\"nightly\"}"
        ),
        Some(1.0)
    );
    assert_eq!(engine.len(), 1);
}

#[tokio::test]
async fn report_without_backup_name_is_rejected() {
    let (engine, router) = default_app();

    let (status, body) = post(
        &router,
        serde_json::json!({
            "Extra": { "OperationName": "Backup" },
            "Data": { "ParsedResult": "Success" }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Invalid json. No backup name found");
    assert!(engine.is_empty());
    assert!(!scrape(&router).await.contains("backup=\""));
}

#[tokio::test]
async fn report_without_result_is_rejected() {
    let (engine, router) = default_app();

    let (status, body) = post(
        &router,
        serde_json::json!({
            "Extra": { "backup-name": "nightly" },
            "Data": { "AddedFiles": 3 }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Invalid json. No result found");
    assert!(engine.is_empty());
}

#[tokio::test]
async fn rejected_report_leaves_existing_series_untouched() {
    let (engine, router) = default_app();
    post(&router, report("nightly", "Warning")).await;
    let before = engine.snapshot("nightly").unwrap();

    let (status, _) = post(
        &router,
        serde_json::json!({
            "Extra": { "backup-name": "nightly" },
            "Data": { "ParsedResult": "Success", "AddedFiles": "lots" }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(engine.snapshot("nightly").unwrap(), before);
}

#[tokio::test]
async fn missing_result_counts_as_fatal_when_enabled() {
    let (engine, router) = app(Duration::from_secs(30), MissingResultPolicy::InferFatal);

    let (status, _) = post(
        &router,
        serde_json::json!({
            "Extra": { "backup-name": "nightly" },
            "Exception": "disk full"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let snapshot = engine.snapshot("nightly").unwrap();
    assert_eq!(snapshot.counts.get(&ResultState::Fatal), Some(&1));
}

#[tokio::test]
async fn expired_failure_keeps_last_ratio() {
    let (engine, router) = default_app();

    let (status, _) = post(&router, report("weekly", "Error")).await;
    assert_eq!(status, StatusCode::OK);

    // Scrape while the failure is still recent.
    let metrics = scrape(&router).await;
    assert_eq!(
        sample(
            &metrics,
            "duplicati_backup_result_recent_gauge{backup=\"weekly\",result=\"Error\"}"
        ),
        Some(1.0)
    );
    assert_eq!(
        sample(
            &metrics,
            "duplicati_backup_result_last_success_percent_gauge{backup=\"weekly\"}"
        ),
        Some(0.0)
    );

    // Move past the window and sweep.
    let later = Utc::now() + engine.window() + TimeDelta::seconds(1);
    let maintainer = RetentionMaintainer::new(Arc::clone(&engine), Duration::from_secs(1)).unwrap();
    let stats = maintainer.sweep(later).unwrap();
    assert_eq!(stats.removed, 1);

    let metrics = scrape(&router).await;
    assert_eq!(
        sample(
            &metrics,
            "duplicati_backup_result_recent_gauge{backup=\"weekly\",result=\"Error\"}"
        ),
        Some(0.0)
    );
    assert_eq!(
        sample(
            &metrics,
            "duplicati_backup_result_last_success_percent_gauge{backup=\"weekly\"}"
        ),
        Some(0.0)
    );
    assert_eq!(
        sample(
            &metrics,
            "duplicati_backup_result_count_total{backup=\"weekly\",result=\"Error\"}"
        ),
        Some(1.0)
    );
}

#[tokio::test]
async fn failure_expired_before_first_scrape_keeps_zero_ratio() {
    let (engine, router) = default_app();

    let (status, _) = post(&router, report("weekly", "Error")).await;
    assert_eq!(status, StatusCode::OK);

    // Sweep past the window with no scrape in between.
    let later = Utc::now() + engine.window() + TimeDelta::seconds(1);
    let maintainer = RetentionMaintainer::new(Arc::clone(&engine), Duration::from_secs(1)).unwrap();
    assert_eq!(maintainer.sweep(later).unwrap().removed, 1);

    let metrics = scrape(&router).await;
    assert_eq!(
        sample(
            &metrics,
            "duplicati_backup_result_recent_gauge{backup=\"weekly\",result=\"Error\"}"
        ),
        Some(0.0)
    );
    assert_eq!(
        sample(
            &metrics,
            "duplicati_backup_result_last_success_percent_gauge{backup=\"weekly\"}"
        ),
        Some(0.0)
    );
}

#[tokio::test]
async fn running_maintainer_empties_window() {
    let (engine, router) = app(Duration::from_millis(100), MissingResultPolicy::Reject);
    let maintainer =
        RetentionMaintainer::new(Arc::clone(&engine), Duration::from_millis(20)).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { maintainer.run(shutdown_rx).await });

    post(&router, report("hourly", "Success")).await;
    post(&router, report("hourly", "Error")).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    let snapshot = engine.snapshot("hourly").unwrap();
    assert!(snapshot.recent.values().all(|&n| n == 0), "{snapshot:?}");
    assert_eq!(snapshot.counts.values().sum::<u64>(), 2);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn concurrent_reports_are_all_counted() {
    let (engine, router) = default_app();

    let mut tasks = Vec::new();
    for i in 0..50 {
        let router = router.clone();
        let result = if i % 5 == 0 { "Error" } else { "Success" };
        let name = format!("job-{}", i % 3);
        tasks.push(tokio::spawn(async move {
            post(&router, report(&name, result)).await.0
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::OK);
    }

    let total: u64 = engine
        .snapshots()
        .iter()
        .flat_map(|s| s.counts.values())
        .sum();
    assert_eq!(total, 50);
    let errors: u64 = engine
        .snapshots()
        .iter()
        .filter_map(|s| s.counts.get(&ResultState::Error))
        .sum();
    assert_eq!(errors, 10);
}

#[tokio::test]
async fn preseeded_backups_scrape_as_zero() {
    let (engine, router) = default_app();
    engine.preseed("offsite").unwrap();
    engine.preseed("offsite").unwrap();

    let metrics = scrape(&router).await;
    for state in ResultState::KNOWN {
        let series = format!(
            "duplicati_backup_result_count_total{{backup=\"offsite\",result=\"{state}\"}}"
        );
        assert_eq!(sample(&metrics, &series), Some(0.0), "missing {series}");
    }
}
