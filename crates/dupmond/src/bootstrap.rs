//! Startup pre-seeding from the backup server.

use std::time::Duration;

use tracing::{debug, info, warn};

use dupmon_metrics::MetricsEngine;
use dupmon_preseed::DuplicatiClient;

/// Register a zero-valued series for every backup the server knows about.
///
/// Failures are logged and swallowed: series are then created on the first
/// webhook instead. Returns the number of series newly registered.
pub async fn seed_engine(engine: &MetricsEngine, base_url: &str, timeout: Duration) -> usize {
    let client = match DuplicatiClient::new(base_url) {
        Ok(client) => client,
        Err(e) => {
            warn!(url = base_url, error = %e, "cannot pre-seed from backup server");
            return 0;
        }
    };

    let names = match tokio::time::timeout(timeout, client.backup_names()).await {
        Ok(Ok(names)) => names,
        Ok(Err(e)) => {
            warn!(url = base_url, error = %e, "failed to fetch backup names, continuing without pre-seed");
            return 0;
        }
        Err(_) => {
            warn!(url = base_url, ?timeout, "timed out fetching backup names, continuing without pre-seed");
            return 0;
        }
    };

    let mut seeded = 0;
    for name in &names {
        match engine.preseed(name) {
            Ok(true) => {
                debug!(backup = %name, "pre-seeded backup");
                seeded += 1;
            }
            Ok(false) => {}
            Err(e) => warn!(backup = %name, error = %e, "skipping backup name"),
        }
    }
    info!(listed = names.len(), seeded, "pre-seed complete");
    seeded
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::Router;
    use axum::http::header;
    use axum::routing::get;
    use chrono::Utc;
    use dupmon_events::{BackupReport, FileStats, ResultState};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn backup_server(names: &'static str) -> Router {
        Router::new()
            .route(
                "/",
                get(|| async { ([(header::SET_COOKIE, "xsrf-token=t0k3n; Path=/")], "ok") }),
            )
            .route("/api/v1/backups", get(move || async move { names }))
    }

    fn engine() -> MetricsEngine {
        MetricsEngine::new(Duration::from_secs(30)).unwrap()
    }

    #[tokio::test]
    async fn seeds_every_listed_backup() {
        let base = serve(backup_server(
            r#"[{"Backup": {"Name": "nightly"}}, {"Backup": {"Name": "weekly"}}]"#,
        ))
        .await;
        let engine = engine();

        let seeded = seed_engine(&engine, &base, Duration::from_secs(5)).await;
        assert_eq!(seeded, 2);
        assert_eq!(engine.backup_names(), vec!["nightly", "weekly"]);
        let snapshot = engine.snapshot("weekly").unwrap();
        assert!(snapshot.counts.values().all(|&c| c == 0));
    }

    #[tokio::test]
    async fn existing_series_are_left_alone() {
        let base = serve(backup_server(r#"[{"Backup": {"Name": "nightly"}}]"#)).await;
        let engine = engine();
        engine
            .record_event(
                &BackupReport {
                    backup_name: "nightly".to_string(),
                    result: ResultState::Success,
                    file_stats: FileStats::default(),
                }
                .observed_at(Utc::now()),
            )
            .unwrap();

        let seeded = seed_engine(&engine, &base, Duration::from_secs(5)).await;
        assert_eq!(seeded, 0);
        let snapshot = engine.snapshot("nightly").unwrap();
        assert_eq!(snapshot.counts.get(&ResultState::Success), Some(&1));
    }

    #[tokio::test]
    async fn empty_names_are_skipped() {
        let base = serve(backup_server(
            r#"[{"Backup": {"Name": ""}}, {"Backup": {"Name": "docs"}}]"#,
        ))
        .await;
        let engine = engine();

        assert_eq!(seed_engine(&engine, &base, Duration::from_secs(5)).await, 1);
        assert_eq!(engine.backup_names(), vec!["docs"]);
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let router = Router::new().route(
            "/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "too late"
            }),
        );
        let base = serve(router).await;
        let engine = engine();

        let seeded = seed_engine(&engine, &base, Duration::from_millis(100)).await;
        assert_eq!(seeded, 0);
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn unusable_url_is_not_fatal() {
        let engine = engine();
        assert_eq!(
            seed_engine(&engine, "ftp://backup-host/", Duration::from_secs(1)).await,
            0
        );
        assert!(engine.is_empty());
    }
}
