//! dupmon-api — HTTP surface for dupmon.
//!
//! Receives backup-completion webhooks, serves the OpenMetrics scrape
//! endpoint, and exposes read-only JSON views of the engine.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/` | Webhook from the backup tool |
//! | GET | `/metrics` | OpenMetrics exposition |
//! | GET | `/api/v1/backups` | Snapshot of every series |
//! | GET | `/api/v1/backups/{name}` | Snapshot of one series |
//! | GET | `/healthz` | Liveness probe |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use prometheus_client::registry::Registry;

use dupmon_events::MissingResultPolicy;
use dupmon_metrics::{MetricsEngine, build_registry};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<MetricsEngine>,
    pub registry: Arc<Registry>,
    pub policy: MissingResultPolicy,
}

impl ApiState {
    /// State whose registry exposes `engine`.
    pub fn new(engine: Arc<MetricsEngine>, policy: MissingResultPolicy) -> Self {
        let registry = Arc::new(build_registry(Arc::clone(&engine)));
        Self {
            engine,
            registry,
            policy,
        }
    }
}

/// Build the complete router (webhook + metrics + inspection).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/backups", get(handlers::list_backups))
        .route("/backups/{name}", get(handlers::get_backup))
        .with_state(state.clone());

    Router::new()
        .route("/", post(handlers::receive_report))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
        .nest("/api/v1", api_routes)
}
