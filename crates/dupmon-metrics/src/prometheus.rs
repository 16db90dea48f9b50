//! OpenMetrics text exposition.
//!
//! Wires a [`BackupCollector`] into a `prometheus_client` registry and
//! renders it for scraping by a Prometheus server or compatible agent.

use std::fmt;
use std::sync::Arc;

use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;

use crate::collector::BackupCollector;
use crate::engine::MetricsEngine;

/// Content type of [`render_metrics`] output.
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Build a registry exposing every series in `engine`.
pub fn build_registry(engine: Arc<MetricsEngine>) -> Registry {
    let mut registry = Registry::default();
    registry.register_collector(Box::new(BackupCollector::new(engine)));
    registry
}

/// Render the registry in OpenMetrics text format.
pub fn render_metrics(registry: &Registry) -> Result<String, fmt::Error> {
    let mut out = String::new();
    encode(&mut out, registry)?;
    Ok(out)
}
