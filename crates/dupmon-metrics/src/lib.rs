//! dupmon-metrics — the metrics state engine behind dupmon.
//!
//! Turns a stream of backup events into per-backup series: cumulative
//! result counters, a sliding window of recent activity, the last file
//! statistics, and a success ratio that holds its value while idle.
//!
//! # Architecture
//!
//! ```text
//! MetricsEngine
//!   ├── record_event() ← called per webhook
//!   ├── preseed()      ← called at startup per known backup
//!   ├── prune()        ← RetentionMaintainer, every tick
//!   └── snapshot() / compute_success_ratio()
//!
//! BackupCollector (prometheus_client Collector)
//!   └── reads the engine at scrape time → render_metrics() for /metrics
//! ```

pub mod collector;
pub mod engine;
pub mod error;
pub mod maintainer;
pub mod prometheus;

pub use collector::BackupCollector;
pub use engine::{MetricsEngine, PruneStats, SeriesSnapshot};
pub use error::{EngineError, EngineResult};
pub use maintainer::RetentionMaintainer;
pub use prometheus::{CONTENT_TYPE, build_registry, render_metrics};
