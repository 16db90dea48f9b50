//! Scrape-time collector. Reads the engine whenever `/metrics` is scraped.
//!
//! Nothing is cached between scrapes. Each scrape walks the registry by key,
//! takes one snapshot per backup and recomputes its success ratio. Gauges
//! for different backups, or even for one backup, may reflect slightly
//! different instants when events arrive mid-scrape.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeLabelSet, EncodeMetric};
use prometheus_client::metrics::MetricType;
use prometheus_client::metrics::counter::ConstCounter;
use prometheus_client::metrics::gauge::ConstGauge;

use crate::engine::{MetricsEngine, SeriesSnapshot};

pub const RESULT_COUNT: &str = "duplicati_backup_result_count";
pub const RESULT_RECENT: &str = "duplicati_backup_result_recent_gauge";
pub const SUCCESS_RATIO: &str = "duplicati_backup_result_last_success_percent_gauge";
pub const FILES: &str = "duplicati_files";
pub const FILES_SIZE: &str = "duplicati_files_size";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResultLabels {
    backup: String,
    result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BackupLabels {
    backup: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OperationLabels {
    backup: String,
    operation: String,
}

/// One backup's values as read during a single scrape.
struct Reading {
    snapshot: SeriesSnapshot,
    success_ratio: f64,
}

/// Exposes every series in a [`MetricsEngine`] to a prometheus registry.
#[derive(Debug)]
pub struct BackupCollector {
    engine: Arc<MetricsEngine>,
}

impl BackupCollector {
    pub fn new(engine: Arc<MetricsEngine>) -> Self {
        Self { engine }
    }

    fn read(&self, now: DateTime<Utc>) -> Vec<Reading> {
        self.engine
            .backup_names()
            .into_iter()
            .filter_map(|name| {
                let snapshot = self.engine.snapshot(&name)?;
                let success_ratio = self.engine.compute_success_ratio(&name, now)?;
                Some(Reading {
                    snapshot,
                    success_ratio,
                })
            })
            .collect()
    }
}

impl Collector for BackupCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), fmt::Error> {
        let readings = self.read(Utc::now());

        let mut family = encoder.encode_descriptor(
            RESULT_COUNT,
            "Count of backups that have run",
            None,
            MetricType::Counter,
        )?;
        for r in &readings {
            for (state, count) in &r.snapshot.counts {
                let labels = ResultLabels {
                    backup: r.snapshot.backup_name.clone(),
                    result: state.to_string(),
                };
                ConstCounter::new(*count).encode(family.encode_family(&labels)?)?;
            }
        }

        let mut family = encoder.encode_descriptor(
            RESULT_RECENT,
            "Count of backups that occurred within the recent window. Returns to 0 once the window is empty",
            None,
            MetricType::Gauge,
        )?;
        for r in &readings {
            for state in r.snapshot.counts.keys() {
                let recent = r.snapshot.recent.get(state).copied().unwrap_or(0);
                let labels = ResultLabels {
                    backup: r.snapshot.backup_name.clone(),
                    result: state.to_string(),
                };
                ConstGauge::new(saturating_i64(recent as u64)).encode(family.encode_family(&labels)?)?;
            }
        }

        let mut family = encoder.encode_descriptor(
            SUCCESS_RATIO,
            "Ratio (0.0-1.0) of Success vs non-Success backups in the recent window, holding the last value while idle",
            None,
            MetricType::Gauge,
        )?;
        for r in &readings {
            let labels = BackupLabels {
                backup: r.snapshot.backup_name.clone(),
            };
            ConstGauge::new(r.success_ratio).encode(family.encode_family(&labels)?)?;
        }

        let mut family = encoder.encode_descriptor(
            FILES,
            "Number of files per operation in the last backup",
            None,
            MetricType::Gauge,
        )?;
        for r in &readings {
            let Some(files) = &r.snapshot.files else { continue };
            for (op, stat) in files.iter() {
                let labels = OperationLabels {
                    backup: r.snapshot.backup_name.clone(),
                    operation: op.to_string(),
                };
                ConstGauge::new(saturating_i64(stat.count)).encode(family.encode_family(&labels)?)?;
            }
        }

        let mut family = encoder.encode_descriptor(
            FILES_SIZE,
            "Size in bytes of files per operation in the last backup",
            None,
            MetricType::Gauge,
        )?;
        for r in &readings {
            let Some(files) = &r.snapshot.files else { continue };
            for (op, stat) in files.iter() {
                let Some(size) = stat.size else { continue };
                let labels = OperationLabels {
                    backup: r.snapshot.backup_name.clone(),
                    operation: op.to_string(),
                };
                ConstGauge::new(saturating_i64(size)).encode(family.encode_family(&labels)?)?;
            }
        }

        Ok(())
    }
}

fn saturating_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
