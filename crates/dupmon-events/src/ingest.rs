//! Webhook payload validation.
//!
//! Parses the JSON body posted by the backup tool into a [`BackupReport`].
//! Every check runs before a report is built, so a rejected payload never
//! yields partial data.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ValidationError, ValidationResult};
use crate::types::{BackupReport, FileOperation, FileStats, ResultState};

/// Section holding job metadata, including the backup name.
const EXTRA_KEY: &str = "Extra";
/// Section holding the run outcome and file statistics.
const DATA_KEY: &str = "Data";
const BACKUP_NAME_KEY: &str = "backup-name";
const RESULT_KEY: &str = "ParsedResult";

/// What to do with a report that names a backup but carries no result.
///
/// The backup tool posts an exception report (no `ParsedResult`) when a job
/// aborts before producing results. Such reports are rejected unless the
/// operator opts into counting them as failed runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingResultPolicy {
    /// Reject with [`ValidationError::MissingResult`].
    #[default]
    Reject,
    /// Record the report as [`ResultState::Fatal`].
    #[serde(rename = "fatal")]
    InferFatal,
}

impl fmt::Display for MissingResultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingResultPolicy::Reject => f.write_str("reject"),
            MissingResultPolicy::InferFatal => f.write_str("fatal"),
        }
    }
}

impl FromStr for MissingResultPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(MissingResultPolicy::Reject),
            "fatal" | "infer-fatal" => Ok(MissingResultPolicy::InferFatal),
            other => Err(format!(
                "unknown missing-result policy '{other}' (expected 'reject' or 'fatal')"
            )),
        }
    }
}

/// Parse and validate a raw request body.
pub fn parse_report(body: &[u8], policy: MissingResultPolicy) -> ValidationResult<BackupReport> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| ValidationError::Malformed(format!("body is not valid JSON: {e}")))?;
    validate(&payload, policy)
}

/// Validate an already-decoded payload.
///
/// The backup name is checked first, so a payload missing both required
/// fields reports the missing name.
pub fn validate(payload: &Value, policy: MissingResultPolicy) -> ValidationResult<BackupReport> {
    let root = payload
        .as_object()
        .ok_or_else(|| ValidationError::Malformed("top level must be an object".to_string()))?;

    let backup_name = section(root, EXTRA_KEY)
        .and_then(|extra| non_empty_str(extra, BACKUP_NAME_KEY))
        .ok_or(ValidationError::MissingBackupName)?;

    let data = section(root, DATA_KEY);

    let result = match data.and_then(|d| non_empty_str(d, RESULT_KEY)) {
        Some(raw) => ResultState::from(raw.to_string()),
        None => match policy {
            MissingResultPolicy::Reject => return Err(ValidationError::MissingResult),
            MissingResultPolicy::InferFatal => {
                debug!(backup = backup_name, "no result in report, recording as Fatal");
                ResultState::Fatal
            }
        },
    };

    let file_stats = match data {
        Some(d) => parse_file_stats(d)?,
        None => FileStats::default(),
    };

    Ok(BackupReport {
        backup_name: backup_name.to_string(),
        result,
        file_stats,
    })
}

fn section<'a>(root: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    root.get(key).and_then(Value::as_object)
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn parse_file_stats(data: &Map<String, Value>) -> ValidationResult<FileStats> {
    let mut stats = FileStats::default();
    for op in FileOperation::ALL {
        let stat = stats.get_mut(op);
        stat.count = parse_stat(data, op.count_key())?;
        if let Some(size_key) = op.size_key() {
            stat.size = Some(parse_stat(data, size_key)?);
        }
    }
    Ok(stats)
}

/// Read one number-like stat field. Absent and `null` both mean zero.
fn parse_stat(data: &Map<String, Value>, field: &'static str) -> ValidationResult<u64> {
    let bad = || ValidationError::BadStat { field };
    match data.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_u64() {
                return Ok(v);
            }
            // Integral floats such as `5.0` are accepted; `-1` and `2.5` are not.
            match n.as_f64() {
                Some(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
                    Ok(f as u64)
                }
                _ => Err(bad()),
            }
        }
        Some(Value::String(s)) => s.trim().parse::<u64>().map_err(|_| bad()),
        Some(_) => Err(bad()),
    }
}
