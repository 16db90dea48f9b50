//! Domain types for backup reports.
//!
//! A [`BackupReport`] is what a validated webhook payload says about one
//! backup run. Once the engine side stamps it with an arrival instant it
//! becomes a [`BackupEvent`], the unit the metrics engine records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Result state ──────────────────────────────────────────────────

/// Outcome of a backup run as reported by the backup tool.
///
/// The four named variants form the closed set that gets pre-seeded.
/// Anything else the tool reports is kept verbatim in `Other` and still
/// counted, it just never appears before it is first seen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ResultState {
    Success,
    Warning,
    Error,
    Fatal,
    Other(String),
}

impl ResultState {
    /// The closed set, in exposition order.
    pub const KNOWN: [ResultState; 4] = [
        ResultState::Success,
        ResultState::Warning,
        ResultState::Error,
        ResultState::Fatal,
    ];

    /// Label value used on the wire and in metrics.
    pub fn as_str(&self) -> &str {
        match self {
            ResultState::Success => "Success",
            ResultState::Warning => "Warning",
            ResultState::Error => "Error",
            ResultState::Fatal => "Fatal",
            ResultState::Other(s) => s,
        }
    }
}

impl fmt::Display for ResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ResultState::from(s.to_string()))
    }
}

impl From<String> for ResultState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Success" => ResultState::Success,
            "Warning" => ResultState::Warning,
            "Error" => ResultState::Error,
            "Fatal" => ResultState::Fatal,
            _ => ResultState::Other(s),
        }
    }
}

impl From<ResultState> for String {
    fn from(state: ResultState) -> Self {
        match state {
            ResultState::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

// ── File statistics ───────────────────────────────────────────────

/// File operations the backup tool reports statistics for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Added,
    Deleted,
    Modified,
    Examined,
    Opened,
}

impl FileOperation {
    pub const ALL: [FileOperation; 5] = [
        FileOperation::Added,
        FileOperation::Deleted,
        FileOperation::Modified,
        FileOperation::Examined,
        FileOperation::Opened,
    ];

    /// Label value for the `operation` label.
    pub fn as_str(self) -> &'static str {
        match self {
            FileOperation::Added => "added",
            FileOperation::Deleted => "deleted",
            FileOperation::Modified => "modified",
            FileOperation::Examined => "examined",
            FileOperation::Opened => "opened",
        }
    }

    /// Payload key under `Data` holding the file count.
    pub fn count_key(self) -> &'static str {
        match self {
            FileOperation::Added => "AddedFiles",
            FileOperation::Deleted => "DeletedFiles",
            FileOperation::Modified => "ModifiedFiles",
            FileOperation::Examined => "ExaminedFiles",
            FileOperation::Opened => "OpenedFiles",
        }
    }

    /// Payload key under `Data` holding the byte size, if the tool reports one.
    ///
    /// Deleted files carry no size.
    pub fn size_key(self) -> Option<&'static str> {
        match self {
            FileOperation::Added => Some("SizeOfAddedFiles"),
            FileOperation::Deleted => None,
            FileOperation::Modified => Some("SizeOfModifiedFiles"),
            FileOperation::Examined => Some("SizeOfExaminedFiles"),
            FileOperation::Opened => Some("SizeOfOpenedFiles"),
        }
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Count and size for one file operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub count: u64,
    /// `None` for operations without a reported size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// File statistics for all operations of one backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    pub added: FileStat,
    pub deleted: FileStat,
    pub modified: FileStat,
    pub examined: FileStat,
    pub opened: FileStat,
}

impl Default for FileStats {
    /// All zero, with a zero size for every operation that reports one.
    fn default() -> Self {
        let mut stats = Self {
            added: FileStat::default(),
            deleted: FileStat::default(),
            modified: FileStat::default(),
            examined: FileStat::default(),
            opened: FileStat::default(),
        };
        for op in FileOperation::ALL {
            if op.size_key().is_some() {
                stats.get_mut(op).size = Some(0);
            }
        }
        stats
    }
}

impl FileStats {
    pub fn get(&self, op: FileOperation) -> &FileStat {
        match op {
            FileOperation::Added => &self.added,
            FileOperation::Deleted => &self.deleted,
            FileOperation::Modified => &self.modified,
            FileOperation::Examined => &self.examined,
            FileOperation::Opened => &self.opened,
        }
    }

    pub fn get_mut(&mut self, op: FileOperation) -> &mut FileStat {
        match op {
            FileOperation::Added => &mut self.added,
            FileOperation::Deleted => &mut self.deleted,
            FileOperation::Modified => &mut self.modified,
            FileOperation::Examined => &mut self.examined,
            FileOperation::Opened => &mut self.opened,
        }
    }

    /// Iterate `(operation, stat)` pairs in [`FileOperation::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (FileOperation, &FileStat)> {
        FileOperation::ALL.into_iter().map(|op| (op, self.get(op)))
    }
}

// ── Reports and events ────────────────────────────────────────────

/// A validated backup report, not yet stamped with an arrival time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupReport {
    /// Stable key identifying the backup job.
    pub backup_name: String,
    pub result: ResultState,
    pub file_stats: FileStats,
}

impl BackupReport {
    /// Stamp this report with the instant it was observed.
    pub fn observed_at(self, observed_at: DateTime<Utc>) -> BackupEvent {
        BackupEvent {
            backup_name: self.backup_name,
            result: self.result,
            file_stats: self.file_stats,
            observed_at,
        }
    }
}

/// A backup report as recorded by the metrics engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEvent {
    pub backup_name: String,
    pub result: ResultState,
    pub file_stats: FileStats,
    /// Arrival instant assigned on the receiving side, never taken from the payload.
    pub observed_at: DateTime<Utc>,
}
