//! dupmon-events — typed backup reports for dupmon.
//!
//! Turns the JSON report a backup job posts on completion into a
//! [`BackupReport`], rejecting malformed payloads before anything reaches
//! the metrics engine.
//!
//! # Payload
//!
//! ```text
//! {
//!   "Extra": { "backup-name": "nightly" },
//!   "Data":  { "ParsedResult": "Success", "AddedFiles": "5", ... }
//! }
//! ```
//!
//! Validation is all-or-nothing: either every field parses and a report is
//! produced, or a [`ValidationError`] describes the first problem found.

pub mod error;
pub mod ingest;
pub mod types;

pub use error::{ValidationError, ValidationResult};
pub use ingest::{MissingResultPolicy, parse_report, validate};
pub use types::*;
