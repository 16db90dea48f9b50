//! dupmon-preseed — discover backup names from the backup tool at startup.
//!
//! The backup tool's web server exposes `GET /api/v1/backups`, guarded by
//! an XSRF token handed out as a cookie on any page load. [`DuplicatiClient`]
//! performs that bootstrap, fetches the backup list and returns the names so
//! their series can be registered before the first report arrives.
//!
//! # Flow
//!
//! ```text
//! DuplicatiClient::backup_names()
//!   ├── login()    GET <base>             → xsrf-token cookie
//!   └── backups()  GET <base>/api/v1/backups
//!                      Cookie: xsrf-token=<token>
//!                      X-XSRF-TOKEN: <token>
//! ```

pub mod client;
pub mod error;

pub use client::DuplicatiClient;
pub use error::{PreseedError, PreseedResult};
