//! HTTP client for the backup tool's REST API.
//!
//! Plain HTTP/1 over hyper. The XSRF token is fetched once per client and
//! reused for every later request.

use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, StatusCode, header};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use crate::error::{PreseedError, PreseedResult};

/// Relative to the base URL, joined with URL-join semantics.
const BACKUPS_PATH: &str = "api/v1/backups";
const XSRF_COOKIE: &str = "xsrf-token";
const XSRF_HEADER: &str = "x-xsrf-token";
const MAX_REDIRECTS: usize = 5;
const USER_AGENT: &str = concat!("dupmon-preseed/", env!("CARGO_PKG_VERSION"));
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Deserialize)]
struct BackupEntry {
    #[serde(rename = "Backup")]
    backup: BackupInfo,
}

#[derive(Debug, Deserialize)]
struct BackupInfo {
    #[serde(rename = "Name")]
    name: String,
}

/// Read-only client for the backup tool's web server.
pub struct DuplicatiClient {
    base_url: Url,
    http: Client<HttpConnector, Empty<Bytes>>,
    /// XSRF token, fetched on first use.
    token: OnceCell<String>,
}

impl DuplicatiClient {
    /// Create a client for the server at `base_url`, e.g. `http://backup-host:8200/`.
    pub fn new(base_url: &str) -> PreseedResult<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| PreseedError::InvalidUrl(format!("{base_url}: {e}")))?;
        if parsed.scheme() != "http" {
            return Err(PreseedError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        Ok(Self {
            base_url: parsed,
            http: Client::builder(TokioExecutor::new()).build_http(),
            token: OnceCell::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Names of every configured backup, in the order the server lists them.
    pub async fn backup_names(&self) -> PreseedResult<Vec<String>> {
        let entries = self.backups().await?;
        let names: Vec<String> = entries.into_iter().map(|e| e.backup.name).collect();
        debug!(count = names.len(), "fetched backup names");
        Ok(names)
    }

    async fn backups(&self) -> PreseedResult<Vec<BackupEntry>> {
        let token = self.login().await?;
        let url = self
            .base_url
            .join(BACKUPS_PATH)
            .map_err(|e| PreseedError::InvalidUrl(format!("{BACKUPS_PATH}: {e}")))?;

        let resp = self.get(&url, Some(token)).await?;
        let status = resp.status();
        if is_auth_failure(status) {
            return Err(PreseedError::Auth(format!("{status} from {url}")));
        }
        if !status.is_success() {
            return Err(PreseedError::Status {
                status,
                url: url.to_string(),
            });
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| PreseedError::Connection(format!("reading body from {url}: {e}")))?
            .to_bytes();
        decode_backups(&body)
    }

    /// The session token, fetching it on first call.
    async fn login(&self) -> PreseedResult<&str> {
        self.token
            .get_or_try_init(|| self.fetch_token())
            .await
            .map(String::as_str)
    }

    async fn fetch_token(&self) -> PreseedResult<String> {
        info!(url = %self.base_url, "logging into backup server");

        let mut url = self.base_url.clone();
        let mut token = None;

        for _ in 0..=MAX_REDIRECTS {
            let resp = self.get(&url, None).await?;
            if let Some(found) = xsrf_cookie(resp.headers()) {
                token = Some(found);
            }

            let status = resp.status();
            if status.is_redirection() {
                let location = resp
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        PreseedError::Connection(format!("{status} from {url} without location"))
                    })?;
                url = url
                    .join(location)
                    .map_err(|e| PreseedError::InvalidUrl(format!("redirect to {location}: {e}")))?;
                debug!(%url, "following login redirect");
                continue;
            }
            if is_auth_failure(status) {
                return Err(PreseedError::Auth(format!("{status} from {url}")));
            }
            if !status.is_success() {
                return Err(PreseedError::Status {
                    status,
                    url: url.to_string(),
                });
            }

            let token = token.ok_or_else(|| {
                PreseedError::Auth(format!("no {XSRF_COOKIE} cookie from {}", self.base_url))
            })?;
            info!("logged into backup server");
            return Ok(token);
        }

        Err(PreseedError::Connection(format!(
            "more than {MAX_REDIRECTS} redirects from {}",
            self.base_url
        )))
    }

    async fn get(&self, url: &Url, token: Option<&str>) -> PreseedResult<Response<Incoming>> {
        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(url.as_str())
            .header(header::USER_AGENT, USER_AGENT);
        if let Some(token) = token {
            builder = builder
                .header(
                    header::COOKIE,
                    format!("{XSRF_COOKIE}={}", urlencoding::encode(token)),
                )
                .header(XSRF_HEADER, token);
        }
        let req = builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| PreseedError::InvalidUrl(format!("building request for {url}: {e}")))?;

        self.http
            .request(req)
            .await
            .map_err(|e| PreseedError::Connection(format!("GET {url}: {e}")))
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// Percent-decoded value of the last `xsrf-token` cookie set in `headers`.
fn xsrf_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| {
            let (name, value) = cookie.split(';').next()?.split_once('=')?;
            (name.trim() == XSRF_COOKIE).then(|| value.trim())
        })
        .filter(|value| !value.is_empty())
        .last()?;

    Some(match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    })
}

/// Decode the backup list, tolerating a leading UTF-8 byte order mark.
fn decode_backups(body: &[u8]) -> PreseedResult<Vec<BackupEntry>> {
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    serde_json::from_slice(body).map_err(|e| PreseedError::Decode(e.to_string()))
}
