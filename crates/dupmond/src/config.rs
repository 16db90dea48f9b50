//! Daemon configuration.
//!
//! Settings are layered, lowest precedence first: built-in defaults, an
//! optional TOML file, then command-line flags and their environment
//! variables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, ValueEnum};
use serde::Deserialize;

use dupmon_events::MissingResultPolicy;

const DEFAULT_WINDOW: Duration = Duration::from_secs(30);
const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_PRESEED_TIMEOUT: Duration = Duration::from_secs(10);

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Flags for `dupmond serve`. Every flag can also come from the environment.
#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// TOML file with settings; flags override it.
    #[arg(long, short = 'c', env = "DUPMON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to serve the webhook and metrics on [default: 0.0.0.0:9090].
    #[arg(long, env = "DUPMON_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Base URL of the backup server, used to pre-register known backups.
    #[arg(long, env = "DUPLICATI_URL")]
    pub duplicati_url: Option<String>,

    /// How long an event counts as recent, e.g. `30s`, `2m` [default: 30s].
    #[arg(long, env = "DUPMON_WINDOW")]
    pub window: Option<String>,

    /// How often expired window entries are pruned [default: 1s].
    #[arg(long, env = "DUPMON_MAINTENANCE_INTERVAL")]
    pub maintenance_interval: Option<String>,

    /// Upper bound on the startup fetch of backup names [default: 10s].
    #[arg(long, env = "DUPMON_PRESEED_TIMEOUT")]
    pub preseed_timeout: Option<String>,

    /// What to do with a report that has no result: `reject` or `fatal` [default: reject].
    #[arg(long, env = "DUPMON_MISSING_RESULT")]
    pub missing_result: Option<MissingResultPolicy>,

    /// Log output format [default: text].
    #[arg(long, value_enum, env = "DUPMON_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

/// Contents of the TOML settings file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub listen: Option<SocketAddr>,
    pub duplicati_url: Option<String>,
    pub window: Option<String>,
    pub maintenance_interval: Option<String>,
    pub preseed_timeout: Option<String>,
    pub missing_result: Option<MissingResultPolicy>,
    pub log_format: Option<LogFormat>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

impl From<&ServeArgs> for FileConfig {
    fn from(args: &ServeArgs) -> Self {
        Self {
            listen: args.listen,
            duplicati_url: args.duplicati_url.clone(),
            window: args.window.clone(),
            maintenance_interval: args.maintenance_interval.clone(),
            preseed_timeout: args.preseed_timeout.clone(),
            missing_result: args.missing_result,
            log_format: args.log_format,
        }
    }
}

/// Fully resolved daemon settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub listen: SocketAddr,
    pub duplicati_url: Option<String>,
    pub window: Duration,
    pub maintenance_interval: Duration,
    pub preseed_timeout: Duration,
    pub missing_result: MissingResultPolicy,
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9090)),
            duplicati_url: None,
            window: DEFAULT_WINDOW,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
            preseed_timeout: DEFAULT_PRESEED_TIMEOUT,
            missing_result: MissingResultPolicy::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl Settings {
    /// Resolve settings from the flags, reading the config file they name.
    pub fn resolve(args: &ServeArgs) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        Self::layered(file, args)
    }

    /// Apply `file` and then `args` over the defaults.
    pub fn layered(file: FileConfig, args: &ServeArgs) -> anyhow::Result<Self> {
        let mut settings = Self::default();
        settings.apply(file)?;
        settings.apply(FileConfig::from(args))?;
        Ok(settings)
    }

    fn apply(&mut self, layer: FileConfig) -> anyhow::Result<()> {
        if let Some(listen) = layer.listen {
            self.listen = listen;
        }
        if let Some(url) = layer.duplicati_url {
            let url = url.trim();
            self.duplicati_url = (!url.is_empty()).then(|| url.to_string());
        }
        if let Some(raw) = layer.window {
            self.window = positive_duration("window", &raw)?;
        }
        if let Some(raw) = layer.maintenance_interval {
            self.maintenance_interval = positive_duration("maintenance interval", &raw)?;
        }
        if let Some(raw) = layer.preseed_timeout {
            self.preseed_timeout = positive_duration("preseed timeout", &raw)?;
        }
        if let Some(policy) = layer.missing_result {
            self.missing_result = policy;
        }
        if let Some(format) = layer.log_format {
            self.log_format = format;
        }
        Ok(())
    }
}

fn positive_duration(what: &str, raw: &str) -> anyhow::Result<Duration> {
    let Some(duration) = parse_duration(raw) else {
        bail!("invalid {what} '{raw}': expected e.g. 500ms, 30s, 2m or a number of seconds");
    };
    if duration.is_zero() {
        bail!("{what} must be greater than zero");
    }
    Ok(duration)
}

/// Parse a duration string like "30s", "500ms", "2m", or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
