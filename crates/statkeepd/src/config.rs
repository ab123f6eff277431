//! Daemon configuration.
//!
//! Every setting comes from, in order of precedence: a command-line flag,
//! its environment variable, the `--config` TOML file, then the built-in
//! default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Args;
use serde::Deserialize;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_STORE_FILE: &str = "/tmp/devops-metrics-db.json";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_REPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Contents of the `--config` file.
///
/// ```toml
/// [server]
/// address = "0.0.0.0:8080"
/// store_interval = "30s"
///
/// [agent]
/// poll_interval = "500ms"
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: ServerSection,
    pub agent: AgentSection,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub address: Option<String>,
    pub store_interval: Option<String>,
    pub store_file: Option<PathBuf>,
    pub restore: Option<bool>,
    pub database_dsn: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentSection {
    pub address: Option<String>,
    pub poll_interval: Option<String>,
    pub report_interval: Option<String>,
    pub report_timeout: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Args)]
pub struct ServerArgs {
    /// Address to listen on.
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// How often the store is written to the snapshot file; 0 writes after every update.
    #[arg(short = 'i', long, env = "STORE_INTERVAL", value_parser = parse_duration)]
    pub store_interval: Option<Duration>,

    /// Snapshot file path.
    #[arg(short = 'f', long, env = "STORE_FILE")]
    pub store_file: Option<PathBuf>,

    /// Load the snapshot file at startup.
    #[arg(short = 'r', long, env = "RESTORE")]
    pub restore: Option<bool>,

    /// Postgres connection string; when set, metrics are stored in the database.
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// Shared key for sample signatures.
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,
}

/// Fully resolved collector settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub address: String,
    pub store_interval: Duration,
    pub store_file: PathBuf,
    pub restore: bool,
    pub database_dsn: Option<String>,
    pub key: Option<String>,
}

impl ServerArgs {
    pub fn resolve(self, file: ServerSection) -> anyhow::Result<ServerConfig> {
        Ok(ServerConfig {
            address: self
                .address
                .or(file.address)
                .unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            store_interval: pick_duration(
                self.store_interval,
                file.store_interval,
                DEFAULT_STORE_INTERVAL,
            )?,
            store_file: self
                .store_file
                .or(file.store_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE)),
            restore: self.restore.or(file.restore).unwrap_or(true),
            database_dsn: non_empty(self.database_dsn.or(file.database_dsn)),
            key: non_empty(self.key.or(file.key)),
        })
    }
}

#[derive(Debug, Args)]
pub struct AgentArgs {
    /// Collector address (`host:port`).
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// How often host metrics are sampled.
    #[arg(short = 'p', long, env = "POLL_INTERVAL", value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    /// How often samples are sent to the collector.
    #[arg(short = 'r', long, env = "REPORT_INTERVAL", value_parser = parse_duration)]
    pub report_interval: Option<Duration>,

    /// Give up on a report after this long.
    #[arg(long, env = "REPORT_TIMEOUT", value_parser = parse_duration)]
    pub report_timeout: Option<Duration>,

    /// Shared key for sample signatures.
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,
}

/// Fully resolved agent settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub address: String,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub report_timeout: Duration,
    pub key: Option<String>,
}

impl AgentArgs {
    pub fn resolve(self, file: AgentSection) -> anyhow::Result<AgentConfig> {
        let config = AgentConfig {
            address: self
                .address
                .or(file.address)
                .unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            poll_interval: pick_duration(self.poll_interval, file.poll_interval, DEFAULT_POLL_INTERVAL)?,
            report_interval: pick_duration(
                self.report_interval,
                file.report_interval,
                DEFAULT_REPORT_INTERVAL,
            )?,
            report_timeout: pick_duration(
                self.report_timeout,
                file.report_timeout,
                DEFAULT_REPORT_TIMEOUT,
            )?,
            key: non_empty(self.key.or(file.key)),
        };
        for (name, value) in [
            ("poll interval", config.poll_interval),
            ("report interval", config.report_interval),
            ("report timeout", config.report_timeout),
        ] {
            if value.is_zero() {
                bail!("{name} must be greater than zero");
            }
        }
        Ok(config)
    }
}

fn pick_duration(
    flag: Option<Duration>,
    file: Option<String>,
    default: Duration,
) -> anyhow::Result<Duration> {
    match (flag, file) {
        (Some(d), _) => Ok(d),
        (None, Some(s)) => parse_duration(&s).map_err(anyhow::Error::msg),
        (None, None) => Ok(default),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Parse a duration string like "10s", "500ms", "2m", or plain seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    };
    parsed.ok_or_else(|| format!("invalid duration {s:?} (expected e.g. 10s, 500ms, 2m or 30)"))
}
