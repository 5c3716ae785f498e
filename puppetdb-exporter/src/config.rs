use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;

use crate::error::ConfigError;
use crate::filter::CategoryFilter;
use crate::puppetdb::PuppetDbOptions;
use crate::scheduler::ScrapeMode;

/// Raw configuration, as read from `exporter.yaml` and the environment.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ExporterConfig {
    pub puppetdb_url: String,
    pub cert_file: String,
    pub key_file: String,
    pub ca_file: String,
    pub ssl_verify: bool,
    pub scrape_interval: String,
    pub unreported_node: String,
    pub categories: String,
    pub listen_address: String,
    pub telemetry_path: String,
    pub log_format: String,
    pub debug: bool,
    pub keep_snapshot_on_outage: bool,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            puppetdb_url: "http://puppetdb:8080".into(),
            cert_file: "certs/client.pem".into(),
            key_file: "certs/client.key".into(),
            ca_file: "certs/cacert.pem".into(),
            ssl_verify: false,
            scrape_interval: "5s".into(),
            unreported_node: "2h".into(),
            categories: "resources,time,changes,events".into(),
            listen_address: "0.0.0.0:9121".into(),
            telemetry_path: "/metrics".into(),
            log_format: "txt".into(),
            debug: false,
            keep_snapshot_on_outage: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "txt" | "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::LogFormat(other.to_string())),
        }
    }
}

/// Command-line flags. Every flag given here wins over the config file and
/// the environment.
#[derive(Debug, Clone, Default, PartialEq, Parser)]
#[command(name = "puppetdb-exporter", about = "Prometheus exporter for PuppetDB")]
pub struct CliArgs {
    /// YAML config file (default: $PUPPETDB_EXPORTER_CONFIG or exporter.yaml).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// PuppetDB base URL.
    #[arg(long = "puppetdb.url")]
    pub puppetdb_url: Option<String>,

    /// A PEM encoded certificate file.
    #[arg(long = "puppetdb.cert-file")]
    pub cert_file: Option<String>,

    /// A PEM encoded private key file.
    #[arg(long = "puppetdb.key-file")]
    pub key_file: Option<String>,

    /// A PEM encoded CA's certificate file.
    #[arg(long = "puppetdb.ca-file")]
    pub ca_file: Option<String>,

    /// Verify the PuppetDB server certificate.
    #[arg(long = "puppetdb.ssl-verify")]
    pub ssl_verify: bool,

    /// Interval between two scrapes on the PuppetDB, 0s to scrape on request.
    #[arg(long = "scrape-interval")]
    pub scrape_interval: Option<String>,

    /// Age after which a node's latest report counts as unreported.
    #[arg(long = "unreported-node")]
    pub unreported_node: Option<String>,

    /// Comma-separated report metric categories to export.
    #[arg(long = "puppetdb.categories")]
    pub categories: Option<String>,

    /// Address to listen on for web interface and telemetry.
    #[arg(long = "web.listen-address")]
    pub listen_address: Option<String>,

    /// Path under which to expose metrics.
    #[arg(long = "web.telemetry-path")]
    pub telemetry_path: Option<String>,

    /// Log format, valid options are txt and json.
    #[arg(long = "log-format")]
    pub log_format: Option<String>,

    /// Output verbose debug information.
    #[arg(long)]
    pub debug: bool,

    /// Keep the previous snapshot when the node list cannot be fetched.
    #[arg(long = "keep-snapshot-on-outage")]
    pub keep_snapshot_on_outage: bool,

    /// Show version information and exit.
    #[arg(long = "version")]
    pub show_version: bool,
}

impl CliArgs {
    /// Log format requested on the command line, used before the full
    /// configuration is loaded (`--version`).
    pub fn early_log_format(&self) -> LogFormat {
        self.log_format
            .as_deref()
            .and_then(|value| LogFormat::parse(value).ok())
            .unwrap_or(LogFormat::Text)
    }

    /// Overrides `config` with every flag that was given.
    pub fn apply(&self, config: &mut ExporterConfig) {
        let strings = [
            (&self.puppetdb_url, &mut config.puppetdb_url),
            (&self.cert_file, &mut config.cert_file),
            (&self.key_file, &mut config.key_file),
            (&self.ca_file, &mut config.ca_file),
            (&self.scrape_interval, &mut config.scrape_interval),
            (&self.unreported_node, &mut config.unreported_node),
            (&self.categories, &mut config.categories),
            (&self.listen_address, &mut config.listen_address),
            (&self.telemetry_path, &mut config.telemetry_path),
            (&self.log_format, &mut config.log_format),
        ];
        for (flag, field) in strings {
            if let Some(value) = flag {
                *field = value.clone();
            }
        }

        // boolean flags can only switch a setting on
        config.ssl_verify |= self.ssl_verify;
        config.debug |= self.debug;
        config.keep_snapshot_on_outage |= self.keep_snapshot_on_outage;
    }
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub puppetdb: PuppetDbOptions,
    pub scrape_mode: ScrapeMode,
    pub unreported_threshold: Duration,
    pub categories: CategoryFilter,
    pub listen_address: SocketAddr,
    pub telemetry_path: String,
    pub log_format: LogFormat,
    pub debug: bool,
    pub keep_snapshot_on_outage: bool,
}

/// Loads the YAML file named by `--config`, else `PUPPETDB_EXPORTER_CONFIG`,
/// else `exporter.yaml`, then applies environment overrides and finally the
/// command-line flags. A missing or empty file means defaults.
pub fn load_config(args: &CliArgs) -> Result<ExporterConfig, ConfigError> {
    let path = args.config.clone().unwrap_or_else(|| {
        std::env::var_os("PUPPETDB_EXPORTER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("exporter.yaml"))
    });
    let mut config = load_file(&path)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    args.apply(&mut config);
    Ok(config)
}

pub fn load_file(path: &Path) -> Result<ExporterConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(ExporterConfig::default());
    }

    let txt = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if txt.trim().is_empty() {
        return Ok(ExporterConfig::default());
    }
    serde_yaml::from_str(&txt).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl ExporterConfig {
    /// Overrides fields from environment variables, read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(*key));

        let strings = [
            (&["PUPPETDB_URL"][..], &mut self.puppetdb_url),
            (&["PUPPETDB_CERT_FILE", "CERT_FILE"][..], &mut self.cert_file),
            (&["PUPPETDB_KEY_FILE", "KEY_FILE"][..], &mut self.key_file),
            (&["PUPPETDB_CA_FILE", "CA_FILE"][..], &mut self.ca_file),
            (&["PUPPETDB_SCRAPE_INTERVAL"][..], &mut self.scrape_interval),
            (&["PUPPETDB_UNREPORTED_NODE"][..], &mut self.unreported_node),
            (&["PUPPETDB_CATEGORIES"][..], &mut self.categories),
            (&["WEB_LISTEN_ADDRESS"][..], &mut self.listen_address),
            (&["WEB_TELEMETRY_PATH"][..], &mut self.telemetry_path),
            (&["LOG_FORMAT"][..], &mut self.log_format),
        ];
        for (keys, field) in strings {
            if let Some(value) = first(keys) {
                *field = value;
            }
        }

        let bools = [
            ("PUPPETDB_SSL_VERIFY", &mut self.ssl_verify),
            ("DEBUG", &mut self.debug),
            ("PUPPETDB_KEEP_SNAPSHOT_ON_OUTAGE", &mut self.keep_snapshot_on_outage),
        ];
        for (key, field) in bools {
            if let Some(value) = lookup(key) {
                *field = parse_bool(key, &value)?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let url = Url::parse(&self.puppetdb_url)
            .map_err(|e| ConfigError::Url(self.puppetdb_url.clone(), e.to_string()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Scheme(url.scheme().to_string()));
        }

        let scrape_interval = parse_duration("scrape interval", &self.scrape_interval)?;
        let unreported_threshold = parse_duration("unreported node", &self.unreported_node)?;

        let categories = CategoryFilter::parse(&self.categories);
        if categories.is_empty() {
            return Err(ConfigError::NoCategories);
        }
        if let Some(bad) = categories.categories().find(|c| !is_metric_name_part(c)) {
            return Err(ConfigError::Category(bad.to_string()));
        }

        let listen_address = parse_listen_address(&self.listen_address)?;

        let reserved = matches!(self.telemetry_path.as_str(), "/" | "/health");
        if !self.telemetry_path.starts_with('/') || reserved {
            return Err(ConfigError::TelemetryPath(self.telemetry_path.clone()));
        }

        let log_format = LogFormat::parse(&self.log_format)?;

        Ok(Settings {
            puppetdb: PuppetDbOptions {
                url,
                cert_file: PathBuf::from(&self.cert_file),
                key_file: PathBuf::from(&self.key_file),
                ca_file: PathBuf::from(&self.ca_file),
                ssl_verify: self.ssl_verify,
            },
            scrape_mode: ScrapeMode::from_interval(scrape_interval),
            unreported_threshold,
            categories,
            listen_address,
            telemetry_path: self.telemetry_path.clone(),
            log_format,
            debug: self.debug,
            keep_snapshot_on_outage: self.keep_snapshot_on_outage,
        })
    }
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|source| ConfigError::Duration {
        field,
        value: value.to_string(),
        source,
    })
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Bool { field, value: value.to_string() }),
    }
}

/// Accepts `host:port` and the short `:port` form (all interfaces).
fn parse_listen_address(value: &str) -> Result<SocketAddr, ConfigError> {
    let full = if value.starts_with(':') {
        format!("0.0.0.0{}", value)
    } else {
        value.to_string()
    };
    full.parse()
        .map_err(|_| ConfigError::ListenAddress(value.to_string()))
}

/// Categories end up in `puppet_report_<category>`.
fn is_metric_name_part(category: &str) -> bool {
    let mut chars = category.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
