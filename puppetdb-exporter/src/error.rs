use std::path::PathBuf;

/// Invalid configuration. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to parse {field} duration {value:?}: {source}")]
    Duration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("failed to parse PuppetDB URL {0:?}: {1}")]
    Url(String, String),
    #[error("{0} is not a valid http scheme")]
    Scheme(String),
    #[error("invalid listen address {0:?}")]
    ListenAddress(String),
    #[error("telemetry path must start with '/' and not be '/' or '/health': {0:?}")]
    TelemetryPath(String),
    #[error("invalid report category {0:?}")]
    Category(String),
    #[error("no report category selected")]
    NoCategories,
    #[error("invalid boolean for {field}: {value:?}")]
    Bool { field: &'static str, value: String },
    #[error("unknown log format {0:?}, valid options are txt and json")]
    LogFormat(String),
}

/// Failure of a single PuppetDB request. Scoped to the cycle that issued it.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to call API: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("failed to unmarshal: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("{0}")]
    Unavailable(String),
}

/// Startup failures of the exporter process.
#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to load {what} from {path}: {source}")]
    TlsMaterial {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TLS material: {0}")]
    Tls(#[source] reqwest::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}
