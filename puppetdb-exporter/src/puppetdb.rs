//! PuppetDB query API client.
//!
//! Only two endpoints are used: `v4/nodes` for the inventory and
//! `v4/reports/<hash>/metrics` for the metrics of a node's latest report.
//! The aggregator talks to a [`RecordSource`] so cycles can be driven from
//! in-memory records in tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ExporterError, FetchError};
use crate::models::{NodeRecord, ReportMetricRecord};

/// Selects active and deactivated nodes alike.
pub const ALL_NODES_QUERY: &str =
    r#"["or", ["=", ["node", "active"], false], ["=", ["node", "active"], true]]"#;

#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn list_nodes(&self, query: &str) -> Result<Vec<NodeRecord>, FetchError>;

    async fn report_metrics(&self, report_hash: &str)
        -> Result<Vec<ReportMetricRecord>, FetchError>;
}

/// Connection options for a PuppetDB instance.
#[derive(Debug, Clone)]
pub struct PuppetDbOptions {
    pub url: Url,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub ca_file: PathBuf,
    /// When false, the server certificate is not verified.
    pub ssl_verify: bool,
}

pub struct PuppetDbClient {
    options: PuppetDbOptions,
    client: reqwest::Client,
}

impl PuppetDbClient {
    /// Builds the HTTP client. For `https` URLs the client certificate, key
    /// and CA bundle are loaded here, so missing TLS material fails startup.
    pub fn new(options: PuppetDbOptions) -> Result<Self, ExporterError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("puppetdb-exporter/", env!("CARGO_PKG_VERSION")));

        if options.url.scheme() == "https" {
            let mut identity_pem = read_pem("client certificate", &options.cert_file)?;
            identity_pem.push(b'\n');
            identity_pem.extend(read_pem("client key", &options.key_file)?);
            let identity = reqwest::Identity::from_pem(&identity_pem).map_err(ExporterError::Tls)?;

            let ca_pem = read_pem("CA certificate", &options.ca_file)?;
            let roots =
                reqwest::Certificate::from_pem_bundle(&ca_pem).map_err(ExporterError::Tls)?;
            for certificate in roots {
                builder = builder.add_root_certificate(certificate);
            }

            builder = builder
                .identity(identity)
                .danger_accept_invalid_certs(!options.ssl_verify);
        }

        let client = builder.build().map_err(ExporterError::Client)?;
        Ok(Self { options, client })
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        let base = self.options.url.as_str().trim_end_matches('/');
        format!("{}/v4/{}", base, endpoint)
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, query: &str) -> Result<T, FetchError> {
        let url = self.endpoint_url(endpoint);
        let mut request = self.client.get(&url);
        if !query.is_empty() {
            request = request.query(&[("query", query)]);
        }

        debug!(%url, "querying PuppetDB");
        let response = request.send().await.map_err(FetchError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { status: status.as_u16(), url });
        }
        response.json::<T>().await.map_err(FetchError::Decode)
    }
}

#[async_trait]
impl RecordSource for PuppetDbClient {
    async fn list_nodes(&self, query: &str) -> Result<Vec<NodeRecord>, FetchError> {
        self.get("nodes", query).await
    }

    async fn report_metrics(
        &self,
        report_hash: &str,
    ) -> Result<Vec<ReportMetricRecord>, FetchError> {
        self.get(&format!("reports/{}/metrics", report_hash), "").await
    }
}

fn read_pem(what: &'static str, path: &Path) -> Result<Vec<u8>, ExporterError> {
    std::fs::read(path).map_err(|source| ExporterError::TlsMaterial {
        what,
        path: path.to_path_buf(),
        source,
    })
}
