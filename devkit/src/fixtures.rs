/*!
Fixtures JSON au format PuppetDB

Construit des nœuds et des métriques de rapport tels que l'API v4 les
renvoie : champs absents = `null`, champs supplémentaires ignorés par
l'exporter inclus pour coller à la réalité.
*/

use serde_json::{json, Value};

/// Builder d'un nœud PuppetDB (`/v4/nodes`)
#[derive(Debug, Clone)]
pub struct NodeFixture {
    certname: String,
    deactivated: Option<String>,
    report_environment: Option<String>,
    report_timestamp: Option<String>,
    latest_report_status: Option<String>,
    latest_report_hash: Option<String>,
}

impl NodeFixture {
    /// Nœud actif sans rapport, environnement `production`
    pub fn active<S: Into<String>>(certname: S) -> Self {
        Self {
            certname: certname.into(),
            deactivated: None,
            report_environment: Some("production".to_string()),
            report_timestamp: None,
            latest_report_status: None,
            latest_report_hash: None,
        }
    }

    pub fn environment<S: Into<String>>(mut self, environment: S) -> Self {
        self.report_environment = Some(environment.into());
        self
    }

    pub fn deactivated_at<S: Into<String>>(mut self, timestamp: S) -> Self {
        self.deactivated = Some(timestamp.into());
        self
    }

    /// Dernier rapport : timestamp brut, statut, hash
    pub fn reported<S: Into<String>>(mut self, timestamp: S, status: S, hash: S) -> Self {
        self.report_timestamp = Some(timestamp.into());
        self.latest_report_status = Some(status.into());
        self.latest_report_hash = Some(hash.into());
        self
    }

    /// Rapport sans statut (ex: rapport en cours d'ingestion)
    pub fn reported_without_status<S: Into<String>>(mut self, timestamp: S, hash: S) -> Self {
        self.report_timestamp = Some(timestamp.into());
        self.latest_report_status = None;
        self.latest_report_hash = Some(hash.into());
        self
    }

    pub fn build(&self) -> Value {
        json!({
            "certname": self.certname,
            "deactivated": self.deactivated,
            "expired": null,
            "report_environment": self.report_environment,
            "facts_environment": self.report_environment,
            "catalog_environment": self.report_environment,
            "report_timestamp": self.report_timestamp,
            "facts_timestamp": self.report_timestamp,
            "catalog_timestamp": self.report_timestamp,
            "latest_report_status": self.latest_report_status,
            "latest_report_hash": self.latest_report_hash,
            "latest_report_noop": false,
            "latest_report_noop_pending": false,
            "latest_report_corrective_change": null,
            "cached_catalog_status": "not_used",
            "latest_report_job_id": null
        })
    }
}

/// Une métrique de rapport (`/v4/reports/<hash>/metrics`)
pub fn report_metric<S: Into<String>>(category: S, name: S, value: f64) -> Value {
    json!({
        "category": category.into(),
        "name": name.into(),
        "value": value
    })
}
