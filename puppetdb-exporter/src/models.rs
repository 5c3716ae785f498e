use serde::{Deserialize, Deserializer, Serialize};

/// One managed host as returned by the PuppetDB `nodes` endpoint.
///
/// Every string field is empty when PuppetDB omits it or sends `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub certname: String,
    /// Empty = active, otherwise the deactivation timestamp.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub deactivated: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub report_environment: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub report_timestamp: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub latest_report_status: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub latest_report_hash: String,
}

impl NodeRecord {
    pub fn is_active(&self) -> bool {
        self.deactivated.is_empty()
    }

    /// Label value used by the `deactivated` dimension.
    pub fn deactivated_label(&self) -> &'static str {
        if self.is_active() { "false" } else { "true" }
    }
}

/// A single named measurement attached to a node's latest report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportMetricRecord {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub category: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default)]
    pub value: f64,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
