//! Prometheus text rendering of a published snapshot.
//!
//! Each render builds a fresh registry from the snapshot, so label
//! combinations absent from the snapshot never linger from earlier cycles.

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::snapshot::Snapshot;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: &'static str,
    pub commit_sha: &'static str,
    pub build_date: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    /// Commit and build date come from `GIT_COMMIT` / `BUILD_DATE` at
    /// compile time, the compiler version from the build script.
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            commit_sha: option_env!("GIT_COMMIT").unwrap_or("unknown"),
            build_date: option_env!("BUILD_DATE").unwrap_or("unknown"),
            rustc_version: option_env!("RUSTC_VERSION").unwrap_or("unknown"),
        }
    }
}

pub fn render(snapshot: &Snapshot, build: &BuildInfo) -> Result<String, prometheus::Error> {
    let registry = Registry::new();

    let build_info = GaugeVec::new(
        Opts::new("puppetdb_exporter_build_info", "puppetdb exporter build_info"),
        &["version", "commit_sha", "build_date", "rustc_version"],
    )?;
    build_info
        .with_label_values(&[
            build.version,
            build.commit_sha,
            build.build_date,
            build.rustc_version,
        ])
        .set(1.0);
    registry.register(Box::new(build_info))?;

    let status_counts = GaugeVec::new(
        Opts::new("node_report_status_count", "Total count of reports status by type")
            .namespace("puppetdb"),
        &["status"],
    )?;
    for (status, count) in &snapshot.status_counts {
        status_counts
            .with_label_values(&[status.as_str()])
            .set(*count as f64);
    }
    registry.register(Box::new(status_counts))?;

    for (category, values) in &snapshot.report_values {
        let family = GaugeVec::new(
            Opts::new(
                format!("report_{}", category),
                format!("Total count of {} per status", category),
            )
            .namespace("puppet"),
            &["name", "environment", "host"],
        )?;
        for (labels, value) in values {
            family
                .with_label_values(&[
                    labels.name.as_str(),
                    labels.environment.as_str(),
                    labels.host.as_str(),
                ])
                .set(*value);
        }
        registry.register(Box::new(family))?;
    }

    let report = GaugeVec::new(
        Opts::new("report", "Timestamp of latest report").namespace("puppet"),
        &["environment", "host", "deactivated"],
    )?;
    for (labels, timestamp) in &snapshot.report_timestamps {
        let deactivated = if labels.deactivated { "true" } else { "false" };
        report
            .with_label_values(&[labels.environment.as_str(), labels.host.as_str(), deactivated])
            .set(*timestamp as f64);
    }
    registry.register(Box::new(report))?;

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
}
