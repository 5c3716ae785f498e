//! Aggregation cycle: PuppetDB records in, one [`Snapshot`] out.
//!
//! Fetching is sequential, node by node. Every fetch or parse failure is
//! scoped to the item that caused it: the cycle always completes and
//! returns a snapshot, together with the list of issues met on the way.
//!
//! Accumulation lives in [`CycleBuilder`], which never touches the network
//! and can be fed pre-fetched records directly.

use std::collections::BTreeMap;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, error, warn};

use crate::classifier::{classify, Classification, ReportTime, StatusBucket};
use crate::filter::CategoryFilter;
use crate::models::{NodeRecord, ReportMetricRecord};
use crate::puppetdb::{RecordSource, ALL_NODES_QUERY};
use crate::snapshot::{ReportTimestampLabels, ReportValueLabels, Snapshot};

/// Recoverable problem met during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleIssue {
    NodesUnavailable(String),
    ReportMetricsUnavailable {
        certname: String,
        report_hash: String,
        error: String,
    },
    UnparseableTimestamp {
        certname: String,
        value: String,
        error: String,
    },
}

#[derive(Debug, Clone)]
pub struct Cycle {
    pub snapshot: Snapshot,
    pub issues: Vec<CycleIssue>,
}

impl Cycle {
    /// True when the node list could not be fetched, in which case the
    /// snapshot carries no node at all.
    pub fn nodes_unavailable(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| matches!(issue, CycleIssue::NodesUnavailable(_)))
    }
}

pub struct Aggregator {
    categories: CategoryFilter,
    unreported_threshold: Duration,
}

impl Aggregator {
    pub fn new(categories: CategoryFilter, unreported_threshold: Duration) -> Self {
        Self {
            categories,
            unreported_threshold,
        }
    }

    pub async fn run_cycle(&self, source: &dyn RecordSource) -> Cycle {
        self.run_cycle_at(source, OffsetDateTime::now_utc()).await
    }

    /// Runs one cycle, judging report freshness against `now`.
    pub async fn run_cycle_at(&self, source: &dyn RecordSource, now: OffsetDateTime) -> Cycle {
        let mut builder = CycleBuilder::new(&self.categories);

        let nodes = match source.list_nodes(ALL_NODES_QUERY).await {
            Ok(nodes) => nodes,
            Err(err) => {
                error!(error = %err, "failed to get nodes");
                builder.push_issue(CycleIssue::NodesUnavailable(err.to_string()));
                Vec::new()
            }
        };
        debug!(nodes = nodes.len(), "fetched node list");

        for node in &nodes {
            let classification = classify(node, self.unreported_threshold, now);
            if !builder.record_node(node, &classification) {
                continue;
            }

            match source.report_metrics(&node.latest_report_hash).await {
                Ok(metrics) => builder.record_metrics(node, &metrics),
                Err(err) => {
                    warn!(
                        host = %node.certname,
                        report = %node.latest_report_hash,
                        error = %err,
                        "failed to get report metrics"
                    );
                    builder.push_issue(CycleIssue::ReportMetricsUnavailable {
                        certname: node.certname.clone(),
                        report_hash: node.latest_report_hash.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        builder.finish()
    }
}

/// Accumulates one cycle's counts and values.
pub struct CycleBuilder<'a> {
    categories: &'a CategoryFilter,
    statuses: BTreeMap<String, u64>,
    report_values: BTreeMap<String, BTreeMap<ReportValueLabels, f64>>,
    report_timestamps: BTreeMap<ReportTimestampLabels, i64>,
    issues: Vec<CycleIssue>,
}

impl<'a> CycleBuilder<'a> {
    pub fn new(categories: &'a CategoryFilter) -> Self {
        // One family per selected category, even if it stays empty.
        let report_values = categories
            .categories()
            .map(|category| (category.to_string(), BTreeMap::new()))
            .collect();

        Self {
            categories,
            statuses: BTreeMap::new(),
            report_values,
            report_timestamps: BTreeMap::new(),
            issues: Vec::new(),
        }
    }

    pub fn push_issue(&mut self, issue: CycleIssue) {
        self.issues.push(issue);
    }

    /// Records a classified node. Returns whether the metrics of its latest
    /// report should be fetched.
    pub fn record_node(&mut self, node: &NodeRecord, classification: &Classification) -> bool {
        if let Some(bucket) = &classification.bucket {
            if let StatusBucket::Unreported(reason) = bucket {
                debug!(host = %node.certname, %reason, "node is unreported");
            }
            *self.statuses.entry(bucket.label().to_string()).or_insert(0) += 1;
        }

        match &classification.report_time {
            ReportTime::Missing => false,
            ReportTime::Unparseable(err) => {
                warn!(
                    host = %node.certname,
                    value = %node.report_timestamp,
                    error = %err,
                    "failed to parse report timestamp"
                );
                self.issues.push(CycleIssue::UnparseableTimestamp {
                    certname: node.certname.clone(),
                    value: node.report_timestamp.clone(),
                    error: err.clone(),
                });
                false
            }
            ReportTime::At(at) => {
                let labels = ReportTimestampLabels {
                    environment: node.report_environment.clone(),
                    host: node.certname.clone(),
                    deactivated: !node.is_active(),
                };
                self.report_timestamps.insert(labels, at.unix_timestamp());
                node.is_active() && !node.latest_report_hash.is_empty()
            }
        }
    }

    /// Records the metrics of a node's latest report. Categories outside
    /// the selection are dropped. A repeated (name, environment, host)
    /// overwrites the earlier value.
    pub fn record_metrics(&mut self, node: &NodeRecord, metrics: &[ReportMetricRecord]) {
        for metric in metrics {
            if !self.categories.admits(&metric.category) {
                continue;
            }
            let labels = ReportValueLabels {
                name: humanize_metric_name(&metric.name),
                environment: node.report_environment.clone(),
                host: node.certname.clone(),
            };
            self.report_values
                .entry(metric.category.clone())
                .or_default()
                .insert(labels, metric.value);
        }
    }

    pub fn finish(self) -> Cycle {
        Cycle {
            snapshot: Snapshot {
                status_counts: self.statuses,
                report_values: self.report_values,
                report_timestamps: self.report_timestamps,
            },
            issues: self.issues,
        }
    }
}

/// Turns a PuppetDB metric name into a label value: the first letter of
/// every word is upper-cased, then underscores become spaces.
///
/// ASCII letters, digits and `_` are word characters, so `out_of_sync`
/// becomes `Out of sync` while `config retrieval` becomes
/// `Config Retrieval`. Word starts take their title case, which differs
/// from upper case for the Latin digraphs (`ǆ` becomes `ǅ`, not `Ǆ`).
pub fn humanize_metric_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut at_word_start = true;
    for c in name.chars() {
        if at_word_start {
            out.push(to_title_case(c));
        } else {
            out.push(c);
        }
        at_word_start = is_word_separator(c);
    }
    out.replace('_', " ")
}

/// Single-character title case mapping. Characters whose upper case
/// expands to several characters (`ß`) are left unchanged.
fn to_title_case(c: char) -> char {
    match c {
        '\u{01C4}'..='\u{01C6}' => '\u{01C5}',
        '\u{01C7}'..='\u{01C9}' => '\u{01C8}',
        '\u{01CA}'..='\u{01CC}' => '\u{01CB}',
        '\u{01F1}'..='\u{01F3}' => '\u{01F2}',
        _ => {
            let mut upper = c.to_uppercase();
            match (upper.next(), upper.next()) {
                (Some(single), None) => single,
                _ => c,
            }
        }
    }
}

fn is_word_separator(c: char) -> bool {
    if c.is_ascii() {
        !(c.is_ascii_alphanumeric() || c == '_')
    } else {
        c.is_whitespace()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::UNREPORTED;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-01-01 12:00:00 UTC);
    const TWO_HOURS: Duration = Duration::from_secs(2 * 3600);

    #[derive(Default)]
    struct MemorySource {
        nodes: Option<Vec<NodeRecord>>,
        metrics: HashMap<String, Vec<ReportMetricRecord>>,
        metric_calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RecordSource for MemorySource {
        async fn list_nodes(&self, _query: &str) -> Result<Vec<NodeRecord>, FetchError> {
            self.nodes
                .clone()
                .ok_or_else(|| FetchError::Unavailable("connection refused".into()))
        }

        async fn report_metrics(
            &self,
            report_hash: &str,
        ) -> Result<Vec<ReportMetricRecord>, FetchError> {
            self.metric_calls.lock().push(report_hash.to_string());
            self.metrics
                .get(report_hash)
                .cloned()
                .ok_or_else(|| FetchError::Unavailable(format!("no report {report_hash}")))
        }
    }

    fn node(certname: &str, timestamp: &str, status: &str, hash: &str) -> NodeRecord {
        NodeRecord {
            certname: certname.into(),
            report_environment: "production".into(),
            report_timestamp: timestamp.into(),
            latest_report_status: status.into(),
            latest_report_hash: hash.into(),
            ..Default::default()
        }
    }

    fn metric(category: &str, name: &str, value: f64) -> ReportMetricRecord {
        ReportMetricRecord {
            category: category.into(),
            name: name.into(),
            value,
        }
    }

    fn aggregator(categories: &str) -> Aggregator {
        Aggregator::new(CategoryFilter::parse(categories), TWO_HOURS)
    }

    #[tokio::test]
    async fn test_status_buckets() {
        let mut deactivated = node("old-01", "2024-01-01T11:00:00Z", "failed", "");
        deactivated.deactivated = "2024-01-01T11:30:00.000Z".into();

        let source = MemorySource {
            nodes: Some(vec![
                node("web-01", "2024-01-01T11:00:00Z", "changed", ""),
                node("web-02", "2024-01-01T11:10:00Z", "changed", ""),
                node("web-03", "2024-01-01T09:00:00Z", "changed", ""),
                node("db-01", "", "", ""),
                node("db-02", "2024-01-01T11:00:00Z", "", ""),
                node("db-03", "not-a-date", "failed", "deadbeef"),
                deactivated,
            ]),
            ..Default::default()
        };

        let cycle = aggregator("time").run_cycle_at(&source, NOW).await;
        let snapshot = &cycle.snapshot;

        assert_eq!(snapshot.status_count("changed"), 2);
        assert_eq!(snapshot.status_count(UNREPORTED), 4);
        assert_eq!(snapshot.status_count("failed"), 0);
        assert_eq!(snapshot.counted_nodes(), 6);
        assert!(!snapshot.status_counts.contains_key("failed"));

        // Deactivated node keeps its report time, bad timestamp gets none.
        assert_eq!(
            snapshot.report_timestamp("production", "old-01", true),
            Some(1_704_106_800)
        );
        assert!(!snapshot.report_timestamps.keys().any(|l| l.host == "db-03" || l.host == "db-01"));
        assert_eq!(snapshot.report_timestamps.len(), 5);

        assert_eq!(
            cycle.issues,
            vec![CycleIssue::UnparseableTimestamp {
                certname: "db-03".into(),
                value: "not-a-date".into(),
                error: match crate::classifier::parse_report_timestamp("not-a-date") {
                    Err(err) => err.to_string(),
                    Ok(_) => unreachable!(),
                },
            }]
        );
        // No metrics fetched for a node whose timestamp did not parse.
        assert!(source.metric_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_report_metrics_filtered_by_category() {
        let mut metrics = HashMap::new();
        metrics.insert(
            "abc".to_string(),
            vec![
                metric("time", "config_retrieval", 1.5),
                metric("time", "total", 12.25),
                metric("events", "failure", 0.0),
                metric("resources", "out_of_sync", 3.0),
            ],
        );
        let source = MemorySource {
            nodes: Some(vec![node("web-01", "2024-01-01T11:00:00Z", "changed", "abc")]),
            metrics,
            ..Default::default()
        };

        let cycle = aggregator("time,events").run_cycle_at(&source, NOW).await;
        let snapshot = &cycle.snapshot;

        assert_eq!(
            snapshot.report_value("time", "Config retrieval", "production", "web-01"),
            Some(1.5)
        );
        assert_eq!(snapshot.report_value("time", "Total", "production", "web-01"), Some(12.25));
        assert_eq!(snapshot.report_value("events", "Failure", "production", "web-01"), Some(0.0));
        assert!(!snapshot.report_values.contains_key("resources"));
        assert!(snapshot
            .report_values
            .values()
            .flat_map(|values| values.keys())
            .all(|labels| labels.name != "Out of sync"));
        assert!(cycle.issues.is_empty());
    }

    #[tokio::test]
    async fn test_selected_categories_always_present() {
        let source = MemorySource {
            nodes: Some(Vec::new()),
            ..Default::default()
        };
        let cycle = aggregator("time,events,resources").run_cycle_at(&source, NOW).await;
        assert_eq!(
            cycle.snapshot.report_values.keys().collect::<Vec<_>>(),
            vec!["events", "resources", "time"]
        );
        assert!(cycle.snapshot.report_values.values().all(BTreeMap::is_empty));
        assert!(cycle.snapshot.status_counts.is_empty());
    }

    #[tokio::test]
    async fn test_node_list_failure_yields_empty_snapshot() {
        let source = MemorySource::default();
        let cycle = aggregator("time").run_cycle_at(&source, NOW).await;
        assert!(cycle.nodes_unavailable());
        assert_eq!(cycle.snapshot.counted_nodes(), 0);
        assert!(cycle.snapshot.report_timestamps.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_failure_does_not_block_other_nodes() {
        let mut metrics = HashMap::new();
        metrics.insert("good".to_string(), vec![metric("time", "total", 4.0)]);
        let source = MemorySource {
            nodes: Some(vec![
                node("web-01", "2024-01-01T11:00:00Z", "changed", "missing"),
                node("web-02", "2024-01-01T11:00:00Z", "unchanged", "good"),
            ]),
            metrics,
            ..Default::default()
        };

        let cycle = aggregator("time").run_cycle_at(&source, NOW).await;
        assert_eq!(cycle.snapshot.status_count("changed"), 1);
        assert_eq!(cycle.snapshot.status_count("unchanged"), 1);
        assert_eq!(cycle.snapshot.report_value("time", "Total", "production", "web-02"), Some(4.0));
        assert_eq!(cycle.issues.len(), 1);
        assert!(matches!(
            &cycle.issues[0],
            CycleIssue::ReportMetricsUnavailable { certname, .. } if certname == "web-01"
        ));
        assert!(!cycle.nodes_unavailable());
    }

    #[tokio::test]
    async fn test_metrics_only_fetched_for_active_nodes_with_report() {
        let mut deactivated = node("old-01", "2024-01-01T11:00:00Z", "changed", "old");
        deactivated.deactivated = "2024-01-01T11:30:00.000Z".into();
        let source = MemorySource {
            nodes: Some(vec![
                deactivated,
                node("web-01", "2024-01-01T11:00:00Z", "changed", ""),
                node("web-02", "", "", "never"),
                node("web-03", "2024-01-01T08:00:00Z", "changed", "stale"),
            ]),
            ..Default::default()
        };

        aggregator("time").run_cycle_at(&source, NOW).await;
        assert_eq!(*source.metric_calls.lock(), vec!["stale".to_string()]);
    }

    #[tokio::test]
    async fn test_identical_input_gives_identical_snapshots() {
        let mut metrics = HashMap::new();
        metrics.insert("abc".to_string(), vec![metric("time", "total", 9.0)]);
        let source = MemorySource {
            nodes: Some(vec![
                node("web-01", "2024-01-01T11:00:00Z", "changed", "abc"),
                node("web-02", "2024-01-01T07:00:00Z", "failed", ""),
            ]),
            metrics,
            ..Default::default()
        };

        let agg = aggregator("time");
        let first = agg.run_cycle_at(&source, NOW).await;
        let second = agg.run_cycle_at(&source, NOW).await;
        assert_eq!(first.snapshot, second.snapshot);
    }

    #[test]
    fn test_builder_last_write_wins() {
        let filter = CategoryFilter::parse("time");
        let mut builder = CycleBuilder::new(&filter);
        let n = node("web-01", "2024-01-01T11:00:00Z", "changed", "abc");
        builder.record_metrics(&n, &[metric("time", "total", 1.0), metric("time", "total", 2.0)]);
        let cycle = builder.finish();
        assert_eq!(cycle.snapshot.report_value("time", "Total", "production", "web-01"), Some(2.0));
        assert_eq!(cycle.snapshot.report_values["time"].len(), 1);
    }

    #[test]
    fn test_humanize_metric_name() {
        assert_eq!(humanize_metric_name("total"), "Total");
        assert_eq!(humanize_metric_name("out_of_sync"), "Out of sync");
        assert_eq!(humanize_metric_name("config_retrieval"), "Config retrieval");
        assert_eq!(humanize_metric_name("config retrieval"), "Config Retrieval");
        assert_eq!(humanize_metric_name("fact-generation"), "Fact-Generation");
        assert_eq!(humanize_metric_name(""), "");
    }

    #[test]
    fn test_humanize_uses_title_case_for_digraphs() {
        assert_eq!(humanize_metric_name("\u{01C6}ungla"), "\u{01C5}ungla");
        assert_eq!(humanize_metric_name("\u{01C4}"), "\u{01C5}");
        assert_eq!(humanize_metric_name("\u{01C9}ubav"), "\u{01C8}ubav");
        assert_eq!(humanize_metric_name("\u{01CC}oj"), "\u{01CB}oj");
        assert_eq!(humanize_metric_name("\u{01F3}ep"), "\u{01F2}ep");
        assert_eq!(humanize_metric_name("éclair"), "Éclair");
        assert_eq!(humanize_metric_name("\u{00DF}"), "\u{00DF}");
    }
}
