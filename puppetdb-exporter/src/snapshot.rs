//! Gauge snapshot produced by one aggregation cycle, and the store that
//! hands the latest one to the export surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use time::OffsetDateTime;

/// Labels of `puppet_report_<category>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportValueLabels {
    pub name: String,
    pub environment: String,
    pub host: String,
}

/// Labels of `puppet_report`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportTimestampLabels {
    pub environment: String,
    pub host: String,
    pub deactivated: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Status label -> number of active nodes. Only labels seen this cycle.
    pub status_counts: BTreeMap<String, u64>,
    /// Selected category -> per-node report metric values.
    pub report_values: BTreeMap<String, BTreeMap<ReportValueLabels, f64>>,
    /// Latest report time per node, Unix seconds.
    pub report_timestamps: BTreeMap<ReportTimestampLabels, i64>,
}

impl Snapshot {
    pub fn status_count(&self, status: &str) -> u64 {
        self.status_counts.get(status).copied().unwrap_or(0)
    }

    pub fn report_value(
        &self,
        category: &str,
        name: &str,
        environment: &str,
        host: &str,
    ) -> Option<f64> {
        let key = ReportValueLabels {
            name: name.to_string(),
            environment: environment.to_string(),
            host: host.to_string(),
        };
        self.report_values.get(category)?.get(&key).copied()
    }

    pub fn report_timestamp(
        &self,
        environment: &str,
        host: &str,
        deactivated: bool,
    ) -> Option<i64> {
        let key = ReportTimestampLabels {
            environment: environment.to_string(),
            host: host.to_string(),
            deactivated,
        };
        self.report_timestamps.get(&key).copied()
    }

    /// Total number of nodes counted in a status bucket.
    pub fn counted_nodes(&self) -> u64 {
        self.status_counts.values().sum()
    }
}

/// A snapshot as seen by readers: which cycle produced it and when.
#[derive(Debug, Clone)]
pub struct Published {
    pub snapshot: Snapshot,
    pub cycle: u64,
    pub published_at: OffsetDateTime,
}

/// Holds the latest published snapshot.
///
/// Publication swaps a whole `Arc` under the lock, so a reader sees either
/// the previous snapshot or the new one, never a mix.
#[derive(Clone, Default)]
pub struct SnapshotStore {
    current: Arc<RwLock<Option<Arc<Published>>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: Snapshot) -> Arc<Published> {
        let mut current = self.current.write();
        let cycle = current.as_ref().map_or(1, |p| p.cycle + 1);
        let published = Arc::new(Published {
            snapshot,
            cycle,
            published_at: OffsetDateTime::now_utc(),
        });
        *current = Some(published.clone());
        published
    }

    /// `None` until the first cycle has been published.
    pub fn current(&self) -> Option<Arc<Published>> {
        self.current.read().clone()
    }
}
