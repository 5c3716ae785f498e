use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::aggregator::{Cycle, CycleIssue};
use crate::snapshot::SnapshotStore;

#[derive(Debug, Serialize, Deserialize)]
pub struct ExporterHealth {
    pub uptime_seconds: u64,
    pub cycles_completed: u64,
    pub cycles_degraded: u64,
    pub last_cycle_duration_ms: Option<u64>,
    pub last_cycle_issues: Option<usize>,
    pub last_node_error: Option<String>,
    pub snapshot_cycle: Option<u64>,
    pub snapshot_published_at: Option<String>,
}

#[derive(Debug, Default)]
struct LastCycle {
    duration: Option<Duration>,
    issues: Option<usize>,
    node_error: Option<String>,
}

/// Tracks aggregation cycles for `/health`.
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    cycles_completed: Arc<AtomicU64>,
    cycles_degraded: Arc<AtomicU64>,
    last_cycle: Arc<parking_lot::Mutex<LastCycle>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            cycles_completed: Arc::new(AtomicU64::new(0)),
            cycles_degraded: Arc::new(AtomicU64::new(0)),
            last_cycle: Arc::new(parking_lot::Mutex::new(LastCycle::default())),
        }
    }

    pub fn record_cycle(&self, cycle: &Cycle, duration: Duration) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        if !cycle.issues.is_empty() {
            self.cycles_degraded.fetch_add(1, Ordering::Relaxed);
        }

        let node_error = cycle.issues.iter().find_map(|issue| match issue {
            CycleIssue::NodesUnavailable(err) => Some(err.clone()),
            _ => None,
        });

        let mut last = self.last_cycle.lock();
        last.duration = Some(duration);
        last.issues = Some(cycle.issues.len());
        last.node_error = node_error;
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn get_health(&self, store: &SnapshotStore) -> ExporterHealth {
        let last = self.last_cycle.lock();
        let published = store.current();

        ExporterHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            cycles_completed: self.cycles_completed(),
            cycles_degraded: self.cycles_degraded.load(Ordering::Relaxed),
            last_cycle_duration_ms: last.duration.map(|d| d.as_millis() as u64),
            last_cycle_issues: last.issues,
            last_node_error: last.node_error.clone(),
            snapshot_cycle: published.as_ref().map(|p| p.cycle),
            snapshot_published_at: published
                .as_ref()
                .and_then(|p| format_time(p.published_at)),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn format_time(at: OffsetDateTime) -> Option<String> {
    at.format(&Rfc3339).ok()
}
