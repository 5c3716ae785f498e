//! Drives aggregation cycles.
//!
//! With a non-zero scrape interval a background task runs a cycle, then
//! sleeps for the full interval and starts over, however long the cycle
//! took; scrapes only read the latest published snapshot. With a zero
//! interval every scrape runs one cycle itself before reading the snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::health::HealthTracker;
use crate::puppetdb::RecordSource;
use crate::snapshot::{Published, SnapshotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeMode {
    Background(Duration),
    OnScrape,
}

impl ScrapeMode {
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            ScrapeMode::OnScrape
        } else {
            ScrapeMode::Background(interval)
        }
    }
}

pub struct Scheduler {
    aggregator: Aggregator,
    source: Arc<dyn RecordSource>,
    mode: ScrapeMode,
    store: SnapshotStore,
    health: HealthTracker,
    keep_snapshot_on_outage: bool,
    // Cycles never overlap, whoever triggers them.
    running: tokio::sync::Mutex<()>,
}

impl Scheduler {
    pub fn new(aggregator: Aggregator, source: Arc<dyn RecordSource>, mode: ScrapeMode) -> Self {
        Self {
            aggregator,
            source,
            mode,
            store: SnapshotStore::new(),
            health: HealthTracker::new(),
            keep_snapshot_on_outage: false,
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// When set, a cycle that could not fetch the node list is not
    /// published and the previous snapshot stays visible.
    pub fn keep_snapshot_on_outage(mut self, keep: bool) -> Self {
        self.keep_snapshot_on_outage = keep;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Runs one cycle and publishes its snapshot. Returns whether the
    /// snapshot was published.
    pub async fn run_once(&self) -> bool {
        let _running = self.running.lock().await;

        let started = Instant::now();
        let cycle = self.aggregator.run_cycle(self.source.as_ref()).await;
        let elapsed = started.elapsed();
        self.health.record_cycle(&cycle, elapsed);

        if self.keep_snapshot_on_outage && cycle.nodes_unavailable() {
            warn!("node list unavailable, keeping previous snapshot");
            return false;
        }

        let nodes = cycle.snapshot.counted_nodes();
        let published = self.store.publish(cycle.snapshot);
        info!(
            cycle = published.cycle,
            nodes,
            issues = cycle.issues.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "scraped metrics"
        );
        true
    }

    /// Snapshot to serve for a scrape request. In on-scrape mode this runs
    /// a cycle first; otherwise it only reads the store.
    pub async fn snapshot_for_scrape(&self) -> Option<Arc<Published>> {
        if self.mode == ScrapeMode::OnScrape {
            self.run_once().await;
        }
        self.store.current()
    }

    /// Starts the background loop. Returns `None` in on-scrape mode.
    pub fn spawn(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let ScrapeMode::Background(interval) = self.mode else {
            return None;
        };

        let scheduler = Arc::clone(self);
        Some(tokio::spawn(async move {
            info!(interval = ?interval, "starting background scrape loop");
            loop {
                scheduler.run_once().await;
                tokio::time::sleep(interval).await;
            }
        }))
    }
}
