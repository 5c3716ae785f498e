//! PuppetDB exporter - turns PuppetDB node and report data into Prometheus gauges
//!
//! Each aggregation cycle:
//! - fetches every node (active and deactivated) from PuppetDB
//! - classifies active nodes by latest report status, `unreported` when stale
//! - collects report metrics of the selected categories per node
//! - publishes the result as one immutable snapshot read by `/metrics`

pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod error;
pub mod exposition;
pub mod filter;
pub mod health;
pub mod http;
pub mod models;
pub mod puppetdb;
pub mod scheduler;
pub mod snapshot;

pub use aggregator::{Aggregator, Cycle, CycleBuilder, CycleIssue};
pub use classifier::{classify, Classification, StatusBucket, UNREPORTED};
pub use config::{CliArgs, ExporterConfig, LogFormat, Settings};
pub use error::{ConfigError, ExporterError, FetchError};
pub use filter::CategoryFilter;
pub use models::{NodeRecord, ReportMetricRecord};
pub use puppetdb::{PuppetDbClient, PuppetDbOptions, RecordSource};
pub use scheduler::{ScrapeMode, Scheduler};
pub use snapshot::{Published, Snapshot, SnapshotStore};
