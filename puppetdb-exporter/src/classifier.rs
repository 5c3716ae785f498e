//! Per-node report status classification.
//!
//! Each active node lands in exactly one status bucket: the literal status
//! string of its latest report, or `unreported` when the report is missing,
//! unparseable, older than the unreported threshold, or carries no status.
//! Deactivated nodes never land in a bucket but still expose their report
//! timestamp when it parses.

use std::fmt;
use std::time::Duration;

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::models::NodeRecord;

pub const UNREPORTED: &str = "unreported";

const REPORT_TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
const REPORT_TIMESTAMP_FRACTIONAL: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]Z");

/// Why a node counts as `unreported`. Only surfaced in logs, the exported
/// label is the same for every reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreportedReason {
    NoReport,
    BadTimestamp,
    Stale,
    MissingStatus,
}

impl fmt::Display for UnreportedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UnreportedReason::NoReport => "no report",
            UnreportedReason::BadTimestamp => "unparseable report timestamp",
            UnreportedReason::Stale => "latest report older than threshold",
            UnreportedReason::MissingStatus => "latest report has no status",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusBucket {
    Reported(String),
    Unreported(UnreportedReason),
}

impl StatusBucket {
    pub fn label(&self) -> &str {
        match self {
            StatusBucket::Reported(status) => status,
            StatusBucket::Unreported(_) => UNREPORTED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportTime {
    Missing,
    Unparseable(String),
    At(OffsetDateTime),
}

impl ReportTime {
    /// Unix seconds for the report timestamp gauge.
    pub fn unix_seconds(&self) -> Option<i64> {
        match self {
            ReportTime::At(at) => Some(at.unix_timestamp()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// `None` for deactivated nodes.
    pub bucket: Option<StatusBucket>,
    pub report_time: ReportTime,
}

impl Classification {
    pub fn status_label(&self) -> Option<&str> {
        self.bucket.as_ref().map(StatusBucket::label)
    }
}

/// Parses a PuppetDB report timestamp (`YYYY-MM-DDTHH:MM:SSZ`, UTC).
/// A fractional-second part is accepted and truncated by callers that
/// only need whole seconds.
pub fn parse_report_timestamp(raw: &str) -> Result<OffsetDateTime, time::error::Parse> {
    match PrimitiveDateTime::parse(raw, REPORT_TIMESTAMP) {
        Ok(at) => Ok(at.assume_utc()),
        Err(err) => PrimitiveDateTime::parse(raw, REPORT_TIMESTAMP_FRACTIONAL)
            .map(PrimitiveDateTime::assume_utc)
            .map_err(|_| err),
    }
}

pub fn classify(node: &NodeRecord, threshold: Duration, now: OffsetDateTime) -> Classification {
    let active = node.is_active();

    let report_time = if node.report_timestamp.is_empty() {
        ReportTime::Missing
    } else {
        match parse_report_timestamp(&node.report_timestamp) {
            Ok(at) => ReportTime::At(at),
            Err(err) => ReportTime::Unparseable(err.to_string()),
        }
    };

    if !active {
        return Classification { bucket: None, report_time };
    }

    let bucket = match &report_time {
        ReportTime::Missing => StatusBucket::Unreported(UnreportedReason::NoReport),
        ReportTime::Unparseable(_) => StatusBucket::Unreported(UnreportedReason::BadTimestamp),
        ReportTime::At(at) if is_stale(*at, threshold, now) => {
            StatusBucket::Unreported(UnreportedReason::Stale)
        }
        ReportTime::At(_) if node.latest_report_status.is_empty() => {
            StatusBucket::Unreported(UnreportedReason::MissingStatus)
        }
        ReportTime::At(_) => StatusBucket::Reported(node.latest_report_status.clone()),
    };

    Classification { bucket: Some(bucket), report_time }
}

fn is_stale(at: OffsetDateTime, threshold: Duration, now: OffsetDateTime) -> bool {
    // A threshold too large to add is never reached.
    match time::Duration::try_from(threshold)
        .ok()
        .and_then(|threshold| at.checked_add(threshold))
    {
        Some(deadline) => deadline < now,
        None => false,
    }
}
