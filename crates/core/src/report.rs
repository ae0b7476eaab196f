//! Import summary.
//!
//! The report is the only view a caller gets of a pass: per-type counts, the bundle outcomes,
//! every structured validation error, and any bundle that failed in the store. It is built up
//! as bundles finish and discarded by the caller after use.

use crate::bundle::BundleId;
use crate::records::TrackerType;
use crate::validation::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerStatus {
    #[default]
    Ok,
    /// Only advisory issues were reported.
    Warning,
    Error,
}

impl TrackerStatus {
    /// Status implied by a set of validation errors.
    pub fn from_errors<'a>(errors: impl IntoIterator<Item = &'a ValidationError>) -> Self {
        let mut status = Self::Ok;
        for error in errors {
            if error.is_blocking() {
                return Self::Error;
            }
            status = Self::Warning;
        }
        status
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub ignored: usize,
}

impl TrackerStats {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted + self.ignored
    }

    pub fn ignored(count: usize) -> Self {
        Self {
            ignored: count,
            ..Self::default()
        }
    }
}

impl AddAssign for TrackerStats {
    fn add_assign(&mut self, rhs: Self) {
        self.created += rhs.created;
        self.updated += rhs.updated;
        self.deleted += rhs.deleted;
        self.ignored += rhs.ignored;
    }
}

/// Where a bundle ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BundleStatus {
    /// Only validated; nothing was written.
    Validated,
    Committed,
    /// Blocking validation errors; nothing was written.
    Rejected,
    Deleted,
    /// The store failed part way through; the bundle was rolled back.
    Failed,
}

/// Outcome of one bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerBundleReport {
    pub bundle: BundleId,
    pub status: BundleStatus,
    pub type_reports: BTreeMap<TrackerType, TrackerStats>,
    pub errors: Vec<ValidationError>,
}

impl TrackerBundleReport {
    pub fn new(bundle: BundleId, status: BundleStatus) -> Self {
        Self {
            bundle,
            status,
            type_reports: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn stats(&self, tracker_type: TrackerType) -> TrackerStats {
        self.type_reports
            .get(&tracker_type)
            .copied()
            .unwrap_or_default()
    }

    pub fn stats_mut(&mut self, tracker_type: TrackerType) -> &mut TrackerStats {
        self.type_reports.entry(tracker_type).or_default()
    }

    pub fn totals(&self) -> TrackerStats {
        let mut totals = TrackerStats::default();
        for stats in self.type_reports.values() {
            totals += *stats;
        }
        totals
    }

    pub fn status(&self) -> TrackerStatus {
        if self.status == BundleStatus::Failed {
            return TrackerStatus::Error;
        }
        TrackerStatus::from_errors(&self.errors)
    }
}

/// A bundle the store could not commit or delete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleFailure {
    pub bundle: BundleId,
    pub message: String,
}

/// The result of a whole import pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub status: TrackerStatus,
    pub stats: TrackerStats,
    pub type_reports: BTreeMap<TrackerType, TrackerStats>,
    pub bundles: Vec<TrackerBundleReport>,
    pub errors: Vec<ValidationError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<BundleFailure>,
}

impl ImportReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bundle(&mut self, bundle: TrackerBundleReport) {
        for (tracker_type, stats) in &bundle.type_reports {
            *self.type_reports.entry(*tracker_type).or_default() += *stats;
            self.stats += *stats;
        }
        self.errors.extend(bundle.errors.iter().cloned());
        self.bundles.push(bundle);
        self.refresh_status();
    }

    /// Record a bundle that the store rejected. Every record in it counts as ignored.
    pub fn add_failure(
        &mut self,
        bundle: BundleId,
        counts: BTreeMap<TrackerType, usize>,
        cause: &crate::error::TrackerError,
    ) {
        let mut report = TrackerBundleReport::new(bundle, BundleStatus::Failed);
        for (tracker_type, count) in counts {
            *report.stats_mut(tracker_type) = TrackerStats::ignored(count);
        }
        for (tracker_type, stats) in &report.type_reports {
            *self.type_reports.entry(*tracker_type).or_default() += *stats;
            self.stats += *stats;
        }
        self.failures.push(BundleFailure {
            bundle,
            message: cause.to_string(),
        });
        self.bundles.push(report);
        self.refresh_status();
    }

    pub fn stats(&self, tracker_type: TrackerType) -> TrackerStats {
        self.type_reports
            .get(&tracker_type)
            .copied()
            .unwrap_or_default()
    }

    fn refresh_status(&mut self) {
        self.status = if self.failures.is_empty() {
            TrackerStatus::from_errors(&self.errors)
        } else {
            TrackerStatus::Error
        };
    }
}
