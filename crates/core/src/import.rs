//! Whole-pass orchestration.
//!
//! [`TrackerImportService`] drives every bundle of a payload through its lifecycle and folds
//! the outcomes into one [`ImportReport`]. A bundle the store fails on is recorded as a failure
//! in the report; bundles before and after it are unaffected.

use crate::bundle::{Built, TrackerBundle, TrackerBundleService};
use crate::config::ImportOptions;
use crate::error::TrackerResult;
use crate::records::TrackerPayload;
use crate::report::{BundleStatus, ImportReport, TrackerBundleReport};
use crate::store::TrackerStore;
use std::sync::Arc;

pub struct TrackerImportService<St: TrackerStore + ?Sized> {
    bundles: TrackerBundleService<St>,
}

impl<St: TrackerStore + ?Sized> TrackerImportService<St> {
    pub fn new(store: Arc<St>) -> Self {
        Self {
            bundles: TrackerBundleService::new(store),
        }
    }

    pub fn with_bundle_service(bundles: TrackerBundleService<St>) -> Self {
        Self { bundles }
    }

    pub fn bundle_service(&self) -> &TrackerBundleService<St> {
        &self.bundles
    }

    /// Import a payload: create bundles, then validate and commit each one. Under the DELETE
    /// strategy the commit removes the records instead of writing them.
    pub fn import(&self, payload: TrackerPayload, options: ImportOptions) -> ImportReport {
        let mut report = ImportReport::new();

        for bundle in self.bundles.create(payload, Arc::new(options)) {
            let id = bundle.id();
            let counts = bundle.counts();
            match self.validate_and_commit(bundle) {
                Ok(bundle_report) => report.add_bundle(bundle_report),
                Err(err) => report.add_failure(id, counts, &err),
            }
        }

        tracing::info!(
            "import finished with status {:?}: {} created, {} updated, {} deleted, {} ignored",
            report.status,
            report.stats.created,
            report.stats.updated,
            report.stats.deleted,
            report.stats.ignored
        );
        report
    }

    /// Validate a payload without writing anything.
    pub fn validate(&self, payload: TrackerPayload, options: ImportOptions) -> ImportReport {
        let mut report = ImportReport::new();

        for bundle in self.bundles.create(payload, Arc::new(options)) {
            let id = bundle.id();
            let counts = bundle.counts();
            match self.bundles.validate(bundle) {
                Ok(validated) => {
                    let mut bundle_report = TrackerBundleReport::new(id, BundleStatus::Validated);
                    bundle_report.errors = validated.into_report().into_errors();
                    report.add_bundle(bundle_report);
                }
                Err(err) => report.add_failure(id, counts, &err),
            }
        }

        report
    }

    fn validate_and_commit(
        &self,
        bundle: TrackerBundle<Built>,
    ) -> TrackerResult<TrackerBundleReport> {
        let validated = self.bundles.validate(bundle)?;
        self.bundles.commit(validated)
    }
}
