//! Bundle lifecycle.
//!
//! A bundle moves through its lifecycle as a type-state: [`TrackerBundleService::create`] yields
//! [`TrackerBundle<Built>`], [`TrackerBundleService::validate`] consumes that and yields
//! [`TrackerBundle<Validated>`], and [`TrackerBundleService::commit`] consumes the validated
//! bundle and reports it as committed or rejected. A built bundle can instead be handed to
//! [`TrackerBundleService::delete`]. Committing an unvalidated bundle does not compile.
//!
//! Each commit or delete runs in one store transaction. Writes go parents first (tracked
//! entities, enrollments, events) and removals go children first. If the store fails part way
//! through, the transaction is dropped, which rolls it back, and the bundle is reported as failed.

use crate::config::{AtomicMode, BundlePartition, ImportOptions};
use crate::error::{TrackerError, TrackerResult};
use crate::records::{RecordKey, TrackerPayload, TrackerRecord, TrackerType};
use crate::report::{BundleStatus, TrackerBundleReport, TrackerStats};
use crate::store::{PersistOutcome, RemoveOutcome, StoreResult, TrackerStore};
use crate::validation::{ValidationChain, ValidationReport};
use crate::work_context::WorkContext;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Position of a bundle within the pass that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(pub usize);

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// TYPE-STATE MARKERS
// ============================================================================

/// Records assembled, not yet validated.
#[derive(Clone, Copy, Debug)]
pub struct Built;

/// Rule chain executed; the context it ran against is kept for the commit.
#[derive(Debug)]
pub struct Validated {
    context: WorkContext,
    report: ValidationReport,
}

// ============================================================================
// BUNDLE
// ============================================================================

#[derive(Debug)]
pub struct TrackerBundle<S> {
    id: BundleId,
    options: Arc<ImportOptions>,
    /// Tracked entities, then enrollments, then events.
    records: Vec<TrackerRecord>,
    state: S,
}

impl<S> TrackerBundle<S> {
    pub fn id(&self) -> BundleId {
        self.id
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    pub fn records(&self) -> &[TrackerRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records of each type in the bundle.
    pub fn counts(&self) -> BTreeMap<TrackerType, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.tracker_type()).or_insert(0) += 1;
        }
        counts
    }
}

impl TrackerBundle<Validated> {
    pub fn report(&self) -> &ValidationReport {
        &self.state.report
    }

    pub fn context(&self) -> &WorkContext {
        &self.state.context
    }

    pub fn into_report(self) -> ValidationReport {
        self.state.report
    }
}

// ============================================================================
// SERVICE
// ============================================================================

/// Creates, validates, commits and deletes bundles against one store.
pub struct TrackerBundleService<St: TrackerStore + ?Sized> {
    store: Arc<St>,
    chain: ValidationChain,
}

impl<St: TrackerStore + ?Sized> Clone for TrackerBundleService<St> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            chain: self.chain.clone(),
        }
    }
}

impl<St: TrackerStore + ?Sized> TrackerBundleService<St> {
    pub fn new(store: Arc<St>) -> Self {
        Self::with_chain(store, ValidationChain::default())
    }

    pub fn with_chain(store: Arc<St>, chain: ValidationChain) -> Self {
        Self { store, chain }
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Split a payload into bundles according to the configured partition.
    ///
    /// Always returns at least one bundle, which may be empty.
    pub fn create(
        &self,
        payload: TrackerPayload,
        options: Arc<ImportOptions>,
    ) -> Vec<TrackerBundle<Built>> {
        let record_count = payload.len();
        let payloads = match options.partition() {
            BundlePartition::Single => vec![payload],
            BundlePartition::TrackedEntity => partition_by_tracked_entity(payload),
        };

        let bundles: Vec<TrackerBundle<Built>> = payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| TrackerBundle {
                id: BundleId(index),
                options: Arc::clone(&options),
                records: payload.into_records(),
                state: Built,
            })
            .collect();

        tracing::info!(
            "created {} bundle(s) from {} records",
            bundles.len(),
            record_count
        );
        bundles
    }

    /// Build the work context for the bundle and run the rule chain over it.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Store`] if reference data cannot be read.
    pub fn validate(
        &self,
        bundle: TrackerBundle<Built>,
    ) -> TrackerResult<TrackerBundle<Validated>> {
        let TrackerBundle {
            id,
            options,
            records,
            ..
        } = bundle;

        let context = WorkContext::build(&records, Arc::clone(&options), self.store.as_ref())?;
        let report = self.chain.validate(&records, &context);

        tracing::info!(
            "bundle {} validated: {} records, {} errors",
            id,
            records.len(),
            report.len()
        );

        Ok(TrackerBundle {
            id,
            options,
            records,
            state: Validated { context, report },
        })
    }

    /// Apply the import strategy to a validated bundle.
    ///
    /// Under the DELETE strategy the surviving records are removed children first, as
    /// [`delete`](Self::delete) does.
    ///
    /// Under [`AtomicMode::All`] any blocking error rejects the bundle and nothing is written.
    /// Under [`AtomicMode::Object`] records with blocking errors, and their dependents in the
    /// bundle, are held back and counted as ignored while the rest is written.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::BundleCommit`] (or [`TrackerError::BundleDelete`] for the DELETE
    /// strategy) if the store fails; nothing from the bundle is persisted in that case.
    pub fn commit(&self, bundle: TrackerBundle<Validated>) -> TrackerResult<TrackerBundleReport> {
        let TrackerBundle {
            id,
            options,
            records,
            state: Validated { context, report },
        } = bundle;

        let held_back = held_back(&records, &report);
        let errors = report.into_errors();

        let rejected = match options.atomic_mode() {
            AtomicMode::All => !held_back.is_empty(),
            AtomicMode::Object => !records.is_empty() && held_back.len() >= unique_keys(&records),
        };
        if rejected {
            let mut bundle_report = TrackerBundleReport::new(id, BundleStatus::Rejected);
            for record in &records {
                bundle_report.stats_mut(record.tracker_type()).ignored += 1;
            }
            bundle_report.errors = errors;
            tracing::info!(
                "bundle {} rejected: {} records held back",
                id,
                held_back.len()
            );
            return Ok(bundle_report);
        }

        if options.import_strategy().is_delete() {
            let mut bundle_report = self.remove_records(id, &records, &held_back)?;
            bundle_report.errors = errors;
            return Ok(bundle_report);
        }

        let strategy = options.import_strategy();
        let mut bundle_report = TrackerBundleReport::new(id, BundleStatus::Committed);
        let mut tx = self
            .store
            .begin()
            .map_err(|source| TrackerError::BundleCommit { bundle: id, source })?;

        let result: StoreResult<()> = (|| {
            for tracker_type in TrackerType::COMMIT_ORDER {
                for record in records.iter().filter(|r| r.tracker_type() == tracker_type) {
                    let stats = bundle_report.stats_mut(tracker_type);
                    if held_back.contains(&record.key()) {
                        stats.ignored += 1;
                        continue;
                    }
                    match tx.persist(&context.canonical(record), strategy)? {
                        PersistOutcome::Created => stats.created += 1,
                        PersistOutcome::Updated => stats.updated += 1,
                        PersistOutcome::Ignored => stats.ignored += 1,
                    }
                }
            }
            Ok(())
        })();

        if let Err(source) = result.and_then(|()| tx.commit()) {
            tracing::warn!("bundle {} commit aborted and rolled back: {}", id, source);
            return Err(TrackerError::BundleCommit { bundle: id, source });
        }

        bundle_report.errors = errors;
        let totals = bundle_report.totals();
        tracing::info!(
            "bundle {} committed: {} created, {} updated, {} ignored",
            id,
            totals.created,
            totals.updated,
            totals.ignored
        );
        Ok(bundle_report)
    }

    /// Soft-delete every record of a built bundle, children first.
    ///
    /// References that are missing or already deleted count as ignored, so repeating a delete
    /// is safe.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::BundleDelete`] if the store fails; nothing is removed in that case.
    pub fn delete(&self, bundle: TrackerBundle<Built>) -> TrackerResult<TrackerBundleReport> {
        self.remove_records(bundle.id, &bundle.records, &HashSet::new())
    }

    fn remove_records(
        &self,
        id: BundleId,
        records: &[TrackerRecord],
        held_back: &HashSet<RecordKey>,
    ) -> TrackerResult<TrackerBundleReport> {
        let mut bundle_report = TrackerBundleReport::new(id, BundleStatus::Deleted);
        let mut tx = self
            .store
            .begin()
            .map_err(|source| TrackerError::BundleDelete { bundle: id, source })?;

        let result: StoreResult<()> = (|| {
            for tracker_type in TrackerType::DELETE_ORDER {
                for record in records.iter().filter(|r| r.tracker_type() == tracker_type) {
                    let stats = bundle_report.stats_mut(tracker_type);
                    if record.uid().is_empty() || held_back.contains(&record.key()) {
                        stats.ignored += 1;
                        continue;
                    }
                    match tx.remove(tracker_type, record.uid())? {
                        RemoveOutcome::Deleted => stats.deleted += 1,
                        RemoveOutcome::Ignored => stats.ignored += 1,
                    }
                }
            }
            Ok(())
        })();

        if let Err(source) = result.and_then(|()| tx.commit()) {
            tracing::warn!("bundle {} delete aborted and rolled back: {}", id, source);
            return Err(TrackerError::BundleDelete { bundle: id, source });
        }

        let totals: TrackerStats = bundle_report.totals();
        tracing::info!(
            "bundle {} deleted: {} deleted, {} ignored",
            id,
            totals.deleted,
            totals.ignored
        );
        Ok(bundle_report)
    }
}

/// Records with blocking errors plus every record below them in the bundle.
fn held_back(records: &[TrackerRecord], report: &ValidationReport) -> HashSet<RecordKey> {
    let mut held = report.blocked();
    for tracker_type in TrackerType::COMMIT_ORDER {
        for record in records.iter().filter(|r| r.tracker_type() == tracker_type) {
            let parent_held = record
                .parent()
                .is_some_and(|(parent_type, parent)| {
                    held.contains(&RecordKey::new(parent_type, parent))
                });
            if parent_held {
                held.insert(record.key());
            }
        }
    }
    held
}

fn unique_keys(records: &[TrackerRecord]) -> usize {
    records
        .iter()
        .map(TrackerRecord::key)
        .collect::<HashSet<_>>()
        .len()
}

/// Group key for [`BundlePartition::TrackedEntity`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Root {
    TrackedEntity(String),
    /// An event whose enrollment is not in the payload.
    Enrollment(String),
    /// An event without an enrollment.
    Standalone,
}

fn group<'a>(
    groups: &'a mut Vec<TrackerPayload>,
    index: &mut HashMap<Root, usize>,
    root: Root,
) -> &'a mut TrackerPayload {
    let slot = *index.entry(root).or_insert_with(|| {
        groups.push(TrackerPayload::default());
        groups.len() - 1
    });
    &mut groups[slot]
}

/// One payload per root tracked entity, in order of first appearance.
fn partition_by_tracked_entity(payload: TrackerPayload) -> Vec<TrackerPayload> {
    let enrollment_roots: HashMap<String, String> = payload
        .enrollments
        .iter()
        .map(|en| (en.uid.clone(), en.tracked_entity.clone()))
        .collect();

    let mut groups = Vec::new();
    let mut index = HashMap::new();

    for te in payload.tracked_entities {
        let root = Root::TrackedEntity(te.uid.clone());
        group(&mut groups, &mut index, root).tracked_entities.push(te);
    }
    for en in payload.enrollments {
        let root = Root::TrackedEntity(en.tracked_entity.clone());
        group(&mut groups, &mut index, root).enrollments.push(en);
    }
    for ev in payload.events {
        let root = match ev.enrollment.as_deref() {
            Some(enrollment) => match enrollment_roots.get(enrollment) {
                Some(te) => Root::TrackedEntity(te.clone()),
                None => Root::Enrollment(enrollment.to_owned()),
            },
            None => Root::Standalone,
        };
        group(&mut groups, &mut index, root).events.push(ev);
    }

    if groups.is_empty() {
        groups.push(TrackerPayload::default());
    }
    groups
}
