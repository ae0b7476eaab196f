//! Per-batch lookup cache.
//!
//! A [`WorkContext`] is built once for the records of one bundle, before any rule runs. Every
//! reference the batch mentions (organisation units, programs, parent records, attributes) is
//! resolved through the store exactly once and memoised here, including the misses. After
//! [`WorkContext::build`] returns, nothing in this module touches the store again, so rules can
//! read the context from many threads at once.
//!
//! References are resolved under the schemes carried by the [`ImportOptions`] the context was
//! built with. A context must not outlive its pass or be reused for another batch.

use crate::config::ImportOptions;
use crate::error::TrackerResult;
use crate::identifiers::SchemeIndex;
use crate::metadata::{OrganisationUnit, Program, ProgramInstance, TrackedEntityAttribute};
use crate::records::{Enrollment, RecordKey, TrackerRecord, TrackerType};
use crate::store::{ExistingRecord, TrackerStore};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A program together with its assigned organisation units, indexed under the org-unit scheme.
#[derive(Clone, Debug)]
pub struct ResolvedProgram {
    pub program: Program,
    pub assigned: SchemeIndex,
}

impl ResolvedProgram {
    /// True if `org_unit_reference` names one of the program's assigned units.
    pub fn is_assigned(&self, org_unit_reference: &str) -> bool {
        self.assigned.contains(org_unit_reference)
    }
}

#[derive(Debug)]
pub struct WorkContext {
    options: Arc<ImportOptions>,
    validated_at: DateTime<Utc>,
    /// Org-unit reference to the unit it resolves to; `None` records a miss.
    organisation_units: HashMap<String, Option<OrganisationUnit>>,
    /// Program reference to program uid; `None` records a miss.
    program_refs: HashMap<String, Option<String>>,
    programs: HashMap<String, ResolvedProgram>,
    /// Keyed by event uid.
    program_instances: HashMap<String, ProgramInstance>,
    existing: HashMap<RecordKey, ExistingRecord>,
    occurrences: HashMap<RecordKey, usize>,
    attributes: HashMap<String, Option<TrackedEntityAttribute>>,
}

impl WorkContext {
    /// Resolve everything `records` refer to.
    ///
    /// Unresolvable references are not errors here; they are recorded as misses and left for the
    /// rule chain to report.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Store`](crate::error::TrackerError::Store) if the store cannot be
    /// read.
    pub fn build<S>(
        records: &[TrackerRecord],
        options: Arc<ImportOptions>,
        store: &S,
    ) -> TrackerResult<Self>
    where
        S: TrackerStore + ?Sized,
    {
        let mut context = Self {
            options,
            validated_at: Utc::now(),
            organisation_units: HashMap::new(),
            program_refs: HashMap::new(),
            programs: HashMap::new(),
            program_instances: HashMap::new(),
            existing: HashMap::new(),
            occurrences: HashMap::new(),
            attributes: HashMap::new(),
        };

        for record in records {
            *context.occurrences.entry(record.key()).or_insert(0) += 1;
        }

        context.resolve_organisation_units(records, store)?;
        context.resolve_programs(records, store)?;
        context.resolve_existing(records, store)?;
        context.resolve_program_instances(records, store)?;
        context.resolve_attributes(records, store)?;

        tracing::debug!(
            "work context built for {} records: {} org units ({} unresolved), {} programs ({} unresolved), {} program instances",
            records.len(),
            context.organisation_units.len(),
            context
                .organisation_units
                .values()
                .filter(|unit| unit.is_none())
                .count(),
            context.program_refs.len(),
            context
                .program_refs
                .values()
                .filter(|uid| uid.is_none())
                .count(),
            context.program_instances.len(),
        );

        Ok(context)
    }

    fn resolve_organisation_units<S>(
        &mut self,
        records: &[TrackerRecord],
        store: &S,
    ) -> TrackerResult<()>
    where
        S: TrackerStore + ?Sized,
    {
        let scheme = self.options.org_unit_id_scheme();
        for record in records {
            let reference = record.org_unit();
            if reference.is_empty() || self.organisation_units.contains_key(reference) {
                continue;
            }
            let unit = store.organisation_unit(scheme, reference)?;
            self.organisation_units.insert(reference.to_owned(), unit);
        }
        Ok(())
    }

    fn resolve_programs<S>(&mut self, records: &[TrackerRecord], store: &S) -> TrackerResult<()>
    where
        S: TrackerStore + ?Sized,
    {
        let program_scheme = self.options.program_id_scheme();
        let org_unit_scheme = self.options.org_unit_id_scheme();

        for reference in records.iter().filter_map(TrackerRecord::program) {
            if reference.is_empty() || self.program_refs.contains_key(reference) {
                continue;
            }
            let Some(program) = store.program(program_scheme, reference)? else {
                self.program_refs.insert(reference.to_owned(), None);
                continue;
            };

            let uid = program.uid.as_str().to_owned();
            if !self.programs.contains_key(&uid) {
                let units = store.organisation_units_for_program(&uid)?;
                let assigned = SchemeIndex::build(org_unit_scheme, &units);
                self.programs
                    .insert(uid.clone(), ResolvedProgram { program, assigned });
            }
            self.program_refs.insert(reference.to_owned(), Some(uid));
        }
        Ok(())
    }

    fn resolve_existing<S>(&mut self, records: &[TrackerRecord], store: &S) -> TrackerResult<()>
    where
        S: TrackerStore + ?Sized,
    {
        let mut keys: HashSet<RecordKey> = HashSet::new();
        for record in records {
            if !record.uid().is_empty() {
                keys.insert(record.key());
            }
            if let Some((parent_type, parent)) = record.parent() {
                if !parent.is_empty() {
                    keys.insert(RecordKey::new(parent_type, parent));
                }
            }
        }

        for key in keys {
            if let Some(existing) = store.existing(key.tracker_type, &key.uid)? {
                self.existing.insert(key, existing);
            }
        }
        Ok(())
    }

    /// Link every event naming an enrollment to that enrollment's program instance.
    ///
    /// An enrollment arriving in the same batch takes precedence over a persisted one only when
    /// it will replace it; under CREATE a stored enrollment keeps its program and status.
    fn resolve_program_instances<S>(
        &mut self,
        records: &[TrackerRecord],
        store: &S,
    ) -> TrackerResult<()>
    where
        S: TrackerStore + ?Sized,
    {
        let mut batch_enrollments: HashMap<&str, &Enrollment> = HashMap::new();
        for record in records {
            if let TrackerRecord::Enrollment(enrollment) = record {
                batch_enrollments
                    .entry(enrollment.uid.as_str())
                    .or_insert(enrollment);
            }
        }

        let mut persisted: HashMap<String, Option<ProgramInstance>> = HashMap::new();
        for record in records {
            let TrackerRecord::Event(event) = record else {
                continue;
            };
            let Some(enrollment_uid) = event.enrollment.as_deref().filter(|e| !e.is_empty())
            else {
                continue;
            };

            let batch_copy = batch_enrollments
                .get(enrollment_uid)
                .filter(|_| self.supersedes_stored(TrackerType::Enrollment, enrollment_uid));
            let instance = match batch_copy {
                Some(enrollment) => self
                    .program_uid(&enrollment.program)
                    .map(|program_uid| ProgramInstance::from_batch(enrollment, program_uid)),
                None => match persisted.get(enrollment_uid) {
                    Some(cached) => cached.clone(),
                    None => {
                        let found = store.program_instance(enrollment_uid)?;
                        persisted.insert(enrollment_uid.to_owned(), found.clone());
                        found
                    }
                },
            };

            if let Some(instance) = instance {
                self.program_instances.insert(event.uid.clone(), instance);
            }
        }
        Ok(())
    }

    fn resolve_attributes<S>(&mut self, records: &[TrackerRecord], store: &S) -> TrackerResult<()>
    where
        S: TrackerStore + ?Sized,
    {
        let attribute_refs = records.iter().flat_map(|record| match record {
            TrackerRecord::TrackedEntity(te) => te.attributes.as_slice(),
            TrackerRecord::Enrollment(en) => en.attributes.as_slice(),
            TrackerRecord::Event(_) => &[],
        });

        for value in attribute_refs {
            if self.attributes.contains_key(&value.attribute) {
                continue;
            }
            let attribute = store.tracked_entity_attribute(&value.attribute)?;
            self.attributes.insert(value.attribute.clone(), attribute);
        }
        Ok(())
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// The instant future-date checks compare against; fixed for the whole pass.
    pub fn validated_at(&self) -> DateTime<Utc> {
        self.validated_at
    }

    pub fn organisation_unit(&self, reference: &str) -> Option<&OrganisationUnit> {
        self.organisation_units
            .get(reference)
            .and_then(Option::as_ref)
    }

    fn program_uid(&self, reference: &str) -> Option<&str> {
        self.program_refs
            .get(reference)
            .and_then(Option::as_deref)
    }

    /// The program `reference` resolves to under the program scheme.
    pub fn program(&self, reference: &str) -> Option<&ResolvedProgram> {
        self.program_uid(reference)
            .and_then(|uid| self.programs.get(uid))
    }

    pub fn program_by_uid(&self, uid: &str) -> Option<&ResolvedProgram> {
        self.programs.get(uid)
    }

    /// The enrollment an event belongs to, keyed by event uid.
    pub fn program_instance(&self, event_uid: &str) -> Option<&ProgramInstance> {
        self.program_instances.get(event_uid)
    }

    pub fn existing(&self, tracker_type: TrackerType, uid: &str) -> Option<&ExistingRecord> {
        self.existing.get(&RecordKey::new(tracker_type, uid))
    }

    /// How many times a reference appears in the batch.
    pub fn occurrences(&self, tracker_type: TrackerType, uid: &str) -> usize {
        self.occurrences
            .get(&RecordKey::new(tracker_type, uid))
            .copied()
            .unwrap_or(0)
    }

    pub fn in_batch(&self, tracker_type: TrackerType, uid: &str) -> bool {
        self.occurrences(tracker_type, uid) > 0
    }

    /// True if the batch copy of a record is what the store will hold once the bundle commits:
    /// the record is new, or the strategy overwrites the live stored copy.
    pub fn supersedes_stored(&self, tracker_type: TrackerType, uid: &str) -> bool {
        self.in_batch(tracker_type, uid)
            && self.existing(tracker_type, uid).map_or(true, |existing| {
                existing.is_live() && self.options.import_strategy().overwrites_existing()
            })
    }

    /// True if the record's parent is in the batch or known to the store.
    ///
    /// Records without a parent reference report false.
    pub fn parent_resolved(&self, record: &TrackerRecord) -> bool {
        match record.parent() {
            Some((parent_type, parent)) if !parent.is_empty() => {
                self.in_batch(parent_type, parent) || self.existing(parent_type, parent).is_some()
            }
            _ => false,
        }
    }

    pub fn attribute(&self, uid: &str) -> Option<&TrackedEntityAttribute> {
        self.attributes.get(uid).and_then(Option::as_ref)
    }

    /// A copy of `record` with its org-unit and program references replaced by the UIDs they
    /// resolved to, ready to be persisted.
    pub fn canonical(&self, record: &TrackerRecord) -> TrackerRecord {
        let mut record = record.clone();
        let org_unit = |reference: &mut String| {
            if let Some(unit) = self.organisation_unit(reference) {
                *reference = unit.uid.as_str().to_owned();
            }
        };
        let program = |reference: &mut String| {
            if let Some(uid) = self.program_uid(reference) {
                *reference = uid.to_owned();
            }
        };

        match &mut record {
            TrackerRecord::TrackedEntity(te) => org_unit(&mut te.org_unit),
            TrackerRecord::Enrollment(en) => {
                org_unit(&mut en.org_unit);
                program(&mut en.program);
            }
            TrackerRecord::Event(ev) => {
                org_unit(&mut ev.org_unit);
                program(&mut ev.program);
            }
        }
        record
    }
}
