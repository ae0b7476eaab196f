use super::{
    ExistingRecord, PersistOutcome, RemoveOutcome, StoreError, StoreResult, StoreTransaction,
    TrackerStore,
};
use crate::config::ImportStrategy;
use crate::identifiers::IdScheme;
use crate::metadata::{OrganisationUnit, Program, ProgramInstance, TrackedEntityAttribute};
use crate::records::{Enrollment, Event, RecordKey, TrackedEntity, TrackerRecord, TrackerType};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Clone, Debug)]
struct StoredRecord {
    record: TrackerRecord,
    deleted: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    organisation_units: Vec<OrganisationUnit>,
    programs: Vec<Program>,
    attributes: HashMap<String, TrackedEntityAttribute>,
    records: BTreeMap<RecordKey, StoredRecord>,
}

impl StoreState {
    fn live(&self, tracker_type: TrackerType) -> impl Iterator<Item = &TrackerRecord> {
        self.records
            .iter()
            .filter(move |(key, stored)| key.tracker_type == tracker_type && !stored.deleted)
            .map(|(_, stored)| &stored.record)
    }

    fn is_live(&self, key: &RecordKey) -> bool {
        self.records.get(key).is_some_and(|stored| !stored.deleted)
    }

    /// Live records below `root`, parents before children.
    fn live_descendants(&self, root: &RecordKey) -> Vec<RecordKey> {
        let mut found = Vec::new();
        let mut cursor = 0;
        let mut frontier = vec![root.clone()];

        while cursor < frontier.len() {
            let parent = frontier[cursor].clone();
            cursor += 1;
            for (key, stored) in &self.records {
                if stored.deleted {
                    continue;
                }
                if stored.record.parent() == Some((parent.tracker_type, parent.uid.as_str())) {
                    found.push(key.clone());
                    frontier.push(key.clone());
                }
            }
        }

        found
    }
}

/// A process-local [`TrackerStore`].
///
/// Writes are serialised: a transaction holds the store lock until it is committed or dropped.
/// Metadata is registered up front with the `add_*` methods and is never touched by bundles.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }

    /// Register an organisation unit, replacing any unit with the same uid.
    pub fn add_organisation_unit(&self, unit: OrganisationUnit) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.organisation_units.retain(|u| u.uid != unit.uid);
        state.organisation_units.push(unit);
        Ok(())
    }

    /// Register a program, replacing any program with the same uid.
    pub fn add_program(&self, program: Program) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.programs.retain(|p| p.uid != program.uid);
        state.programs.push(program);
        Ok(())
    }

    pub fn add_tracked_entity_attribute(
        &self,
        attribute: TrackedEntityAttribute,
    ) -> StoreResult<()> {
        let mut state = self.lock()?;
        state
            .attributes
            .insert(attribute.uid.as_str().to_owned(), attribute);
        Ok(())
    }

    /// Live (not deleted) tracked entities.
    pub fn tracked_entities(&self) -> StoreResult<Vec<TrackedEntity>> {
        let state = self.lock()?;
        Ok(state
            .live(TrackerType::TrackedEntity)
            .filter_map(|record| match record {
                TrackerRecord::TrackedEntity(te) => Some(te.clone()),
                _ => None,
            })
            .collect())
    }

    /// Live enrollments.
    pub fn enrollments(&self) -> StoreResult<Vec<Enrollment>> {
        let state = self.lock()?;
        Ok(state
            .live(TrackerType::Enrollment)
            .filter_map(|record| match record {
                TrackerRecord::Enrollment(en) => Some(en.clone()),
                _ => None,
            })
            .collect())
    }

    /// Live events.
    pub fn events(&self) -> StoreResult<Vec<Event>> {
        let state = self.lock()?;
        Ok(state
            .live(TrackerType::Event)
            .filter_map(|record| match record {
                TrackerRecord::Event(ev) => Some(ev.clone()),
                _ => None,
            })
            .collect())
    }

    /// Live enrollments, as program instances.
    pub fn program_instances(&self) -> StoreResult<Vec<ProgramInstance>> {
        Ok(self
            .enrollments()?
            .iter()
            .map(|en| persisted_instance(en, false))
            .collect())
    }
}

fn persisted_instance(enrollment: &Enrollment, deleted: bool) -> ProgramInstance {
    ProgramInstance {
        deleted,
        persisted: true,
        ..ProgramInstance::from_batch(enrollment, &enrollment.program)
    }
}

impl TrackerStore for InMemoryStore {
    fn organisation_unit(
        &self,
        scheme: IdScheme,
        reference: &str,
    ) -> StoreResult<Option<OrganisationUnit>> {
        let state = self.lock()?;
        Ok(scheme.find(reference, &state.organisation_units).cloned())
    }

    fn organisation_units_for_program(
        &self,
        program_uid: &str,
    ) -> StoreResult<Vec<OrganisationUnit>> {
        let state = self.lock()?;
        let Some(program) = state.programs.iter().find(|p| p.uid.as_str() == program_uid) else {
            return Ok(Vec::new());
        };
        Ok(state
            .organisation_units
            .iter()
            .filter(|unit| program.organisation_units.contains(&unit.uid))
            .cloned()
            .collect())
    }

    fn program(&self, scheme: IdScheme, reference: &str) -> StoreResult<Option<Program>> {
        let state = self.lock()?;
        Ok(scheme.find(reference, &state.programs).cloned())
    }

    fn program_instance(&self, enrollment_uid: &str) -> StoreResult<Option<ProgramInstance>> {
        let state = self.lock()?;
        let key = RecordKey::new(TrackerType::Enrollment, enrollment_uid);
        Ok(state.records.get(&key).and_then(|stored| match &stored.record {
            TrackerRecord::Enrollment(en) => Some(persisted_instance(en, stored.deleted)),
            _ => None,
        }))
    }

    fn tracked_entity_attribute(&self, uid: &str) -> StoreResult<Option<TrackedEntityAttribute>> {
        let state = self.lock()?;
        Ok(state.attributes.get(uid).cloned())
    }

    fn existing(
        &self,
        tracker_type: TrackerType,
        uid: &str,
    ) -> StoreResult<Option<ExistingRecord>> {
        let state = self.lock()?;
        let key = RecordKey::new(tracker_type, uid);
        Ok(state.records.get(&key).map(|stored| ExistingRecord {
            deleted: stored.deleted,
            enrollment_status: match &stored.record {
                TrackerRecord::Enrollment(en) => Some(en.status),
                _ => None,
            },
        }))
    }

    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        Ok(Box::new(MemoryTransaction {
            state: self.lock()?,
            undo: Vec::new(),
            committed: false,
        }))
    }
}

struct MemoryTransaction<'a> {
    state: MutexGuard<'a, StoreState>,
    /// Previous value of every key written, replayed in reverse on rollback.
    undo: Vec<(RecordKey, Option<StoredRecord>)>,
    committed: bool,
}

impl MemoryTransaction<'_> {
    fn write(&mut self, key: RecordKey, stored: StoredRecord) {
        let previous = self.state.records.insert(key.clone(), stored);
        self.undo.push((key, previous));
    }

    fn require_live_parent(&self, record: &TrackerRecord) -> StoreResult<()> {
        let Some((parent_type, parent)) = record.parent() else {
            return Ok(());
        };
        if self.state.is_live(&RecordKey::new(parent_type, parent)) {
            return Ok(());
        }
        Err(StoreError::MissingParent {
            tracker_type: record.tracker_type(),
            uid: record.uid().to_owned(),
            parent_type,
            parent: parent.to_owned(),
        })
    }

    fn rollback(&mut self) {
        while let Some((key, previous)) = self.undo.pop() {
            match previous {
                Some(stored) => {
                    self.state.records.insert(key, stored);
                }
                None => {
                    self.state.records.remove(&key);
                }
            }
        }
    }
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn persist(
        &mut self,
        record: &TrackerRecord,
        strategy: ImportStrategy,
    ) -> StoreResult<PersistOutcome> {
        if strategy.is_delete() {
            return Err(StoreError::InvalidOperation(
                "persist called with the DELETE strategy".into(),
            ));
        }

        let key = record.key();
        let outcome = match self.state.records.get(&key) {
            None if strategy == ImportStrategy::Update => PersistOutcome::Ignored,
            None => PersistOutcome::Created,
            Some(stored) if stored.deleted => PersistOutcome::Ignored,
            Some(_) if strategy == ImportStrategy::Create => PersistOutcome::Ignored,
            Some(_) => PersistOutcome::Updated,
        };

        if outcome != PersistOutcome::Ignored {
            self.require_live_parent(record)?;
            self.write(
                key,
                StoredRecord {
                    record: record.clone(),
                    deleted: false,
                },
            );
        }

        Ok(outcome)
    }

    fn remove(&mut self, tracker_type: TrackerType, uid: &str) -> StoreResult<RemoveOutcome> {
        let root = RecordKey::new(tracker_type, uid);
        if !self.state.is_live(&root) {
            return Ok(RemoveOutcome::Ignored);
        }

        let mut doomed = vec![root.clone()];
        doomed.extend(self.state.live_descendants(&root));

        for key in doomed {
            if let Some(current) = self.state.records.get(&key).cloned() {
                self.write(
                    key,
                    StoredRecord {
                        deleted: true,
                        ..current
                    },
                );
            }
        }

        Ok(RemoveOutcome::Deleted)
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        self.committed = true;
        self.undo.clear();
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
        }
    }
}
