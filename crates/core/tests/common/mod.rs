#![allow(dead_code)]

use std::sync::Arc;
use tracker_core::{
    AttributeValue, DataValue, Enrollment, Event, ExistingRecord, IdScheme, ImportStrategy,
    InMemoryStore, OrganisationUnit, PersistOutcome, Program, ProgramInstance, ProgramStage,
    RemoveOutcome, StageDataElement, StoreError, StoreResult, StoreTransaction, TrackedEntity,
    TrackedEntityAttribute, TrackerRecord, TrackerStore, TrackerType, ValueType,
};
use tracker_types::{Code, NonEmptyText};
use tracker_uid::{generate_code, Uid};

pub const TRACKED_ENTITY_TYPE: &str = "nEenWmSyUEp";

/// Reference data shared by the pipeline tests: five organisation units with random codes, a
/// program assigned to all of them with one stage and one mandatory attribute.
pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub org_units: Vec<OrganisationUnit>,
    pub program: Program,
    pub stage: Uid,
    pub weight: Uid,
    pub age: Uid,
}

pub fn name(value: &str) -> NonEmptyText {
    NonEmptyText::new(value).expect("valid name")
}

pub fn org_unit(id: i64, code: &str) -> OrganisationUnit {
    OrganisationUnit::new(id, Uid::generate(), name(&format!("Unit {id}")))
        .with_code(Code::new(code).expect("valid code"))
}

pub fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let org_units: Vec<OrganisationUnit> = (0..5)
        .map(|i| org_unit(1 + i, &generate_code(8)))
        .collect();
    let stage = Uid::generate();
    let weight = Uid::generate();
    let age = Uid::generate();

    let program = Program::new(1, Uid::generate(), name("Child programme"))
        .with_code(Code::new("CHILD").expect("valid code"))
        .with_organisation_units(org_units.iter().map(|u| u.uid.clone()))
        .with_attribute(age.clone(), true)
        .with_stage(ProgramStage {
            uid: stage.clone(),
            name: name("Birth"),
            data_elements: vec![StageDataElement {
                data_element: weight.clone(),
                value_type: ValueType::Number,
                compulsory: false,
            }],
        });

    for unit in &org_units {
        store
            .add_organisation_unit(unit.clone())
            .expect("add org unit");
    }
    store.add_program(program.clone()).expect("add program");
    store
        .add_tracked_entity_attribute(TrackedEntityAttribute {
            uid: age.clone(),
            name: name("Age"),
            value_type: ValueType::IntegerZeroOrPositive,
        })
        .expect("add attribute");

    Fixture {
        store,
        org_units,
        program,
        stage,
        weight,
        age,
    }
}

/// The value of `unit` under `scheme`.
pub fn reference(unit: &OrganisationUnit, scheme: IdScheme) -> String {
    match scheme {
        IdScheme::Id => unit.id.to_string(),
        IdScheme::Code => unit
            .code
            .as_ref()
            .map(|c| c.as_str().to_owned())
            .expect("fixture units have codes"),
        IdScheme::Uid => unit.uid.to_string(),
    }
}

impl Fixture {
    pub fn unit(&self) -> &OrganisationUnit {
        &self.org_units[0]
    }

    pub fn tracked_entity(&self) -> TrackedEntity {
        TrackedEntity {
            uid: Uid::generate().into_string(),
            tracked_entity_type: TRACKED_ENTITY_TYPE.into(),
            org_unit: self.unit().uid.to_string(),
            attributes: vec![],
        }
    }

    pub fn enrollment(&self, tracked_entity: &str) -> Enrollment {
        Enrollment {
            uid: Uid::generate().into_string(),
            tracked_entity: tracked_entity.into(),
            program: self.program.uid.to_string(),
            org_unit: self.unit().uid.to_string(),
            attributes: vec![AttributeValue {
                attribute: self.age.to_string(),
                value: "3".into(),
            }],
            ..Default::default()
        }
    }

    pub fn event(&self, enrollment: &str) -> Event {
        Event {
            uid: Uid::generate().into_string(),
            enrollment: Some(enrollment.into()),
            program: self.program.uid.to_string(),
            program_stage: self.stage.to_string(),
            org_unit: self.unit().uid.to_string(),
            data_values: vec![DataValue {
                data_element: self.weight.to_string(),
                value: "3.4".into(),
            }],
            ..Default::default()
        }
    }
}

/// A store that refuses to persist one particular record, for exercising rollback.
pub struct FailingStore {
    pub inner: Arc<InMemoryStore>,
    pub fail_on: String,
}

struct FailingTransaction<'a> {
    inner: Box<dyn StoreTransaction + 'a>,
    fail_on: &'a str,
}

impl StoreTransaction for FailingTransaction<'_> {
    fn persist(
        &mut self,
        record: &TrackerRecord,
        strategy: ImportStrategy,
    ) -> StoreResult<PersistOutcome> {
        if record.uid() == self.fail_on {
            return Err(StoreError::ConstraintViolation {
                tracker_type: record.tracker_type(),
                uid: record.uid().to_owned(),
                reason: "rejected by test store".into(),
            });
        }
        self.inner.persist(record, strategy)
    }

    fn remove(&mut self, tracker_type: TrackerType, uid: &str) -> StoreResult<RemoveOutcome> {
        if uid == self.fail_on {
            return Err(StoreError::Unavailable("rejected by test store".into()));
        }
        self.inner.remove(tracker_type, uid)
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        self.inner.commit()
    }
}

impl TrackerStore for FailingStore {
    fn organisation_unit(
        &self,
        scheme: IdScheme,
        reference: &str,
    ) -> StoreResult<Option<OrganisationUnit>> {
        self.inner.organisation_unit(scheme, reference)
    }

    fn organisation_units_for_program(
        &self,
        program_uid: &str,
    ) -> StoreResult<Vec<OrganisationUnit>> {
        self.inner.organisation_units_for_program(program_uid)
    }

    fn program(&self, scheme: IdScheme, reference: &str) -> StoreResult<Option<Program>> {
        self.inner.program(scheme, reference)
    }

    fn program_instance(&self, enrollment_uid: &str) -> StoreResult<Option<ProgramInstance>> {
        self.inner.program_instance(enrollment_uid)
    }

    fn tracked_entity_attribute(&self, uid: &str) -> StoreResult<Option<TrackedEntityAttribute>> {
        self.inner.tracked_entity_attribute(uid)
    }

    fn existing(
        &self,
        tracker_type: TrackerType,
        uid: &str,
    ) -> StoreResult<Option<ExistingRecord>> {
        self.inner.existing(tracker_type, uid)
    }

    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        Ok(Box::new(FailingTransaction {
            inner: self.inner.begin()?,
            fail_on: &self.fail_on,
        }))
    }
}
