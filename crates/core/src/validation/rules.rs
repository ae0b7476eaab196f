use super::{Precondition, ValidationError};
use crate::config::ImportStrategy;
use crate::records::{
    AttributeValue, Enrollment, EnrollmentStatus, Event, EventStatus, TrackedEntity,
    TrackerRecord, TrackerType,
};
use crate::work_context::WorkContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracker_uid::Uid;

/// The closed set of validation rules, in their default evaluation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleId {
    DuplicateReference,
    RequiredFields,
    UidFormat,
    Existence,
    OrganisationUnitReference,
    ProgramReference,
    ParentReference,
    ParentState,
    ProgramOrgUnit,
    ProgramStage,
    ValueType,
    MandatoryValues,
    FutureDate,
}

const NONE: &[Precondition] = &[];

impl RuleId {
    pub const ORDER: [RuleId; 13] = [
        RuleId::DuplicateReference,
        RuleId::RequiredFields,
        RuleId::UidFormat,
        RuleId::Existence,
        RuleId::OrganisationUnitReference,
        RuleId::ProgramReference,
        RuleId::ParentReference,
        RuleId::ParentState,
        RuleId::ProgramOrgUnit,
        RuleId::ProgramStage,
        RuleId::ValueType,
        RuleId::MandatoryValues,
        RuleId::FutureDate,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateReference => "DUPLICATE_REFERENCE",
            Self::RequiredFields => "REQUIRED_FIELDS",
            Self::UidFormat => "UID_FORMAT",
            Self::Existence => "EXISTENCE",
            Self::OrganisationUnitReference => "ORGANISATION_UNIT_REFERENCE",
            Self::ProgramReference => "PROGRAM_REFERENCE",
            Self::ParentReference => "PARENT_REFERENCE",
            Self::ParentState => "PARENT_STATE",
            Self::ProgramOrgUnit => "PROGRAM_ORG_UNIT",
            Self::ProgramStage => "PROGRAM_STAGE",
            Self::ValueType => "VALUE_TYPE",
            Self::MandatoryValues => "MANDATORY_VALUES",
            Self::FutureDate => "FUTURE_DATE",
        }
    }

    /// Conditions that must hold for the rule to run at all.
    pub fn requires(self) -> &'static [Precondition] {
        match self {
            Self::ParentState => &[Precondition::ParentResolved],
            Self::ProgramOrgUnit => &[
                Precondition::ProgramResolved,
                Precondition::OrgUnitResolved,
            ],
            Self::ProgramStage | Self::MandatoryValues => &[Precondition::ProgramResolved],
            _ => NONE,
        }
    }

    pub fn applies_to(self, tracker_type: TrackerType) -> bool {
        match self {
            Self::ProgramReference
            | Self::ParentReference
            | Self::ParentState
            | Self::ProgramOrgUnit
            | Self::MandatoryValues
            | Self::FutureDate => tracker_type != TrackerType::TrackedEntity,
            Self::ProgramStage => tracker_type == TrackerType::Event,
            _ => true,
        }
    }

    /// Deletes only need a well-formed, unique reference.
    pub fn runs_under(self, strategy: ImportStrategy) -> bool {
        !strategy.is_delete()
            || matches!(
                self,
                Self::DuplicateReference | Self::RequiredFields | Self::UidFormat
            )
    }

    pub fn evaluate(self, record: &TrackerRecord, context: &WorkContext) -> Vec<ValidationError> {
        match self {
            Self::DuplicateReference => duplicate_reference(record, context),
            Self::RequiredFields => required_fields(record, context),
            Self::UidFormat => uid_format(record),
            Self::Existence => existence(record, context),
            Self::OrganisationUnitReference => organisation_unit_reference(record, context),
            Self::ProgramReference => program_reference(record, context),
            Self::ParentReference => parent_reference(record, context),
            Self::ParentState => parent_state(record, context),
            Self::ProgramOrgUnit => program_org_unit(record, context),
            Self::ProgramStage => program_stage(record, context),
            Self::ValueType => value_type(record, context),
            Self::MandatoryValues => mandatory_values(record, context),
            Self::FutureDate => future_date(record, context),
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// STRUCTURAL RULES
// ============================================================================

fn duplicate_reference(record: &TrackerRecord, context: &WorkContext) -> Vec<ValidationError> {
    let uid = record.uid();
    if uid.is_empty() || context.occurrences(record.tracker_type(), uid) < 2 {
        return Vec::new();
    }
    vec![ValidationError::error(
        record,
        RuleId::DuplicateReference,
        format!(
            "{} appears more than once in the payload: {}",
            record.tracker_type().label(),
            uid
        ),
    )
    .with_field("uid")]
}

fn required_fields(record: &TrackerRecord, context: &WorkContext) -> Vec<ValidationError> {
    let mut fields: Vec<(&'static str, bool)> = vec![("uid", record.uid().is_empty())];

    if !context.options().import_strategy().is_delete() {
        match record {
            TrackerRecord::TrackedEntity(te) => {
                fields.push(("trackedEntityType", te.tracked_entity_type.is_empty()));
                fields.push(("orgUnit", te.org_unit.is_empty()));
            }
            TrackerRecord::Enrollment(en) => {
                fields.push(("trackedEntity", en.tracked_entity.is_empty()));
                fields.push(("program", en.program.is_empty()));
                fields.push(("orgUnit", en.org_unit.is_empty()));
            }
            TrackerRecord::Event(ev) => {
                fields.push(("program", ev.program.is_empty()));
                fields.push(("programStage", ev.program_stage.is_empty()));
                fields.push(("orgUnit", ev.org_unit.is_empty()));
                if let Some(enrollment) = &ev.enrollment {
                    fields.push(("enrollment", enrollment.is_empty()));
                }
            }
        }
    }

    fields
        .into_iter()
        .filter(|(_, missing)| *missing)
        .map(|(field, _)| {
            ValidationError::error(
                record,
                RuleId::RequiredFields,
                format!("Missing required property `{field}`"),
            )
            .with_field(field)
        })
        .collect()
}

fn uid_format(record: &TrackerRecord) -> Vec<ValidationError> {
    let uid = record.uid();
    if uid.is_empty() || Uid::is_valid(uid) {
        return Vec::new();
    }
    vec![ValidationError::error(
        record,
        RuleId::UidFormat,
        format!(
            "{} uid is not a valid identifier: {}",
            record.tracker_type().label(),
            uid
        ),
    )
    .with_field("uid")]
}

fn existence(record: &TrackerRecord, context: &WorkContext) -> Vec<ValidationError> {
    let uid = record.uid();
    if uid.is_empty() {
        return Vec::new();
    }
    let label = record.tracker_type().label();

    match context.existing(record.tracker_type(), uid) {
        Some(existing) if existing.deleted => vec![ValidationError::error(
            record,
            RuleId::Existence,
            format!("{label} has been deleted and cannot be imported again: {uid}"),
        )
        .with_field("uid")],
        None if context.options().import_strategy() == ImportStrategy::Update => {
            vec![ValidationError::error(
                record,
                RuleId::Existence,
                format!("{label} does not exist and cannot be updated: {uid}"),
            )
            .with_field("uid")]
        }
        _ => Vec::new(),
    }
}

// ============================================================================
// REFERENCE RULES
// ============================================================================

fn organisation_unit_reference(
    record: &TrackerRecord,
    context: &WorkContext,
) -> Vec<ValidationError> {
    let reference = record.org_unit();
    if reference.is_empty() || context.organisation_unit(reference).is_some() {
        return Vec::new();
    }
    vec![ValidationError::error(
        record,
        RuleId::OrganisationUnitReference,
        format!("Organisation unit could not be found: {reference}"),
    )
    .with_field("orgUnit")]
}

fn program_reference(record: &TrackerRecord, context: &WorkContext) -> Vec<ValidationError> {
    let Some(reference) = record.program().filter(|r| !r.is_empty()) else {
        return Vec::new();
    };
    let Some(resolved) = context.program(reference) else {
        return vec![ValidationError::error(
            record,
            RuleId::ProgramReference,
            format!("Program could not be found: {reference}"),
        )
        .with_field("program")];
    };

    if let TrackerRecord::Event(event) = record {
        if let Some(instance) = context.program_instance(&event.uid) {
            if instance.program != resolved.program.uid.as_str() {
                return vec![ValidationError::error(
                    record,
                    RuleId::ProgramReference,
                    format!(
                        "Event program {} does not match the program of enrollment {}",
                        reference, instance.uid
                    ),
                )
                .with_field("program")];
            }
        }
    }

    Vec::new()
}

fn parent_reference(record: &TrackerRecord, context: &WorkContext) -> Vec<ValidationError> {
    let Some((parent_type, parent)) = record.parent() else {
        return Vec::new();
    };
    if parent.is_empty() || context.parent_resolved(record) {
        return Vec::new();
    }
    let field = match parent_type {
        TrackerType::TrackedEntity => "trackedEntity",
        _ => "enrollment",
    };
    vec![ValidationError::error(
        record,
        RuleId::ParentReference,
        format!("{} could not be found: {}", parent_type.label(), parent),
    )
    .with_field(field)]
}

/// A persisted parent must still be live, and events may only be added to active enrollments.
///
/// A parent in the same batch is checked by its own rules when its copy replaces the stored one,
/// or when it was deleted and will be rejected itself. Otherwise the stored state applies.
fn parent_state(record: &TrackerRecord, context: &WorkContext) -> Vec<ValidationError> {
    let Some((parent_type, parent)) = record.parent() else {
        return Vec::new();
    };
    let Some(existing) = context.existing(parent_type, parent) else {
        return Vec::new();
    };
    if context.in_batch(parent_type, parent)
        && (existing.deleted || context.supersedes_stored(parent_type, parent))
    {
        return Vec::new();
    }

    if existing.deleted {
        return vec![ValidationError::error(
            record,
            RuleId::ParentState,
            format!("{} has been deleted: {}", parent_type.label(), parent),
        )];
    }

    match existing.enrollment_status {
        Some(status) if record.tracker_type() == TrackerType::Event
            && status != EnrollmentStatus::Active =>
        {
            vec![ValidationError::error(
                record,
                RuleId::ParentState,
                format!(
                    "Enrollment {} is {} and does not accept new events",
                    parent,
                    status.as_str()
                ),
            )
            .with_field("enrollment")]
        }
        _ => Vec::new(),
    }
}

// ============================================================================
// PROGRAM RULES
// ============================================================================

/// The org unit must be one the program is assigned to, compared under the configured scheme.
///
/// An event is checked against the program of its enrollment when that is known.
fn program_org_unit(record: &TrackerRecord, context: &WorkContext) -> Vec<ValidationError> {
    let enrollment_program = match record {
        TrackerRecord::Event(event) => context
            .program_instance(&event.uid)
            .and_then(|instance| context.program_by_uid(&instance.program)),
        _ => None,
    };
    let Some(resolved) =
        enrollment_program.or_else(|| record.program().and_then(|r| context.program(r)))
    else {
        return Vec::new();
    };
    let reference = record.org_unit();
    if resolved.is_assigned(reference) {
        return Vec::new();
    }
    vec![ValidationError::error(
        record,
        RuleId::ProgramOrgUnit,
        format!("Program is not assigned to this organisation unit: {reference}"),
    )
    .with_field("orgUnit")]
}

fn program_stage(record: &TrackerRecord, context: &WorkContext) -> Vec<ValidationError> {
    let TrackerRecord::Event(event) = record else {
        return Vec::new();
    };
    let Some(resolved) = context.program(&event.program) else {
        return Vec::new();
    };
    if event.program_stage.is_empty() || resolved.program.stage(&event.program_stage).is_some() {
        return Vec::new();
    }
    vec![ValidationError::error(
        record,
        RuleId::ProgramStage,
        format!(
            "Program stage {} does not belong to program {}",
            event.program_stage, resolved.program.uid
        ),
    )
    .with_field("programStage")]
}

fn value_type(record: &TrackerRecord, context: &WorkContext) -> Vec<ValidationError> {
    match record {
        TrackerRecord::TrackedEntity(TrackedEntity { attributes, .. })
        | TrackerRecord::Enrollment(Enrollment { attributes, .. }) => {
            attribute_values(record, attributes, context)
        }
        TrackerRecord::Event(event) => data_values(record, event, context),
    }
}

fn attribute_values(
    record: &TrackerRecord,
    values: &[AttributeValue],
    context: &WorkContext,
) -> Vec<ValidationError> {
    values
        .iter()
        .filter_map(|value| match context.attribute(&value.attribute) {
            None => Some(format!(
                "Attribute could not be found: {}",
                value.attribute
            )),
            Some(definition) if !definition.value_type.accepts(&value.value) => Some(format!(
                "Value {:?} is not a valid {} for attribute {}",
                value.value, definition.value_type, value.attribute
            )),
            Some(_) => None,
        })
        .map(|message| {
            ValidationError::error(record, RuleId::ValueType, message).with_field("attributes")
        })
        .collect()
}

/// Data values are checked against the event's stage; without a resolved stage there is
/// nothing to check them against.
fn data_values(
    record: &TrackerRecord,
    event: &Event,
    context: &WorkContext,
) -> Vec<ValidationError> {
    let Some(stage) = context
        .program(&event.program)
        .and_then(|resolved| resolved.program.stage(&event.program_stage))
    else {
        return Vec::new();
    };

    event
        .data_values
        .iter()
        .filter_map(|value| match stage.data_element(&value.data_element) {
            None => Some(format!(
                "Data element {} does not belong to program stage {}",
                value.data_element, stage.uid
            )),
            Some(element) if !element.value_type.accepts(&value.value) => Some(format!(
                "Value {:?} is not a valid {} for data element {}",
                value.value, element.value_type, value.data_element
            )),
            Some(_) => None,
        })
        .map(|message| {
            ValidationError::error(record, RuleId::ValueType, message).with_field("dataValues")
        })
        .collect()
}

fn mandatory_values(record: &TrackerRecord, context: &WorkContext) -> Vec<ValidationError> {
    match record {
        TrackerRecord::Enrollment(enrollment) => {
            let Some(resolved) = context.program(&enrollment.program) else {
                return Vec::new();
            };
            resolved
                .program
                .attributes
                .iter()
                .filter(|attribute| attribute.mandatory)
                .filter(|attribute| {
                    !enrollment.attributes.iter().any(|value| {
                        value.attribute == attribute.attribute.as_str() && !value.value.is_empty()
                    })
                })
                .map(|attribute| {
                    ValidationError::error(
                        record,
                        RuleId::MandatoryValues,
                        format!("Mandatory program attribute is missing: {}", attribute.attribute),
                    )
                    .with_field("attributes")
                })
                .collect()
        }
        TrackerRecord::Event(event) if event.status == EventStatus::Completed => {
            let Some(stage) = context
                .program(&event.program)
                .and_then(|resolved| resolved.program.stage(&event.program_stage))
            else {
                return Vec::new();
            };
            stage
                .data_elements
                .iter()
                .filter(|element| element.compulsory)
                .filter(|element| {
                    !event.data_values.iter().any(|value| {
                        value.data_element == element.data_element.as_str()
                            && !value.value.is_empty()
                    })
                })
                .map(|element| {
                    ValidationError::error(
                        record,
                        RuleId::MandatoryValues,
                        format!("Compulsory data element is missing: {}", element.data_element),
                    )
                    .with_field("dataValues")
                })
                .collect()
        }
        _ => Vec::new(),
    }
}

// ============================================================================
// ADVISORY RULES
// ============================================================================

fn future_date(record: &TrackerRecord, context: &WorkContext) -> Vec<ValidationError> {
    let now = context.validated_at();
    let dates = match record {
        TrackerRecord::Enrollment(en) => {
            vec![("enrolledAt", en.enrolled_at), ("occurredAt", en.occurred_at)]
        }
        TrackerRecord::Event(ev) if ev.status != EventStatus::Schedule => {
            vec![("occurredAt", ev.occurred_at)]
        }
        _ => Vec::new(),
    };

    dates
        .into_iter()
        .filter_map(|(field, date)| date.filter(|d| *d > now).map(|d| (field, d)))
        .map(|(field, date)| {
            ValidationError::warning(
                record,
                RuleId::FutureDate,
                format!(
                    "{} `{}` is in the future: {}",
                    record.tracker_type().label(),
                    field,
                    date.to_rfc3339()
                ),
            )
            .with_field(field)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportOptions;
    use crate::identifiers::IdScheme;
    use crate::metadata::{
        OrganisationUnit, Program, ProgramStage, StageDataElement, TrackedEntityAttribute,
        ValueType,
    };
    use crate::records::DataValue;
    use crate::store::{InMemoryStore, TrackerStore};
    use crate::validation::{Severity, ValidationChain};
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use tracker_types::{Code, NonEmptyText};

    struct Fixture {
        store: InMemoryStore,
        assigned: OrganisationUnit,
        unassigned: OrganisationUnit,
        program: Program,
        stage: Uid,
        weight: Uid,
        age: Uid,
    }

    fn name(value: &str) -> NonEmptyText {
        NonEmptyText::new(value).expect("valid name")
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let assigned = OrganisationUnit::new(100, Uid::generate(), name("Ngelehun"))
            .with_code(Code::new("ABCDE").expect("code"));
        let unassigned = OrganisationUnit::new(200, Uid::generate(), name("Bo"))
            .with_code(Code::new("FGHIJ").expect("code"));
        let stage = Uid::generate();
        let weight = Uid::generate();
        let age = Uid::generate();

        let program = Program::new(1, Uid::generate(), name("Child programme"))
            .with_code(Code::new("CHILD").expect("code"))
            .with_organisation_units([assigned.uid.clone()])
            .with_attribute(age.clone(), true)
            .with_stage(ProgramStage {
                uid: stage.clone(),
                name: name("Birth"),
                data_elements: vec![StageDataElement {
                    data_element: weight.clone(),
                    value_type: ValueType::Number,
                    compulsory: true,
                }],
            });

        store
            .add_organisation_unit(assigned.clone())
            .expect("add unit");
        store
            .add_organisation_unit(unassigned.clone())
            .expect("add unit");
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
            assigned,
            unassigned,
            program,
            stage,
            weight,
            age,
        }
    }

    fn run(
        records: &[TrackerRecord],
        options: ImportOptions,
        store: &dyn TrackerStore,
    ) -> Vec<ValidationError> {
        let context =
            WorkContext::build(records, Arc::new(options), store).expect("context should build");
        ValidationChain::new()
            .validate(records, &context)
            .into_errors()
    }

    fn rules(errors: &[ValidationError]) -> Vec<RuleId> {
        errors.iter().map(|e| e.rule).collect()
    }

    fn tracked_entity(uid: &str, org_unit: &str) -> TrackerRecord {
        TrackerRecord::from(TrackedEntity {
            uid: uid.into(),
            tracked_entity_type: "nEenWmSyUEp".into(),
            org_unit: org_unit.into(),
            attributes: vec![],
        })
    }

    fn enrollment(f: &Fixture, uid: &str, te: &str, org_unit: &str) -> TrackerRecord {
        TrackerRecord::from(Enrollment {
            uid: uid.into(),
            tracked_entity: te.into(),
            program: f.program.uid.to_string(),
            org_unit: org_unit.into(),
            attributes: vec![AttributeValue {
                attribute: f.age.to_string(),
                value: "4".into(),
            }],
            ..Default::default()
        })
    }

    fn event(f: &Fixture, uid: &str, enrollment: &str, org_unit: &str) -> TrackerRecord {
        TrackerRecord::from(Event {
            uid: uid.into(),
            enrollment: Some(enrollment.into()),
            program: f.program.uid.to_string(),
            program_stage: f.stage.to_string(),
            org_unit: org_unit.into(),
            data_values: vec![DataValue {
                data_element: f.weight.to_string(),
                value: "3.2".into(),
            }],
            ..Default::default()
        })
    }

    fn valid_batch(f: &Fixture) -> Vec<TrackerRecord> {
        let ou = f.assigned.uid.to_string();
        vec![
            tracked_entity("IOR1AXXl24H", &ou),
            enrollment(f, "MNWZ6hnuhSw", "IOR1AXXl24H", &ou),
            event(f, "ZwwuwNp6gVd", "MNWZ6hnuhSw", &ou),
        ]
    }

    #[test]
    fn test_valid_batch_passes_every_rule() {
        let f = fixture();
        let errors = run(&valid_batch(&f), ImportOptions::new(), &f.store);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn test_program_org_unit_uses_configured_scheme() {
        let f = fixture();
        for scheme in IdScheme::ALL {
            let (good, bad) = match scheme {
                IdScheme::Id => ("100".to_string(), "200".to_string()),
                IdScheme::Code => ("ABCDE".to_string(), "FGHIJ".to_string()),
                IdScheme::Uid => (f.assigned.uid.to_string(), f.unassigned.uid.to_string()),
            };
            let options = ImportOptions::new().with_org_unit_id_scheme(scheme);

            let mut records = valid_batch(&f);
            records.truncate(2);
            records[1] = enrollment(&f, "MNWZ6hnuhSw", "IOR1AXXl24H", &good);
            records[0] = tracked_entity("IOR1AXXl24H", &good);
            let errors = run(&records, options.clone(), &f.store);
            assert!(errors.is_empty(), "{scheme}: unexpected errors {errors:?}");

            records[1] = enrollment(&f, "MNWZ6hnuhSw", "IOR1AXXl24H", &bad);
            let errors = run(&records, options, &f.store);
            assert_eq!(rules(&errors), vec![RuleId::ProgramOrgUnit], "{scheme}");
            assert_eq!(
                errors[0].message,
                format!("Program is not assigned to this organisation unit: {bad}")
            );
        }
    }

    #[test]
    fn test_non_numeric_reference_under_id_scheme_is_unresolved() {
        let f = fixture();
        let options = ImportOptions::new().with_org_unit_id_scheme(IdScheme::Id);
        let records = vec![tracked_entity("IOR1AXXl24H", "ABCDE")];

        let errors = run(&records, options, &f.store);

        assert_eq!(rules(&errors), vec![RuleId::OrganisationUnitReference]);
        assert_eq!(errors[0].message, "Organisation unit could not be found: ABCDE");
    }

    #[test]
    fn test_unresolved_program_skips_dependent_rules_only() {
        let f = fixture();
        let ou = f.assigned.uid.to_string();
        let mut records = valid_batch(&f);
        records[1] = TrackerRecord::from(Enrollment {
            uid: "MNWZ6hnuhSw".into(),
            tracked_entity: "IOR1AXXl24H".into(),
            program: "missingProg".into(),
            org_unit: "nowhere".into(),
            attributes: vec![AttributeValue {
                attribute: f.age.to_string(),
                value: "-1".into(),
            }],
            ..Default::default()
        });
        records.truncate(2);
        records[0] = tracked_entity("IOR1AXXl24H", &ou);

        let errors = run(&records, ImportOptions::new(), &f.store);

        // PROGRAM_ORG_UNIT and MANDATORY_VALUES are skipped; VALUE_TYPE still runs
        assert_eq!(
            rules(&errors),
            vec![
                RuleId::OrganisationUnitReference,
                RuleId::ProgramReference,
                RuleId::ValueType,
            ]
        );
        assert!(errors.iter().all(|e| e.reference == "MNWZ6hnuhSw"));
    }

    #[test]
    fn test_missing_parent_is_reported_once() {
        let f = fixture();
        let ou = f.assigned.uid.to_string();
        let records = vec![event(&f, "ZwwuwNp6gVd", "MNWZ6hnuhSw", &ou)];

        let errors = run(&records, ImportOptions::new(), &f.store);

        assert_eq!(rules(&errors), vec![RuleId::ParentReference]);
        assert_eq!(errors[0].message, "Enrollment could not be found: MNWZ6hnuhSw");
        assert_eq!(errors[0].field.as_deref(), Some("enrollment"));
    }

    #[test]
    fn test_required_fields_and_uid_format() {
        let f = fixture();
        let records = vec![TrackerRecord::from(TrackedEntity {
            uid: "not-a-uid".into(),
            ..Default::default()
        })];

        let errors = run(&records, ImportOptions::new(), &f.store);

        assert_eq!(
            rules(&errors),
            vec![
                RuleId::RequiredFields,
                RuleId::RequiredFields,
                RuleId::UidFormat,
            ]
        );
        assert_eq!(errors[0].field.as_deref(), Some("trackedEntityType"));
        assert_eq!(errors[1].field.as_deref(), Some("orgUnit"));
    }

    #[test]
    fn test_duplicate_references_are_flagged() {
        let f = fixture();
        let ou = f.assigned.uid.to_string();
        let records = vec![
            tracked_entity("IOR1AXXl24H", &ou),
            tracked_entity("IOR1AXXl24H", &ou),
        ];

        let errors = run(&records, ImportOptions::new(), &f.store);

        assert_eq!(
            rules(&errors),
            vec![RuleId::DuplicateReference, RuleId::DuplicateReference]
        );
    }

    #[test]
    fn test_value_type_and_mandatory_values() {
        let f = fixture();
        let ou = f.assigned.uid.to_string();
        let records = vec![
            tracked_entity("IOR1AXXl24H", &ou),
            TrackerRecord::from(Enrollment {
                uid: "MNWZ6hnuhSw".into(),
                tracked_entity: "IOR1AXXl24H".into(),
                program: f.program.uid.to_string(),
                org_unit: ou.clone(),
                ..Default::default()
            }),
            TrackerRecord::from(Event {
                uid: "ZwwuwNp6gVd".into(),
                enrollment: Some("MNWZ6hnuhSw".into()),
                program: f.program.uid.to_string(),
                program_stage: f.stage.to_string(),
                org_unit: ou.clone(),
                status: EventStatus::Completed,
                data_values: vec![DataValue {
                    data_element: "qrur9Dvnyt5".into(),
                    value: "12".into(),
                }],
                ..Default::default()
            }),
        ];

        let errors = run(&records, ImportOptions::new(), &f.store);

        assert_eq!(
            errors
                .iter()
                .map(|e| (e.reference.as_str(), e.rule))
                .collect::<Vec<_>>(),
            vec![
                ("MNWZ6hnuhSw", RuleId::MandatoryValues),
                ("ZwwuwNp6gVd", RuleId::ValueType),
                ("ZwwuwNp6gVd", RuleId::MandatoryValues),
            ]
        );
    }

    #[test]
    fn test_update_requires_existing_record() {
        let f = fixture();
        let ou = f.assigned.uid.to_string();
        let records = vec![tracked_entity("IOR1AXXl24H", &ou)];
        let options = ImportOptions::new().with_import_strategy(ImportStrategy::Update);

        let errors = run(&records, options, &f.store);

        assert_eq!(rules(&errors), vec![RuleId::Existence]);
    }

    #[test]
    fn test_completed_enrollment_rejects_new_events() {
        let f = fixture();
        let ou = f.assigned.uid.to_string();
        {
            let mut tx = f.store.begin().expect("begin");
            tx.persist(&tracked_entity("IOR1AXXl24H", &ou), ImportStrategy::Create)
                .expect("persist te");
            let mut completed = enrollment(&f, "MNWZ6hnuhSw", "IOR1AXXl24H", &ou);
            if let TrackerRecord::Enrollment(en) = &mut completed {
                en.status = EnrollmentStatus::Completed;
            }
            tx.persist(&completed, ImportStrategy::Create)
                .expect("persist enrollment");
            tx.commit().expect("commit");
        }

        let errors = run(
            &[event(&f, "ZwwuwNp6gVd", "MNWZ6hnuhSw", &ou)],
            ImportOptions::new(),
            &f.store,
        );

        assert_eq!(rules(&errors), vec![RuleId::ParentState]);
    }

    fn persist_completed_enrollment(f: &Fixture) -> TrackerRecord {
        let ou = f.assigned.uid.to_string();
        let mut completed = enrollment(f, "MNWZ6hnuhSw", "IOR1AXXl24H", &ou);
        if let TrackerRecord::Enrollment(en) = &mut completed {
            en.status = EnrollmentStatus::Completed;
        }
        let mut tx = f.store.begin().expect("begin");
        tx.persist(&tracked_entity("IOR1AXXl24H", &ou), ImportStrategy::Create)
            .expect("persist te");
        tx.persist(&completed, ImportStrategy::Create)
            .expect("persist enrollment");
        tx.commit().expect("commit");
        completed
    }

    #[test]
    fn test_resent_completed_enrollment_does_not_admit_events_under_create() {
        let f = fixture();
        let completed = persist_completed_enrollment(&f);
        let ou = f.assigned.uid.to_string();

        let errors = run(
            &[completed, event(&f, "ZwwuwNp6gVd", "MNWZ6hnuhSw", &ou)],
            ImportOptions::new().with_import_strategy(ImportStrategy::Create),
            &f.store,
        );

        assert_eq!(rules(&errors), vec![RuleId::ParentState]);
        assert_eq!(errors[0].reference, "ZwwuwNp6gVd");
    }

    #[test]
    fn test_resent_enrollment_reopened_by_update_admits_events() {
        let f = fixture();
        let mut reopened = persist_completed_enrollment(&f);
        if let TrackerRecord::Enrollment(en) = &mut reopened {
            en.status = EnrollmentStatus::Active;
        }
        let ou = f.assigned.uid.to_string();

        let errors = run(
            &[reopened, event(&f, "ZwwuwNp6gVd", "MNWZ6hnuhSw", &ou)],
            ImportOptions::new().with_import_strategy(ImportStrategy::CreateAndUpdate),
            &f.store,
        );

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn test_event_org_unit_is_checked_against_enrollment_program() {
        let f = fixture();
        let other = Program::new(2, Uid::generate(), name("Other"))
            .with_organisation_units([f.unassigned.uid.clone()])
            .with_stage(f.program.stages[0].clone());
        f.store.add_program(other.clone()).expect("add program");

        let mut records = valid_batch(&f);
        if let TrackerRecord::Event(ev) = &mut records[2] {
            ev.program = other.uid.to_string();
            ev.org_unit = f.unassigned.uid.to_string();
        }

        let errors = run(&records, ImportOptions::new(), &f.store);

        assert_eq!(
            rules(&errors),
            vec![RuleId::ProgramReference, RuleId::ProgramOrgUnit]
        );
        assert!(errors.iter().all(|e| e.reference == "ZwwuwNp6gVd"));
    }

    #[test]
    fn test_future_dates_are_warnings() {
        let f = fixture();
        let mut records = valid_batch(&f);
        if let TrackerRecord::Enrollment(en) = &mut records[1] {
            en.enrolled_at = Some(Utc::now() + Duration::days(30));
        }

        let errors = run(&records, ImportOptions::new(), &f.store);

        assert_eq!(rules(&errors), vec![RuleId::FutureDate]);
        assert_eq!(errors[0].severity, Severity::Warning);
        assert_eq!(errors[0].field.as_deref(), Some("enrolledAt"));
    }

    #[test]
    fn test_delete_strategy_only_checks_references() {
        let f = fixture();
        let records = vec![TrackerRecord::from(TrackedEntity {
            uid: "IOR1AXXl24H".into(),
            ..Default::default()
        })];
        let options = ImportOptions::new().with_import_strategy(ImportStrategy::Delete);

        let errors = run(&records, options, &f.store);

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }
}
