//! Importable tracker records.
//!
//! A batch is a [`TrackerPayload`]: tracked entities, their enrollments, and the events nested
//! under enrollments. Every reference a record carries is an external string; nothing here has
//! been checked yet. Checking is the job of the validation rule chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three record types, in dependency order (parents first).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerType {
    TrackedEntity,
    Enrollment,
    Event,
}

impl TrackerType {
    /// Parents before children; the order a commit writes in.
    pub const COMMIT_ORDER: [TrackerType; 3] = [
        TrackerType::TrackedEntity,
        TrackerType::Enrollment,
        TrackerType::Event,
    ];

    /// Children before parents; the order a delete removes in.
    pub const DELETE_ORDER: [TrackerType; 3] = [
        TrackerType::Event,
        TrackerType::Enrollment,
        TrackerType::TrackedEntity,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TrackedEntity => "TRACKED_ENTITY",
            Self::Enrollment => "ENROLLMENT",
            Self::Event => "EVENT",
        }
    }

    /// Human-readable name used in validation messages.
    pub const fn label(self) -> &'static str {
        match self {
            Self::TrackedEntity => "Tracked entity",
            Self::Enrollment => "Enrollment",
            Self::Event => "Event",
        }
    }

    pub const fn parent(self) -> Option<TrackerType> {
        match self {
            Self::TrackedEntity => None,
            Self::Enrollment => Some(Self::TrackedEntity),
            Self::Event => Some(Self::Enrollment),
        }
    }
}

impl fmt::Display for TrackerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    #[default]
    Active,
    Completed,
    Cancelled,
}

impl EnrollmentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    #[default]
    Active,
    Completed,
    Schedule,
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValue {
    pub attribute: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataValue {
    pub data_element: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntity {
    #[serde(rename = "trackedEntity")]
    pub uid: String,
    #[serde(default)]
    pub tracked_entity_type: String,
    #[serde(default)]
    pub org_unit: String,
    #[serde(default)]
    pub attributes: Vec<AttributeValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    #[serde(rename = "enrollment")]
    pub uid: String,
    #[serde(default)]
    pub tracked_entity: String,
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub org_unit: String,
    #[serde(default)]
    pub status: EnrollmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrolled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: Vec<AttributeValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "event")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment: Option<String>,
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub program_stage: String,
    #[serde(default)]
    pub org_unit: String,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data_values: Vec<DataValue>,
}

/// One importable unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackerRecord {
    TrackedEntity(TrackedEntity),
    Enrollment(Enrollment),
    Event(Event),
}

impl TrackerRecord {
    pub fn tracker_type(&self) -> TrackerType {
        match self {
            Self::TrackedEntity(_) => TrackerType::TrackedEntity,
            Self::Enrollment(_) => TrackerType::Enrollment,
            Self::Event(_) => TrackerType::Event,
        }
    }

    pub fn uid(&self) -> &str {
        match self {
            Self::TrackedEntity(te) => &te.uid,
            Self::Enrollment(en) => &en.uid,
            Self::Event(ev) => &ev.uid,
        }
    }

    pub fn org_unit(&self) -> &str {
        match self {
            Self::TrackedEntity(te) => &te.org_unit,
            Self::Enrollment(en) => &en.org_unit,
            Self::Event(ev) => &ev.org_unit,
        }
    }

    /// The program reference an enrollment or event names, if any.
    pub fn program(&self) -> Option<&str> {
        match self {
            Self::TrackedEntity(_) => None,
            Self::Enrollment(en) => Some(&en.program),
            Self::Event(ev) => Some(&ev.program),
        }
    }

    /// The parent type and reference, when the record has (and names) a parent.
    pub fn parent(&self) -> Option<(TrackerType, &str)> {
        match self {
            Self::TrackedEntity(_) => None,
            Self::Enrollment(en) => Some((TrackerType::TrackedEntity, en.tracked_entity.as_str())),
            Self::Event(ev) => ev
                .enrollment
                .as_deref()
                .map(|enrollment| (TrackerType::Enrollment, enrollment)),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.tracker_type(), self.uid())
    }
}

impl From<TrackedEntity> for TrackerRecord {
    fn from(value: TrackedEntity) -> Self {
        Self::TrackedEntity(value)
    }
}

impl From<Enrollment> for TrackerRecord {
    fn from(value: Enrollment) -> Self {
        Self::Enrollment(value)
    }
}

impl From<Event> for TrackerRecord {
    fn from(value: Event) -> Self {
        Self::Event(value)
    }
}

/// Identity of a record within a batch or the store: its type plus its reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub tracker_type: TrackerType,
    pub uid: String,
}

impl RecordKey {
    pub fn new(tracker_type: TrackerType, uid: impl Into<String>) -> Self {
        Self {
            tracker_type,
            uid: uid.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tracker_type, self.uid)
    }
}

/// A decoded batch of records, grouped by type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerPayload {
    #[serde(default)]
    pub tracked_entities: Vec<TrackedEntity>,
    #[serde(default)]
    pub enrollments: Vec<Enrollment>,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl TrackerPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracked_entities(mut self, items: impl IntoIterator<Item = TrackedEntity>) -> Self {
        self.tracked_entities.extend(items);
        self
    }

    pub fn with_enrollments(mut self, items: impl IntoIterator<Item = Enrollment>) -> Self {
        self.enrollments.extend(items);
        self
    }

    pub fn with_events(mut self, items: impl IntoIterator<Item = Event>) -> Self {
        self.events.extend(items);
        self
    }

    /// Regroup loose records by type, keeping the relative input order within each type.
    pub fn from_records(records: impl IntoIterator<Item = TrackerRecord>) -> Self {
        let mut payload = Self::default();
        for record in records {
            payload.push(record);
        }
        payload
    }

    pub fn push(&mut self, record: TrackerRecord) {
        match record {
            TrackerRecord::TrackedEntity(te) => self.tracked_entities.push(te),
            TrackerRecord::Enrollment(en) => self.enrollments.push(en),
            TrackerRecord::Event(ev) => self.events.push(ev),
        }
    }

    pub fn len(&self) -> usize {
        self.tracked_entities.len() + self.enrollments.len() + self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, tracker_type: TrackerType) -> usize {
        match tracker_type {
            TrackerType::TrackedEntity => self.tracked_entities.len(),
            TrackerType::Enrollment => self.enrollments.len(),
            TrackerType::Event => self.events.len(),
        }
    }

    /// Owned records in dependency order (tracked entities, enrollments, events).
    pub fn into_records(self) -> Vec<TrackerRecord> {
        let mut records = Vec::with_capacity(self.len());
        records.extend(self.tracked_entities.into_iter().map(TrackerRecord::from));
        records.extend(self.enrollments.into_iter().map(TrackerRecord::from));
        records.extend(self.events.into_iter().map(TrackerRecord::from));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_records_groups_by_type_in_dependency_order() {
        let payload = TrackerPayload::from_records(vec![
            TrackerRecord::from(Event {
                uid: "ev".into(),
                ..Default::default()
            }),
            TrackerRecord::from(Enrollment {
                uid: "en".into(),
                ..Default::default()
            }),
            TrackerRecord::from(TrackedEntity {
                uid: "te".into(),
                ..Default::default()
            }),
        ]);

        let order: Vec<TrackerType> = payload
            .into_records()
            .iter()
            .map(TrackerRecord::tracker_type)
            .collect();
        assert_eq!(order, TrackerType::COMMIT_ORDER.to_vec());
    }

    #[test]
    fn test_event_without_enrollment_has_no_parent() {
        let event = TrackerRecord::from(Event::default());
        assert!(event.parent().is_none());

        let event = TrackerRecord::from(Event {
            enrollment: Some("MNWZ6hnuhSw".into()),
            ..Default::default()
        });
        assert_eq!(event.parent(), Some((TrackerType::Enrollment, "MNWZ6hnuhSw")));
    }

    #[test]
    fn test_payload_deserialises_camel_case() {
        let json = r#"{
            "trackedEntities": [{"trackedEntity": "IOR1AXXl24H", "trackedEntityType": "Q9GufDoplCL", "orgUnit": "DiszpKrYNg8"}],
            "enrollments": [{"enrollment": "MNWZ6hnuhSw", "trackedEntity": "IOR1AXXl24H", "program": "IpHINAT79UW", "orgUnit": "DiszpKrYNg8", "status": "COMPLETED"}]
        }"#;

        let payload: TrackerPayload = serde_json::from_str(json).expect("payload should parse");
        assert_eq!(payload.tracked_entities[0].uid, "IOR1AXXl24H");
        assert_eq!(payload.enrollments[0].status, EnrollmentStatus::Completed);
        assert!(payload.events.is_empty());
        assert_eq!(payload.len(), 2);
    }
}
