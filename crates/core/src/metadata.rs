//! Reference data that incoming records are validated against.
//!
//! Metadata is read-only from the import pipeline's point of view: it is resolved through the
//! store once per batch (see [`WorkContext`](crate::work_context::WorkContext)) and never
//! written by a bundle commit.

use crate::identifiers::Identifiable;
use crate::records::{Enrollment, EnrollmentStatus};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracker_types::{Code, NonEmptyText};
use tracker_uid::Uid;

/// A node of the organisational hierarchy.
///
/// Validation only needs set membership, so the parent link is carried but never traversed here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganisationUnit {
    pub id: i64,
    pub uid: Uid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Code>,
    pub name: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uid>,
}

impl OrganisationUnit {
    pub fn new(id: i64, uid: Uid, name: NonEmptyText) -> Self {
        Self {
            id,
            uid,
            code: None,
            name,
            parent: None,
        }
    }

    pub fn with_code(mut self, code: Code) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_parent(mut self, parent: Uid) -> Self {
        self.parent = Some(parent);
        self
    }
}

impl Identifiable for OrganisationUnit {
    fn id(&self) -> i64 {
        self.id
    }

    fn uid(&self) -> &str {
        self.uid.as_str()
    }

    fn code(&self) -> Option<&str> {
        self.code.as_ref().map(Code::as_str)
    }
}

/// The type a tracked-entity attribute or data element value must conform to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Text,
    LongText,
    Number,
    Integer,
    IntegerPositive,
    IntegerZeroOrPositive,
    IntegerNegative,
    Boolean,
    TrueOnly,
    Date,
    #[serde(rename = "DATETIME")]
    DateTime,
    Email,
    PhoneNumber,
}

impl ValueType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::LongText => "LONG_TEXT",
            Self::Number => "NUMBER",
            Self::Integer => "INTEGER",
            Self::IntegerPositive => "INTEGER_POSITIVE",
            Self::IntegerZeroOrPositive => "INTEGER_ZERO_OR_POSITIVE",
            Self::IntegerNegative => "INTEGER_NEGATIVE",
            Self::Boolean => "BOOLEAN",
            Self::TrueOnly => "TRUE_ONLY",
            Self::Date => "DATE",
            Self::DateTime => "DATETIME",
            Self::Email => "EMAIL",
            Self::PhoneNumber => "PHONE_NUMBER",
        }
    }

    /// Returns true if `value` is a valid textual representation for this type.
    pub fn accepts(self, value: &str) -> bool {
        match self {
            Self::Text | Self::LongText => true,
            Self::Number => value.parse::<f64>().is_ok_and(f64::is_finite),
            Self::Integer => value.parse::<i64>().is_ok(),
            Self::IntegerPositive => value.parse::<i64>().is_ok_and(|v| v > 0),
            Self::IntegerZeroOrPositive => value.parse::<i64>().is_ok_and(|v| v >= 0),
            Self::IntegerNegative => value.parse::<i64>().is_ok_and(|v| v < 0),
            Self::Boolean => matches!(value, "true" | "false"),
            Self::TrueOnly => value == "true",
            Self::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
            Self::DateTime => {
                DateTime::parse_from_rfc3339(value).is_ok()
                    || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
            }
            Self::Email => is_email(value),
            Self::PhoneNumber => is_phone_number(value),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.chars().any(char::is_whitespace)
}

const PHONE_NUMBER_SYMBOLS: &str = "+()#. /-";

/// Digits and dial symbols, optionally followed by an `ext` token and the extension digits.
fn is_phone_number(value: &str) -> bool {
    let (number, extension) = match value.split_once("ext") {
        Some((number, extension)) => (number, Some(extension.trim_start_matches('.').trim())),
        None => (value, None),
    };
    (6..=50).contains(&value.len())
        && number.chars().any(|c| c.is_ascii_digit())
        && number
            .chars()
            .all(|c| c.is_ascii_digit() || PHONE_NUMBER_SYMBOLS.contains(c))
        && extension.map_or(true, |ext| {
            !ext.is_empty() && ext.chars().all(|c| c.is_ascii_digit())
        })
}

/// Global definition of a tracked-entity attribute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntityAttribute {
    pub uid: Uid,
    pub name: NonEmptyText,
    pub value_type: ValueType,
}

/// An attribute a program collects on enrollment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramAttribute {
    pub attribute: Uid,
    #[serde(default)]
    pub mandatory: bool,
}

/// A data element collected by a program stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDataElement {
    pub data_element: Uid,
    pub value_type: ValueType,
    #[serde(default)]
    pub compulsory: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramStage {
    pub uid: Uid,
    pub name: NonEmptyText,
    #[serde(default)]
    pub data_elements: Vec<StageDataElement>,
}

impl ProgramStage {
    pub fn data_element(&self, uid: &str) -> Option<&StageDataElement> {
        self.data_elements
            .iter()
            .find(|de| de.data_element.as_str() == uid)
    }
}

/// A program definition.
///
/// `organisation_units` holds the UIDs of the units the program is assigned to. Enrollments and
/// events may only be created in one of those units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: i64,
    pub uid: Uid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Code>,
    pub name: NonEmptyText,
    #[serde(default)]
    pub organisation_units: Vec<Uid>,
    #[serde(default)]
    pub attributes: Vec<ProgramAttribute>,
    #[serde(default)]
    pub stages: Vec<ProgramStage>,
}

impl Program {
    pub fn new(id: i64, uid: Uid, name: NonEmptyText) -> Self {
        Self {
            id,
            uid,
            code: None,
            name,
            organisation_units: Vec::new(),
            attributes: Vec::new(),
            stages: Vec::new(),
        }
    }

    pub fn with_code(mut self, code: Code) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_organisation_units(mut self, units: impl IntoIterator<Item = Uid>) -> Self {
        self.organisation_units = units.into_iter().collect();
        self
    }

    pub fn with_attribute(mut self, attribute: Uid, mandatory: bool) -> Self {
        self.attributes.push(ProgramAttribute {
            attribute,
            mandatory,
        });
        self
    }

    pub fn with_stage(mut self, stage: ProgramStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage(&self, uid: &str) -> Option<&ProgramStage> {
        self.stages.iter().find(|s| s.uid.as_str() == uid)
    }
}

impl Identifiable for Program {
    fn id(&self) -> i64 {
        self.id
    }

    fn uid(&self) -> &str {
        self.uid.as_str()
    }

    fn code(&self) -> Option<&str> {
        self.code.as_ref().map(Code::as_str)
    }
}

/// An enrollment as seen by event validation: either already persisted or arriving in the same
/// batch as the event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramInstance {
    pub uid: String,
    /// UID of the owning program.
    pub program: String,
    pub tracked_entity: String,
    pub org_unit: String,
    pub status: EnrollmentStatus,
    #[serde(default)]
    pub deleted: bool,
    /// True when the instance is already in the store rather than in the current batch.
    #[serde(default)]
    pub persisted: bool,
}

impl ProgramInstance {
    /// Describe an in-batch enrollment whose program resolved to `program_uid`.
    pub fn from_batch(enrollment: &Enrollment, program_uid: &str) -> Self {
        Self {
            uid: enrollment.uid.clone(),
            program: program_uid.to_owned(),
            tracked_entity: enrollment.tracked_entity.clone(),
            org_unit: enrollment.org_unit.clone(),
            status: enrollment.status,
            deleted: false,
            persisted: false,
        }
    }
}
