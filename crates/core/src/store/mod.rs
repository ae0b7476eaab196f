//! The persistence collaborator.
//!
//! The pipeline never talks to storage directly. Reads go through [`TrackerStore`] and happen
//! only while a [`WorkContext`](crate::work_context::WorkContext) is being built; writes go
//! through a [`StoreTransaction`] opened per bundle.
//!
//! A transaction that is dropped without [`StoreTransaction::commit`] must leave the store as it
//! was before [`TrackerStore::begin`]. Bundle atomicity and cancellation safety both rest on
//! that contract.

mod memory;

pub use memory::InMemoryStore;

use crate::config::ImportStrategy;
use crate::identifiers::IdScheme;
use crate::metadata::{OrganisationUnit, Program, ProgramInstance, TrackedEntityAttribute};
use crate::records::{EnrollmentStatus, TrackerRecord, TrackerType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("constraint violation on {tracker_type} {uid}: {reason}")]
    ConstraintViolation {
        tracker_type: TrackerType,
        uid: String,
        reason: String,
    },
    #[error("{tracker_type} {uid} references missing {parent_type} {parent}")]
    MissingParent {
        tracker_type: TrackerType,
        uid: String,
        parent_type: TrackerType,
        parent: String,
    },
    #[error("invalid store operation: {0}")]
    InvalidOperation(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// What the store already knows about a record reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingRecord {
    /// True when the record was soft-deleted.
    pub deleted: bool,
    /// Status of a persisted enrollment; `None` for other record types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment_status: Option<EnrollmentStatus>,
}

impl ExistingRecord {
    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}

/// Result of writing one record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersistOutcome {
    Created,
    Updated,
    /// The strategy did not allow the write (already exists, missing on update, or deleted).
    Ignored,
}

/// Result of removing one record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoveOutcome {
    Deleted,
    /// The record was missing or already deleted.
    Ignored,
}

/// Read access to reference data and existing records.
pub trait TrackerStore: Send + Sync {
    /// Find an organisation unit whose value under `scheme` equals `reference`.
    fn organisation_unit(
        &self,
        scheme: IdScheme,
        reference: &str,
    ) -> StoreResult<Option<OrganisationUnit>>;

    /// The organisation units a program is assigned to.
    fn organisation_units_for_program(&self, program_uid: &str)
        -> StoreResult<Vec<OrganisationUnit>>;

    /// Find a program whose value under `scheme` equals `reference`.
    fn program(&self, scheme: IdScheme, reference: &str) -> StoreResult<Option<Program>>;

    /// The persisted enrollment with this uid, deleted or not.
    fn program_instance(&self, enrollment_uid: &str) -> StoreResult<Option<ProgramInstance>>;

    fn tracked_entity_attribute(&self, uid: &str) -> StoreResult<Option<TrackedEntityAttribute>>;

    fn existing(&self, tracker_type: TrackerType, uid: &str)
        -> StoreResult<Option<ExistingRecord>>;

    /// Open a write transaction.
    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction + '_>>;
}

/// An all-or-nothing unit of writes. Dropping it without committing rolls it back.
pub trait StoreTransaction {
    /// Write `record` according to `strategy`.
    ///
    /// Foreign references (enrollment to tracked entity, event to enrollment) must be satisfiable
    /// at the time of the call.
    fn persist(
        &mut self,
        record: &TrackerRecord,
        strategy: ImportStrategy,
    ) -> StoreResult<PersistOutcome>;

    /// Soft-delete a record and everything below it.
    fn remove(&mut self, tracker_type: TrackerType, uid: &str) -> StoreResult<RemoveOutcome>;

    fn commit(self: Box<Self>) -> StoreResult<()>;
}
