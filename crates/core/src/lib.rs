//! # Tracker Core
//!
//! Import validation and bundle commit for tracker data: tracked entities, their enrollments in
//! programs, and the events recorded under those enrollments.
//!
//! A pass runs in four steps:
//! - [`ImportOptions`] are resolved once and shared read-only
//! - the payload is split into bundles and a [`WorkContext`] is built per bundle, resolving every
//!   org unit, program, parent and attribute reference through the [`TrackerStore`]
//! - the [`ValidationChain`] runs each record through the ordered rule set
//! - [`TrackerBundleService::commit`] writes the surviving records in one transaction, or
//!   [`TrackerBundleService::delete`] removes them
//!
//! Outcomes are reported through [`ImportReport`]. Record-level problems never surface as `Err`.
//!
//! **No I/O concerns**: decoding payloads and printing reports belong to `tracker-cli`.

pub mod bundle;
pub mod config;
pub mod error;
pub mod identifiers;
pub mod import;
pub mod metadata;
pub mod records;
pub mod report;
pub mod store;
pub mod validation;
pub mod work_context;

pub use bundle::{BundleId, Built, TrackerBundle, TrackerBundleService, Validated};
pub use config::{AtomicMode, BundlePartition, ImportOptionValues, ImportOptions, ImportStrategy};
pub use error::{TrackerError, TrackerResult};
pub use identifiers::{IdScheme, Identifiable, SchemeIndex};
pub use import::TrackerImportService;
pub use metadata::{
    OrganisationUnit, Program, ProgramAttribute, ProgramInstance, ProgramStage, StageDataElement,
    TrackedEntityAttribute, ValueType,
};
pub use records::{
    AttributeValue, DataValue, Enrollment, EnrollmentStatus, Event, EventStatus, RecordKey,
    TrackedEntity, TrackerPayload, TrackerRecord, TrackerType,
};
pub use report::{
    BundleFailure, BundleStatus, ImportReport, TrackerBundleReport, TrackerStats, TrackerStatus,
};
pub use store::{
    ExistingRecord, InMemoryStore, PersistOutcome, RemoveOutcome, StoreError, StoreResult,
    StoreTransaction, TrackerStore,
};
pub use validation::{
    Precondition, RuleId, Severity, ValidationChain, ValidationError, ValidationReport,
};
pub use work_context::{ResolvedProgram, WorkContext};
