//! Import configuration.
//!
//! [`ImportOptions`] is resolved once, before a validation/commit pass starts, and is then shared
//! read-only (`Arc<ImportOptions>`) by every bundle and work context built for that pass. Mixing
//! identifier schemes part way through a batch would make the work context's pre-built indexes
//! disagree with the rules reading them, so nothing here offers mutation after construction.
//!
//! Raw values (environment variables, command-line flags) go through
//! [`ImportOptions::from_values`], which is the single place configuration errors are raised.

use crate::error::{TrackerError, TrackerResult};
use crate::identifiers::IdScheme;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The mutation a bundle applies to the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStrategy {
    /// Insert new records; records that already exist are ignored.
    Create,
    /// Overwrite existing records; every record must already exist.
    Update,
    /// Insert new records and overwrite existing ones.
    #[default]
    CreateAndUpdate,
    /// Remove records (soft delete), children before parents.
    Delete,
}

impl ImportStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::CreateAndUpdate => "CREATE_AND_UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(value: &str) -> TrackerResult<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "CREATE_AND_UPDATE" | "CREATE_UPDATE" => Ok(Self::CreateAndUpdate),
            "DELETE" => Ok(Self::Delete),
            _ => Err(TrackerError::InvalidImportStrategy(value.to_owned())),
        }
    }

    pub const fn is_delete(self) -> bool {
        matches!(self, Self::Delete)
    }

    /// True if a live record already in the store is replaced by the incoming copy.
    pub const fn overwrites_existing(self) -> bool {
        matches!(self, Self::Update | Self::CreateAndUpdate)
    }
}

impl fmt::Display for ImportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How blocking validation errors affect the rest of a bundle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AtomicMode {
    /// Any blocking error rejects the whole bundle; nothing is persisted.
    All,
    /// Only the offending records (and their in-bundle dependents) are held back.
    #[default]
    Object,
}

impl AtomicMode {
    pub fn parse(value: &str) -> TrackerResult<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(Self::All),
            "OBJECT" => Ok(Self::Object),
            _ => Err(TrackerError::InvalidAtomicMode(value.to_owned())),
        }
    }
}

/// How a payload is split into bundles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BundlePartition {
    /// The whole payload becomes one bundle.
    #[default]
    Single,
    /// One bundle per root tracked entity, bounding transaction size.
    TrackedEntity,
}

impl BundlePartition {
    pub fn parse(value: &str) -> TrackerResult<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SINGLE" => Ok(Self::Single),
            "TRACKED_ENTITY" => Ok(Self::TrackedEntity),
            _ => Err(TrackerError::InvalidPartition(value.to_owned())),
        }
    }
}

/// Immutable configuration for one import pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    org_unit_id_scheme: IdScheme,
    program_id_scheme: IdScheme,
    import_strategy: ImportStrategy,
    atomic_mode: AtomicMode,
    partition: BundlePartition,
}

impl ImportOptions {
    /// Creates options with every switch at its default (UID schemes, CREATE_AND_UPDATE,
    /// OBJECT atomicity, a single bundle).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_org_unit_id_scheme(mut self, scheme: IdScheme) -> Self {
        self.org_unit_id_scheme = scheme;
        self
    }

    pub fn with_program_id_scheme(mut self, scheme: IdScheme) -> Self {
        self.program_id_scheme = scheme;
        self
    }

    pub fn with_import_strategy(mut self, strategy: ImportStrategy) -> Self {
        self.import_strategy = strategy;
        self
    }

    pub fn with_atomic_mode(mut self, mode: AtomicMode) -> Self {
        self.atomic_mode = mode;
        self
    }

    pub fn with_partition(mut self, partition: BundlePartition) -> Self {
        self.partition = partition;
        self
    }

    /// Resolve options from raw, optional string values.
    ///
    /// `None` selects the default for that switch. A value that is present but empty, unknown, or
    /// names an unsupported scheme is a configuration error; no partially-parsed options are
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns one of the configuration variants of [`TrackerError`]
    /// (see [`TrackerError::is_configuration`]).
    pub fn from_values(values: ImportOptionValues) -> TrackerResult<Self> {
        let mut options = Self::default();

        if let Some(value) = values.org_unit_id_scheme {
            options.org_unit_id_scheme = IdScheme::parse("orgUnitIdScheme", &value)?;
        }
        if let Some(value) = values.program_id_scheme {
            options.program_id_scheme = IdScheme::parse("programIdScheme", &value)?;
        }
        if let Some(value) = values.import_strategy {
            options.import_strategy = ImportStrategy::parse(&value)?;
        }
        if let Some(value) = values.atomic_mode {
            options.atomic_mode = AtomicMode::parse(&value)?;
        }
        if let Some(value) = values.partition {
            options.partition = BundlePartition::parse(&value)?;
        }

        Ok(options)
    }

    pub fn org_unit_id_scheme(&self) -> IdScheme {
        self.org_unit_id_scheme
    }

    pub fn program_id_scheme(&self) -> IdScheme {
        self.program_id_scheme
    }

    pub fn import_strategy(&self) -> ImportStrategy {
        self.import_strategy
    }

    pub fn atomic_mode(&self) -> AtomicMode {
        self.atomic_mode
    }

    pub fn partition(&self) -> BundlePartition {
        self.partition
    }
}

/// Raw option values as read from the environment or the command line.
#[derive(Clone, Debug, Default)]
pub struct ImportOptionValues {
    pub org_unit_id_scheme: Option<String>,
    pub program_id_scheme: Option<String>,
    pub import_strategy: Option<String>,
    pub atomic_mode: Option<String>,
    pub partition: Option<String>,
}
