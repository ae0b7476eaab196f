use crate::bundle::BundleId;
use crate::store::StoreError;

/// Failures that escape the import pipeline.
///
/// Record-level validation problems are never reported through this type; they are collected
/// into a [`ValidationReport`](crate::validation::ValidationReport) instead.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid identifier scheme for {option}: {value:?}")]
    InvalidIdScheme { option: &'static str, value: String },
    #[error("unsupported identifier scheme for {option}: {value:?}")]
    UnsupportedIdScheme { option: &'static str, value: String },
    #[error("missing identifier scheme for {option}")]
    MissingIdScheme { option: &'static str },
    #[error("invalid import strategy: {0:?}")]
    InvalidImportStrategy(String),
    #[error("invalid atomic mode: {0:?}")]
    InvalidAtomicMode(String),
    #[error("invalid bundle partition: {0:?}")]
    InvalidPartition(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("commit of bundle {bundle} failed: {source}")]
    BundleCommit {
        bundle: BundleId,
        #[source]
        source: StoreError,
    },
    #[error("delete of bundle {bundle} failed: {source}")]
    BundleDelete {
        bundle: BundleId,
        #[source]
        source: StoreError,
    },

    #[error("invalid uid: {0}")]
    Uid(#[from] tracker_uid::UidError),
    #[error("invalid text: {0}")]
    Text(#[from] tracker_types::TextError),
}

impl TrackerError {
    /// True for errors raised while resolving [`ImportOptions`](crate::config::ImportOptions).
    ///
    /// Configuration errors are fatal for the whole batch and surface before any record is
    /// validated.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdScheme { .. }
                | Self::UnsupportedIdScheme { .. }
                | Self::MissingIdScheme { .. }
                | Self::InvalidImportStrategy(_)
                | Self::InvalidAtomicMode(_)
                | Self::InvalidPartition(_)
        )
    }
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
