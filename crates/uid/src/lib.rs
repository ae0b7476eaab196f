//! Stable unique identifier utilities.
//!
//! Tracker records and metadata are addressed by an eleven-character *UID*. The UID is one of the
//! three interchangeable identifier schemes (numeric id, code, UID); unlike the numeric id it is
//! stable across databases, and unlike the code it is always present.
//!
//! ## Canonical UID form
//! - Length: 11
//! - First character: ASCII letter (`a-z`, `A-Z`)
//! - Remaining characters: ASCII letters or digits
//! - Example: `DiszpKrYNg8`
//!
//! Notes:
//! - UIDs are case-sensitive; `abcdefghijk` and `ABCDEFGHIJK` are different identifiers.
//! - Externally supplied identifiers must use [`Uid::parse`]; nothing is normalised.
//!
//! This crate also provides [`generate_code`], a random business-code generator used by
//! fixtures that need metadata codes which are unlikely to collide.

mod service;

pub use service::{generate_code, Uid, UID_LENGTH};

/// Error type for UID operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UidError {
    /// Invalid input provided
    #[error("Invalid UID: {0}")]
    InvalidInput(String),
}

/// Result type for UID operations.
pub type UidResult<T> = Result<T, UidError>;
