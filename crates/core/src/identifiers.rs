//! Identifier schemes and reference resolution.
//!
//! Metadata objects can be referenced by three interchangeable identifiers: the surrogate numeric
//! id, the business code, or the stable UID. Which one an incoming reference uses is a
//! configuration switch ([`IdScheme`]), so every comparison goes through a single field accessor
//! selected by the scheme rather than per-scheme code paths.
//!
//! Comparison is exact: no case folding, no trimming, no prefix matching. Under [`IdScheme::Id`]
//! the reference is parsed as an integer first; a reference that does not parse simply matches
//! nothing.

use crate::error::{TrackerError, TrackerResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// The field used to match an external reference to a metadata object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdScheme {
    /// Surrogate numeric id.
    Id,
    /// Business code.
    Code,
    /// Stable unique identifier.
    #[default]
    Uid,
}

impl IdScheme {
    pub const ALL: [IdScheme; 3] = [IdScheme::Id, IdScheme::Code, IdScheme::Uid];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Id => "ID",
            Self::Code => "CODE",
            Self::Uid => "UID",
        }
    }

    /// Parse a scheme name for the named option.
    ///
    /// Names are matched case-insensitively. Attribute-based schemes (`ATTRIBUTE:<uid>`) are
    /// recognised but not supported.
    ///
    /// # Errors
    ///
    /// - [`TrackerError::MissingIdScheme`] for an empty value
    /// - [`TrackerError::UnsupportedIdScheme`] for attribute schemes
    /// - [`TrackerError::InvalidIdScheme`] for anything else unknown
    pub fn parse(option: &'static str, value: &str) -> TrackerResult<Self> {
        let normalised = value.trim().to_ascii_uppercase();
        match normalised.as_str() {
            "" => Err(TrackerError::MissingIdScheme { option }),
            "ID" => Ok(Self::Id),
            "CODE" => Ok(Self::Code),
            "UID" => Ok(Self::Uid),
            other if other.starts_with("ATTRIBUTE") => Err(TrackerError::UnsupportedIdScheme {
                option,
                value: value.to_owned(),
            }),
            _ => Err(TrackerError::InvalidIdScheme {
                option,
                value: value.to_owned(),
            }),
        }
    }

    /// Returns true iff `candidate`'s value under this scheme equals `reference`.
    pub fn matches<T: Identifiable + ?Sized>(self, reference: &str, candidate: &T) -> bool {
        match self {
            Self::Id => reference
                .parse::<i64>()
                .is_ok_and(|id| candidate.id() == id),
            Self::Code => candidate.code() == Some(reference),
            Self::Uid => candidate.uid() == reference,
        }
    }

    /// Returns the first candidate whose value under this scheme equals `reference`.
    pub fn find<'a, T, I>(self, reference: &str, candidates: I) -> Option<&'a T>
    where
        T: Identifiable + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        candidates
            .into_iter()
            .find(|candidate| self.matches(reference, *candidate))
    }

    /// Returns true iff some candidate's value under this scheme equals `reference`.
    ///
    /// This is the linear form of the check; bulk callers build a [`SchemeIndex`] once instead.
    pub fn resolves<'a, T, I>(self, reference: &str, candidates: I) -> bool
    where
        T: Identifiable + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        self.find(reference, candidates).is_some()
    }
}

impl fmt::Display for IdScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metadata object addressable under every [`IdScheme`].
pub trait Identifiable {
    fn id(&self) -> i64;
    fn uid(&self) -> &str;
    fn code(&self) -> Option<&str>;
}

/// A set of candidates pre-indexed by one identifier scheme.
///
/// Built once per batch so membership checks are O(1) on average.
#[derive(Clone, Debug)]
pub enum SchemeIndex {
    Id(HashSet<i64>),
    Text {
        scheme: IdScheme,
        keys: HashSet<String>,
    },
}

impl SchemeIndex {
    pub fn build<'a, T, I>(scheme: IdScheme, candidates: I) -> Self
    where
        T: Identifiable + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        match scheme {
            IdScheme::Id => Self::Id(candidates.into_iter().map(|c| c.id()).collect()),
            IdScheme::Code => Self::Text {
                scheme,
                keys: candidates
                    .into_iter()
                    .filter_map(|c| c.code().map(str::to_owned))
                    .collect(),
            },
            IdScheme::Uid => Self::Text {
                scheme,
                keys: candidates
                    .into_iter()
                    .map(|c| c.uid().to_owned())
                    .collect(),
            },
        }
    }

    pub fn scheme(&self) -> IdScheme {
        match self {
            Self::Id(_) => IdScheme::Id,
            Self::Text { scheme, .. } => *scheme,
        }
    }

    pub fn contains(&self, reference: &str) -> bool {
        match self {
            Self::Id(ids) => reference.parse::<i64>().is_ok_and(|id| ids.contains(&id)),
            Self::Text { keys, .. } => keys.contains(reference),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Id(ids) => ids.len(),
            Self::Text { keys, .. } => keys.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
