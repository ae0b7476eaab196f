//! Internal implementation of UID generation and validation.

use crate::{UidError, UidResult};
use rand::Rng;
use std::{fmt, str::FromStr};

/// Number of characters in a canonical UID.
pub const UID_LENGTH: usize = 11;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHANUMERIC: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A stable unique identifier in canonical form.
///
/// Once constructed, the contained string is guaranteed to be eleven characters long, to start
/// with an ASCII letter and to contain only ASCII letters and digits.
///
/// # Construction
/// - [`Uid::generate`] allocates a fresh random identifier.
/// - [`Uid::parse`] validates an externally supplied identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(String);

impl Uid {
    /// Generates a new random UID.
    ///
    /// The first character is drawn from the letters, the remaining ten from letters and digits,
    /// giving roughly 52 * 62^10 possible values.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut out = String::with_capacity(UID_LENGTH);
        out.push(LETTERS[rng.gen_range(0..LETTERS.len())] as char);
        for _ in 1..UID_LENGTH {
            out.push(ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())] as char);
        }
        Self(out)
    }

    /// Validates and wraps a UID string.
    ///
    /// # Errors
    ///
    /// Returns [`UidError::InvalidInput`] if `input` is not a canonical UID.
    pub fn parse(input: &str) -> UidResult<Self> {
        if Self::is_valid(input) {
            return Ok(Self(input.to_owned()));
        }
        Err(UidError::InvalidInput(format!(
            "UID must be {} alphanumeric characters starting with a letter, got: '{}'",
            UID_LENGTH, input
        )))
    }

    /// Returns true if `input` is a canonical UID.
    ///
    /// This is a purely syntactic check and never allocates.
    pub fn is_valid(input: &str) -> bool {
        let bytes = input.as_bytes();
        bytes.len() == UID_LENGTH
            && bytes[0].is_ascii_alphabetic()
            && bytes.iter().all(u8::is_ascii_alphanumeric)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Uid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Uid {
    type Err = UidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uid::parse(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Uid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Uid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Uid::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Generates a random upper-case alphanumeric business code of `len` characters.
///
/// Codes are not globally unique; callers that need uniqueness must check for collisions.
pub fn generate_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..36);
            ALPHANUMERIC[if idx < 10 { idx } else { idx + 26 }] as char
        })
        .collect()
}
