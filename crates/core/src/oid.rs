use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// A content identifier: the lowercase-hex SHA-256 digest of a blob.
///
/// Construction validates the representation (exactly 64 characters from
/// `[0-9a-f]`), so holding an `Oid` is proof the value is safe to embed in
/// filesystem paths and URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// Parse and validate an object id.
    pub fn new(value: impl Into<String>) -> Result<Self, ParseError> {
        let value = value.into();
        if value.len() != 64 || !value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(ParseError::InvalidOid(value));
        }
        Ok(Self(value))
    }

    /// Return the inner hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative on-disk path for this object: five two-character fan-out
    /// directories followed by the full id as the filename.
    ///
    /// For `abcdef0123…` this is `ab/cd/ef/01/23/abcdef0123…`. Each fan-out
    /// level is bounded at 256 entries, so no directory grows pathologically
    /// even with very large blob counts.
    #[must_use]
    pub fn fanout_path(&self) -> PathBuf {
        let mut path = PathBuf::new();
        for i in 0..5 {
            path.push(&self.0[2 * i..2 * i + 2]);
        }
        path.push(&self.0);
        path
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Oid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Oid {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
