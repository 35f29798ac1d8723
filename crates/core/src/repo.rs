use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// A canonical repository path, e.g. `org/project`.
///
/// Canonical form uses `/` separators and carries no trailing `.git`.
/// Construction rejects absolute paths and any `.`/`..` segment, so a
/// `RepoName` can never escape the data root. This check runs before any
/// allowlist or filesystem lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName(String);

impl RepoName {
    /// Parse a repository name, canonicalizing it first.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ParseError> {
        let canonical = Self::canonicalize(raw.as_ref());
        if canonical.is_empty() {
            return Err(ParseError::InvalidRepo(raw.as_ref().to_owned()));
        }
        let acceptable = canonical
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
        if !acceptable {
            return Err(ParseError::InvalidRepo(raw.as_ref().to_owned()));
        }
        Ok(Self(canonical))
    }

    /// Normalize a raw repository path: trim whitespace, convert `\` to `/`,
    /// drop trailing separators, and strip trailing `.git` suffixes.
    ///
    /// Idempotent: applying it to its own output is a no-op.
    #[must_use]
    pub fn canonicalize(raw: &str) -> String {
        let mut name = raw.trim().replace('\\', "/");
        loop {
            let trimmed = name.trim_end_matches('/');
            let stripped = trimmed.strip_suffix(".git").unwrap_or(trimmed);
            if stripped.len() == name.len() {
                break;
            }
            name.truncate(stripped.len());
        }
        name
    }

    /// Return the canonical path as a str slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RepoName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RepoName {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RepoName> for String {
    fn from(repo: RepoName) -> Self {
        repo.0
    }
}

impl AsRef<str> for RepoName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The immutable set of repositories this deployment serves.
///
/// Built once from configuration; every request referencing a repository
/// outside the set is answered as if the repository did not exist.
#[derive(Debug, Clone, Default)]
pub struct RepoSet(BTreeSet<RepoName>);

impl RepoSet {
    /// Build the set from raw configuration strings, canonicalizing each.
    pub fn from_names<I, S>(names: I) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for name in names {
            set.insert(RepoName::new(name)?);
        }
        Ok(Self(set))
    }

    #[must_use]
    pub fn contains(&self, repo: &RepoName) -> bool {
        self.0.contains(repo)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RepoName> {
        self.0.iter()
    }
}
