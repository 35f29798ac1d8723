//! Repository access control.
//!
//! The LFS service never keeps its own ACL database: every permission
//! question is delegated to the oracle that already governs regular Git
//! operations. [`AccessOracle`] is the seam; [`GitoliteOracle`] is the
//! production implementation. Callers treat oracle failures as denial:
//! an unreachable oracle must never grant access.

pub mod gitolite;

use async_trait::async_trait;
use thiserror::Error;

use lfsvault_core::{Action, RepoName};

pub use gitolite::GitoliteOracle;

/// Errors from consulting the access oracle.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The oracle could not be reached (missing binary, spawn failure).
    ///
    /// Callers must fail closed on this: log it and deny.
    #[error("access oracle unavailable: {0}")]
    Unavailable(String),
}

/// Decision procedure for "may `user` perform `action` on `repo`?".
#[async_trait]
pub trait AccessOracle: Send + Sync {
    /// Canonicalize a raw repository path the way the oracle names repos.
    ///
    /// Idempotent. The default strips trailing `.git` and normalizes
    /// separators to `/`.
    fn prepare_repo_name(&self, raw: &str) -> String {
        RepoName::canonicalize(raw)
    }

    /// Consult the source of truth. `Ok(false)` is an ordinary denial;
    /// `Err` means the question could not be asked at all.
    async fn has_access(
        &self,
        repo: &RepoName,
        user: &str,
        action: Action,
    ) -> Result<bool, AccessError>;
}
