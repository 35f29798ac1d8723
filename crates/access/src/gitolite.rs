use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use lfsvault_core::{Action, RepoName};

use crate::{AccessError, AccessOracle};

/// Bridge to the `gitolite` command-line tool.
///
/// Asks `gitolite access -q <repo> <user> <R|W>`; exit status 0 means
/// allowed, anything else means denied. Arguments are passed argv-style.
/// No shell is involved, so repository and user strings cannot be
/// interpreted as shell metacharacters.
#[derive(Debug, Clone)]
pub struct GitoliteOracle {
    command: PathBuf,
}

impl GitoliteOracle {
    #[must_use]
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

fn gitolite_perm(action: Action) -> &'static str {
    match action {
        Action::Download => "R",
        Action::Upload => "W",
    }
}

#[async_trait]
impl AccessOracle for GitoliteOracle {
    async fn has_access(
        &self,
        repo: &RepoName,
        user: &str,
        action: Action,
    ) -> Result<bool, AccessError> {
        let status = Command::new(&self.command)
            .arg("access")
            .arg("-q")
            .arg(repo.as_str())
            .arg(user)
            .arg(gitolite_perm(action))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| AccessError::Unavailable(format!("{}: {e}", self.command.display())))?;

        let allowed = status.success();
        debug!(
            repo = %repo,
            user,
            action = %action,
            allowed,
            "gitolite access check"
        );
        Ok(allowed)
    }
}
