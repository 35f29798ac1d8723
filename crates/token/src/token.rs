use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use lfsvault_access::AccessOracle;
use lfsvault_core::{Action, RepoName};

use crate::password;

/// A bearer credential with an attached set of privilege grants.
///
/// The on-disk representation is the serde form of this struct: a JSON
/// object with `user`, `password`, `privileges` (repo → array of actions),
/// and an RFC 3339 `expires_at`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Token {
    user: String,
    password: String,
    #[serde(default)]
    privileges: BTreeMap<RepoName, BTreeSet<Action>>,
    expires_at: DateTime<Utc>,
}

impl Token {
    /// Mint a token with a fresh CSPRNG password and no grants.
    #[must_use]
    pub fn new(user: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            user: user.into(),
            password: password::generate(),
            privileges: BTreeMap::new(),
            expires_at,
        }
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub(crate) fn set_expires_at(&mut self, expires_at: DateTime<Utc>) {
        self.expires_at = expires_at;
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Constant-time password check.
    #[must_use]
    pub fn check_password(&self, candidate: &str) -> bool {
        password::constant_time_eq(&self.password, candidate)
    }

    /// The value of the `Authorization` header this token authenticates
    /// with: `Basic base64(user:password)`.
    #[must_use]
    pub fn auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.user, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }

    /// Grant `action` on `repo`. Idempotent.
    pub fn add_privilege(&mut self, repo: RepoName, action: Action) {
        self.privileges.entry(repo).or_default().insert(action);
    }

    /// Revoke `action` on `repo`. Idempotent; a repo with no remaining
    /// actions disappears from the grant map entirely.
    pub fn remove_privilege(&mut self, repo: &RepoName, action: Action) {
        if let Some(actions) = self.privileges.get_mut(repo) {
            actions.remove(&action);
            if actions.is_empty() {
                self.privileges.remove(repo);
            }
        }
    }

    /// Whether this token carries `(repo, action)`. Unknown repos and
    /// actions are simply `false`.
    #[must_use]
    pub fn has_privilege(&self, repo: &RepoName, action: Action) -> bool {
        self.privileges
            .get(repo)
            .is_some_and(|actions| actions.contains(&action))
    }

    /// Repositories with at least one grant.
    pub fn granted_repos(&self) -> impl Iterator<Item = &RepoName> {
        self.privileges.keys()
    }

    /// Re-check every grant against the oracle and drop the ones that no
    /// longer pass. An oracle error fails closed: the grant is dropped and
    /// the error logged.
    pub async fn revalidate_grants(&mut self, oracle: &dyn AccessOracle) {
        let granted: Vec<(RepoName, Action)> = self
            .privileges
            .iter()
            .flat_map(|(repo, actions)| actions.iter().map(|a| (repo.clone(), *a)))
            .collect();

        for (repo, action) in granted {
            let keep = match oracle.has_access(&repo, &self.user, action).await {
                Ok(allowed) => allowed,
                Err(e) => {
                    warn!(
                        user = %self.user,
                        repo = %repo,
                        action = %action,
                        error = %e,
                        "access oracle unreachable during revalidation, dropping grant"
                    );
                    false
                }
            };
            if !keep {
                self.remove_privilege(&repo, action);
            }
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("privileges", &self.privileges)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn repo() -> RepoName {
        RepoName::new("org/project").unwrap()
    }

    fn token() -> Token {
        Token::new("alice", Utc::now() + TimeDelta::hours(2))
    }

    #[test]
    fn add_then_remove_clears_repo_key() {
        let mut t = token();
        t.add_privilege(repo(), Action::Upload);
        assert!(t.has_privilege(&repo(), Action::Upload));

        t.remove_privilege(&repo(), Action::Upload);
        assert!(!t.has_privilege(&repo(), Action::Upload));
        assert_eq!(t.granted_repos().count(), 0);
    }

    #[test]
    fn add_privilege_is_idempotent() {
        let mut t = token();
        t.add_privilege(repo(), Action::Download);
        t.add_privilege(repo(), Action::Download);

        t.remove_privilege(&repo(), Action::Download);
        assert!(!t.has_privilege(&repo(), Action::Download));
    }

    #[test]
    fn remove_privilege_keeps_other_actions() {
        let mut t = token();
        t.add_privilege(repo(), Action::Download);
        t.add_privilege(repo(), Action::Upload);

        t.remove_privilege(&repo(), Action::Upload);
        assert!(t.has_privilege(&repo(), Action::Download));
        assert_eq!(t.granted_repos().count(), 1);
    }

    #[test]
    fn unknown_repo_has_no_privilege() {
        let t = token();
        assert!(!t.has_privilege(&repo(), Action::Download));
    }

    #[test]
    fn auth_header_is_basic_base64() {
        let t = token();
        let header = t.auth_header();
        let encoded = header.strip_prefix("Basic ").unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        let decoded = String::from_utf8(decoded).unwrap();
        assert!(decoded.starts_with("alice:"));
        let (_, password) = decoded.split_once(':').unwrap();
        assert!(t.check_password(password));
    }

    #[test]
    fn expiry_check() {
        let mut t = token();
        assert!(!t.is_expired());
        t.set_expires_at(Utc::now() - TimeDelta::seconds(1));
        assert!(t.is_expired());
    }

    #[test]
    fn serde_roundtrip_preserves_everything() {
        let mut t = token();
        t.add_privilege(repo(), Action::Upload);
        t.add_privilege(RepoName::new("org/other").unwrap(), Action::Download);

        let json = serde_json::to_string_pretty(&t).unwrap();
        let back: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(back.user(), t.user());
        assert_eq!(back.expires_at(), t.expires_at());
        assert!(back.check_password(&t.password));
        assert!(back.has_privilege(&repo(), Action::Upload));
        assert!(back.has_privilege(&RepoName::new("org/other").unwrap(), Action::Download));
    }

    #[test]
    fn debug_redacts_password() {
        let t = token();
        let rendered = format!("{t:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains(&t.password));
    }

    #[test]
    fn disk_format_shape() {
        let mut t = token();
        t.add_privilege(repo(), Action::Download);
        let json: serde_json::Value = serde_json::to_value(&t).unwrap();
        assert_eq!(json["user"], "alice");
        assert!(json["password"].is_string());
        assert_eq!(json["privileges"]["org/project"][0], "download");
        // RFC 3339 timestamp.
        assert!(json["expires_at"].as_str().unwrap().contains('T'));
    }
}
