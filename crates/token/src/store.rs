use std::path::PathBuf;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::fs;
use tracing::{debug, warn};

use lfsvault_access::AccessOracle;

use crate::error::TokenError;
use crate::token::Token;

/// Configuration for the token store.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Directory holding one token file per user. `None` falls back to a
    /// subdirectory of the OS temp dir.
    pub directory: Option<PathBuf>,
    /// How long a freshly minted or refreshed token stays valid.
    pub ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            directory: None,
            ttl: Duration::from_secs(7200),
        }
    }
}

/// Durable store of bearer tokens, one JSON file per user.
///
/// Writes go through a tempfile + atomic rename, so a reader racing a
/// writer sees either the previous token or the new one, never a torn
/// file.
#[derive(Debug, Clone)]
pub struct TokenStore {
    dir: PathBuf,
    ttl: TimeDelta,
}

impl TokenStore {
    /// Create the store, resolving and creating the token directory.
    pub fn new(config: &TokenConfig) -> Result<Self, TokenError> {
        let dir = config
            .directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("lfsvault-tokens"));

        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&dir)?;

        let ttl = TimeDelta::from_std(config.ttl)
            .map_err(|e| TokenError::Io(std::io::Error::other(e)))?;
        Ok(Self { dir, ttl })
    }

    /// The resolved token directory.
    #[must_use]
    pub fn directory(&self) -> &PathBuf {
        &self.dir
    }

    fn token_path(&self, user: &str) -> Result<PathBuf, TokenError> {
        // A username becomes a filename; anything that could traverse out
        // of the token directory is rejected before a path is built.
        let acceptable = !user.is_empty()
            && user != "."
            && user != ".."
            && !user.contains(['/', '\\', '\0']);
        if !acceptable {
            return Err(TokenError::InvalidUser(user.to_owned()));
        }
        Ok(self.dir.join(user))
    }

    /// Return a valid token for `user`, minting a fresh one when no token
    /// exists or the stored one has expired.
    pub async fn load_or_create(&self, user: &str) -> Result<Token, TokenError> {
        let path = self.token_path(user)?;

        match self.read_token(user).await? {
            Some(token) if !token.is_expired() => return Ok(token),
            Some(_) => {
                debug!(user, "stored token expired, minting a new one");
                self.delete(user).await?;
            }
            None => {}
        }

        let token = Token::new(user, Utc::now() + self.ttl);
        self.write_token(&path, &token).await?;
        Ok(token)
    }

    /// Credential lookup for the HTTP endpoints.
    ///
    /// An absent file, an unreadable file, an expired token, and a password
    /// mismatch all collapse into [`TokenError::Unauthorized`]. Expired
    /// token files are reaped on the way out.
    pub async fn load(&self, user: &str, password: &str) -> Result<Token, TokenError> {
        let token = self
            .read_token(user)
            .await
            .map_err(|_| TokenError::Unauthorized)?
            .ok_or(TokenError::Unauthorized)?;

        if token.is_expired() {
            if let Err(e) = self.delete(user).await {
                warn!(user, error = %e, "failed to reap expired token file");
            }
            return Err(TokenError::Unauthorized);
        }
        if !token.check_password(password) {
            return Err(TokenError::Unauthorized);
        }
        Ok(token)
    }

    /// Persist the token's current state.
    pub async fn persist(&self, token: &Token) -> Result<(), TokenError> {
        let path = self.token_path(token.user())?;
        self.write_token(&path, token).await
    }

    /// Push the expiry out to `now + ttl` and persist.
    pub async fn extend_ttl(&self, token: &mut Token) -> Result<(), TokenError> {
        token.set_expires_at(Utc::now() + self.ttl);
        self.persist(token).await
    }

    /// Re-check every grant against the oracle (dropping stale ones), then
    /// refresh the TTL and persist.
    pub async fn revalidate(
        &self,
        token: &mut Token,
        oracle: &dyn AccessOracle,
    ) -> Result<(), TokenError> {
        token.revalidate_grants(oracle).await;
        self.extend_ttl(token).await
    }

    /// Remove the token file if present.
    pub async fn delete(&self, user: &str) -> Result<(), TokenError> {
        let path = self.token_path(user)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TokenError::Io(e)),
        }
    }

    async fn read_token(&self, user: &str) -> Result<Option<Token>, TokenError> {
        let path = self.token_path(user)?;
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TokenError::Io(e)),
        };
        match serde_json::from_slice::<Token>(&contents) {
            Ok(token) if token.user() == user => Ok(Some(token)),
            Ok(token) => {
                warn!(
                    user,
                    stored = token.user(),
                    "token file names a different user, treating as absent"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(user, error = %e, "malformed token file, treating as absent");
                Ok(None)
            }
        }
    }

    async fn write_token(&self, path: &PathBuf, token: &Token) -> Result<(), TokenError> {
        // Pretty-printed for operational inspection.
        let contents = serde_json::to_vec_pretty(token)?;

        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let tmp = self.dir.join(format!("{}.{suffix}.tmp", token.user()));

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&tmp).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &contents).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(TokenError::Io(e));
        }
        Ok(())
    }
}
