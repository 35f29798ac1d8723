use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use lfsvault_core::{ParseError, RepoSet};
use lfsvault_store::StoreConfig;
use lfsvault_token::TokenConfig;

/// Errors raised while loading or interpreting the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid repository in allowlist: {0}")]
    Repository(#[from] ParseError),

    #[error("invalid mode {0:?}: expected an octal string like \"0700\"")]
    Mode(String),
}

/// Top-level configuration, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct LfsConfig {
    /// HTTP server bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Blob storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Token store configuration.
    #[serde(default)]
    pub tokens: TokensConfig,
    /// Access oracle configuration.
    #[serde(default)]
    pub access: AccessConfig,
    /// Repositories this deployment serves. Requests for anything else are
    /// answered 404.
    #[serde(default)]
    pub repositories: Vec<String>,
}

impl LfsConfig {
    /// Load from a TOML file, or fall back to defaults when the file does
    /// not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// The canonicalized repository allowlist.
    pub fn repo_set(&self) -> Result<RepoSet, ConfigError> {
        Ok(RepoSet::from_names(&self.repositories)?)
    }

    /// Blob store configuration derived from the `[storage]` section.
    pub fn store_config(&self) -> Result<StoreConfig, ConfigError> {
        let mut config = StoreConfig::new(self.storage.data_dir.clone(), self.repo_set()?);
        if let Some(mode) = &self.storage.dir_mode {
            config.dir_mode = parse_mode(mode)?;
        }
        if let Some(mode) = &self.storage.file_mode {
            config.file_mode = parse_mode(mode)?;
        }
        Ok(config)
    }

    /// Token store configuration derived from the `[tokens]` section.
    #[must_use]
    pub fn token_config(&self) -> TokenConfig {
        TokenConfig {
            directory: self.tokens.directory.clone(),
            ttl: Duration::from_secs(self.tokens.ttl_seconds),
        }
    }
}

/// HTTP server bind configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally visible base URL used in batch action plans, e.g.
    /// `https://lfs.example.com`. When unset, URLs are derived from each
    /// request's `Host` header with the `http` scheme.
    pub external_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            external_url: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    8080
}

/// Blob storage configuration.
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Root directory for blob data; each repository gets a subtree.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Octal mode for created directories, e.g. `"0700"`.
    pub dir_mode: Option<String>,
    /// Octal mode for committed blob files, e.g. `"0600"`.
    pub file_mode: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            dir_mode: None,
            file_mode: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("lfs-data")
}

/// Token store configuration.
#[derive(Debug, Deserialize)]
pub struct TokensConfig {
    /// Directory for token files. Defaults to a subdirectory of the OS
    /// temp dir when unset.
    pub directory: Option<PathBuf>,
    /// Token lifetime in seconds.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            directory: None,
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

fn default_ttl_seconds() -> u64 {
    7200
}

/// Access oracle configuration.
#[derive(Debug, Deserialize)]
pub struct AccessConfig {
    /// Path to the gitolite binary. The authenticator's `GL_BINDIR`
    /// environment variable takes precedence when set.
    #[serde(default = "default_gitolite_command")]
    pub gitolite_command: PathBuf,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            gitolite_command: default_gitolite_command(),
        }
    }
}

fn default_gitolite_command() -> PathBuf {
    PathBuf::from("gitolite")
}

fn parse_mode(raw: &str) -> Result<u32, ConfigError> {
    let digits = raw.trim().trim_start_matches("0o");
    u32::from_str_radix(digits, 8).map_err(|_| ConfigError::Mode(raw.to_owned()))
}
