//! SSH forced-command entrypoint.
//!
//! The gitolite shell invokes this as `lfsvault-authenticate <repo> <action>`
//! with `GL_USER` naming the already-authenticated caller. On success the
//! minted credentials are printed to stdout as JSON for the Git client's
//! HTTP layer; diagnostics go to stderr so stdout stays machine-readable.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing::warn;

use lfsvault_access::{AccessOracle, GitoliteOracle};
use lfsvault_core::{Action, ParseError, RepoName, RepoSet};
use lfsvault_server::config::LfsConfig;
use lfsvault_token::{TokenError, TokenStore};

/// SSH forced-command authenticator for lfsvault.
#[derive(Parser, Debug)]
#[command(
    name = "lfsvault-authenticate",
    about = "Mint Git LFS credentials after a gitolite access check"
)]
struct Cli {
    /// Path to the TOML configuration file (defaults to $LFSVAULT_CONFIG,
    /// then lfsvault.toml).
    #[arg(short, long)]
    config: Option<String>,

    /// Repository path, e.g. org/project
    repo: String,

    /// Requested action: "download" or "upload"
    action: String,
}

#[derive(Debug, Error)]
enum GrantError {
    #[error("unknown repository: {0}")]
    UnknownRepo(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("access denied: {user} may not {action} {repo}")]
    Denied {
        user: String,
        repo: RepoName,
        action: Action,
    },

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("failed to encode credentials: {0}")]
    Encode(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Diagnostics go to stderr: stdout carries only the credential JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(credentials) => {
            println!("{credentials}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "authentication failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<String, Box<dyn std::error::Error>> {
    let user = std::env::var("GL_USER").map_err(|_| {
        "GL_USER is not set; this command must be invoked through the gitolite shell"
    })?;

    let config_path = cli
        .config
        .or_else(|| std::env::var("LFSVAULT_CONFIG").ok())
        .unwrap_or_else(|| "lfsvault.toml".to_owned());
    let config = LfsConfig::load(&config_path)?;

    // The gitolite shim exports GL_BINDIR; prefer it over the configured
    // command so the authenticator always talks to the gitolite install
    // that invoked it.
    let gitolite = match std::env::var("GL_BINDIR") {
        Ok(dir) => PathBuf::from(dir).join("gitolite"),
        Err(_) => config.access.gitolite_command.clone(),
    };
    let oracle = GitoliteOracle::new(gitolite);

    let repos = config.repo_set()?;
    let tokens = TokenStore::new(&config.token_config())?;

    let credentials = grant(&tokens, &oracle, &repos, &user, &cli.repo, &cli.action).await?;
    Ok(credentials)
}

/// The authentication protocol: canonicalize and allowlist-check the repo,
/// refresh the caller's token, consult the oracle, then grant or
/// defensively revoke.
async fn grant(
    tokens: &TokenStore,
    oracle: &dyn AccessOracle,
    repos: &RepoSet,
    user: &str,
    repo_raw: &str,
    action_raw: &str,
) -> Result<String, GrantError> {
    let repo = RepoName::new(oracle.prepare_repo_name(repo_raw))?;
    if !repos.contains(&repo) {
        return Err(GrantError::UnknownRepo(repo.to_string()));
    }
    let action: Action = action_raw.parse()?;

    let mut token = tokens.load_or_create(user).await?;
    // Strip any grants the oracle no longer approves and push the TTL out.
    tokens.revalidate(&mut token, oracle).await?;

    let allowed = match oracle.has_access(&repo, user, action).await {
        Ok(allowed) => allowed,
        Err(e) => {
            warn!(error = %e, "access oracle unreachable, denying");
            false
        }
    };

    if !allowed {
        token.remove_privilege(&repo, action);
        tokens.persist(&token).await?;
        return Err(GrantError::Denied {
            user: user.to_owned(),
            repo,
            action,
        });
    }

    token.add_privilege(repo, action);
    tokens.persist(&token).await?;

    let credentials = serde_json::json!({
        "header": { "Authorization": token.auth_header() },
        "expires_at": token.expires_at().to_rfc3339(),
    });
    Ok(serde_json::to_string_pretty(&credentials)?)
}
