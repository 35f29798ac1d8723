//! HTTP Basic authentication against the token store.
//!
//! Every endpoint re-authenticates: the service keeps no sessions, so each
//! request must present the credentials the SSH authenticator handed out.

use axum::http::{HeaderMap, header};
use base64::Engine;

use lfsvault_core::{Action, RepoName};
use lfsvault_token::{Token, TokenStore};

use crate::error::ApiError;

/// Credentials extracted from an `Authorization: Basic …` header.
#[derive(Debug)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// Parse Basic credentials. Any defect (missing header, wrong scheme,
/// bad base64, no colon) collapses into [`ApiError::Unauthorized`].
pub fn parse_basic(headers: &HeaderMap) -> Result<Credentials, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let encoded = value.strip_prefix("Basic ").ok_or(ApiError::Unauthorized)?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| ApiError::Unauthorized)?;
    let decoded = String::from_utf8(decoded).map_err(|_| ApiError::Unauthorized)?;
    let (user, password) = decoded.split_once(':').ok_or(ApiError::Unauthorized)?;
    Ok(Credentials {
        user: user.to_owned(),
        password: password.to_owned(),
    })
}

/// Authenticate the request against the token store.
pub async fn authenticate(tokens: &TokenStore, headers: &HeaderMap) -> Result<Token, ApiError> {
    let credentials = parse_basic(headers)?;
    Ok(tokens.load(&credentials.user, &credentials.password).await?)
}

/// Enforce the authorization policy for `(repo, action)`.
///
/// A missing upload privilege is a plain 403. A missing download privilege
/// reads as 404: whether a private repository exists is not disclosed to
/// callers who cannot read it.
pub fn require_privilege(token: &Token, repo: &RepoName, action: Action) -> Result<(), ApiError> {
    if token.has_privilege(repo, action) {
        return Ok(());
    }
    match action {
        Action::Upload => Err(ApiError::Forbidden(format!(
            "no upload permission on {repo}"
        ))),
        Action::Download => Err(ApiError::NotFound(format!("repository not found: {repo}"))),
    }
}
