use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use lfsvault_core::ParseError;
use lfsvault_store::StoreError;
use lfsvault_token::TokenError;

use crate::api::MEDIA_TYPE;

/// The challenge sent with every 401: clients retry with Basic credentials
/// obtained from the SSH authenticator.
pub const AUTH_CHALLENGE: &str = "Basic realm=\"Git LFS\"";

/// Errors surfaced at the HTTP boundary.
///
/// Each variant owns one slice of the status-code mapping; handlers return
/// these and never build status codes themselves.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input: bad JSON, invalid object id, missing fields (422).
    #[error("{0}")]
    Validation(String),

    /// Missing or unusable credentials (401 plus challenge headers).
    #[error("credentials required")]
    Unauthorized,

    /// Authenticated but not allowed to write (403).
    #[error("{0}")]
    Forbidden(String),

    /// Unknown repository, missing blob, or a read the caller may not know
    /// about (404).
    #[error("{0}")]
    NotFound(String),

    /// The endpoint exists but not for this method (405).
    #[error("method not allowed")]
    MethodNotAllowed,

    /// The client did not negotiate the LFS media type (406).
    #[error("{0}")]
    NotAcceptable(String),

    /// A batch operation outside `upload`/`download` (501).
    #[error("unsupported batch operation")]
    UnsupportedOperation,

    /// Anything unexpected. The detail is logged, never returned (500).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Self::UnsupportedOperation => StatusCode::NOT_IMPLEMENTED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Internal(detail) => {
                tracing::error!(detail = %detail, "request failed");
                "internal server error".to_owned()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "message": message,
            "documentation_url": "",
            "request_id": "",
        });

        let mut response = (
            self.status(),
            [(header::CONTENT_TYPE, MEDIA_TYPE)],
            Json(body),
        )
            .into_response();

        if matches!(self, Self::Unauthorized) {
            let challenge = header::HeaderValue::from_static(AUTH_CHALLENGE);
            let headers = response.headers_mut();
            headers.insert(header::WWW_AUTHENTICATE, challenge.clone());
            headers.insert("LFS-Authenticate", challenge);
        }

        response
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownRepo(repo) => Self::NotFound(format!("repository not found: {repo}")),
            StoreError::NotFound(oid) => Self::NotFound(format!("object not found: {oid}")),
            StoreError::DigestMismatch { oid, .. } => {
                Self::Validation(format!("received data does not match oid {oid}"))
            }
            StoreError::Io(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Unauthorized | TokenError::InvalidUser(_) => Self::Unauthorized,
            TokenError::Io(e) => Self::Internal(e.to_string()),
            TokenError::Serialize(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<ParseError> for ApiError {
    fn from(e: ParseError) -> Self {
        match e {
            // Whether a repository name is malformed or merely unlisted is
            // not disclosed; both read as absence.
            ParseError::InvalidRepo(repo) => Self::NotFound(format!("repository not found: {repo}")),
            other => Self::Validation(other.to_string()),
        }
    }
}
