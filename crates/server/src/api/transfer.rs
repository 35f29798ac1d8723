//! The transfer endpoints: raw blob upload, download, and verify.
//!
//! These execute the plans handed out by the batch negotiator. Each request
//! is authenticated independently; nothing is remembered between the batch
//! call and the transfers it planned.

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::debug;

use lfsvault_core::{Action, ObjectSpec, Oid, RepoName};
use lfsvault_store::RepoStore;

use crate::api::AppState;
use crate::auth;
use crate::error::ApiError;

/// `oid` and `size` arrive as query parameters on upload and download.
#[derive(Debug, Deserialize)]
struct TransferQuery {
    oid: String,
    size: u64,
}

fn parse_query(raw: Option<&str>) -> Result<ObjectSpec, ApiError> {
    let raw = raw.ok_or_else(|| {
        ApiError::Validation("missing oid and size query parameters".to_owned())
    })?;
    let query: TransferQuery = serde_urlencoded::from_str(raw)
        .map_err(|e| ApiError::Validation(format!("invalid query parameters: {e}")))?;
    let oid = Oid::new(query.oid)?;
    Ok(ObjectSpec {
        oid,
        size: query.size,
    })
}

/// Resolve the repository prefix and authenticate the caller.
///
/// Order matters: an unlisted repository is a 404 before credentials are
/// even looked at, and only then does the privilege policy decide between
/// 403 and 404.
async fn admit(
    state: &AppState,
    repo_raw: &str,
    headers: &HeaderMap,
    action: Action,
) -> Result<(RepoName, RepoStore), ApiError> {
    let repo = RepoName::new(repo_raw)?;
    let repo_store = state.store.scoped(&repo)?;
    let token = auth::authenticate(&state.tokens, headers).await?;
    auth::require_privilege(&token, &repo, action)?;
    Ok((repo, repo_store))
}

/// `PUT …/upload?oid=&size=`: stream the request body into the store.
///
/// Memory stays bounded regardless of blob size; the body is consumed
/// chunk-by-chunk. The declared size and the bytes' SHA-256 are both
/// checked before the blob becomes visible.
pub(crate) async fn upload(
    state: &AppState,
    repo_raw: &str,
    headers: &HeaderMap,
    query: Option<&str>,
    body: Body,
) -> Result<Response, ApiError> {
    let spec = parse_query(query)?;
    let (repo, repo_store) = admit(state, repo_raw, headers, Action::Upload).await?;

    let mut writer = repo_store.writer(&spec.oid).await?;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                writer.abort().await;
                debug!(oid = %spec.oid, error = %e, "upload stream aborted");
                return Err(ApiError::Validation(format!("upload interrupted: {e}")));
            }
        };
        if let Err(e) = writer.write(&chunk).await {
            writer.abort().await;
            return Err(e.into());
        }
    }

    if writer.written() != spec.size {
        let written = writer.written();
        writer.abort().await;
        return Err(ApiError::Validation(format!(
            "declared size {} but received {written} bytes",
            spec.size
        )));
    }

    let size = writer.commit().await?;
    debug!(repo = %repo, oid = %spec.oid, size, "blob uploaded");
    Ok(StatusCode::OK.into_response())
}

/// `GET …/download?oid=&size=`: stream the blob back.
pub(crate) async fn download(
    state: &AppState,
    repo_raw: &str,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Result<Response, ApiError> {
    let spec = parse_query(query)?;
    let (_, repo_store) = admit(state, repo_raw, headers, Action::Download).await?;

    let (file, len) = repo_store.reader(&spec.oid).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len)
        // Proxies must not buffer large blobs between us and the client.
        .header("X-Accel-Buffering", "no")
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// `POST …/verify`: confirm an upload landed with the declared size.
///
/// Verification follows an upload, so it requires the upload privilege.
pub(crate) async fn verify(
    state: &AppState,
    repo_raw: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ApiError> {
    let spec: ObjectSpec = serde_json::from_slice(body)
        .map_err(|e| ApiError::Validation(format!("invalid verify request: {e}")))?;
    let (_, repo_store) = admit(state, repo_raw, headers, Action::Upload).await?;

    if repo_store.exists(&spec.oid, Some(spec.size)).await {
        Ok(StatusCode::OK.into_response())
    } else {
        Err(ApiError::NotFound(format!(
            "object not found: {}",
            spec.oid
        )))
    }
}
