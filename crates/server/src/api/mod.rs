pub mod batch;
pub mod transfer;

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path, RawQuery, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use lfsvault_store::BlobStore;
use lfsvault_token::TokenStore;

use crate::error::ApiError;

/// The Git LFS JSON media type. Header checks use substring matching so
/// parameters (e.g. `; charset=utf-8`) are tolerated.
pub const MEDIA_TYPE: &str = "application/vnd.git-lfs+json";

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The blob store.
    pub store: BlobStore,
    /// The token store every request authenticates against.
    pub tokens: Arc<TokenStore>,
    /// Externally visible base URL for action plans (None derives from the
    /// request's Host header).
    pub external_url: Option<String>,
}

/// The LFS endpoints living under a repository prefix.
///
/// Repositories are multi-segment paths (`org/project`), so the router
/// cannot capture them with a fixed pattern; instead a wildcard route
/// matches everything and the known endpoint suffix is stripped to recover
/// the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Batch,
    Upload,
    Download,
    Verify,
}

const ENDPOINT_SUFFIXES: [(&str, Endpoint); 4] = [
    ("/info/lfs/objects/batch", Endpoint::Batch),
    ("/info/lfs/objects/upload", Endpoint::Upload),
    ("/info/lfs/objects/download", Endpoint::Download),
    ("/info/lfs/objects/verify", Endpoint::Verify),
];

/// Split a wildcard-captured path into `(repository prefix, endpoint)`.
fn split_endpoint(path: &str) -> Option<(&str, Endpoint)> {
    ENDPOINT_SUFFIXES
        .iter()
        .find_map(|(suffix, endpoint)| path.strip_suffix(suffix).map(|repo| (repo, *endpoint)))
}

/// Build the axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/{*path}",
            get(handle_get).put(handle_put).post(handle_post),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn handle_get(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    match split_endpoint(&path) {
        Some((repo, Endpoint::Download)) => {
            transfer::download(&state, repo, &headers, query.as_deref()).await
        }
        Some(_) => Err(ApiError::MethodNotAllowed),
        None => Err(ApiError::NotFound("unknown endpoint".to_owned())),
    }
}

async fn handle_put(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    match split_endpoint(&path) {
        Some((repo, Endpoint::Upload)) => {
            transfer::upload(&state, repo, &headers, query.as_deref(), body).await
        }
        Some(_) => Err(ApiError::MethodNotAllowed),
        None => Err(ApiError::NotFound("unknown endpoint".to_owned())),
    }
}

async fn handle_post(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    match split_endpoint(&path) {
        Some((repo, Endpoint::Batch)) => batch::negotiate(&state, repo, &headers, &body).await,
        Some((repo, Endpoint::Verify)) => transfer::verify(&state, repo, &headers, &body).await,
        Some(_) => Err(ApiError::MethodNotAllowed),
        None => Err(ApiError::NotFound("unknown endpoint".to_owned())),
    }
}
