//! The Batch API: `POST /<repo>/info/lfs/objects/batch`.
//!
//! Given a list of objects and an intent, answers with a per-object action
//! plan (where to PUT/GET, with which credentials) or a per-object error.
//! One missing blob never fails the whole batch.

use std::collections::BTreeMap;

use axum::Json;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};

use lfsvault_core::{
    Action, ActionPlan, BatchRequest, BatchResponse, ObjectError, ObjectPlan, ObjectSpec,
    Operation, PlannedActions, RepoName,
};
use lfsvault_token::Token;

use crate::api::{AppState, MEDIA_TYPE};
use crate::auth;
use crate::error::ApiError;

pub(crate) async fn negotiate(
    state: &AppState,
    repo_raw: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ApiError> {
    require_lfs_headers(headers)?;

    if body.is_empty() {
        return Err(ApiError::Validation("empty request body".to_owned()));
    }
    let request: BatchRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::Validation(format!("invalid batch request: {e}")))?;

    let action = match request.operation {
        Operation::Upload => Action::Upload,
        Operation::Download => Action::Download,
        Operation::Unknown => return Err(ApiError::UnsupportedOperation),
    };

    let repo = RepoName::new(repo_raw)?;
    let repo_store = state.store.scoped(&repo)?;

    let token = auth::authenticate(&state.tokens, headers).await?;
    auth::require_privilege(&token, &repo, action)?;

    let base = base_url(state, headers)?;
    let mut objects = Vec::with_capacity(request.objects.len());
    for spec in &request.objects {
        let present = repo_store.exists(&spec.oid, Some(spec.size)).await;
        let plan = match action {
            // Already stored with the right size: the client skips it.
            Action::Upload if present => ObjectPlan::already_present(spec),
            Action::Upload => ObjectPlan::with_actions(
                spec,
                PlannedActions {
                    upload: Some(action_plan(&base, &repo, spec, "upload", &token)),
                    verify: Some(action_plan(&base, &repo, spec, "verify", &token)),
                    download: None,
                },
            ),
            Action::Download if present => ObjectPlan::with_actions(
                spec,
                PlannedActions {
                    download: Some(action_plan(&base, &repo, spec, "download", &token)),
                    ..PlannedActions::default()
                },
            ),
            Action::Download => ObjectPlan::with_error(spec, ObjectError::not_found()),
        };
        objects.push(plan);
    }

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, MEDIA_TYPE)],
        Json(BatchResponse::basic(objects)),
    )
        .into_response())
}

/// Both `Accept` and `Content-Type` must name the LFS media type
/// (substring match, so media type parameters are tolerated).
fn require_lfs_headers(headers: &HeaderMap) -> Result<(), ApiError> {
    for name in [header::ACCEPT, header::CONTENT_TYPE] {
        let ok = headers
            .get(&name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains(MEDIA_TYPE));
        if !ok {
            return Err(ApiError::NotAcceptable(format!(
                "{name} must include {MEDIA_TYPE}"
            )));
        }
    }
    Ok(())
}

/// Base URL for action plans: the configured external URL when present,
/// otherwise the request's Host header over plain http (TLS terminates
/// outside this service, so the origin scheme is not observable here).
fn base_url(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    if let Some(url) = &state.external_url {
        return Ok(url.trim_end_matches('/').to_owned());
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation("missing Host header".to_owned()))?;
    Ok(format!("http://{host}"))
}

fn action_plan(
    base: &str,
    repo: &RepoName,
    spec: &ObjectSpec,
    endpoint: &str,
    token: &Token,
) -> ActionPlan {
    ActionPlan {
        href: format!(
            "{base}/{repo}/info/lfs/objects/{endpoint}?oid={oid}&size={size}",
            oid = spec.oid,
            size = spec.size,
        ),
        header: BTreeMap::from([("Authorization".to_owned(), token.auth_header())]),
        expires_at: token.expires_at(),
    }
}
