use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::{TimeDelta, Utc};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tower::ServiceExt;

use lfsvault_core::{Action, RepoSet};
use lfsvault_server::api::{AppState, MEDIA_TYPE, router};
use lfsvault_store::{BlobStore, StoreConfig};
use lfsvault_token::{Token, TokenConfig, TokenStore};

// -- Fixtures -------------------------------------------------------------

const HOST: &str = "lfs.test";

struct Fixture {
    app: axum::Router,
    tokens: Arc<TokenStore>,
    _data_dir: TempDir,
    _token_dir: TempDir,
}

fn fixture() -> Fixture {
    let data_dir = TempDir::new().unwrap();
    let token_dir = TempDir::new().unwrap();

    let repos = RepoSet::from_names(["org/project"]).unwrap();
    let store = BlobStore::new(StoreConfig::new(data_dir.path(), repos));
    let tokens = Arc::new(
        TokenStore::new(&TokenConfig {
            directory: Some(token_dir.path().to_path_buf()),
            ..TokenConfig::default()
        })
        .unwrap(),
    );

    let state = AppState {
        store,
        tokens: Arc::clone(&tokens),
        external_url: None,
    };
    Fixture {
        app: router(state),
        tokens,
        _data_dir: data_dir,
        _token_dir: token_dir,
    }
}

/// Mint and persist a token carrying the given grants, as the SSH
/// authenticator would, and return its Basic header value.
async fn seed_token(fixture: &Fixture, user: &str, grants: &[(&str, Action)]) -> String {
    let mut token = Token::new(user, Utc::now() + TimeDelta::hours(2));
    for (repo, action) in grants {
        token.add_privilege(repo.parse().unwrap(), *action);
    }
    fixture.tokens.persist(&token).await.unwrap();
    token.auth_header()
}

fn oid_for(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn batch_body(operation: &str, oid: &str, size: u64) -> String {
    serde_json::json!({
        "operation": operation,
        "objects": [{ "oid": oid, "size": size }],
    })
    .to_string()
}

fn batch_request(repo: &str, auth: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/{repo}/info/lfs/objects/batch"))
        .header(header::HOST, HOST)
        .header(header::ACCEPT, MEDIA_TYPE)
        .header(header::CONTENT_TYPE, MEDIA_TYPE);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::from(body.to_owned())).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn put_blob(fixture: &Fixture, auth: &str, oid: &str, size: u64, data: &[u8]) -> StatusCode {
    let request = Request::builder()
        .method("PUT")
        .uri(format!(
            "/org/project/info/lfs/objects/upload?oid={oid}&size={size}"
        ))
        .header(header::AUTHORIZATION, auth)
        .body(Body::from(data.to_vec()))
        .unwrap();
    fixture.app.clone().oneshot(request).await.unwrap().status()
}

// -- Batch negotiation ----------------------------------------------------

#[tokio::test]
async fn batch_upload_plans_upload_and_verify_actions() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;
    let oid = oid_for(b"payload");

    let response = fixture
        .app
        .clone()
        .oneshot(batch_request(
            "org/project",
            Some(&auth),
            &batch_body("upload", &oid, 100),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .contains(MEDIA_TYPE)
    );

    let json = json_body(response).await;
    assert_eq!(json["transfer"], "basic");
    let object = &json["objects"][0];
    assert_eq!(object["oid"], oid);
    assert_eq!(object["size"], 100);

    let upload = &object["actions"]["upload"];
    assert_eq!(
        upload["href"],
        format!("http://{HOST}/org/project/info/lfs/objects/upload?oid={oid}&size=100")
    );
    assert_eq!(upload["header"]["Authorization"], auth);
    assert!(upload["expires_at"].as_str().is_some());

    let verify = &object["actions"]["verify"];
    assert_eq!(
        verify["href"],
        format!("http://{HOST}/org/project/info/lfs/objects/verify?oid={oid}&size=100")
    );
    assert!(object["actions"].get("download").is_none());
}

#[tokio::test]
async fn batch_upload_of_existing_object_omits_actions() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;
    let data = b"already stored";
    let oid = oid_for(data);
    assert_eq!(
        put_blob(&fixture, &auth, &oid, data.len() as u64, data).await,
        StatusCode::OK
    );

    let response = fixture
        .app
        .clone()
        .oneshot(batch_request(
            "org/project",
            Some(&auth),
            &batch_body("upload", &oid, data.len() as u64),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let object = &json["objects"][0];
    assert!(object.get("actions").is_none());
    assert!(object.get("error").is_none());
}

#[tokio::test]
async fn batch_upload_with_stale_size_reissues_actions() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;
    let data = b"short";
    let oid = oid_for(data);
    assert_eq!(
        put_blob(&fixture, &auth, &oid, data.len() as u64, data).await,
        StatusCode::OK
    );

    // Declared size differs from what is stored: the client must re-upload.
    let response = fixture
        .app
        .clone()
        .oneshot(batch_request(
            "org/project",
            Some(&auth),
            &batch_body("upload", &oid, 100),
        ))
        .await
        .unwrap();

    let json = json_body(response).await;
    assert!(json["objects"][0]["actions"].get("upload").is_some());
}

#[tokio::test]
async fn batch_download_of_missing_object_reports_per_object_error() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Download)]).await;
    let oid = oid_for(b"never uploaded");

    let response = fixture
        .app
        .clone()
        .oneshot(batch_request(
            "org/project",
            Some(&auth),
            &batch_body("download", &oid, 10),
        ))
        .await
        .unwrap();

    // The batch itself succeeds; the miss is a per-object error.
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let object = &json["objects"][0];
    assert_eq!(object["error"]["code"], 404);
    assert_eq!(object["error"]["message"], "Object does not exist");
    assert!(object.get("actions").is_none());
}

#[tokio::test]
async fn batch_download_of_present_object_plans_download() {
    let fixture = fixture();
    let auth = seed_token(
        &fixture,
        "alice",
        &[
            ("org/project", Action::Upload),
            ("org/project", Action::Download),
        ],
    )
    .await;
    let data = b"downloadable";
    let oid = oid_for(data);
    put_blob(&fixture, &auth, &oid, data.len() as u64, data).await;

    let response = fixture
        .app
        .clone()
        .oneshot(batch_request(
            "org/project",
            Some(&auth),
            &batch_body("download", &oid, data.len() as u64),
        ))
        .await
        .unwrap();

    let json = json_body(response).await;
    let object = &json["objects"][0];
    assert_eq!(
        object["actions"]["download"]["href"],
        format!(
            "http://{HOST}/org/project/info/lfs/objects/download?oid={oid}&size={}",
            data.len()
        )
    );
    assert!(object["actions"].get("upload").is_none());
}

// -- Batch validation & protocol errors -----------------------------------

#[tokio::test]
async fn batch_without_accept_header_is_406() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;

    let request = Request::builder()
        .method("POST")
        .uri("/org/project/info/lfs/objects/batch")
        .header(header::HOST, HOST)
        .header(header::CONTENT_TYPE, MEDIA_TYPE)
        .header(header::AUTHORIZATION, &auth)
        .body(Body::from(batch_body("upload", &oid_for(b"x"), 1)))
        .unwrap();

    let response = fixture.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn batch_with_wrong_content_type_is_406() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;

    let request = Request::builder()
        .method("POST")
        .uri("/org/project/info/lfs/objects/batch")
        .header(header::HOST, HOST)
        .header(header::ACCEPT, MEDIA_TYPE)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, &auth)
        .body(Body::from(batch_body("upload", &oid_for(b"x"), 1)))
        .unwrap();

    let response = fixture.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn media_type_parameters_are_tolerated() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;

    let request = Request::builder()
        .method("POST")
        .uri("/org/project/info/lfs/objects/batch")
        .header(header::HOST, HOST)
        .header(header::ACCEPT, format!("{MEDIA_TYPE}; charset=utf-8"))
        .header(header::CONTENT_TYPE, format!("{MEDIA_TYPE}; charset=utf-8"))
        .header(header::AUTHORIZATION, &auth)
        .body(Body::from(batch_body("upload", &oid_for(b"x"), 1)))
        .unwrap();

    let response = fixture.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_batch_bodies_are_422() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;

    for body in ["", "{ not json", r#"{"operation":"upload","objects":[{"oid":"tooshort","size":1}]}"#] {
        let response = fixture
            .app
            .clone()
            .oneshot(batch_request("org/project", Some(&auth), body))
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            StatusCode::UNPROCESSABLE_ENTITY,
            "body = {body:?}"
        );

        let json = json_body(response).await;
        assert!(json["message"].is_string());
        assert!(json.get("documentation_url").is_some());
        assert!(json.get("request_id").is_some());
    }
}

#[tokio::test]
async fn unknown_batch_operation_is_501() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;

    let response = fixture
        .app
        .clone()
        .oneshot(batch_request(
            "org/project",
            Some(&auth),
            &batch_body("archive", &oid_for(b"x"), 1),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn unknown_repository_is_404() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;

    let response = fixture
        .app
        .clone()
        .oneshot(batch_request(
            "org/elsewhere",
            Some(&auth),
            &batch_body("upload", &oid_for(b"x"), 1),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn traversal_repository_is_404() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;

    let response = fixture
        .app
        .clone()
        .oneshot(batch_request(
            "../../../etc",
            Some(&auth),
            &batch_body("upload", &oid_for(b"x"), 1),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_method_on_batch_is_405() {
    let fixture = fixture();
    let request = Request::builder()
        .method("PUT")
        .uri("/org/project/info/lfs/objects/batch")
        .header(header::HOST, HOST)
        .body(Body::empty())
        .unwrap();
    let response = fixture.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// -- Authentication & authorization ---------------------------------------

#[tokio::test]
async fn missing_credentials_are_401_with_challenge() {
    let fixture = fixture();

    let response = fixture
        .app
        .clone()
        .oneshot(batch_request(
            "org/project",
            None,
            &batch_body("upload", &oid_for(b"x"), 1),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()[header::WWW_AUTHENTICATE],
        "Basic realm=\"Git LFS\""
    );
    assert_eq!(
        response.headers()["LFS-Authenticate"],
        "Basic realm=\"Git LFS\""
    );
}

#[tokio::test]
async fn wrong_password_is_401() {
    let fixture = fixture();
    seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;

    let forged = Token::new("alice", Utc::now() + TimeDelta::hours(2));
    let response = fixture
        .app
        .clone()
        .oneshot(batch_request(
            "org/project",
            Some(&forged.auth_header()),
            &batch_body("upload", &oid_for(b"x"), 1),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_token_is_401_and_reaped() {
    let fixture = fixture();
    let mut token = Token::new("alice", Utc::now() - TimeDelta::seconds(1));
    token.add_privilege("org/project".parse().unwrap(), Action::Upload);
    fixture.tokens.persist(&token).await.unwrap();

    let response = fixture
        .app
        .clone()
        .oneshot(batch_request(
            "org/project",
            Some(&token.auth_header()),
            &batch_body("upload", &oid_for(b"x"), 1),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The expired file was reaped: a fresh load_or_create mints a new token.
    let fresh = fixture.tokens.load_or_create("alice").await.unwrap();
    assert!(!fresh.is_expired());
    assert_ne!(fresh.auth_header(), token.auth_header());
}

#[tokio::test]
async fn upload_without_privilege_is_403() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Download)]).await;

    let response = fixture
        .app
        .clone()
        .oneshot(batch_request(
            "org/project",
            Some(&auth),
            &batch_body("upload", &oid_for(b"x"), 1),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn download_without_privilege_hides_the_repo_as_404() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;

    let response = fixture
        .app
        .clone()
        .oneshot(batch_request(
            "org/project",
            Some(&auth),
            &batch_body("download", &oid_for(b"x"), 1),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// -- Transfers ------------------------------------------------------------

#[tokio::test]
async fn upload_verify_download_roundtrip() {
    let fixture = fixture();
    let auth = seed_token(
        &fixture,
        "alice",
        &[
            ("org/project", Action::Upload),
            ("org/project", Action::Download),
        ],
    )
    .await;
    let data = b"the large file contents";
    let oid = oid_for(data);
    let size = data.len() as u64;

    // Upload per the batch plan.
    assert_eq!(
        put_blob(&fixture, &auth, &oid, size, data).await,
        StatusCode::OK
    );

    // Verify confirms the stored size.
    let verify = Request::builder()
        .method("POST")
        .uri("/org/project/info/lfs/objects/verify")
        .header(header::AUTHORIZATION, &auth)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({ "oid": oid, "size": size }).to_string(),
        ))
        .unwrap();
    let response = fixture.app.clone().oneshot(verify).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Download streams the same bytes back.
    let download = Request::builder()
        .method("GET")
        .uri(format!(
            "/org/project/info/lfs/objects/download?oid={oid}&size={size}"
        ))
        .header(header::AUTHORIZATION, &auth)
        .body(Body::empty())
        .unwrap();
    let response = fixture.app.clone().oneshot(download).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        size.to_string().as_str()
    );
    assert_eq!(response.headers()["X-Accel-Buffering"], "no");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], data);
}

#[tokio::test]
async fn upload_with_wrong_digest_is_422_and_nothing_is_stored() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;
    let oid = oid_for(b"declared content");
    let wrong = b"different content";

    assert_eq!(
        put_blob(&fixture, &auth, &oid, wrong.len() as u64, wrong).await,
        StatusCode::UNPROCESSABLE_ENTITY
    );

    let verify = Request::builder()
        .method("POST")
        .uri("/org/project/info/lfs/objects/verify")
        .header(header::AUTHORIZATION, &auth)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({ "oid": oid, "size": wrong.len() }).to_string(),
        ))
        .unwrap();
    let response = fixture.app.clone().oneshot(verify).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_with_wrong_declared_size_is_422() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;
    let data = b"nine byte";
    let oid = oid_for(data);

    assert_eq!(
        put_blob(&fixture, &auth, &oid, 100, data).await,
        StatusCode::UNPROCESSABLE_ENTITY
    );
}

#[tokio::test]
async fn upload_with_malformed_oid_is_422_before_any_storage() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;

    let non_hex = format!("{}g", &oid_for(b"x")[..63]);
    for bad in ["deadbeef", non_hex.as_str()] {
        let status = put_blob(&fixture, &auth, bad, 1, b"x").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "oid = {bad:?}");
    }
}

#[tokio::test]
async fn download_of_missing_blob_is_404() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Download)]).await;
    let oid = oid_for(b"missing");

    let request = Request::builder()
        .method("GET")
        .uri(format!(
            "/org/project/info/lfs/objects/download?oid={oid}&size=7"
        ))
        .header(header::AUTHORIZATION, &auth)
        .body(Body::empty())
        .unwrap();
    let response = fixture.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn verify_requires_upload_privilege() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Download)]).await;

    let request = Request::builder()
        .method("POST")
        .uri("/org/project/info/lfs/objects/verify")
        .header(header::AUTHORIZATION, &auth)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({ "oid": oid_for(b"x"), "size": 1 }).to_string(),
        ))
        .unwrap();
    let response = fixture.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn transfer_missing_query_parameters_is_422() {
    let fixture = fixture();
    let auth = seed_token(&fixture, "alice", &[("org/project", Action::Upload)]).await;

    let request = Request::builder()
        .method("PUT")
        .uri("/org/project/info/lfs/objects/upload")
        .header(header::AUTHORIZATION, &auth)
        .body(Body::from("data"))
        .unwrap();
    let response = fixture.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn external_url_overrides_host_header() {
    let data_dir = TempDir::new().unwrap();
    let token_dir = TempDir::new().unwrap();
    let repos = RepoSet::from_names(["org/project"]).unwrap();
    let tokens = Arc::new(
        TokenStore::new(&TokenConfig {
            directory: Some(token_dir.path().to_path_buf()),
            ..TokenConfig::default()
        })
        .unwrap(),
    );
    let state = AppState {
        store: BlobStore::new(StoreConfig::new(data_dir.path(), repos)),
        tokens: Arc::clone(&tokens),
        external_url: Some("https://lfs.example.com/".to_owned()),
    };
    let app = router(state);

    let mut token = Token::new("alice", Utc::now() + TimeDelta::hours(2));
    token.add_privilege("org/project".parse().unwrap(), Action::Upload);
    tokens.persist(&token).await.unwrap();

    let oid = oid_for(b"x");
    let response = app
        .oneshot(batch_request(
            "org/project",
            Some(&token.auth_header()),
            &batch_body("upload", &oid, 1),
        ))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(
        json["objects"][0]["actions"]["upload"]["href"],
        format!("https://lfs.example.com/org/project/info/lfs/objects/upload?oid={oid}&size=1")
    );
}
