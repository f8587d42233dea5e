//! Google directory client against a mocked token endpoint and Admin SDK.

use group_authz::{GoogleDirectory, GroupMembersFetcher, PluginError, ServiceAccountKey};
use rust_common::{HttpConfig, PlatformError};
use serde_json::json;
use url::Url;
use wiremock::matchers::{
    body_string_contains, header, method, path, query_param, query_param_is_missing,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_KEY_PEM: &str = include_str!("fixtures/service_account_key.pem");
const ACCESS_TOKEN: &str = "ya29.test-token";
const MEMBERS_PATH: &str = "/admin/directory/v1/groups/eng@example.com/members";

fn service_account(server: &MockServer) -> ServiceAccountKey {
    let raw = json!({
        "type": "service_account",
        "client_email": "authz@project.iam.gserviceaccount.com",
        "private_key_id": "kid-1",
        "private_key": TEST_KEY_PEM,
        "token_uri": format!("{}/token", server.uri()),
    });
    ServiceAccountKey::from_json(raw.to_string().as_bytes()).unwrap()
}

fn directory(server: &MockServer) -> GoogleDirectory {
    GoogleDirectory::new(
        service_account(server),
        Url::parse(&server.uri()).unwrap(),
        &HttpConfig::default(),
    )
    .unwrap()
}

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
        ))
        .and(body_string_contains("assertion="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": ACCESS_TOKEN,
            "token_type": "Bearer",
            "expires_in": 3600,
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn member(email: &str) -> serde_json::Value {
    json!({"id": format!("id-{email}"), "email": email, "status": "ACTIVE", "type": "USER"})
}

#[tokio::test]
async fn test_lists_all_pages_deduplicated_and_sorted() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .and(query_param("includeDerivedMembership", "true"))
        .and(query_param_is_missing("pageToken"))
        .and(header("authorization", format!("Bearer {ACCESS_TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "admin#directory#members",
            "members": [member("carol@example.com"), member("alice@example.com")],
            "nextPageToken": "page-2",
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .and(query_param("includeDerivedMembership", "true"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "members": [member("bob@example.com"), member("alice@example.com")],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let members = directory(&server)
        .group_members("eng@example.com")
        .await
        .unwrap();

    let emails: Vec<&str> = members.iter().map(|m| m.email.as_str()).collect();
    assert_eq!(emails, vec!["alice@example.com", "bob@example.com", "carol@example.com"]);
    assert_eq!(members[0].kind, "USER");
    assert_eq!(members[0].status, "ACTIVE");
}

#[tokio::test]
async fn test_empty_group() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kind": "admin#directory#members"})))
        .mount(&server)
        .await;

    let members = directory(&server)
        .group_members("eng@example.com")
        .await
        .unwrap();
    assert!(members.is_empty());
}

#[tokio::test]
async fn test_access_token_reused_across_lookups() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"members": [member("a@example.com")]})))
        .expect(2)
        .mount(&server)
        .await;

    let directory = directory(&server);
    directory.group_members("eng@example.com").await.unwrap();
    directory.group_members("eng@example.com").await.unwrap();
}

#[tokio::test]
async fn test_oversized_token_lifetime_is_capped() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": ACCESS_TOKEN,
            "token_type": "Bearer",
            "expires_in": u64::MAX,
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"members": [member("a@example.com")]})))
        .expect(2)
        .mount(&server)
        .await;

    let directory = directory(&server);
    directory.group_members("eng@example.com").await.unwrap();
    directory.group_members("eng@example.com").await.unwrap();
}

#[tokio::test]
async fn test_directory_error_status_surfaces() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("Not Authorized to access this resource/api"))
        .mount(&server)
        .await;

    let err = directory(&server)
        .group_members("eng@example.com")
        .await
        .unwrap_err();

    match &err {
        PluginError::Directory { group, source } => {
            assert_eq!(group, "eng@example.com");
            assert!(matches!(source, PlatformError::Status { status: 403, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = directory(&server)
        .group_members("eng@example.com")
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.code(), "DIRECTORY_ERROR");
}

#[tokio::test]
async fn test_token_exchange_failure_surfaces() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = directory(&server)
        .group_members("eng@example.com")
        .await
        .unwrap_err();
    assert!(
        matches!(err, PluginError::Directory { source: PlatformError::Status { status: 400, .. }, .. }),
        "{err}"
    );
    assert!(err.to_string().contains("invalid_grant"));
}

#[tokio::test]
async fn test_malformed_members_page_surfaces() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = directory(&server)
        .group_members("eng@example.com")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PluginError::Directory { source: PlatformError::Serialization(_), .. }
    ));
}

#[test]
fn test_service_account_key_file_loads() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("key.json");
    let raw = json!({
        "client_email": "authz@project.iam.gserviceaccount.com",
        "private_key": TEST_KEY_PEM,
    });
    std::fs::write(&path, raw.to_string()).unwrap();

    let key = ServiceAccountKey::load(&path).unwrap();
    assert_eq!(key.client_email, "authz@project.iam.gserviceaccount.com");
    assert_eq!(key.token_uri, "https://oauth2.googleapis.com/token");

    let directory = GoogleDirectory::new(
        key,
        Url::parse("https://admin.googleapis.com").unwrap(),
        &HttpConfig::default(),
    )
    .unwrap();
    assert_eq!(directory.service_account(), "authz@project.iam.gserviceaccount.com");
}

#[test]
fn test_missing_key_file_is_credentials_error() {
    let err = ServiceAccountKey::load(std::path::Path::new("/nonexistent/key.json")).unwrap_err();
    assert_eq!(err.code(), "CREDENTIALS_INVALID");
}
