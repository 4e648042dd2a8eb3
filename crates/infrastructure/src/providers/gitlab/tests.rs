use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use passage_application::{AccessProvider, ProviderFactory, ProviderStatusWriter};
use passage_core::AppError;
use passage_domain::{
    AccessRequest, AccessRequestDetails, AccessRoleRef, Credential, ProviderAction,
    ProviderConfig,
};
use serde_json::{Map, json};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::GitlabProviderFactory;
use crate::providers::group_directory::{ALREADY_IN_GROUP, ALREADY_REMOVED_FROM_GROUP};

fn binding(server: &MockServer) -> ProviderConfig {
    ProviderConfig::new(
        "gitlab",
        "gitlab",
        false,
        "gitlab-bot",
        BTreeMap::from([
            ("group".to_owned(), "platform".to_owned()),
            ("username".to_owned(), "alice".to_owned()),
            ("level".to_owned(), "maintainer".to_owned()),
            ("baseurl".to_owned(), format!("{}/api/v4", server.uri())),
        ]),
    )
}

fn credential() -> Credential {
    Credential::new(
        "gitlab-bot",
        BTreeMap::from([("token".to_owned(), "glpat-test".to_owned())]),
    )
}

fn provider(server: &MockServer) -> Arc<dyn AccessProvider> {
    GitlabProviderFactory::new(reqwest::Client::new())
        .build(&binding(server), &credential())
        .unwrap_or_else(|error| panic!("construct failed: {error}"))
}

fn request() -> AccessRequest {
    let mut request = AccessRequest::new(
        AccessRoleRef::new("dev"),
        AccessRequestDetails::new("", Map::new(), "1h"),
        Utc::now(),
    );
    assert!(request.admit().is_ok());
    request
}

async fn mount_lookups(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v4/groups/platform"))
        .and(header("PRIVATE-TOKEN", "glpat-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7 })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v4/users"))
        .and(query_param("username", "alice"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "id": 42, "username": "alice" }])),
        )
        .mount(server)
        .await;
}

async fn mount_membership(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/api/v4/groups/7/members/42"))
        .respond_with(
            ResponseTemplate::new(status).set_body_json(json!({ "id": 42, "username": "alice" })),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn grant_adds_missing_member_with_configured_level() {
    let server = MockServer::start().await;
    mount_lookups(&server).await;
    mount_membership(&server, 404).await;
    Mock::given(method("POST"))
        .and(path("/api/v4/groups/7/members"))
        .and(body_json(json!({ "user_id": 42, "access_level": 40 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 42 })))
        .expect(1)
        .mount(&server)
        .await;

    let status = ProviderStatusWriter::detached("gitlab");
    let result = provider(&server).grant_access(&request(), &status).await;

    assert!(result.is_ok());
    let recorded = status
        .current()
        .await
        .unwrap_or_else(|| panic!("no status recorded"));
    assert_eq!(recorded.action, ProviderAction::Granted);
    assert_eq!(recorded.details, "group: platform");
}

#[tokio::test]
async fn grant_for_existing_member_skips_the_add_call() {
    let server = MockServer::start().await;
    mount_lookups(&server).await;
    mount_membership(&server, 200).await;
    Mock::given(method("POST"))
        .and(path("/api/v4/groups/7/members"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let status = ProviderStatusWriter::detached("gitlab");
    assert!(
        provider(&server)
            .grant_access(&request(), &status)
            .await
            .is_ok()
    );
    assert_eq!(
        status.current().await.map(|status| status.details),
        Some(ALREADY_IN_GROUP.to_owned())
    );
}

#[tokio::test]
async fn conflict_on_add_counts_as_already_in_group() {
    let server = MockServer::start().await;
    mount_lookups(&server).await;
    mount_membership(&server, 404).await;
    Mock::given(method("POST"))
        .and(path("/api/v4/groups/7/members"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({ "message": "Member already exists" })),
        )
        .mount(&server)
        .await;

    let status = ProviderStatusWriter::detached("gitlab");
    assert!(
        provider(&server)
            .grant_access(&request(), &status)
            .await
            .is_ok()
    );
    let recorded = status
        .current()
        .await
        .unwrap_or_else(|| panic!("no status recorded"));
    assert_eq!(recorded.action, ProviderAction::Granted);
    assert_eq!(recorded.details, ALREADY_IN_GROUP);
}

#[tokio::test]
async fn revoke_removes_member_once_and_is_idempotent() {
    let server = MockServer::start().await;
    mount_lookups(&server).await;
    mount_membership(&server, 200).await;
    Mock::given(method("DELETE"))
        .and(path("/api/v4/groups/7/members/42"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let status = ProviderStatusWriter::detached("gitlab");
    assert!(
        provider(&server)
            .revoke_access(&request(), &status)
            .await
            .is_ok()
    );
    assert_eq!(status.current_action().await, Some(ProviderAction::Revoked));

    let gone = MockServer::start().await;
    mount_lookups(&gone).await;
    mount_membership(&gone, 404).await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&gone)
        .await;

    let again = ProviderStatusWriter::detached("gitlab");
    assert!(provider(&gone).revoke_access(&request(), &again).await.is_ok());
    let recorded = again
        .current()
        .await
        .unwrap_or_else(|| panic!("no status recorded"));
    assert_eq!(recorded.action, ProviderAction::Revoked);
    assert_eq!(recorded.details, ALREADY_REMOVED_FROM_GROUP);
}

#[tokio::test]
async fn server_error_is_recorded_and_returned() {
    let server = MockServer::start().await;
    mount_lookups(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v4/groups/7/members/42"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let status = ProviderStatusWriter::detached("gitlab");
    let result = provider(&server).grant_access(&request(), &status).await;

    assert!(
        matches!(result, Err(AppError::Provider(message)) if message.contains("upstream down"))
    );
    let recorded = status
        .current()
        .await
        .unwrap_or_else(|| panic!("no status recorded"));
    assert_eq!(recorded.action, ProviderAction::Error);
    assert!(recorded.error.is_some());
}

#[tokio::test]
async fn list_users_follows_pagination() {
    let server = MockServer::start().await;
    mount_lookups(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v4/groups/7/members"))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-next-page", "2")
                .set_body_json(json!([{ "id": 1, "username": "alice" }])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/groups/7/members"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-next-page", "")
                .set_body_json(json!([{ "id": 2, "username": "bob" }])),
        )
        .mount(&server)
        .await;

    let users = provider(&server)
        .list_users_with_access(&AccessRoleRef::new("dev"))
        .await
        .unwrap_or_else(|error| panic!("list failed: {error}"));

    assert_eq!(users, vec!["alice".to_owned(), "bob".to_owned()]);
}

#[test]
fn missing_token_is_a_configuration_error() {
    let config = ProviderConfig::new(
        "gitlab",
        "gitlab",
        false,
        "gitlab-bot",
        BTreeMap::from([("group".to_owned(), "platform".to_owned())]),
    );
    let result = GitlabProviderFactory::new(reqwest::Client::new())
        .build(&config, &Credential::new("gitlab-bot", BTreeMap::new()));

    assert!(matches!(result, Err(AppError::Configuration(_))));
}
