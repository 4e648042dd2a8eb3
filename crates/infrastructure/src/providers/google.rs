use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use passage_application::{AccessProvider, ProviderFactory};
use passage_core::{AppError, AppResult};
use passage_domain::{Credential, ProviderConfig, ProviderKind};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::group_directory::{GroupDirectory, GroupMembershipProvider, MembershipChange};
use super::http::{base_url, endpoint, ensure_success, read_json, transport_error};

mod service_account;

use service_account::ServiceAccountTokens;

const DEFAULT_BASE_URL: &str = "https://admin.googleapis.com/admin/directory/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembersPage {
    #[serde(default)]
    members: Vec<Member>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Member {
    email: String,
}

/// How Directory API calls are authorized.
enum GoogleAuth {
    /// A fixed bearer token, used as an override.
    Token(String),
    /// Tokens minted from a service account key file.
    ServiceAccount(ServiceAccountTokens),
}

impl GoogleAuth {
    async fn bearer(&self) -> AppResult<String> {
        match self {
            Self::Token(token) => Ok(token.clone()),
            Self::ServiceAccount(tokens) => tokens.bearer().await,
        }
    }
}

/// Google Workspace group membership over the Admin SDK Directory API.
struct GoogleDirectory {
    client: reqwest::Client,
    base_url: Url,
    auth: GoogleAuth,
    group: String,
}

impl GoogleDirectory {
    fn members_url(&self) -> AppResult<Url> {
        endpoint(&self.base_url, ["groups", self.group.as_str(), "members"])
    }

    fn member_url(&self, username: &str) -> AppResult<Url> {
        endpoint(
            &self.base_url,
            ["groups", self.group.as_str(), "members", username],
        )
    }
}

#[async_trait]
impl GroupDirectory for GoogleDirectory {
    async fn is_member(&self, username: &str) -> AppResult<bool> {
        let response = self
            .client
            .get(self.member_url(username)?)
            .bearer_auth(self.auth.bearer().await?)
            .send()
            .await
            .map_err(|error| transport_error("google membership lookup", error))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        ensure_success(response, "google membership lookup").await?;
        Ok(true)
    }

    async fn add_member(&self, username: &str) -> AppResult<MembershipChange> {
        let response = self
            .client
            .post(self.members_url()?)
            .bearer_auth(self.auth.bearer().await?)
            .json(&serde_json::json!({ "email": username, "role": "MEMBER" }))
            .send()
            .await
            .map_err(|error| transport_error("google add member", error))?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(MembershipChange::Unchanged);
        }

        ensure_success(response, "google add member").await?;
        Ok(MembershipChange::Applied)
    }

    async fn remove_member(&self, username: &str) -> AppResult<MembershipChange> {
        let response = self
            .client
            .delete(self.member_url(username)?)
            .bearer_auth(self.auth.bearer().await?)
            .send()
            .await
            .map_err(|error| transport_error("google remove member", error))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(MembershipChange::Unchanged);
        }

        ensure_success(response, "google remove member").await?;
        Ok(MembershipChange::Applied)
    }

    async fn list_members(&self) -> AppResult<Vec<String>> {
        let mut emails = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.members_url()?;
            if let Some(token) = page_token.as_deref() {
                url.query_pairs_mut().append_pair("pageToken", token);
            }

            let response = self
                .client
                .get(url)
                .bearer_auth(self.auth.bearer().await?)
                .send()
                .await
                .map_err(|error| transport_error("google list members", error))?;
            let page: MembersPage = read_json(response, "google list members").await?;
            emails.extend(page.members.into_iter().map(|member| member.email));

            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(emails)
    }
}

/// Builds Google group providers.
///
/// Credential key `credentialsfile` names a service account key file; the
/// optional `subject` is the admin user impersonated through domain-wide
/// delegation. A non-empty `token` overrides both with a fixed bearer token.
pub struct GoogleProviderFactory {
    client: reqwest::Client,
}

impl GoogleProviderFactory {
    /// Creates a factory sharing one HTTP client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn google_auth(client: &reqwest::Client, credential: &Credential) -> AppResult<GoogleAuth> {
    let token = credential.get_string("token").trim();
    if !token.is_empty() {
        return Ok(GoogleAuth::Token(token.to_owned()));
    }

    let key_path = credential.require("credentialsfile").map_err(|_| {
        AppError::Configuration(format!(
            "credential '{}' needs either 'credentialsfile' or 'token'",
            credential.name()
        ))
    })?;
    let subject = Some(credential.get_string("subject").trim())
        .filter(|subject| !subject.is_empty())
        .map(str::to_owned);

    Ok(GoogleAuth::ServiceAccount(ServiceAccountTokens::new(
        client.clone(),
        PathBuf::from(key_path),
        subject,
    )))
}

impl ProviderFactory for GoogleProviderFactory {
    fn build(
        &self,
        config: &ProviderConfig,
        credential: &Credential,
    ) -> AppResult<Arc<dyn AccessProvider>> {
        let directory = GoogleDirectory {
            client: self.client.clone(),
            base_url: base_url(config, DEFAULT_BASE_URL)?,
            auth: google_auth(&self.client, credential)?,
            group: config.required_parameter("group")?.to_owned(),
        };

        Ok(Arc::new(GroupMembershipProvider::from_config(
            ProviderKind::Google,
            config,
            Arc::new(directory),
        )?))
    }
}
