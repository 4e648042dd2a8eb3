use std::sync::Arc;

use async_trait::async_trait;
use passage_application::{AccessProvider, ProviderFactory};
use passage_core::{AppError, AppResult};
use passage_domain::{Credential, ProviderConfig, ProviderKind};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::OnceCell;
use url::Url;

use super::group_directory::{GroupDirectory, GroupMembershipProvider, MembershipChange};
use super::http::{base_url, endpoint, ensure_success, read_json, transport_error};

const DEFAULT_BASE_URL: &str = "https://gitlab.com/api/v4";
const DEFAULT_ACCESS_LEVEL: u8 = 30;
const PAGE_SIZE: &str = "100";

#[derive(Debug, Deserialize)]
struct GitlabGroup {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct GitlabUser {
    id: u64,
    username: String,
}

/// Maps a `level` parameter to a GitLab access level.
fn parse_access_level(config: &ProviderConfig) -> AppResult<u8> {
    let Some(level) = config
        .parameter("level")
        .map(str::trim)
        .filter(|level| !level.is_empty())
    else {
        return Ok(DEFAULT_ACCESS_LEVEL);
    };

    match level.to_ascii_lowercase().as_str() {
        "guest" => Ok(10),
        "reporter" => Ok(20),
        "developer" => Ok(30),
        "maintainer" => Ok(40),
        "owner" => Ok(50),
        numeric => numeric.parse::<u8>().map_err(|_| {
            AppError::Configuration(format!(
                "provider '{}' has invalid gitlab access level '{level}'",
                config.name()
            ))
        }),
    }
}

/// GitLab group membership over the REST v4 API.
struct GitlabDirectory {
    client: reqwest::Client,
    base_url: Url,
    token: String,
    group: String,
    access_level: u8,
    group_id: OnceCell<u64>,
}

impl GitlabDirectory {
    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("PRIVATE-TOKEN", self.token.as_str())
    }

    async fn group_id(&self) -> AppResult<u64> {
        self.group_id
            .get_or_try_init(|| async {
                let url = endpoint(&self.base_url, ["groups", self.group.as_str()])?;
                let response = self
                    .request(reqwest::Method::GET, url)
                    .send()
                    .await
                    .map_err(|error| transport_error("gitlab group lookup", error))?;
                if response.status() == StatusCode::NOT_FOUND {
                    return Err(AppError::Provider(format!(
                        "gitlab group '{}' not found",
                        self.group
                    )));
                }

                let group: GitlabGroup = read_json(response, "gitlab group lookup").await?;
                Ok(group.id)
            })
            .await
            .copied()
    }

    async fn user_id(&self, username: &str) -> AppResult<u64> {
        let mut url = endpoint(&self.base_url, ["users"])?;
        url.query_pairs_mut().append_pair("username", username);

        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|error| transport_error("gitlab user lookup", error))?;
        let users: Vec<GitlabUser> = read_json(response, "gitlab user lookup").await?;

        users
            .into_iter()
            .find(|user| user.username.eq_ignore_ascii_case(username))
            .map(|user| user.id)
            .ok_or_else(|| AppError::Provider(format!("gitlab user '{username}' not found")))
    }

    async fn member_url(&self, username: &str) -> AppResult<Url> {
        let group_id = self.group_id().await?.to_string();
        let user_id = self.user_id(username).await?.to_string();
        endpoint(
            &self.base_url,
            ["groups", group_id.as_str(), "members", user_id.as_str()],
        )
    }
}

#[async_trait]
impl GroupDirectory for GitlabDirectory {
    async fn is_member(&self, username: &str) -> AppResult<bool> {
        let url = self.member_url(username).await?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|error| transport_error("gitlab membership lookup", error))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        ensure_success(response, "gitlab membership lookup").await?;
        Ok(true)
    }

    async fn add_member(&self, username: &str) -> AppResult<MembershipChange> {
        let group_id = self.group_id().await?.to_string();
        let user_id = self.user_id(username).await?;
        let url = endpoint(&self.base_url, ["groups", group_id.as_str(), "members"])?;

        let response = self
            .request(reqwest::Method::POST, url)
            .json(&serde_json::json!({
                "user_id": user_id,
                "access_level": self.access_level,
            }))
            .send()
            .await
            .map_err(|error| transport_error("gitlab add member", error))?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(MembershipChange::Unchanged);
        }

        ensure_success(response, "gitlab add member").await?;
        Ok(MembershipChange::Applied)
    }

    async fn remove_member(&self, username: &str) -> AppResult<MembershipChange> {
        let url = self.member_url(username).await?;
        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .map_err(|error| transport_error("gitlab remove member", error))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(MembershipChange::Unchanged);
        }

        ensure_success(response, "gitlab remove member").await?;
        Ok(MembershipChange::Applied)
    }

    async fn list_members(&self) -> AppResult<Vec<String>> {
        let group_id = self.group_id().await?.to_string();
        let mut usernames = Vec::new();
        let mut page = String::from("1");

        loop {
            let mut url = endpoint(&self.base_url, ["groups", group_id.as_str(), "members"])?;
            url.query_pairs_mut()
                .append_pair("per_page", PAGE_SIZE)
                .append_pair("page", page.as_str());

            let response = self
                .request(reqwest::Method::GET, url)
                .send()
                .await
                .map_err(|error| transport_error("gitlab list members", error))?;
            let next_page = response
                .headers()
                .get("x-next-page")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned);

            let members: Vec<GitlabUser> = read_json(response, "gitlab list members").await?;
            usernames.extend(members.into_iter().map(|member| member.username));

            match next_page {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(usernames)
    }
}

/// Builds GitLab group providers. Requires credential field `token`.
pub struct GitlabProviderFactory {
    client: reqwest::Client,
}

impl GitlabProviderFactory {
    /// Creates a factory sharing one HTTP client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ProviderFactory for GitlabProviderFactory {
    fn build(
        &self,
        config: &ProviderConfig,
        credential: &Credential,
    ) -> AppResult<Arc<dyn AccessProvider>> {
        let directory = GitlabDirectory {
            client: self.client.clone(),
            base_url: base_url(config, DEFAULT_BASE_URL)?,
            token: credential.require("token")?.to_owned(),
            group: config.required_parameter("group")?.to_owned(),
            access_level: parse_access_level(config)?,
            group_id: OnceCell::new(),
        };

        Ok(Arc::new(GroupMembershipProvider::from_config(
            ProviderKind::Gitlab,
            config,
            Arc::new(directory),
        )?))
    }
}

#[cfg(test)]
mod tests;
