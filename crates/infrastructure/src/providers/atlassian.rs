use std::sync::Arc;

use async_trait::async_trait;
use passage_application::{AccessProvider, ProviderFactory};
use passage_core::{AppError, AppResult};
use passage_domain::{Credential, ProviderConfig, ProviderKind};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::group_directory::{GroupDirectory, GroupMembershipProvider, MembershipChange};
use super::http::{endpoint, ensure_success, parse_url, read_json, transport_error};

const PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtlassianUser {
    account_id: String,
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

impl AtlassianUser {
    fn matches(&self, username: &str) -> bool {
        self.account_id == username
            || self.email_address.as_deref() == Some(username)
            || self.display_name.as_deref() == Some(username)
    }

    fn label(self) -> String {
        self.email_address
            .or(self.display_name)
            .unwrap_or(self.account_id)
    }
}

#[derive(Debug, Deserialize)]
struct AtlassianGroup {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupMembersPage {
    #[serde(default)]
    values: Vec<AtlassianUser>,
    #[serde(default = "default_last")]
    is_last: bool,
}

fn default_last() -> bool {
    true
}

/// Atlassian site group membership over the Jira REST v3 API.
struct AtlassianDirectory {
    client: reqwest::Client,
    api_url: Url,
    email: String,
    token: String,
    group: String,
}

impl AtlassianDirectory {
    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .basic_auth(self.email.as_str(), Some(self.token.as_str()))
    }

    async fn account_id(&self, username: &str) -> AppResult<String> {
        let mut url = endpoint(&self.api_url, ["user", "search"])?;
        url.query_pairs_mut().append_pair("query", username);

        let response = self
            .get(url)
            .send()
            .await
            .map_err(|error| transport_error("atlassian user lookup", error))?;
        let users: Vec<AtlassianUser> = read_json(response, "atlassian user lookup").await?;

        users
            .into_iter()
            .find(|user| user.matches(username))
            .map(|user| user.account_id)
            .ok_or_else(|| AppError::Provider(format!("atlassian user '{username}' not found")))
    }

    fn membership_url(&self, account_id: Option<&str>) -> AppResult<Url> {
        let mut url = endpoint(&self.api_url, ["group", "user"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("groupname", self.group.as_str());
            if let Some(account_id) = account_id {
                query.append_pair("accountId", account_id);
            }
        }

        Ok(url)
    }
}

#[async_trait]
impl GroupDirectory for AtlassianDirectory {
    async fn is_member(&self, username: &str) -> AppResult<bool> {
        let account_id = self.account_id(username).await?;
        let mut url = endpoint(&self.api_url, ["user", "groups"])?;
        url.query_pairs_mut()
            .append_pair("accountId", account_id.as_str());

        let response = self
            .get(url)
            .send()
            .await
            .map_err(|error| transport_error("atlassian user groups", error))?;
        let groups: Vec<AtlassianGroup> = read_json(response, "atlassian user groups").await?;

        Ok(groups.iter().any(|group| group.name == self.group))
    }

    async fn add_member(&self, username: &str) -> AppResult<MembershipChange> {
        let account_id = self.account_id(username).await?;
        let response = self
            .client
            .post(self.membership_url(None)?)
            .basic_auth(self.email.as_str(), Some(self.token.as_str()))
            .json(&serde_json::json!({ "accountId": account_id }))
            .send()
            .await
            .map_err(|error| transport_error("atlassian add member", error))?;

        ensure_success(response, "atlassian add member").await?;
        Ok(MembershipChange::Applied)
    }

    async fn remove_member(&self, username: &str) -> AppResult<MembershipChange> {
        let account_id = self.account_id(username).await?;
        let response = self
            .client
            .delete(self.membership_url(Some(account_id.as_str()))?)
            .basic_auth(self.email.as_str(), Some(self.token.as_str()))
            .send()
            .await
            .map_err(|error| transport_error("atlassian remove member", error))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(MembershipChange::Unchanged);
        }

        ensure_success(response, "atlassian remove member").await?;
        Ok(MembershipChange::Applied)
    }

    async fn list_members(&self) -> AppResult<Vec<String>> {
        let mut members = Vec::new();
        let mut start_at = 0_usize;

        loop {
            let mut url = endpoint(&self.api_url, ["group", "member"])?;
            url.query_pairs_mut()
                .append_pair("groupname", self.group.as_str())
                .append_pair("includeInactiveUsers", "false")
                .append_pair("startAt", start_at.to_string().as_str())
                .append_pair("maxResults", PAGE_SIZE.to_string().as_str());

            let response = self
                .get(url)
                .send()
                .await
                .map_err(|error| transport_error("atlassian list members", error))?;
            let page: GroupMembersPage = read_json(response, "atlassian list members").await?;
            let fetched = page.values.len();
            members.extend(page.values.into_iter().map(AtlassianUser::label));

            if page.is_last || fetched == 0 {
                break;
            }
            start_at += fetched;
        }

        Ok(members)
    }
}

/// Builds Atlassian group providers.
///
/// Parameters `group` and `siteurl`; credential fields `email` and `token`.
pub struct AtlassianProviderFactory {
    client: reqwest::Client,
}

impl AtlassianProviderFactory {
    /// Creates a factory sharing one HTTP client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ProviderFactory for AtlassianProviderFactory {
    fn build(
        &self,
        config: &ProviderConfig,
        credential: &Credential,
    ) -> AppResult<Arc<dyn AccessProvider>> {
        let site_url = parse_url(config, config.required_parameter("siteurl")?)?;
        let directory = AtlassianDirectory {
            client: self.client.clone(),
            api_url: endpoint(&site_url, ["rest", "api", "3"])?,
            email: credential.require("email")?.to_owned(),
            token: credential.require("token")?.to_owned(),
            group: config.required_parameter("group")?.to_owned(),
        };

        Ok(Arc::new(GroupMembershipProvider::from_config(
            ProviderKind::Atlassian,
            config,
            Arc::new(directory),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use passage_application::{ProviderFactory, ProviderStatusWriter};
    use passage_core::AppError;
    use passage_domain::{
        AccessRequest, AccessRequestDetails, AccessRoleRef, Credential, ProviderConfig,
    };
    use serde_json::{Map, json};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::AtlassianProviderFactory;

    fn credential() -> Credential {
        Credential::new(
            "jira",
            BTreeMap::from([
                ("email".to_owned(), "bot@example.com".to_owned()),
                ("token".to_owned(), "atl-token".to_owned()),
            ]),
        )
    }

    #[test]
    fn site_url_is_required() {
        let config = ProviderConfig::new(
            "jira",
            "atlassian",
            false,
            "jira",
            BTreeMap::from([("group".to_owned(), "jira-users".to_owned())]),
        );
        let result =
            AtlassianProviderFactory::new(reqwest::Client::new()).build(&config, &credential());
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[tokio::test]
    async fn grant_posts_account_id_to_group() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/user/search"))
            .and(query_param("query", "alice@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "accountId": "acc-1", "emailAddress": "alice@example.com" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/user/groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "confluence-users" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/api/3/group/user"))
            .and(query_param("groupname", "jira-users"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({ "name": "jira-users" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let config = ProviderConfig::new(
            "jira",
            "atlassian",
            false,
            "jira",
            BTreeMap::from([
                ("group".to_owned(), "jira-users".to_owned()),
                ("siteurl".to_owned(), server.uri()),
                ("username".to_owned(), "alice@example.com".to_owned()),
            ]),
        );
        let provider = AtlassianProviderFactory::new(reqwest::Client::new())
            .build(&config, &credential())
            .unwrap_or_else(|error| panic!("construct failed: {error}"));
        let mut request = AccessRequest::new(
            AccessRoleRef::new("jira"),
            AccessRequestDetails::new("", Map::new(), "1h"),
            chrono::Utc::now(),
        );
        assert!(request.admit().is_ok());

        let status = ProviderStatusWriter::detached("jira");
        assert!(provider.grant_access(&request, &status).await.is_ok());
    }
}
