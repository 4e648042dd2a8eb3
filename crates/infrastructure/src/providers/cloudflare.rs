use std::sync::Arc;

use async_trait::async_trait;
use passage_application::{AccessProvider, ProviderFactory};
use passage_core::{AppError, AppResult};
use passage_domain::{Credential, ProviderConfig, ProviderKind};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use url::Url;

use super::group_directory::{GroupDirectory, GroupMembershipProvider, MembershipChange};
use super::http::{base_url, endpoint, read_json, transport_error};
use super::secret_file::ApiToken;

const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";
const INVITE_ROLE: &str = "Minimal Account Access";
const PAGE_SIZE: &str = "50";
const TOKEN_PURPOSE: &str = "cloudflare token";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    page: u32,
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct Named {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MemberUser {
    email: String,
}

#[derive(Debug, Deserialize)]
struct AccountMember {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user: Option<MemberUser>,
}

impl AccountMember {
    fn email(&self) -> Option<&str> {
        self.user
            .as_ref()
            .map(|user| user.email.as_str())
            .or(self.email.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct CreatedMember {
    id: String,
}

impl<T> Envelope<T> {
    fn into_result(self, operation: &str) -> AppResult<T> {
        if !self.success {
            let errors = self
                .errors
                .iter()
                .map(|error| format!("{} ({})", error.message, error.code))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(AppError::Provider(format!("{operation} failed: {errors}")));
        }

        self.result
            .ok_or_else(|| AppError::Provider(format!("{operation} returned no result")))
    }
}

/// Cloudflare account user group membership over the v4 API.
///
/// Users are identified by email. Users missing from the account are invited
/// with the minimal account role before being added to the group.
struct CloudflareDirectory {
    client: reqwest::Client,
    base_url: Url,
    token: ApiToken,
    account_id: String,
    group: String,
    group_id: OnceCell<String>,
}

impl CloudflareDirectory {
    fn account_url(&self, segments: &[&str]) -> AppResult<Url> {
        endpoint(
            &self.base_url,
            ["accounts", self.account_id.as_str()]
                .into_iter()
                .chain(segments.iter().copied()),
        )
    }

    async fn send<T>(&self, request: reqwest::RequestBuilder, operation: &str) -> AppResult<T>
    where
        T: DeserializeOwned,
    {
        let response = request
            .bearer_auth(self.token.value(TOKEN_PURPOSE).await?)
            .send()
            .await
            .map_err(|error| transport_error(operation, error))?;
        let envelope: Envelope<T> = read_json(response, operation).await?;
        envelope.into_result(operation)
    }

    async fn list_all<T>(&self, segments: &[&str], operation: &str) -> AppResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page = 1_u32;

        loop {
            let mut url = self.account_url(segments)?;
            url.query_pairs_mut()
                .append_pair("page", page.to_string().as_str())
                .append_pair("per_page", PAGE_SIZE);

            let response = self
                .client
                .get(url)
                .bearer_auth(self.token.value(TOKEN_PURPOSE).await?)
                .send()
                .await
                .map_err(|error| transport_error(operation, error))?;
            let envelope: Envelope<Vec<T>> = read_json(response, operation).await?;
            let total_pages = envelope
                .result_info
                .as_ref()
                .map_or(0, |info| info.total_pages.max(info.page));
            items.extend(envelope.into_result(operation)?);

            if page >= total_pages {
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    async fn group_id(&self) -> AppResult<&str> {
        self.group_id
            .get_or_try_init(|| async {
                let groups: Vec<Named> = self
                    .list_all(&["iam", "user_groups"], "cloudflare list user groups")
                    .await?;
                groups
                    .into_iter()
                    .find(|group| group.name == self.group)
                    .map(|group| group.id)
                    .ok_or_else(|| {
                        AppError::Provider(format!(
                            "cloudflare user group '{}' not found",
                            self.group
                        ))
                    })
            })
            .await
            .map(String::as_str)
    }

    async fn find_account_member(&self, email: &str) -> AppResult<Option<String>> {
        let members: Vec<AccountMember> = self
            .list_all(&["members"], "cloudflare list account members")
            .await?;

        Ok(members
            .into_iter()
            .find(|member| {
                member
                    .email()
                    .is_some_and(|value| value.eq_ignore_ascii_case(email))
            })
            .map(|member| member.id))
    }

    async fn invite_account_member(&self, email: &str) -> AppResult<String> {
        let roles: Vec<Named> = self
            .list_all(&["roles"], "cloudflare list account roles")
            .await?;
        let role_id = roles
            .into_iter()
            .find(|role| role.name == INVITE_ROLE)
            .map(|role| role.id)
            .ok_or_else(|| {
                AppError::Provider(format!(
                    "role '{INVITE_ROLE}' not found in cloudflare account '{}'",
                    self.account_id
                ))
            })?;

        let created: CreatedMember = self
            .send(
                self.client
                    .post(self.account_url(&["members"])?)
                    .json(&serde_json::json!({ "email": email, "roles": [role_id] })),
                "cloudflare invite account member",
            )
            .await?;

        Ok(created.id)
    }

    async fn group_members(&self) -> AppResult<Vec<AccountMember>> {
        let group_id = self.group_id().await?.to_owned();
        self.list_all(
            &["iam", "user_groups", group_id.as_str(), "members"],
            "cloudflare list group members",
        )
        .await
    }
}

#[async_trait]
impl GroupDirectory for CloudflareDirectory {
    async fn is_member(&self, username: &str) -> AppResult<bool> {
        Ok(self.group_members().await?.iter().any(|member| {
            member
                .email()
                .is_some_and(|email| email.eq_ignore_ascii_case(username))
        }))
    }

    async fn add_member(&self, username: &str) -> AppResult<MembershipChange> {
        let member_id = match self.find_account_member(username).await? {
            Some(member_id) => member_id,
            None => self.invite_account_member(username).await?,
        };
        let group_id = self.group_id().await?.to_owned();

        let _: serde_json::Value = self
            .send(
                self.client
                    .post(self.account_url(&["iam", "user_groups", group_id.as_str(), "members"])?)
                    .json(&serde_json::json!([{ "id": member_id }])),
                "cloudflare add group member",
            )
            .await?;

        Ok(MembershipChange::Applied)
    }

    async fn remove_member(&self, username: &str) -> AppResult<MembershipChange> {
        let Some(member_id) = self.find_account_member(username).await? else {
            return Ok(MembershipChange::Unchanged);
        };
        let group_id = self.group_id().await?.to_owned();

        let _: serde_json::Value = self
            .send(
                self.client.delete(self.account_url(&[
                    "iam",
                    "user_groups",
                    group_id.as_str(),
                    "members",
                    member_id.as_str(),
                ])?),
                "cloudflare remove group member",
            )
            .await?;

        Ok(MembershipChange::Applied)
    }

    async fn list_members(&self) -> AppResult<Vec<String>> {
        Ok(self
            .group_members()
            .await?
            .iter()
            .filter_map(|member| member.email().map(str::to_owned))
            .collect())
    }
}

/// Builds Cloudflare user group providers.
///
/// Parameters `accountID` and `group`. Credential key `token`, or
/// `credentialsfile` naming a file that holds it.
pub struct CloudflareProviderFactory {
    client: reqwest::Client,
}

impl CloudflareProviderFactory {
    /// Creates a factory sharing one HTTP client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ProviderFactory for CloudflareProviderFactory {
    fn build(
        &self,
        config: &ProviderConfig,
        credential: &Credential,
    ) -> AppResult<Arc<dyn AccessProvider>> {
        let directory = CloudflareDirectory {
            client: self.client.clone(),
            base_url: base_url(config, DEFAULT_BASE_URL)?,
            token: ApiToken::from_credential(credential)?,
            account_id: config.required_parameter("accountID")?.to_owned(),
            group: config.required_parameter("group")?.to_owned(),
            group_id: OnceCell::new(),
        };

        Ok(Arc::new(GroupMembershipProvider::from_config(
            ProviderKind::Cloudflare,
            config,
            Arc::new(directory),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use passage_application::{ProviderFactory, ProviderStatusWriter};
    use passage_core::AppError;
    use passage_domain::{
        AccessRequest, AccessRequestDetails, AccessRoleRef, Credential, ProviderAction,
        ProviderConfig,
    };
    use serde_json::{Map, json};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::CloudflareProviderFactory;

    fn page(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "errors": [],
            "result": result,
            "result_info": { "page": 1, "total_pages": 1 }
        }))
    }

    #[tokio::test]
    async fn grant_invites_unknown_users_before_adding_them() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/acc-1/iam/user_groups"))
            .respond_with(page(json!([{ "id": "grp-1", "name": "sre" }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/acc-1/iam/user_groups/grp-1/members"))
            .respond_with(page(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/acc-1/members"))
            .respond_with(page(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/acc-1/roles"))
            .respond_with(page(json!([
                { "id": "role-admin", "name": "Administrator" },
                { "id": "role-min", "name": "Minimal Account Access" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/accounts/acc-1/members"))
            .and(body_json(json!({ "email": "alice@example.com", "roles": ["role-min"] })))
            .respond_with(page(json!({ "id": "mem-9" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/accounts/acc-1/iam/user_groups/grp-1/members"))
            .and(body_json(json!([{ "id": "mem-9" }])))
            .respond_with(page(json!([{ "id": "mem-9" }])))
            .expect(1)
            .mount(&server)
            .await;

        let config = ProviderConfig::new(
            "cloudflare",
            "cloudflare",
            false,
            "cf",
            BTreeMap::from([
                ("accountID".to_owned(), "acc-1".to_owned()),
                ("group".to_owned(), "sre".to_owned()),
                ("username".to_owned(), "alice@example.com".to_owned()),
                ("baseurl".to_owned(), server.uri()),
            ]),
        );
        let credential = Credential::new(
            "cf",
            BTreeMap::from([("token".to_owned(), "cf-token".to_owned())]),
        );
        let provider = CloudflareProviderFactory::new(reqwest::Client::new())
            .build(&config, &credential)
            .unwrap_or_else(|error| panic!("construct failed: {error}"));
        let mut request = AccessRequest::new(
            AccessRoleRef::new("sre"),
            AccessRequestDetails::new("", Map::new(), "1h"),
            Utc::now(),
        );
        assert!(request.admit().is_ok());

        let status = ProviderStatusWriter::detached("cloudflare");
        assert!(provider.grant_access(&request, &status).await.is_ok());
        assert_eq!(status.current_action().await, Some(ProviderAction::Granted));
    }

    #[tokio::test]
    async fn token_file_is_read_when_the_provider_first_calls_out() {
        let server = MockServer::start().await;
        let config = ProviderConfig::new(
            "cloudflare",
            "cloudflare",
            false,
            "cf",
            BTreeMap::from([
                ("accountID".to_owned(), "acc-1".to_owned()),
                ("group".to_owned(), "sre".to_owned()),
                ("username".to_owned(), "alice@example.com".to_owned()),
                ("baseurl".to_owned(), server.uri()),
            ]),
        );
        let credential = Credential::new(
            "cf",
            BTreeMap::from([(
                "credentialsfile".to_owned(),
                "/nonexistent/passage/cloudflare-token".to_owned(),
            )]),
        );

        let provider = CloudflareProviderFactory::new(reqwest::Client::new())
            .build(&config, &credential)
            .unwrap_or_else(|error| panic!("construct failed: {error}"));
        let mut request = AccessRequest::new(
            AccessRoleRef::new("sre"),
            AccessRequestDetails::new("", Map::new(), "1h"),
            Utc::now(),
        );
        assert!(request.admit().is_ok());

        let status = ProviderStatusWriter::detached("cloudflare");
        let result = provider.grant_access(&request, &status).await;
        assert!(matches!(
            result,
            Err(AppError::Configuration(message)) if message.contains("cloudflare token")
        ));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}
