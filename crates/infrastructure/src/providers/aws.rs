use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_identitystore::Client;
use aws_sdk_identitystore::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_identitystore::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_identitystore::types::{AlternateIdentifier, MemberId, UniqueAttribute};
use aws_smithy_types::Document;
use passage_application::{AccessProvider, ProviderFactory};
use passage_core::{AppError, AppResult};
use passage_domain::{Credential, ProviderConfig, ProviderKind};
use tokio::sync::OnceCell;
use tracing::debug;

use super::group_directory::{GroupDirectory, GroupMembershipProvider, MembershipChange};
use super::http::parse_url;


const CREDENTIAL_PROVIDER_NAME: &str = "passage-credential";

fn service_error<E>(action: &str, error: &SdkError<E>) -> AppError
where
    E: ProvideErrorMetadata,
{
    AppError::Provider(format!(
        "aws {action} failed with {}: {}",
        error.code().unwrap_or("unknown error"),
        error.message().unwrap_or("no message")
    ))
}

fn unique_attribute(path: &str, value: &str) -> AppResult<AlternateIdentifier> {
    UniqueAttribute::builder()
        .attribute_path(path)
        .attribute_value(Document::String(value.to_owned()))
        .build()
        .map(AlternateIdentifier::UniqueAttribute)
        .map_err(|error| AppError::Internal(format!("failed to build aws {path} lookup: {error}")))
}

/// Where the identity store client takes its signing keys from.
#[derive(Clone)]
enum KeySource {
    /// Keys stored on the credential.
    Static(Credentials),
    /// The default AWS chain: environment, profile, then instance metadata.
    Ambient,
}

/// Client settings resolved at construction; the SDK client is built on
/// first use because loading ambient keys is async.
#[derive(Clone)]
struct ClientSettings {
    region: String,
    endpoint: Option<String>,
    keys: KeySource,
}

impl ClientSettings {
    async fn connect(&self) -> Client {
        let region = Region::new(self.region.clone());
        match &self.keys {
            KeySource::Static(credentials) => {
                let mut builder = aws_sdk_identitystore::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .region(region)
                    .credentials_provider(credentials.clone());
                if let Some(endpoint) = &self.endpoint {
                    builder = builder.endpoint_url(endpoint.as_str());
                }
                Client::from_conf(builder.build())
            }
            KeySource::Ambient => {
                let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
                if let Some(endpoint) = &self.endpoint {
                    loader = loader.endpoint_url(endpoint.as_str());
                }
                Client::new(&loader.load().await)
            }
        }
    }
}

/// IAM Identity Center group membership through the identity store API.
struct IdentityStoreDirectory {
    settings: ClientSettings,
    client: OnceCell<Client>,
    identity_store_id: String,
    group: String,
    group_id: OnceCell<String>,
}

impl IdentityStoreDirectory {
    async fn client(&self) -> &Client {
        self.client
            .get_or_init(|| async {
                debug!(region = %self.settings.region, "building aws identity store client");
                self.settings.connect().await
            })
            .await
    }

    async fn group_id(&self) -> AppResult<&str> {
        self.group_id
            .get_or_try_init(|| async {
                let output = self
                    .client()
                    .await
                    .get_group_id()
                    .identity_store_id(self.identity_store_id.as_str())
                    .alternate_identifier(unique_attribute("displayName", self.group.as_str())?)
                    .send()
                    .await
                    .map_err(|error| service_error("GetGroupId", &error))?;
                Ok::<_, AppError>(output.group_id().to_owned())
            })
            .await
            .map(String::as_str)
    }

    async fn user_id(&self, username: &str) -> AppResult<String> {
        let output = self
            .client()
            .await
            .get_user_id()
            .identity_store_id(self.identity_store_id.as_str())
            .alternate_identifier(unique_attribute("userName", username)?)
            .send()
            .await
            .map_err(|error| service_error("GetUserId", &error))?;
        Ok(output.user_id().to_owned())
    }

    async fn membership_id(&self, username: &str) -> AppResult<Option<String>> {
        let group_id = self.group_id().await?.to_owned();
        let user_id = self.user_id(username).await?;

        let outcome = self
            .client()
            .await
            .get_group_membership_id()
            .identity_store_id(self.identity_store_id.as_str())
            .group_id(group_id)
            .member_id(MemberId::UserId(user_id))
            .send()
            .await;

        match outcome {
            Ok(output) => Ok(Some(output.membership_id().to_owned())),
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|fault| fault.is_resource_not_found_exception()) =>
            {
                Ok(None)
            }
            Err(error) => Err(service_error("GetGroupMembershipId", &error)),
        }
    }
}

#[async_trait]
impl GroupDirectory for IdentityStoreDirectory {
    async fn is_member(&self, username: &str) -> AppResult<bool> {
        Ok(self.membership_id(username).await?.is_some())
    }

    async fn add_member(&self, username: &str) -> AppResult<MembershipChange> {
        let group_id = self.group_id().await?.to_owned();
        let user_id = self.user_id(username).await?;

        let outcome = self
            .client()
            .await
            .create_group_membership()
            .identity_store_id(self.identity_store_id.as_str())
            .group_id(group_id)
            .member_id(MemberId::UserId(user_id))
            .send()
            .await;

        match outcome {
            Ok(_) => Ok(MembershipChange::Applied),
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|fault| fault.is_conflict_exception()) =>
            {
                Ok(MembershipChange::Unchanged)
            }
            Err(error) => Err(service_error("CreateGroupMembership", &error)),
        }
    }

    async fn remove_member(&self, username: &str) -> AppResult<MembershipChange> {
        let Some(membership_id) = self.membership_id(username).await? else {
            return Ok(MembershipChange::Unchanged);
        };

        let outcome = self
            .client()
            .await
            .delete_group_membership()
            .identity_store_id(self.identity_store_id.as_str())
            .membership_id(membership_id)
            .send()
            .await;

        match outcome {
            Ok(_) => Ok(MembershipChange::Applied),
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|fault| fault.is_resource_not_found_exception()) =>
            {
                Ok(MembershipChange::Unchanged)
            }
            Err(error) => Err(service_error("DeleteGroupMembership", &error)),
        }
    }

    async fn list_members(&self) -> AppResult<Vec<String>> {
        let group_id = self.group_id().await?.to_owned();
        let client = self.client().await;
        let mut user_ids = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = client
                .list_group_memberships()
                .identity_store_id(self.identity_store_id.as_str())
                .group_id(group_id.as_str())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|error| service_error("ListGroupMemberships", &error))?;

            user_ids.extend(page.group_memberships().iter().filter_map(|membership| {
                match membership.member_id() {
                    Some(MemberId::UserId(user_id)) => Some(user_id.clone()),
                    _ => None,
                }
            }));

            match page.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_owned()),
                _ => break,
            }
        }

        let mut usernames = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            let user = client
                .describe_user()
                .identity_store_id(self.identity_store_id.as_str())
                .user_id(user_id.as_str())
                .send()
                .await
                .map_err(|error| service_error("DescribeUser", &error))?;
            let Some(user_name) = user.user_name() else {
                return Err(AppError::Provider(format!(
                    "aws DescribeUser returned no user name for '{user_id}'"
                )));
            };
            usernames.push(user_name.to_owned());
        }

        Ok(usernames)
    }
}

/// Builds AWS identity store group providers.
///
/// Credential keys `identitystoreid` and `region`, plus optionally the pair
/// `accesskeyid` and `secretaccesskey`. Without the pair the default AWS
/// credential chain signs requests. Parameter `group`, with `endpoint`
/// overriding the regional URL.
#[derive(Debug, Default)]
pub struct AwsProviderFactory;

impl AwsProviderFactory {
    /// Creates the factory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn key_source(credential: &Credential) -> AppResult<KeySource> {
    let access_key_id = credential.get_string("accesskeyid");
    let secret_access_key = credential.get_string("secretaccesskey");

    match (access_key_id.is_empty(), secret_access_key.is_empty()) {
        (true, true) => Ok(KeySource::Ambient),
        (false, false) => Ok(KeySource::Static(Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            CREDENTIAL_PROVIDER_NAME,
        ))),
        _ => Err(AppError::Configuration(format!(
            "credential '{}' must set both accesskeyid and secretaccesskey or neither",
            credential.name()
        ))),
    }
}

impl ProviderFactory for AwsProviderFactory {
    fn build(
        &self,
        config: &ProviderConfig,
        credential: &Credential,
    ) -> AppResult<Arc<dyn AccessProvider>> {
        let endpoint = match config.parameter("endpoint").map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(parse_url(config, raw)?.to_string()),
            _ => None,
        };

        let directory = IdentityStoreDirectory {
            settings: ClientSettings {
                region: credential.require("region")?.to_owned(),
                endpoint,
                keys: key_source(credential)?,
            },
            client: OnceCell::new(),
            identity_store_id: credential.require("identitystoreid")?.to_owned(),
            group: config.required_parameter("group")?.to_owned(),
            group_id: OnceCell::new(),
        };

        Ok(Arc::new(GroupMembershipProvider::from_config(
            ProviderKind::Aws,
            config,
            Arc::new(directory),
        )?))
    }
}
