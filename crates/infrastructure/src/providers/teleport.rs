use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use passage_application::{AccessProvider, ProviderFactory};
use passage_core::{AppError, AppResult};
use passage_domain::{Credential, ProviderConfig, ProviderKind};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::group_directory::{
    ExpiryCheck, GroupDirectory, GroupMembershipProvider, MembershipChange,
};

const DEFAULT_TCTL: &str = "tctl";
const ROLE_DESCRIPTION: &str = "Passage created role";
const DEFAULT_ROLE_VERSION: &str = "v7";

/// Runs `tctl` subcommands against one Teleport cluster.
#[async_trait]
pub trait TeleportCli: Send + Sync {
    /// Runs one subcommand and returns its standard output.
    async fn run(&self, args: &[String], stdin: Option<&str>) -> AppResult<String>;
}

/// [`TeleportCli`] backed by the `tctl` binary and an identity file.
pub struct TctlCli {
    program: PathBuf,
    auth_server: String,
    identity_file: String,
}

impl TctlCli {
    /// Creates a CLI runner for one auth server.
    #[must_use]
    pub fn new(
        program: impl Into<PathBuf>,
        auth_server: impl Into<String>,
        identity_file: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            auth_server: auth_server.into(),
            identity_file: identity_file.into(),
        }
    }
}

#[async_trait]
impl TeleportCli for TctlCli {
    async fn run(&self, args: &[String], stdin: Option<&str>) -> AppResult<String> {
        let mut child = Command::new(&self.program)
            .arg(format!("--auth-server={}", self.auth_server))
            .arg(format!("--identity={}", self.identity_file))
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| {
                AppError::Provider(format!(
                    "failed to start '{}': {error}",
                    self.program.display()
                ))
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await.map_err(|error| {
                AppError::Provider(format!("failed to write tctl input: {error}"))
            })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|error| AppError::Provider(format!("tctl did not finish: {error}")))?;
        if !output.status.success() {
            return Err(AppError::Provider(format!(
                "tctl {} exited with {}: {}",
                args.first().map_or("", String::as_str),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|error| AppError::Provider(format!("tctl wrote invalid utf-8: {error}")))
    }
}

#[derive(Debug, Deserialize)]
struct UserMetadata {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct UserSpec {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UserResource {
    metadata: UserMetadata,
    #[serde(default)]
    spec: UserSpec,
}

fn parse_users(output: &str) -> AppResult<Vec<UserResource>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str::<Vec<UserResource>>(trimmed)
        .or_else(|_| serde_json::from_str::<UserResource>(trimmed).map(|user| vec![user]))
        .map_err(|error| AppError::Provider(format!("unreadable tctl user output: {error}")))
}

/// Builds the role resource upserted before a grant.
fn role_resource(name: &str, definition: &str) -> AppResult<String> {
    let parsed: Value = serde_yaml::from_str(definition).map_err(|error| {
        AppError::Configuration(format!("groupDefinition for role '{name}' is invalid: {error}"))
    })?;
    let mut resource = match parsed {
        Value::Mapping(mapping) => mapping,
        Value::Null => Mapping::new(),
        _ => {
            return Err(AppError::Configuration(format!(
                "groupDefinition for role '{name}' must be a mapping"
            )));
        }
    };

    let mut metadata = Mapping::new();
    metadata.insert("name".into(), name.into());
    metadata.insert("description".into(), ROLE_DESCRIPTION.into());

    resource.insert("kind".into(), "role".into());
    resource.insert("metadata".into(), Value::Mapping(metadata));
    if !resource.contains_key("version") {
        resource.insert("version".into(), DEFAULT_ROLE_VERSION.into());
    }

    serde_yaml::to_string(&Value::Mapping(resource))
        .map_err(|error| AppError::Internal(format!("failed to encode role '{name}': {error}")))
}

/// Teleport role assignment.
///
/// The binding's `group` is a comma separated role list; a user is a member
/// when it holds every one of them.
struct TeleportDirectory {
    cli: Arc<dyn TeleportCli>,
    roles: BTreeSet<String>,
    role_definition: Option<String>,
}

impl TeleportDirectory {
    fn new(
        cli: Arc<dyn TeleportCli>,
        group: &str,
        definition: Option<&str>,
    ) -> AppResult<Self> {
        let roles: BTreeSet<String> = group
            .split(',')
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .map(str::to_owned)
            .collect();
        if roles.is_empty() {
            return Err(AppError::Configuration(
                "teleport group must name at least one role".to_owned(),
            ));
        }

        let role_definition = match definition.map(str::trim) {
            Some(definition) if !definition.is_empty() => {
                let mut names = roles.iter();
                let (Some(name), None) = (names.next(), names.next()) else {
                    return Err(AppError::Configuration(
                        "groupDefinition needs a single teleport role in group".to_owned(),
                    ));
                };
                Some(role_resource(name, definition)?)
            }
            _ => None,
        };

        Ok(Self {
            cli,
            roles,
            role_definition,
        })
    }

    async fn user_roles(&self, username: &str) -> AppResult<BTreeSet<String>> {
        let output = self
            .cli
            .run(
                &[
                    "get".to_owned(),
                    format!("user/{username}"),
                    "--format=json".to_owned(),
                ],
                None,
            )
            .await?;

        parse_users(&output)?
            .into_iter()
            .find(|user| user.metadata.name == username)
            .map(|user| user.spec.roles.into_iter().collect())
            .ok_or_else(|| AppError::Provider(format!("teleport user '{username}' not found")))
    }

    async fn set_roles(&self, username: &str, roles: &BTreeSet<String>) -> AppResult<()> {
        let joined = roles.iter().map(String::as_str).collect::<Vec<_>>().join(",");
        self.cli
            .run(
                &[
                    "users".to_owned(),
                    "update".to_owned(),
                    username.to_owned(),
                    format!("--set-roles={joined}"),
                ],
                None,
            )
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl GroupDirectory for TeleportDirectory {
    async fn ensure_group(&self) -> AppResult<()> {
        let Some(resource) = self.role_definition.as_deref() else {
            return Ok(());
        };

        self.cli
            .run(
                &["create".to_owned(), "--force".to_owned()],
                Some(resource),
            )
            .await
            .map(|_| ())
    }

    async fn is_member(&self, username: &str) -> AppResult<bool> {
        Ok(self.roles.is_subset(&self.user_roles(username).await?))
    }

    async fn add_member(&self, username: &str) -> AppResult<MembershipChange> {
        let current = self.user_roles(username).await?;
        let updated: BTreeSet<String> = current.union(&self.roles).cloned().collect();
        if updated == current {
            return Ok(MembershipChange::Unchanged);
        }

        self.set_roles(username, &updated).await?;
        Ok(MembershipChange::Applied)
    }

    async fn remove_member(&self, username: &str) -> AppResult<MembershipChange> {
        let current = self.user_roles(username).await?;
        let updated: BTreeSet<String> = current.difference(&self.roles).cloned().collect();
        if updated == current {
            return Ok(MembershipChange::Unchanged);
        }

        self.set_roles(username, &updated).await?;
        Ok(MembershipChange::Applied)
    }

    async fn list_members(&self) -> AppResult<Vec<String>> {
        let output = self
            .cli
            .run(&["get".to_owned(), "users".to_owned(), "--format=json".to_owned()], None)
            .await?;

        Ok(parse_users(&output)?
            .into_iter()
            .filter(|user| self.roles.iter().all(|role| user.spec.roles.contains(role)))
            .map(|user| user.metadata.name)
            .collect())
    }
}

/// Builds Teleport role providers.
///
/// Credential keys `hostname`, `credentialsfile` and optional `tctlpath`;
/// parameters `group` and optional `groupDefinition`.
#[derive(Debug, Default)]
pub struct TeleportProviderFactory;

impl TeleportProviderFactory {
    /// Creates a factory running the `tctl` binary.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ProviderFactory for TeleportProviderFactory {
    fn build(
        &self,
        config: &ProviderConfig,
        credential: &Credential,
    ) -> AppResult<Arc<dyn AccessProvider>> {
        let program = match credential.get_string("tctlpath").trim() {
            "" => DEFAULT_TCTL,
            path => path,
        };
        let cli = TctlCli::new(
            program,
            credential.require("hostname")?,
            credential.require("credentialsfile")?,
        );

        teleport_provider(config, Arc::new(cli))
    }
}

fn teleport_provider(
    config: &ProviderConfig,
    cli: Arc<dyn TeleportCli>,
) -> AppResult<Arc<dyn AccessProvider>> {
    let directory = TeleportDirectory::new(
        cli,
        config.required_parameter("group")?,
        config.parameter("groupDefinition"),
    )?;

    Ok(Arc::new(
        GroupMembershipProvider::from_config(ProviderKind::Teleport, config, Arc::new(directory))?
            .with_expiry_check(ExpiryCheck::AlwaysExpired),
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;
    use passage_application::{AccessProvider, ProviderFactory, ProviderStatusWriter};
    use passage_core::{AppError, AppResult};
    use passage_domain::{
        AccessRequest, AccessRequestDetails, AccessRoleRef, Credential, ProviderAction,
        ProviderConfig,
    };
    use serde_json::{Map, json};

    use super::{TeleportCli, TeleportProviderFactory, role_resource, teleport_provider};
    use crate::providers::group_directory::ALREADY_IN_GROUP;

    /// In-process stand-in for a cluster's user table.
    #[derive(Default)]
    struct FakeTctl {
        users: Mutex<BTreeMap<String, BTreeSet<String>>>,
        calls: Mutex<Vec<(Vec<String>, Option<String>)>>,
    }

    impl FakeTctl {
        fn with_user(name: &str, roles: &[&str]) -> Self {
            let fake = Self::default();
            fake.users
                .lock()
                .unwrap_or_else(|error| panic!("poisoned: {error}"))
                .insert(
                    name.to_owned(),
                    roles.iter().map(|role| (*role).to_owned()).collect(),
                );
            fake
        }

        fn roles_of(&self, name: &str) -> Vec<String> {
            self.users
                .lock()
                .unwrap_or_else(|error| panic!("poisoned: {error}"))
                .get(name)
                .map(|roles| roles.iter().cloned().collect())
                .unwrap_or_default()
        }

        fn calls(&self) -> Vec<(Vec<String>, Option<String>)> {
            self.calls
                .lock()
                .unwrap_or_else(|error| panic!("poisoned: {error}"))
                .clone()
        }
    }

    fn user_json(name: &str, roles: &BTreeSet<String>) -> serde_json::Value {
        json!({ "kind": "user", "metadata": { "name": name }, "spec": { "roles": roles } })
    }

    #[async_trait]
    impl TeleportCli for FakeTctl {
        async fn run(&self, args: &[String], stdin: Option<&str>) -> AppResult<String> {
            self.calls
                .lock()
                .unwrap_or_else(|error| panic!("poisoned: {error}"))
                .push((args.to_vec(), stdin.map(str::to_owned)));
            let mut users = self
                .users
                .lock()
                .unwrap_or_else(|error| panic!("poisoned: {error}"));

            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            match args.as_slice() {
                ["get", "users", "--format=json"] => Ok(json!(users
                    .iter()
                    .map(|(name, roles)| user_json(name, roles))
                    .collect::<Vec<_>>())
                .to_string()),
                ["get", target, "--format=json"] => {
                    let name = target.trim_start_matches("user/");
                    users
                        .get(name)
                        .map(|roles| json!([user_json(name, roles)]).to_string())
                        .ok_or_else(|| AppError::Provider(format!("user {name} not found")))
                }
                ["users", "update", name, roles] => {
                    let roles = roles.trim_start_matches("--set-roles=");
                    users.insert(
                        (*name).to_owned(),
                        roles
                            .split(',')
                            .filter(|role| !role.is_empty())
                            .map(str::to_owned)
                            .collect(),
                    );
                    Ok(String::new())
                }
                ["create", "--force"] => Ok(String::new()),
                other => Err(AppError::Provider(format!("unexpected tctl call: {other:?}"))),
            }
        }
    }

    fn binding(group: &str, definition: Option<&str>) -> ProviderConfig {
        let mut parameters = BTreeMap::from([
            ("group".to_owned(), group.to_owned()),
            ("username".to_owned(), "alice".to_owned()),
        ]);
        if let Some(definition) = definition {
            parameters.insert("groupDefinition".to_owned(), definition.to_owned());
        }
        ProviderConfig::new("teleport", "teleport", false, "teleport", parameters)
    }

    fn request() -> AccessRequest {
        let mut request = AccessRequest::new(
            AccessRoleRef::new("prod"),
            AccessRequestDetails::new("", Map::new(), "1h"),
            Utc::now(),
        );
        assert!(request.admit().is_ok());
        request
    }

    fn provider(
        fake: &Arc<FakeTctl>,
        group: &str,
        definition: Option<&str>,
    ) -> Arc<dyn AccessProvider> {
        teleport_provider(&binding(group, definition), fake.clone())
            .unwrap_or_else(|error| panic!("construct failed: {error}"))
    }

    #[tokio::test]
    async fn grant_adds_every_listed_role_once() {
        let fake = Arc::new(FakeTctl::with_user("alice", &["access"]));
        let provider = provider(&fake, "prod-read, prod-write", None);

        let status = ProviderStatusWriter::detached("teleport");
        assert!(provider.grant_access(&request(), &status).await.is_ok());
        assert_eq!(status.current_action().await, Some(ProviderAction::Granted));
        assert_eq!(
            fake.roles_of("alice"),
            vec!["access".to_owned(), "prod-read".to_owned(), "prod-write".to_owned()]
        );

        let again = ProviderStatusWriter::detached("teleport");
        assert!(provider.grant_access(&request(), &again).await.is_ok());
        assert_eq!(
            again.current().await.map(|status| status.details),
            Some(ALREADY_IN_GROUP.to_owned())
        );
    }

    #[tokio::test]
    async fn revoke_keeps_unrelated_roles() {
        let fake = Arc::new(FakeTctl::with_user("alice", &["access", "prod-read"]));
        let provider = provider(&fake, "prod-read", None);

        let status = ProviderStatusWriter::detached("teleport");
        assert!(provider.revoke_access(&request(), &status).await.is_ok());
        assert_eq!(status.current_action().await, Some(ProviderAction::Revoked));
        assert_eq!(fake.roles_of("alice"), vec!["access".to_owned()]);
    }

    #[tokio::test]
    async fn grant_upserts_role_definition_first() {
        let fake = Arc::new(FakeTctl::with_user("alice", &[]));
        let provider = provider(
            &fake,
            "prod-admin",
            Some("spec:\n  allow:\n    logins: [root]\n"),
        );

        let status = ProviderStatusWriter::detached("teleport");
        assert!(provider.grant_access(&request(), &status).await.is_ok());

        let calls = fake.calls();
        let (args, stdin) = &calls[0];
        assert_eq!(args, &vec!["create".to_owned(), "--force".to_owned()]);
        let stdin = stdin.clone().unwrap_or_default();
        assert!(stdin.contains("name: prod-admin"));
        assert!(stdin.contains("Passage created role"));
        assert_eq!(fake.roles_of("alice"), vec!["prod-admin".to_owned()]);
    }

    #[tokio::test]
    async fn unknown_user_fails_and_access_always_reads_expired() {
        let fake = Arc::new(FakeTctl::default());
        let provider = provider(&fake, "prod-read", None);

        let status = ProviderStatusWriter::detached("teleport");
        let result = provider.grant_access(&request(), &status).await;
        assert!(matches!(result, Err(AppError::Provider(_))));
        assert_eq!(status.current_action().await, Some(ProviderAction::Error));

        assert!(matches!(provider.is_access_expired(&request()).await, Ok(true)));
    }

    #[tokio::test]
    async fn list_returns_users_holding_all_roles() {
        let fake = Arc::new(FakeTctl::with_user("alice", &["prod-read", "prod-write"]));
        fake.users
            .lock()
            .unwrap_or_else(|error| panic!("poisoned: {error}"))
            .insert("bob".to_owned(), BTreeSet::from(["prod-read".to_owned()]));
        let provider = provider(&fake, "prod-read,prod-write", None);

        let members = provider
            .list_users_with_access(&AccessRoleRef::new("prod"))
            .await
            .unwrap_or_else(|error| panic!("list failed: {error}"));
        assert_eq!(members, vec!["alice".to_owned()]);
    }

    #[test]
    fn definition_requires_a_single_role_and_valid_yaml() {
        let fake: Arc<FakeTctl> = Arc::new(FakeTctl::default());
        assert!(matches!(
            teleport_provider(&binding("a,b", Some("spec: {}")), fake.clone()),
            Err(AppError::Configuration(_))
        ));
        assert!(matches!(
            role_resource("a", "- not\n- a mapping"),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn factory_requires_cluster_credentials() {
        let credential = Credential::new(
            "teleport",
            BTreeMap::from([("hostname".to_owned(), "teleport.example.com:443".to_owned())]),
        );
        let result = TeleportProviderFactory::new().build(&binding("prod-read", None), &credential);
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }
}
