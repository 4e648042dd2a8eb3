use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use passage_application::{AccessProvider, ProviderFactory};
use passage_core::{AppError, AppResult};
use passage_domain::{Credential, ProviderConfig, ProviderKind};
use tokio::sync::Mutex;

use super::group_directory::{
    ExpiryCheck, GroupDirectory, GroupMembershipProvider, MembershipChange,
};

type Groups = Arc<Mutex<BTreeMap<String, BTreeSet<String>>>>;

/// Which calls a mock binding should fail, from its `fail` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureMode {
    None,
    Grant,
    Revoke,
    Always,
}

impl FailureMode {
    fn parse(config: &ProviderConfig) -> AppResult<Self> {
        match config.parameter("fail").map(str::trim).unwrap_or_default() {
            "" => Ok(Self::None),
            "grant" => Ok(Self::Grant),
            "revoke" => Ok(Self::Revoke),
            "always" => Ok(Self::Always),
            other => Err(AppError::Configuration(format!(
                "provider '{}' has unknown fail mode '{other}'",
                config.name()
            ))),
        }
    }
}

struct MockDirectory {
    groups: Groups,
    group: String,
    failure: FailureMode,
}

impl MockDirectory {
    fn check(&self, operation: &str, fails: bool) -> AppResult<()> {
        if fails || self.failure == FailureMode::Always {
            return Err(AppError::Provider(format!(
                "simulated {operation} failure for group '{}'",
                self.group
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl GroupDirectory for MockDirectory {
    async fn is_member(&self, username: &str) -> AppResult<bool> {
        self.check("lookup", false)?;
        Ok(self
            .groups
            .lock()
            .await
            .get(self.group.as_str())
            .is_some_and(|members| members.contains(username)))
    }

    async fn add_member(&self, username: &str) -> AppResult<MembershipChange> {
        self.check("grant", self.failure == FailureMode::Grant)?;
        let added = self
            .groups
            .lock()
            .await
            .entry(self.group.clone())
            .or_default()
            .insert(username.to_owned());

        Ok(if added {
            MembershipChange::Applied
        } else {
            MembershipChange::Unchanged
        })
    }

    async fn remove_member(&self, username: &str) -> AppResult<MembershipChange> {
        self.check("revoke", self.failure == FailureMode::Revoke)?;
        let removed = self
            .groups
            .lock()
            .await
            .get_mut(self.group.as_str())
            .is_some_and(|members| members.remove(username));

        Ok(if removed {
            MembershipChange::Applied
        } else {
            MembershipChange::Unchanged
        })
    }

    async fn list_members(&self) -> AppResult<Vec<String>> {
        self.check("list", false)?;
        Ok(self
            .groups
            .lock()
            .await
            .get(self.group.as_str())
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}

/// Builds in-process providers sharing one membership table.
#[derive(Clone, Default)]
pub struct MockProviderFactory {
    groups: Groups,
}

impl MockProviderFactory {
    /// Creates a factory with an empty membership table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current members of one group.
    pub async fn members(&self, group: &str) -> Vec<String> {
        self.groups
            .lock()
            .await
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl ProviderFactory for MockProviderFactory {
    fn build(
        &self,
        config: &ProviderConfig,
        _credential: &Credential,
    ) -> AppResult<Arc<dyn AccessProvider>> {
        let directory = MockDirectory {
            groups: self.groups.clone(),
            group: config.required_parameter("group")?.to_owned(),
            failure: FailureMode::parse(config)?,
        };

        Ok(Arc::new(
            GroupMembershipProvider::from_config(ProviderKind::Mock, config, Arc::new(directory))?
                .with_expiry_check(ExpiryCheck::AlwaysExpired),
        ))
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
    use serde_json::Map;

    use super::MockProviderFactory;

    fn config(fail: Option<&str>) -> ProviderConfig {
        let mut parameters = BTreeMap::from([
            ("group".to_owned(), "sandbox".to_owned()),
            ("username".to_owned(), "alice".to_owned()),
        ]);
        if let Some(fail) = fail {
            parameters.insert("fail".to_owned(), fail.to_owned());
        }

        ProviderConfig::new("sandbox", "mock", false, "", parameters)
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

    fn empty_credential() -> Credential {
        Credential::new("", BTreeMap::new())
    }

    #[tokio::test]
    async fn grant_and_revoke_update_the_shared_membership_table() {
        let factory = MockProviderFactory::new();
        let provider = factory
            .build(&config(None), &empty_credential())
            .unwrap_or_else(|error| panic!("{error}"));
        let request = request();

        let status = ProviderStatusWriter::detached("sandbox");
        assert!(provider.grant_access(&request, &status).await.is_ok());
        assert_eq!(factory.members("sandbox").await, vec!["alice".to_owned()]);

        let rebuilt = factory
            .build(&config(None), &empty_credential())
            .unwrap_or_else(|error| panic!("{error}"));
        assert!(rebuilt.revoke_access(&request, &status).await.is_ok());
        assert_eq!(status.current_action().await, Some(ProviderAction::Revoked));
        assert!(factory.members("sandbox").await.is_empty());
        assert!(matches!(rebuilt.is_access_expired(&request).await, Ok(true)));
    }

    #[tokio::test]
    async fn fail_parameter_simulates_provider_errors() {
        let factory = MockProviderFactory::new();
        let provider = factory
            .build(&config(Some("grant")), &empty_credential())
            .unwrap_or_else(|error| panic!("{error}"));
        let status = ProviderStatusWriter::detached("sandbox");

        let result = provider.grant_access(&request(), &status).await;

        assert!(matches!(result, Err(AppError::Provider(_))));
        assert_eq!(status.current_action().await, Some(ProviderAction::Error));
        assert!(
            provider
                .revoke_access(&request(), &ProviderStatusWriter::detached("sandbox"))
                .await
                .is_ok()
        );
    }

    #[test]
    fn unknown_fail_mode_is_a_configuration_error() {
        let result =
            MockProviderFactory::new().build(&config(Some("sometimes")), &empty_credential());
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }
}
