use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use passage_core::{AppError, AppResult};
use passage_domain::{
    AccessRequest, AccessRoleRef, Credential, ProviderAction, ProviderConfig, ProviderKind,
    ProviderStatus,
};
use tokio::sync::Mutex;

use crate::CredentialResolver;

/// Capability every external access backend implements.
///
/// Grant and revoke check current membership first and report success with a
/// no-op detail when the desired state already holds, so both are safe to retry.
#[async_trait]
pub trait AccessProvider: Send + Sync {
    /// Grants the requester access and records the outcome on `status`.
    async fn grant_access(
        &self,
        request: &AccessRequest,
        status: &ProviderStatusWriter,
    ) -> AppResult<()>;

    /// Revokes the requester's access and records the outcome on `status`.
    async fn revoke_access(
        &self,
        request: &AccessRequest,
        status: &ProviderStatusWriter,
    ) -> AppResult<()>;

    /// Lists usernames currently holding the access the binding manages.
    async fn list_users_with_access(&self, role: &AccessRoleRef) -> AppResult<Vec<String>>;

    /// Reports whether the provider considers the request's access expired.
    async fn is_access_expired(&self, request: &AccessRequest) -> AppResult<bool>;
}

/// Constructs provider instances for one backend kind.
///
/// Missing credential fields or parameters are configuration errors.
pub trait ProviderFactory: Send + Sync {
    /// Builds a provider for one binding.
    fn build(
        &self,
        config: &ProviderConfig,
        credential: &Credential,
    ) -> AppResult<Arc<dyn AccessProvider>>;
}

/// Mutex-guarded per-provider status map shared by one fan-out.
#[derive(Clone, Default)]
pub struct StatusBoard {
    entries: Arc<Mutex<BTreeMap<String, ProviderStatus>>>,
}

impl StatusBoard {
    /// Returns a writer bound to one provider binding name.
    #[must_use]
    pub fn writer(&self, provider_name: impl Into<String>) -> ProviderStatusWriter {
        ProviderStatusWriter {
            provider_name: provider_name.into(),
            board: self.clone(),
        }
    }

    /// Returns the entry recorded for one binding.
    pub async fn get(&self, provider_name: &str) -> Option<ProviderStatus> {
        self.entries.lock().await.get(provider_name).cloned()
    }

    /// Removes and returns every entry.
    pub async fn drain(&self) -> BTreeMap<String, ProviderStatus> {
        std::mem::take(&mut *self.entries.lock().await)
    }
}

/// Handle a provider uses to record its own outcome.
#[derive(Clone)]
pub struct ProviderStatusWriter {
    provider_name: String,
    board: StatusBoard,
}

impl ProviderStatusWriter {
    /// Returns a writer on a private board, for callers outside a fan-out.
    #[must_use]
    pub fn detached(provider_name: impl Into<String>) -> Self {
        StatusBoard::default().writer(provider_name)
    }

    /// Returns the binding name this writer records for.
    #[must_use]
    pub fn provider_name(&self) -> &str {
        self.provider_name.as_str()
    }

    /// Records a granted outcome.
    pub async fn granted(&self, details: impl Into<String>) {
        self.record(ProviderStatus::granted(details)).await;
    }

    /// Records a revoked outcome.
    pub async fn revoked(&self, details: impl Into<String>) {
        self.record(ProviderStatus::revoked(details)).await;
    }

    /// Records an error outcome.
    pub async fn error(&self, details: impl Into<String>, error: impl Into<String>) {
        self.record(ProviderStatus::error(details, error)).await;
    }

    /// Upserts the entry for this binding.
    pub async fn record(&self, status: ProviderStatus) {
        self.board
            .entries
            .lock()
            .await
            .insert(self.provider_name.clone(), status);
    }

    /// Returns the current entry for this binding.
    pub async fn current(&self) -> Option<ProviderStatus> {
        self.board.get(self.provider_name.as_str()).await
    }

    /// Returns the recorded action, if any.
    pub async fn current_action(&self) -> Option<ProviderAction> {
        self.current().await.map(|status| status.action)
    }
}

/// Registry of provider constructors keyed by backend kind.
#[derive(Clone)]
pub struct ProviderRegistry {
    factories: HashMap<ProviderKind, Arc<dyn ProviderFactory>>,
    credentials: Arc<dyn CredentialResolver>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            factories: HashMap::new(),
            credentials,
        }
    }

    /// Registers a constructor for one kind, replacing any previous one.
    #[must_use]
    pub fn with_factory(mut self, kind: ProviderKind, factory: Arc<dyn ProviderFactory>) -> Self {
        self.factories.insert(kind, factory);
        self
    }

    /// Returns registered kinds in stable order.
    #[must_use]
    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Resolves a binding to a provider instance.
    ///
    /// Unknown kinds, unregistered kinds, and missing credentials all surface
    /// as configuration errors.
    pub async fn resolve(&self, config: &ProviderConfig) -> AppResult<Arc<dyn AccessProvider>> {
        let kind = config.kind()?;
        let factory = self.factories.get(&kind).ok_or_else(|| {
            AppError::Configuration(format!("provider type '{kind}' is not registered"))
        })?;

        let credential_name = config.credential_ref().name.as_str();
        let credential = if credential_name.is_empty() {
            Credential::new("", BTreeMap::new())
        } else {
            self.credentials
                .get_credentials(credential_name)
                .await
                .map_err(|error| match error {
                    AppError::NotFound(message) => AppError::Configuration(format!(
                        "provider '{}' credential lookup failed: {message}",
                        config.name()
                    )),
                    other => other,
                })?
        };

        factory.build(config, &credential)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use passage_core::{AppError, AppResult};
    use passage_domain::{
        AccessRequest, AccessRoleRef, Credential, ProviderAction, ProviderConfig, ProviderKind,
    };

    use super::{
        AccessProvider, ProviderFactory, ProviderRegistry, ProviderStatusWriter, StatusBoard,
    };
    use crate::CredentialResolver;

    struct StaticCredentials;

    #[async_trait]
    impl CredentialResolver for StaticCredentials {
        async fn get_credentials(&self, name: &str) -> AppResult<Credential> {
            if name == "gitlab-token" {
                return Ok(Credential::new(
                    name,
                    BTreeMap::from([("token".to_owned(), "secret".to_owned())]),
                ));
            }
            Err(AppError::NotFound(format!("credential '{name}' does not exist")))
        }
    }

    struct NoopProvider;

    #[async_trait]
    impl AccessProvider for NoopProvider {
        async fn grant_access(
            &self,
            _request: &AccessRequest,
            status: &ProviderStatusWriter,
        ) -> AppResult<()> {
            status.granted("noop").await;
            Ok(())
        }

        async fn revoke_access(
            &self,
            _request: &AccessRequest,
            status: &ProviderStatusWriter,
        ) -> AppResult<()> {
            status.revoked("noop").await;
            Ok(())
        }

        async fn list_users_with_access(&self, _role: &AccessRoleRef) -> AppResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn is_access_expired(&self, _request: &AccessRequest) -> AppResult<bool> {
            Ok(false)
        }
    }

    struct TokenFactory;

    impl ProviderFactory for TokenFactory {
        fn build(
            &self,
            _config: &ProviderConfig,
            credential: &Credential,
        ) -> AppResult<Arc<dyn AccessProvider>> {
            credential.require("token")?;
            Ok(Arc::new(NoopProvider))
        }
    }

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new(Arc::new(StaticCredentials))
            .with_factory(ProviderKind::Gitlab, Arc::new(TokenFactory))
    }

    #[tokio::test]
    async fn resolves_registered_kind_with_credential() {
        let config = ProviderConfig::new("gitlab", "gitlab", false, "gitlab-token", BTreeMap::new());
        assert!(registry().resolve(&config).await.is_ok());
    }

    #[tokio::test]
    async fn missing_credential_is_configuration_error() {
        let config = ProviderConfig::new("gitlab", "gitlab", false, "other", BTreeMap::new());
        let result = registry().resolve(&config).await;
        assert!(matches!(result, Err(AppError::Configuration(_))));

        let config = ProviderConfig::new("gitlab", "gitlab", false, "", BTreeMap::new());
        let result = registry().resolve(&config).await;
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[tokio::test]
    async fn unregistered_and_unknown_kinds_are_configuration_errors() {
        let config = ProviderConfig::new("aws", "aws", false, "", BTreeMap::new());
        assert!(matches!(
            registry().resolve(&config).await,
            Err(AppError::Configuration(_))
        ));

        let config = ProviderConfig::new("ldap", "ldap", false, "", BTreeMap::new());
        assert!(matches!(
            registry().resolve(&config).await,
            Err(AppError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn writers_upsert_into_shared_board() {
        let board = StatusBoard::default();
        let gitlab = board.writer("gitlab");
        let google = board.writer("google");

        gitlab.error("acme/dev", "timeout").await;
        gitlab.granted("acme/dev").await;
        google.revoked("devs@acme.io").await;

        assert_eq!(gitlab.current_action().await, Some(ProviderAction::Granted));
        let entries = board.drain().await;
        assert_eq!(entries.len(), 2);
        assert!(board.get("gitlab").await.is_none());
    }
}
