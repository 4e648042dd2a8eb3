use std::collections::BTreeMap;
use std::sync::Arc;

use passage_core::AppError;
use passage_domain::{
    AccessRequest, AccessRole, AuditAction, ProviderAction, ProviderConfig, ProviderStatus,
    USERNAME_PARAMETER,
};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{ProviderRegistry, ProviderStatusWriter, StatusBoard};

/// Default cap on concurrently running async providers in one fan-out.
pub const DEFAULT_FANOUT_CONCURRENCY: usize = 8;

/// Lifecycle action a fan-out performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutAction {
    /// Grant access on every provider.
    Approve,
    /// Revoke access on every provider.
    Expire,
}

impl FanoutAction {
    /// Returns stable action label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Expire => "expire",
        }
    }

    /// Returns the audit action emitted once per failing provider.
    #[must_use]
    pub fn error_audit_action(self) -> AuditAction {
        match self {
            Self::Approve => AuditAction::AccessRequestApprovalError,
            Self::Expire => AuditAction::AccessRequestExpireError,
        }
    }

    fn success_status(self) -> ProviderStatus {
        match self {
            Self::Approve => ProviderStatus::granted(""),
            Self::Expire => ProviderStatus::revoked(""),
        }
    }
}

/// Where a provider invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// The request's role is missing from the catalog.
    RoleResolution,
    /// The provider could not be built from its binding.
    Construction,
    /// The grant or revoke call failed.
    Invocation,
    /// The fan-out was cancelled before the provider finished.
    Cancelled,
    /// The provider task ended without reporting.
    Aborted,
}

impl FailureStage {
    /// Returns stable stage label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoleResolution => "role_resolution",
            Self::Construction => "construction",
            Self::Invocation => "invocation",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
        }
    }
}

/// One failed provider within a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    /// Binding name, or the role name for role resolution failures.
    pub provider_name: String,
    /// Raw backend kind selector.
    pub provider_kind: String,
    /// Failure stage.
    pub stage: FailureStage,
    /// Error message.
    pub error: String,
}

impl ProviderFailure {
    fn new(config: &ProviderConfig, stage: FailureStage, error: impl Into<String>) -> Self {
        Self {
            provider_name: config.name().to_owned(),
            provider_kind: config.provider().to_owned(),
            stage,
            error: error.into(),
        }
    }
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{} ({}) {}: {}",
            self.provider_name,
            self.provider_kind,
            self.stage.as_str(),
            self.error
        )
    }
}

/// Aggregate of every provider failure in one fan-out.
#[derive(Debug, Clone, Error)]
#[error("errors occurred: [{}]", render_failures(.failures))]
pub struct FanoutError {
    failures: Vec<ProviderFailure>,
}

impl FanoutError {
    /// Returns the role resolution failure for an unknown role.
    #[must_use]
    pub fn role_unavailable(role_name: &str) -> Self {
        Self {
            failures: vec![ProviderFailure {
                provider_name: role_name.to_owned(),
                provider_kind: String::new(),
                stage: FailureStage::RoleResolution,
                error: format!("role '{role_name}' is not in the catalog"),
            }],
        }
    }

    /// Returns every failure.
    #[must_use]
    pub fn failures(&self) -> &[ProviderFailure] {
        &self.failures
    }
}

fn render_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Invokes every provider of a role for one lifecycle action.
///
/// Sync bindings run inline in configured order, each seeing the statuses
/// recorded by the sync bindings before it. Async bindings run as tasks
/// capped by a semaphore, see the statuses recorded before they were
/// spawned, and are all joined before `execute` returns.
#[derive(Clone)]
pub struct FanoutOrchestrator {
    registry: Arc<ProviderRegistry>,
    max_concurrency: usize,
}

impl FanoutOrchestrator {
    /// Creates an orchestrator over a provider registry.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            max_concurrency: DEFAULT_FANOUT_CONCURRENCY,
        }
    }

    /// Caps concurrently running async providers.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Returns the provider registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Runs the action on every provider of `role` and merges their statuses
    /// into `request`.
    ///
    /// Returns an error listing every failed provider. Providers that
    /// succeeded keep their granted or revoked entries either way.
    pub async fn execute(
        &self,
        action: FanoutAction,
        request: &mut AccessRequest,
        role: &AccessRole,
        cancellation: &CancellationToken,
    ) -> Result<(), FanoutError> {
        let mut snapshot = Arc::new(request.clone());
        let board = StatusBoard::default();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut outstanding: BTreeMap<String, ProviderConfig> = BTreeMap::new();
        let mut failures = Vec::new();

        for config in role.providers() {
            let config = config.with_parameter(
                USERNAME_PARAMETER,
                snapshot.provider_username(config.provider()),
            );
            let writer = board.writer(config.name());

            if cancellation.is_cancelled() {
                failures.push(cancelled(&config, &writer).await);
                continue;
            }

            if config.run_async() {
                outstanding.insert(config.name().to_owned(), config.clone());
                let registry = Arc::clone(&self.registry);
                let snapshot = Arc::clone(&snapshot);
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    // The semaphore is never closed.
                    let _permit = semaphore.acquire_owned().await.ok();
                    let failure =
                        invoke_provider(&registry, action, &snapshot, &config, &writer).await;
                    (config.name().to_owned(), failure)
                });
                continue;
            }

            let failure = tokio::select! {
                failure = invoke_provider(&self.registry, action, &snapshot, &config, &writer) => failure,
                () = cancellation.cancelled() => Some(cancelled(&config, &writer).await),
            };
            failures.extend(failure);

            // Later sync providers see this status; running tasks keep the copy they started with.
            if let Some(status) = writer.current().await {
                Arc::make_mut(&mut snapshot).set_provider_status(config.name(), status);
            }
        }

        let mut was_cancelled = false;
        loop {
            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                () = cancellation.cancelled(), if !was_cancelled => {
                    was_cancelled = true;
                    tasks.abort_all();
                    continue;
                }
            };

            match joined {
                None => break,
                Some(Ok((provider_name, failure))) => {
                    outstanding.remove(&provider_name);
                    failures.extend(failure);
                }
                Some(Err(error)) => {
                    if !error.is_cancelled() {
                        warn!(
                            request_id = %snapshot.id(),
                            error = %error,
                            "provider task ended abnormally"
                        );
                    }
                }
            }
        }

        for config in outstanding.values() {
            let writer = board.writer(config.name());
            if was_cancelled {
                failures.push(cancelled(config, &writer).await);
            } else {
                writer.error("task", "provider task aborted").await;
                failures.push(ProviderFailure::new(
                    config,
                    FailureStage::Aborted,
                    "provider task aborted",
                ));
            }
        }

        for (provider_name, status) in board.drain().await {
            request.set_provider_status(provider_name, status);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FanoutError { failures })
        }
    }
}

async fn invoke_provider(
    registry: &ProviderRegistry,
    action: FanoutAction,
    request: &AccessRequest,
    config: &ProviderConfig,
    writer: &ProviderStatusWriter,
) -> Option<ProviderFailure> {
    info!(
        request_id = %request.id(),
        provider = config.name(),
        kind = config.provider(),
        action = action.as_str(),
        "calling provider"
    );

    let provider = match registry.resolve(config).await {
        Ok(provider) => provider,
        Err(error) => {
            warn!(
                request_id = %request.id(),
                provider = config.name(),
                error = %error,
                "failed to construct provider"
            );
            writer.error("construct provider", error.to_string()).await;
            return Some(ProviderFailure::new(
                config,
                FailureStage::Construction,
                error.to_string(),
            ));
        }
    };

    let result = match action {
        FanoutAction::Approve => provider.grant_access(request, writer).await,
        FanoutAction::Expire => provider.revoke_access(request, writer).await,
    };

    match result {
        Ok(()) => {
            if writer.current().await.is_none() {
                writer.record(action.success_status()).await;
            }
            None
        }
        Err(error) => {
            warn!(
                request_id = %request.id(),
                provider = config.name(),
                action = action.as_str(),
                error = %error,
                "provider call failed"
            );
            if writer.current_action().await != Some(ProviderAction::Error) {
                writer.error("", error_message(&error)).await;
            }
            Some(ProviderFailure::new(
                config,
                FailureStage::Invocation,
                error.to_string(),
            ))
        }
    }
}

async fn cancelled(config: &ProviderConfig, writer: &ProviderStatusWriter) -> ProviderFailure {
    if writer.current().await.is_none() {
        writer.error("cancelled", "fan-out cancelled").await;
    }
    ProviderFailure::new(config, FailureStage::Cancelled, "fan-out cancelled")
}

fn error_message(error: &AppError) -> String {
    match error {
        AppError::Provider(message) => message.clone(),
        other => other.to_string(),
    }
}
