use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use passage_core::{AppError, AppResult, Principal};
use passage_domain::{
    AccessRequest, AccessRequestDetails, AccessRequestId, AccessRequestState, AccessRole,
    AccessRoleRef, AuditAction, UserProfile,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    AccessRequestRepository, AuditEvent, AuditSink, FanoutAction, FanoutError, FanoutOrchestrator,
    RoleCatalog, UserProfileRepository,
};

mod create;
mod transitions;


/// Input payload for creating an access request.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateAccessRequestInput {
    /// Requested role name.
    pub role: String,
    /// Free-text justification.
    pub justification: String,
    /// Free-form attributes.
    pub attributes: Map<String, Value>,
    /// Requested duration such as `8h`.
    pub ttl: String,
    /// Caller trace id. Generated when absent.
    pub trace: Option<String>,
}

/// Result of an approve or expire call.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// Every provider succeeded.
    Completed(AccessRequest),
    /// The state moved but at least one provider failed.
    PartiallyFailed {
        /// Persisted request with per-provider statuses.
        request: AccessRequest,
        /// Every provider failure.
        error: FanoutError,
    },
}

impl TransitionOutcome {
    /// Returns the persisted request.
    #[must_use]
    pub fn request(&self) -> &AccessRequest {
        match self {
            Self::Completed(request) | Self::PartiallyFailed { request, .. } => request,
        }
    }

    /// Consumes the outcome and returns the persisted request.
    #[must_use]
    pub fn into_request(self) -> AccessRequest {
        match self {
            Self::Completed(request) | Self::PartiallyFailed { request, .. } => request,
        }
    }

    /// Returns the fan-out error for partial failures.
    #[must_use]
    pub fn error(&self) -> Option<&FanoutError> {
        match self {
            Self::Completed(_) => None,
            Self::PartiallyFailed { error, .. } => Some(error),
        }
    }

    /// Returns whether any provider failed.
    #[must_use]
    pub fn is_partial_failure(&self) -> bool {
        matches!(self, Self::PartiallyFailed { .. })
    }
}

/// Lifecycle use-cases for access requests.
#[derive(Clone)]
pub struct AccessRequestService {
    repository: Arc<dyn AccessRequestRepository>,
    profiles: Arc<dyn UserProfileRepository>,
    catalog: Arc<RoleCatalog>,
    fanout: FanoutOrchestrator,
    audit_sink: Arc<dyn AuditSink>,
    cancellation: CancellationToken,
}

impl AccessRequestService {
    /// Creates a new service from required dependencies.
    #[must_use]
    pub fn new(
        repository: Arc<dyn AccessRequestRepository>,
        profiles: Arc<dyn UserProfileRepository>,
        catalog: Arc<RoleCatalog>,
        fanout: FanoutOrchestrator,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            repository,
            profiles,
            catalog,
            fanout,
            audit_sink,
            cancellation: CancellationToken::new(),
        }
    }

    /// Shares a shutdown token with in-flight fan-outs.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Returns configured roles.
    #[must_use]
    pub fn list_roles(&self) -> Vec<AccessRole> {
        self.catalog.roles().to_vec()
    }

    /// Roles come from configuration and cannot be created at runtime.
    pub fn create_role(&self, _actor: &Principal, role: &AccessRole) -> AppResult<AccessRole> {
        Err(AppError::Validation(format!(
            "role '{}' cannot be created: roles are managed via configuration",
            role.name()
        )))
    }

    /// Lists requests the caller created or may act on.
    pub async fn list(&self, actor: &Principal) -> AppResult<Vec<AccessRequest>> {
        let requests = self.repository.list().await?;

        Ok(requests
            .into_iter()
            .filter(|request| {
                request.has_permissions(actor) || request.requested_by() == actor.user_id()
            })
            .collect())
    }

    /// Returns one request the caller created or may act on.
    pub async fn get(&self, actor: &Principal, id: AccessRequestId) -> AppResult<AccessRequest> {
        let request = self.load(id).await?;
        if request.has_permissions(actor) || request.requested_by() == actor.user_id() {
            return Ok(request);
        }

        Err(AppError::Forbidden(format!(
            "subject '{}' cannot view access request '{id}'",
            actor.user_id()
        )))
    }

    async fn load(&self, id: AccessRequestId) -> AppResult<AccessRequest> {
        self.repository
            .find(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("access request '{id}' does not exist")))
    }

    fn require_permission(actor: &Principal, request: &AccessRequest) -> AppResult<()> {
        if request.has_permissions(actor) {
            return Ok(());
        }

        Err(AppError::Forbidden(format!(
            "subject '{}' is not allowed to act on access request '{}'",
            actor.user_id(),
            request.id()
        )))
    }

    async fn emit(&self, event: AuditEvent) {
        let action = event.action;
        let resource_id = event.resource_id.clone();
        if let Err(error) = self.audit_sink.append_event(event).await {
            warn!(
                action = action.as_str(),
                resource_id = %resource_id,
                error = %error,
                "failed to emit audit event"
            );
        }
    }
}

fn request_event(
    actor: &Principal,
    action: AuditAction,
    request: &AccessRequest,
    detail: String,
) -> AuditEvent {
    AuditEvent {
        subject: actor.user_id().to_owned(),
        action,
        resource_type: "access_request".to_owned(),
        resource_id: request.id().to_string(),
        detail: Some(detail),
        request: Some(request.clone()),
        provider: None,
        error: None,
    }
}

fn trace_or_new(trace: Option<String>) -> String {
    trace
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
