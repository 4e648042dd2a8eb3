use async_trait::async_trait;
use passage_core::AppResult;
use passage_domain::{
    AccessRequest, AccessRequestId, AccessRequestState, AuditAction, Credential, ProviderConfig, UserProfile,
};

/// Immutable audit event payload emitted by application services.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    /// Subject that performed the action.
    pub subject: String,
    /// Stable audit action identifier.
    pub action: AuditAction,
    /// Resource type label.
    pub resource_type: String,
    /// Resource identifier.
    pub resource_id: String,
    /// Human-readable summary.
    pub detail: Option<String>,
    /// Request snapshot after the action, when the event concerns a request.
    pub request: Option<AccessRequest>,
    /// Provider binding the event concerns.
    pub provider: Option<ProviderConfig>,
    /// Error reported by the provider.
    pub error: Option<String>,
}

/// Port for append-only audit event delivery.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Delivers one audit event.
    async fn append_event(&self, event: AuditEvent) -> AppResult<()>;
}

/// Repository port for access request records.
///
/// Updates replace the full record. Missing records on update or delete
/// are reported as not found.
#[async_trait]
pub trait AccessRequestRepository: Send + Sync {
    /// Inserts a new admitted request.
    async fn insert(&self, request: &AccessRequest) -> AppResult<()>;

    /// Replaces an existing request only while its stored state still equals
    /// `expected`.
    ///
    /// Returns a conflict error when another writer moved the request first
    /// and a not found error when the request is gone.
    async fn update_if_state(
        &self,
        request: &AccessRequest,
        expected: AccessRequestState,
    ) -> AppResult<()>;

    /// Removes a request.
    async fn delete(&self, id: AccessRequestId) -> AppResult<()>;

    /// Finds one request.
    async fn find(&self, id: AccessRequestId) -> AppResult<Option<AccessRequest>>;

    /// Lists every request.
    async fn list(&self) -> AppResult<Vec<AccessRequest>>;
}

/// Repository port for user profiles.
#[async_trait]
pub trait UserProfileRepository: Send + Sync {
    /// Inserts a new profile.
    async fn insert(&self, profile: &UserProfile) -> AppResult<()>;

    /// Replaces an existing profile.
    async fn update(&self, profile: &UserProfile) -> AppResult<()>;

    /// Finds a profile by user id.
    async fn find(&self, user_id: &str) -> AppResult<Option<UserProfile>>;

    /// Lists every profile.
    async fn list(&self) -> AppResult<Vec<UserProfile>>;
}

/// Port resolving credential references to secret bundles.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Returns the named credential or a not found error.
    async fn get_credentials(&self, name: &str) -> AppResult<Credential>;
}
