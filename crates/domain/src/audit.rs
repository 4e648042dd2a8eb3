use serde::{Deserialize, Serialize};

/// Stable audit actions emitted by lifecycle use-cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Emitted when a request is created.
    AccessRequestCreated,
    /// Emitted when a request is approved.
    AccessRequestApproved,
    /// Emitted once per provider that failed to grant.
    AccessRequestApprovalError,
    /// Emitted when a request is denied.
    AccessRequestDenied,
    /// Emitted when a request is expired.
    AccessRequestExpired,
    /// Emitted once per provider that failed to revoke.
    AccessRequestExpireError,
    /// Emitted when a request record is deleted.
    AccessRequestDeleted,
    /// Emitted when a user updates profile settings.
    UserProfileUpdated,
}

impl AuditAction {
    /// Returns a stable storage value for this action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessRequestCreated => "passage.access_request.created",
            Self::AccessRequestApproved => "passage.access_request.approved",
            Self::AccessRequestApprovalError => "passage.access_request.approval_error",
            Self::AccessRequestDenied => "passage.access_request.denied",
            Self::AccessRequestExpired => "passage.access_request.expired",
            Self::AccessRequestExpireError => "passage.access_request.expire_error",
            Self::AccessRequestDeleted => "passage.access_request.deleted",
            Self::UserProfileUpdated => "passage.user_profile.updated",
        }
    }

    /// Returns whether the action reports a provider failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::AccessRequestApprovalError | Self::AccessRequestExpireError
        )
    }
}
