//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod access_request;
mod access_role;
mod approval;
mod audit;
mod credential;
mod ttl;
mod user_profile;

pub use access_request::{
    AccessRequest, AccessRequestDetails, AccessRequestId, AccessRequestState,
    AccessRequestStatus, AccessRoleRef, ProviderAction, ProviderStatus,
};
pub use access_role::{
    AccessRole, ApprovalRuleRef, CredentialRef, ProviderConfig, ProviderKind, USERNAME_PARAMETER,
};
pub use approval::{ApprovalRule, can_approve};
pub use audit::AuditAction;
pub use credential::Credential;
pub use ttl::parse_ttl;
pub use user_profile::{DEFAULT_PROFILE_PROVIDERS, UserProfile};
