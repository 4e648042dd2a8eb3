//! Application services and ports.

#![forbid(unsafe_code)]

mod access_request_service;
mod access_review_service;
mod expiration_sweep;
mod fanout;
mod lifecycle_ports;
mod provider_ports;
mod role_catalog;
mod user_profile_service;

#[cfg(test)]
mod test_support;

pub use access_request_service::{
    AccessRequestService, CreateAccessRequestInput, TransitionOutcome,
};
pub use access_review_service::{AccessReviewService, ProviderExpiryReport, RoleMembers};
pub use expiration_sweep::{DEFAULT_SWEEP_PRINCIPAL, ExpirationSweep, SweepReport};
pub use fanout::{
    DEFAULT_FANOUT_CONCURRENCY, FailureStage, FanoutAction, FanoutError, FanoutOrchestrator,
    ProviderFailure,
};
pub use lifecycle_ports::{
    AccessRequestRepository, AuditEvent, AuditSink, CredentialResolver, UserProfileRepository,
};
pub use provider_ports::{
    AccessProvider, ProviderFactory, ProviderRegistry, ProviderStatusWriter, StatusBoard,
};
pub use role_catalog::RoleCatalog;
pub use user_profile_service::{RoleMapping, UserProfileService, UserSummary};
