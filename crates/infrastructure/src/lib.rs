//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_access_request_repository;
mod in_memory_user_profile_repository;
mod postgres_access_request_repository;
mod postgres_audit_sink;
mod postgres_user_profile_repository;
mod providers;
mod static_credential_resolver;
mod tracing_audit_sink;
mod yaml_configuration;

pub use in_memory_access_request_repository::InMemoryAccessRequestRepository;
pub use in_memory_user_profile_repository::InMemoryUserProfileRepository;
pub use postgres_access_request_repository::PostgresAccessRequestRepository;
pub use postgres_audit_sink::PostgresAuditSink;
pub use postgres_user_profile_repository::PostgresUserProfileRepository;
pub use providers::{
    ALREADY_IN_GROUP, ALREADY_REMOVED_FROM_GROUP, AtlassianProviderFactory, AwsProviderFactory,
    CloudflareProviderFactory, ExpiryCheck, GitlabProviderFactory, GoogleProviderFactory,
    GroupDirectory, GroupMembershipProvider, MembershipChange, MockProviderFactory, TctlCli,
    TeleportCli, TeleportProviderFactory, builtin_provider_registry,
};
pub use static_credential_resolver::StaticCredentialResolver;
pub use tracing_audit_sink::TracingAuditSink;
pub use yaml_configuration::{
    load_credentials, load_role_catalog, parse_credentials, parse_role_catalog,
};
