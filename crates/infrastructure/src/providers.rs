//! Concrete access providers.

mod atlassian;
mod aws;
mod cloudflare;
mod gitlab;
mod google;
mod group_directory;
mod http;
mod mock;
mod secret_file;
mod teleport;

use std::sync::Arc;
use std::time::Duration;

use passage_application::{CredentialResolver, ProviderRegistry};
use passage_core::{AppError, AppResult};
use passage_domain::ProviderKind;

pub use atlassian::AtlassianProviderFactory;
pub use aws::AwsProviderFactory;
pub use cloudflare::CloudflareProviderFactory;
pub use gitlab::GitlabProviderFactory;
pub use google::GoogleProviderFactory;
pub use group_directory::{
    ALREADY_IN_GROUP, ALREADY_REMOVED_FROM_GROUP, ExpiryCheck, GroupDirectory,
    GroupMembershipProvider, MembershipChange,
};
pub use mock::MockProviderFactory;
pub use teleport::{TctlCli, TeleportCli, TeleportProviderFactory};

/// Builds a registry with every built-in provider kind.
///
/// HTTP providers share one client with the given request timeout.
pub fn builtin_provider_registry(
    credentials: Arc<dyn CredentialResolver>,
    http_timeout: Duration,
    mock: MockProviderFactory,
) -> AppResult<ProviderRegistry> {
    let client = reqwest::Client::builder()
        .timeout(http_timeout)
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;

    Ok(ProviderRegistry::new(credentials)
        .with_factory(ProviderKind::Aws, Arc::new(AwsProviderFactory::new()))
        .with_factory(
            ProviderKind::Gitlab,
            Arc::new(GitlabProviderFactory::new(client.clone())),
        )
        .with_factory(
            ProviderKind::Google,
            Arc::new(GoogleProviderFactory::new(client.clone())),
        )
        .with_factory(
            ProviderKind::Cloudflare,
            Arc::new(CloudflareProviderFactory::new(client.clone())),
        )
        .with_factory(
            ProviderKind::Atlassian,
            Arc::new(AtlassianProviderFactory::new(client)),
        )
        .with_factory(ProviderKind::Teleport, Arc::new(TeleportProviderFactory::new()))
        .with_factory(ProviderKind::Mock, Arc::new(mock)))
}
