use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use passage_application::{AccessProvider, ProviderStatusWriter};
use passage_core::{AppError, AppResult};
use passage_domain::{
    AccessRequest, AccessRoleRef, ProviderConfig, ProviderKind, USERNAME_PARAMETER, parse_ttl,
};
use tracing::{info, warn};

/// Status detail recorded when a grant finds the membership already in place.
pub const ALREADY_IN_GROUP: &str = "already in group";

/// Status detail recorded when a revoke finds the membership already gone.
pub const ALREADY_REMOVED_FROM_GROUP: &str = "already removed from group";

/// Outcome of a membership mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    /// The backend changed.
    Applied,
    /// The backend already held the desired state.
    Unchanged,
}

/// Membership operations one backend group exposes.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Prepares the group before members are added.
    async fn ensure_group(&self) -> AppResult<()> {
        Ok(())
    }

    /// Returns whether the user is currently a member.
    async fn is_member(&self, username: &str) -> AppResult<bool>;

    /// Adds the user to the group.
    async fn add_member(&self, username: &str) -> AppResult<MembershipChange>;

    /// Removes the user from the group.
    async fn remove_member(&self, username: &str) -> AppResult<MembershipChange>;

    /// Lists current member usernames.
    async fn list_members(&self) -> AppResult<Vec<String>>;
}

/// How a provider answers `is_access_expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryCheck {
    /// Compare the request expiry, or `created_at + ttl`, with now.
    RequestTtl,
    /// Always report the access as expired.
    AlwaysExpired,
}

/// Access provider granting a role through membership of one backend group.
pub struct GroupMembershipProvider {
    binding: String,
    kind: ProviderKind,
    group: String,
    username: String,
    directory: Arc<dyn GroupDirectory>,
    expiry: ExpiryCheck,
}

impl GroupMembershipProvider {
    /// Creates a provider for one binding.
    ///
    /// `group` is required; the username is read from the injected
    /// `username` parameter and only checked when access is changed.
    pub fn from_config(
        kind: ProviderKind,
        config: &ProviderConfig,
        directory: Arc<dyn GroupDirectory>,
    ) -> AppResult<Self> {
        Ok(Self {
            binding: config.name().to_owned(),
            kind,
            group: config.required_parameter("group")?.to_owned(),
            username: config
                .parameter(USERNAME_PARAMETER)
                .unwrap_or_default()
                .trim()
                .to_owned(),
            directory,
            expiry: ExpiryCheck::RequestTtl,
        })
    }

    /// Overrides the expiry strategy.
    #[must_use]
    pub fn with_expiry_check(mut self, expiry: ExpiryCheck) -> Self {
        self.expiry = expiry;
        self
    }

    fn details(&self) -> String {
        format!("group: {}", self.group)
    }

    fn username(&self) -> AppResult<&str> {
        if self.username.is_empty() {
            return Err(AppError::Validation(format!(
                "no {} username is set for provider '{}'",
                self.kind, self.binding
            )));
        }

        Ok(self.username.as_str())
    }

    async fn grant(&self) -> AppResult<MembershipChange> {
        let username = self.username()?;
        self.directory.ensure_group().await?;
        if self.directory.is_member(username).await? {
            return Ok(MembershipChange::Unchanged);
        }

        self.directory.add_member(username).await
    }

    async fn revoke(&self) -> AppResult<MembershipChange> {
        let username = self.username()?;
        if !self.directory.is_member(username).await? {
            return Ok(MembershipChange::Unchanged);
        }

        self.directory.remove_member(username).await
    }
}

#[async_trait]
impl AccessProvider for GroupMembershipProvider {
    async fn grant_access(
        &self,
        request: &AccessRequest,
        status: &ProviderStatusWriter,
    ) -> AppResult<()> {
        match self.grant().await {
            Ok(MembershipChange::Applied) => {
                status.granted(self.details()).await;
                info!(
                    provider = %self.binding,
                    kind = %self.kind,
                    request_id = %request.id(),
                    username = %self.username,
                    group = %self.group,
                    "user added to group"
                );
                Ok(())
            }
            Ok(MembershipChange::Unchanged) => {
                status.granted(ALREADY_IN_GROUP).await;
                info!(
                    provider = %self.binding,
                    request_id = %request.id(),
                    username = %self.username,
                    group = %self.group,
                    "user already in group"
                );
                Ok(())
            }
            Err(error) => {
                status.error(self.details(), error.to_string()).await;
                warn!(
                    provider = %self.binding,
                    request_id = %request.id(),
                    group = %self.group,
                    error = %error,
                    "failed to add user to group"
                );
                Err(error)
            }
        }
    }

    async fn revoke_access(
        &self,
        request: &AccessRequest,
        status: &ProviderStatusWriter,
    ) -> AppResult<()> {
        match self.revoke().await {
            Ok(MembershipChange::Applied) => {
                status.revoked(self.details()).await;
                info!(
                    provider = %self.binding,
                    kind = %self.kind,
                    request_id = %request.id(),
                    username = %self.username,
                    group = %self.group,
                    "user removed from group"
                );
                Ok(())
            }
            Ok(MembershipChange::Unchanged) => {
                status.revoked(ALREADY_REMOVED_FROM_GROUP).await;
                info!(
                    provider = %self.binding,
                    request_id = %request.id(),
                    username = %self.username,
                    group = %self.group,
                    "user already removed from group"
                );
                Ok(())
            }
            Err(error) => {
                status.error(self.details(), error.to_string()).await;
                warn!(
                    provider = %self.binding,
                    request_id = %request.id(),
                    group = %self.group,
                    error = %error,
                    "failed to remove user from group"
                );
                Err(error)
            }
        }
    }

    async fn list_users_with_access(&self, _role: &AccessRoleRef) -> AppResult<Vec<String>> {
        self.directory.list_members().await
    }

    async fn is_access_expired(&self, request: &AccessRequest) -> AppResult<bool> {
        if self.expiry == ExpiryCheck::AlwaysExpired {
            return Ok(true);
        }

        let expires_at = match request.status().expires_at() {
            Some(expires_at) => expires_at,
            None => {
                let ttl = parse_ttl(request.details().ttl())?;
                request.created_at().checked_add_signed(ttl).ok_or_else(|| {
                    AppError::Validation(format!(
                        "ttl '{}' overflows the request creation time",
                        request.details().ttl()
                    ))
                })?
            }
        };

        Ok(expires_at <= Utc::now())
    }
}
