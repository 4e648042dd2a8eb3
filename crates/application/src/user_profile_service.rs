use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use passage_core::{AppResult, Principal};
use passage_domain::{AccessRequestState, AuditAction, UserProfile};
use tracing::warn;

use crate::{AccessRequestRepository, AuditEvent, AuditSink, UserProfileRepository};

/// User listing projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    /// User id.
    pub id: String,
    /// Display username.
    pub username: String,
}

/// Roles a user currently holds through approved requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMapping {
    /// Requester user id.
    pub user_id: String,
    /// Role names held.
    pub roles: BTreeSet<String>,
}

/// Profile settings and user directory use-cases.
#[derive(Clone)]
pub struct UserProfileService {
    profiles: Arc<dyn UserProfileRepository>,
    requests: Arc<dyn AccessRequestRepository>,
    audit_sink: Arc<dyn AuditSink>,
}

impl UserProfileService {
    /// Creates a new service from required dependencies.
    #[must_use]
    pub fn new(
        profiles: Arc<dyn UserProfileRepository>,
        requests: Arc<dyn AccessRequestRepository>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            profiles,
            requests,
            audit_sink,
        }
    }

    /// Returns the caller's profile, storing a default one on first access.
    pub async fn get_profile(&self, actor: &Principal) -> AppResult<UserProfile> {
        if let Some(profile) = self.profiles.find(actor.user_id()).await? {
            return Ok(profile);
        }

        let profile = UserProfile::default_for(actor.user_id());
        self.profiles.insert(&profile).await?;
        Ok(profile)
    }

    /// Replaces the caller's provider usernames.
    pub async fn update_settings(
        &self,
        actor: &Principal,
        provider_usernames: BTreeMap<String, String>,
    ) -> AppResult<UserProfile> {
        let profile = match self.profiles.find(actor.user_id()).await? {
            Some(mut profile) => {
                profile.set_provider_usernames(provider_usernames);
                self.profiles.update(&profile).await?;
                profile
            }
            None => {
                let profile =
                    UserProfile::new(actor.user_id(), actor.user_id(), provider_usernames);
                self.profiles.insert(&profile).await?;
                profile
            }
        };

        let event = AuditEvent {
            subject: actor.user_id().to_owned(),
            action: AuditAction::UserProfileUpdated,
            resource_type: "user_profile".to_owned(),
            resource_id: profile.id().to_owned(),
            detail: Some(format!(
                "updated usernames for [{}]",
                profile
                    .provider_usernames()
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            request: None,
            provider: None,
            error: None,
        };
        if let Err(error) = self.audit_sink.append_event(event).await {
            warn!(user_id = actor.user_id(), error = %error, "failed to emit audit event");
        }

        Ok(profile)
    }

    /// Lists known users. Falls back to the caller's default profile.
    pub async fn list_users(&self, actor: &Principal) -> AppResult<Vec<UserSummary>> {
        let mut profiles = self.profiles.list().await?;
        if profiles.is_empty() {
            profiles.push(UserProfile::default_for(actor.user_id()));
        }

        Ok(profiles
            .into_iter()
            .map(|profile| UserSummary {
                id: profile.id().to_owned(),
                username: profile.username().to_owned(),
            })
            .collect())
    }

    /// Maps each requester to the roles granted by their approved requests.
    pub async fn role_mappings(&self) -> AppResult<Vec<RoleMapping>> {
        let mut mappings: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for request in self.requests.list().await? {
            if request.state() != AccessRequestState::Approved {
                continue;
            }
            mappings
                .entry(request.requested_by().to_owned())
                .or_default()
                .insert(request.role_ref().name.clone());
        }

        Ok(mappings
            .into_iter()
            .map(|(user_id, roles)| RoleMapping { user_id, roles })
            .collect())
    }
}
