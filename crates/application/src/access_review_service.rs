use std::collections::BTreeMap;
use std::sync::Arc;

use passage_core::{AppError, AppResult, Principal};
use passage_domain::{AccessRequestId, AccessRole, AccessRoleRef, USERNAME_PARAMETER};

use crate::{AccessRequestRepository, ProviderRegistry, RoleCatalog};

/// Current members of a role, per provider binding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleMembers {
    /// Usernames per binding name.
    pub members: BTreeMap<String, Vec<String>>,
    /// Error per binding name that could not be listed.
    pub errors: BTreeMap<String, String>,
}

/// Provider-side expiry view of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderExpiryReport {
    /// Expired flag per binding name.
    pub expired: BTreeMap<String, bool>,
    /// Error per binding name that could not answer.
    pub errors: BTreeMap<String, String>,
}

impl ProviderExpiryReport {
    /// Returns whether every answering provider reports the access expired.
    #[must_use]
    pub fn all_expired(&self) -> bool {
        self.errors.is_empty() && self.expired.values().all(|expired| *expired)
    }
}

/// Read-only provider queries used to review granted access.
#[derive(Clone)]
pub struct AccessReviewService {
    catalog: Arc<RoleCatalog>,
    registry: Arc<ProviderRegistry>,
    requests: Arc<dyn AccessRequestRepository>,
}

impl AccessReviewService {
    /// Creates a new service from required dependencies.
    #[must_use]
    pub fn new(
        catalog: Arc<RoleCatalog>,
        registry: Arc<ProviderRegistry>,
        requests: Arc<dyn AccessRequestRepository>,
    ) -> Self {
        Self {
            catalog,
            registry,
            requests,
        }
    }

    /// Lists who holds a role on each of its providers.
    ///
    /// Gated by the role's current approval rule.
    pub async fn list_role_members(
        &self,
        actor: &Principal,
        role_name: &str,
    ) -> AppResult<RoleMembers> {
        let role = self.role(role_name)?;
        if !self.catalog.approval_rule_for(role).permits(actor) {
            return Err(AppError::Forbidden(format!(
                "subject '{}' cannot review role '{role_name}'",
                actor.user_id()
            )));
        }

        let role_ref = AccessRoleRef::new(role.name());
        let mut report = RoleMembers::default();
        for config in role.providers() {
            let listed = match self.registry.resolve(config).await {
                Ok(provider) => provider.list_users_with_access(&role_ref).await,
                Err(error) => Err(error),
            };

            match listed {
                Ok(users) => {
                    report.members.insert(config.name().to_owned(), users);
                }
                Err(error) => {
                    report
                        .errors
                        .insert(config.name().to_owned(), error.to_string());
                }
            }
        }

        Ok(report)
    }

    /// Asks every provider of the request's role whether its access has expired.
    pub async fn check_provider_expiry(
        &self,
        actor: &Principal,
        id: AccessRequestId,
    ) -> AppResult<ProviderExpiryReport> {
        let request = self
            .requests
            .find(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("access request '{id}' does not exist")))?;
        if !request.has_permissions(actor) {
            return Err(AppError::Forbidden(format!(
                "subject '{}' cannot review access request '{id}'",
                actor.user_id()
            )));
        }

        let role = self.role(request.role_ref().name.as_str())?;
        let mut report = ProviderExpiryReport::default();
        for config in role.providers() {
            let config = config.with_parameter(
                USERNAME_PARAMETER,
                request.provider_username(config.provider()),
            );
            let checked = match self.registry.resolve(&config).await {
                Ok(provider) => provider.is_access_expired(&request).await,
                Err(error) => Err(error),
            };

            match checked {
                Ok(expired) => {
                    report.expired.insert(config.name().to_owned(), expired);
                }
                Err(error) => {
                    report
                        .errors
                        .insert(config.name().to_owned(), error.to_string());
                }
            }
        }

        Ok(report)
    }

    fn role(&self, name: &str) -> AppResult<&AccessRole> {
        self.catalog
            .role(name)
            .ok_or_else(|| AppError::NotFound(format!("role '{name}' does not exist")))
    }
}
