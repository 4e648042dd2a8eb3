use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use passage_core::{AppError, AppResult, Principal};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{ApprovalRule, parse_ttl};

/// Access request identifier. Nil until the request is admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccessRequestId(Uuid);

impl AccessRequestId {
    /// Creates an identifier from an existing UUID.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns whether an id has been assigned.
    #[must_use]
    pub fn is_assigned(&self) -> bool {
        !self.0.is_nil()
    }
}

impl FromStr for AccessRequestId {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|error| AppError::Validation(format!("invalid access request id '{value}': {error}")))
    }
}

impl std::fmt::Display for AccessRequestId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Lifecycle state of an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRequestState {
    /// Waiting for a decision.
    Pending,
    /// Access was granted.
    Approved,
    /// Request was turned down. Terminal.
    Denied,
    /// Access was revoked after its TTL. Terminal.
    Expired,
}

impl AccessRequestState {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }

    /// Returns whether the transition graph allows moving to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Denied)
                | (Self::Approved, Self::Expired)
        )
    }

    /// Returns whether no transition leaves this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Expired)
    }
}

impl FromStr for AccessRequestState {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            "expired" => Ok(Self::Expired),
            _ => Err(AppError::Validation(format!(
                "unknown access request state '{value}'"
            ))),
        }
    }
}

impl std::fmt::Display for AccessRequestState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Outcome recorded for one provider binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderAction {
    /// Membership was added or already present.
    Granted,
    /// Membership was removed or already absent.
    Revoked,
    /// The provider call or its construction failed.
    Error,
}

impl ProviderAction {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Revoked => "revoked",
            Self::Error => "error",
        }
    }
}

/// Per-provider status entry keyed by binding name on the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    /// Recorded action.
    pub action: ProviderAction,
    /// Free-form detail, such as the group touched or a no-op note.
    #[serde(default)]
    pub details: String,
    /// Error message when `action` is [`ProviderAction::Error`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderStatus {
    /// Creates a granted entry.
    #[must_use]
    pub fn granted(details: impl Into<String>) -> Self {
        Self {
            action: ProviderAction::Granted,
            details: details.into(),
            error: None,
        }
    }

    /// Creates a revoked entry.
    #[must_use]
    pub fn revoked(details: impl Into<String>) -> Self {
        Self {
            action: ProviderAction::Revoked,
            details: details.into(),
            error: None,
        }
    }

    /// Creates an error entry.
    #[must_use]
    pub fn error(details: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            action: ProviderAction::Error,
            details: details.into(),
            error: Some(error.into()),
        }
    }

    /// Returns whether the entry records a successful grant or revoke.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.action != ProviderAction::Error
    }
}

/// Reference to the requested role by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessRoleRef {
    /// Role name.
    pub name: String,
}

impl AccessRoleRef {
    /// Creates a role reference.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Caller-provided request details. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequestDetails {
    #[serde(default)]
    justification: String,
    #[serde(default)]
    attributes: Map<String, Value>,
    ttl: String,
}

impl AccessRequestDetails {
    /// Creates request details.
    #[must_use]
    pub fn new(
        justification: impl Into<String>,
        attributes: Map<String, Value>,
        ttl: impl Into<String>,
    ) -> Self {
        Self {
            justification: justification.into(),
            attributes,
            ttl: ttl.into(),
        }
    }

    /// Returns the justification text.
    #[must_use]
    pub fn justification(&self) -> &str {
        self.justification.as_str()
    }

    /// Returns free-form attributes.
    #[must_use]
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Returns the requested duration string.
    #[must_use]
    pub fn ttl(&self) -> &str {
        self.ttl.as_str()
    }
}

/// Mutable status sub-record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequestStatus {
    state: AccessRequestState,
    #[serde(default)]
    requested_by: String,
    #[serde(default)]
    approved_by: Option<String>,
    #[serde(default)]
    approval_rule: ApprovalRule,
    #[serde(default)]
    provider_usernames: BTreeMap<String, String>,
    #[serde(default)]
    provider_statuses: BTreeMap<String, ProviderStatus>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    trace: String,
}

impl AccessRequestStatus {
    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> AccessRequestState {
        self.state
    }

    /// Returns the requester user id.
    #[must_use]
    pub fn requested_by(&self) -> &str {
        self.requested_by.as_str()
    }

    /// Returns who approved or denied the request.
    #[must_use]
    pub fn approved_by(&self) -> Option<&str> {
        self.approved_by.as_deref()
    }

    /// Returns the approval rule snapshot.
    #[must_use]
    pub fn approval_rule(&self) -> &ApprovalRule {
        &self.approval_rule
    }

    /// Returns the requester's username per provider kind.
    #[must_use]
    pub fn provider_usernames(&self) -> &BTreeMap<String, String> {
        &self.provider_usernames
    }

    /// Returns status entries keyed by provider binding name.
    #[must_use]
    pub fn provider_statuses(&self) -> &BTreeMap<String, ProviderStatus> {
        &self.provider_statuses
    }

    /// Returns the absolute expiry.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns the trace id of the last mutating call.
    #[must_use]
    pub fn trace(&self) -> &str {
        self.trace.as_str()
    }
}

impl Default for AccessRequestStatus {
    fn default() -> Self {
        Self {
            state: AccessRequestState::Pending,
            requested_by: String::new(),
            approved_by: None,
            approval_rule: ApprovalRule::default(),
            provider_usernames: BTreeMap::new(),
            provider_statuses: BTreeMap::new(),
            expires_at: None,
            trace: String::new(),
        }
    }
}

/// One time-bounded grant lifecycle against a role.
///
/// The `set_status_*` setters write the state without consulting the
/// transition graph. Callers check [`AccessRequest::ensure_transition`] first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    id: AccessRequestId,
    role_ref: AccessRoleRef,
    details: AccessRequestDetails,
    #[serde(default)]
    status: AccessRequestStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccessRequest {
    /// Creates an unadmitted request.
    #[must_use]
    pub fn new(
        role_ref: AccessRoleRef,
        details: AccessRequestDetails,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AccessRequestId(Uuid::nil()),
            role_ref,
            details,
            status: AccessRequestStatus::default(),
            created_at,
            updated_at: created_at,
        }
    }

    /// Assigns a fresh id. Fails when the request was already admitted.
    pub fn admit(&mut self) -> AppResult<&mut Self> {
        if self.id.is_assigned() {
            return Err(AppError::Conflict(format!(
                "access request '{}' was already admitted",
                self.id
            )));
        }

        self.id = AccessRequestId(Uuid::new_v4());
        Ok(self)
    }

    /// Returns the request id.
    #[must_use]
    pub fn id(&self) -> AccessRequestId {
        self.id
    }

    /// Returns the requested role reference.
    #[must_use]
    pub fn role_ref(&self) -> &AccessRoleRef {
        &self.role_ref
    }

    /// Returns caller-provided details.
    #[must_use]
    pub fn details(&self) -> &AccessRequestDetails {
        &self.details
    }

    /// Returns the status sub-record.
    #[must_use]
    pub fn status(&self) -> &AccessRequestStatus {
        &self.status
    }

    /// Returns creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns last update time.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> AccessRequestState {
        self.status.state
    }

    /// Returns the requester user id.
    #[must_use]
    pub fn requested_by(&self) -> &str {
        self.status.requested_by.as_str()
    }

    /// Returns whether the caller may act on this request per its rule snapshot.
    #[must_use]
    pub fn has_permissions(&self, principal: &Principal) -> bool {
        crate::can_approve(self, principal)
    }

    /// Returns the requester's username for one provider kind, or empty.
    #[must_use]
    pub fn provider_username(&self, provider: &str) -> &str {
        self.status
            .provider_usernames
            .get(provider)
            .map_or("", String::as_str)
    }

    /// Rejects a move the transition graph does not allow.
    pub fn ensure_transition(&self, next: AccessRequestState) -> AppResult<()> {
        if self.status.state.can_transition_to(next) {
            return Ok(());
        }

        Err(AppError::Conflict(format!(
            "access request '{}' cannot move from {} to {}",
            self.id, self.status.state, next
        )))
    }

    /// Returns whether the sweep should expire this request at `now`.
    ///
    /// Only approved requests qualify. Pending requests keep their expiry for
    /// display but hold no access to revoke.
    #[must_use]
    pub fn is_due_for_expiration(&self, now: DateTime<Utc>) -> bool {
        let Some(expires_at) = self.status.expires_at else {
            return false;
        };

        self.status.state.can_transition_to(AccessRequestState::Expired) && expires_at <= now
    }

    /// Sets the requester.
    pub fn set_requester(&mut self, user_id: impl Into<String>) -> &mut Self {
        self.status.requested_by = user_id.into();
        self
    }

    /// Stores the approval rule snapshot.
    pub fn set_approval_rule(&mut self, rule: ApprovalRule) -> &mut Self {
        self.status.approval_rule = rule;
        self
    }

    /// Stores the resolved provider usernames.
    pub fn set_provider_usernames(&mut self, usernames: BTreeMap<String, String>) -> &mut Self {
        self.status.provider_usernames = usernames;
        self
    }

    /// Sets the trace id.
    pub fn set_trace(&mut self, trace: impl Into<String>) -> &mut Self {
        self.status.trace = trace.into();
        self
    }

    /// Sets state to pending.
    pub fn set_status_pending(&mut self) -> &mut Self {
        self.status.state = AccessRequestState::Pending;
        self
    }

    /// Sets state to approved and records the approver.
    pub fn set_status_approved(&mut self, by: impl Into<String>) -> &mut Self {
        self.status.state = AccessRequestState::Approved;
        self.status.approved_by = Some(by.into());
        self
    }

    /// Sets state to denied and records the decider.
    pub fn set_status_denied(&mut self, by: impl Into<String>) -> &mut Self {
        self.status.state = AccessRequestState::Denied;
        self.status.approved_by = Some(by.into());
        self
    }

    /// Sets state to expired.
    pub fn set_status_expired(&mut self) -> &mut Self {
        self.status.state = AccessRequestState::Expired;
        self
    }

    /// Computes `expires_at = now + ttl`.
    pub fn set_expiration(&mut self, now: DateTime<Utc>) -> AppResult<&mut Self> {
        let ttl = parse_ttl(self.details.ttl())?;
        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            AppError::Validation(format!("ttl '{}' is out of range", self.details.ttl()))
        })?;

        self.status.expires_at = Some(expires_at);
        Ok(self)
    }

    /// Records a granted status for one provider binding.
    pub fn set_provider_status_granted(
        &mut self,
        name: impl Into<String>,
        details: impl Into<String>,
    ) -> &mut Self {
        self.set_provider_status(name, ProviderStatus::granted(details))
    }

    /// Records a revoked status for one provider binding.
    pub fn set_provider_status_revoked(
        &mut self,
        name: impl Into<String>,
        details: impl Into<String>,
    ) -> &mut Self {
        self.set_provider_status(name, ProviderStatus::revoked(details))
    }

    /// Records an error status for one provider binding.
    pub fn set_provider_status_error(
        &mut self,
        name: impl Into<String>,
        details: impl Into<String>,
        error: impl Into<String>,
    ) -> &mut Self {
        self.set_provider_status(name, ProviderStatus::error(details, error))
    }

    /// Upserts a status entry.
    pub fn set_provider_status(&mut self, name: impl Into<String>, status: ProviderStatus) -> &mut Self {
        self.status.provider_statuses.insert(name.into(), status);
        self
    }

    /// Sets the last update time.
    pub fn touch(&mut self, now: DateTime<Utc>) -> &mut Self {
        self.updated_at = now;
        self
    }
}
