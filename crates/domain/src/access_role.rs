use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use passage_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Parameter key the fan-out injects with the requester's provider username.
pub const USERNAME_PARAMETER: &str = "username";

/// Backend kinds a provider binding may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// AWS IAM Identity Center identity store groups.
    Aws,
    /// GitLab group membership.
    Gitlab,
    /// Google Workspace group membership.
    Google,
    /// Cloudflare account user groups.
    Cloudflare,
    /// Atlassian site groups.
    Atlassian,
    /// Teleport role assignment.
    Teleport,
    /// In-process provider used for local runs and tests.
    Mock,
}

impl ProviderKind {
    /// Returns stable configuration value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Gitlab => "gitlab",
            Self::Google => "google",
            Self::Cloudflare => "cloudflare",
            Self::Atlassian => "atlassian",
            Self::Teleport => "teleport",
            Self::Mock => "mock",
        }
    }

    /// Returns all known provider kinds.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[ProviderKind] = &[
            ProviderKind::Aws,
            ProviderKind::Gitlab,
            ProviderKind::Google,
            ProviderKind::Cloudflare,
            ProviderKind::Atlassian,
            ProviderKind::Teleport,
            ProviderKind::Mock,
        ];

        ALL
    }
}

impl FromStr for ProviderKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| AppError::Configuration(format!("unsupported provider type: {value}")))
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Named reference to a credential resolved at provider construction time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRef {
    /// Credential name.
    #[serde(default)]
    pub name: String,
}

/// Named reference from a role to its approval rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRuleRef {
    /// Approval rule name. Empty means no rule.
    #[serde(default)]
    pub name: String,
}

/// One provider binding inside a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    name: String,
    #[serde(default)]
    run_async: bool,
    provider: String,
    #[serde(default)]
    credential_ref: CredentialRef,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
}

impl ProviderConfig {
    /// Creates a provider binding.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        provider: impl Into<String>,
        run_async: bool,
        credential_ref: impl Into<String>,
        parameters: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            run_async,
            provider: provider.into(),
            credential_ref: CredentialRef {
                name: credential_ref.into(),
            },
            parameters,
        }
    }

    /// Returns the binding name, unique within its role.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns whether the binding runs concurrently during fan-out.
    #[must_use]
    pub fn run_async(&self) -> bool {
        self.run_async
    }

    /// Returns the raw backend kind selector.
    #[must_use]
    pub fn provider(&self) -> &str {
        self.provider.as_str()
    }

    /// Parses the backend kind selector.
    pub fn kind(&self) -> AppResult<ProviderKind> {
        ProviderKind::from_str(self.provider.as_str())
    }

    /// Returns the credential reference.
    #[must_use]
    pub fn credential_ref(&self) -> &CredentialRef {
        &self.credential_ref
    }

    /// Returns all configured parameters.
    #[must_use]
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// Returns one parameter value.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Returns a non-blank parameter or a configuration error naming the binding.
    pub fn required_parameter(&self, key: &str) -> AppResult<&str> {
        match self.parameter(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(AppError::Configuration(format!(
                "provider '{}' is missing required parameter '{key}'",
                self.name
            ))),
        }
    }

    /// Returns a copy of this binding with one parameter replaced.
    #[must_use]
    pub fn with_parameter(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut config = self.clone();
        config.parameters.insert(key.into(), value.into());
        config
    }
}

/// Configuration-defined access offering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRole {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
    #[serde(default)]
    providers: Vec<ProviderConfig>,
    #[serde(default)]
    approval_rule_ref: ApprovalRuleRef,
}

impl AccessRole {
    /// Creates a validated role.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        providers: Vec<ProviderConfig>,
        approval_rule_ref: impl Into<String>,
    ) -> AppResult<Self> {
        let name = name.into();
        let role = Self {
            id: name.clone(),
            name,
            description: description.into(),
            tags: BTreeSet::new(),
            annotations: BTreeMap::new(),
            providers,
            approval_rule_ref: ApprovalRuleRef {
                name: approval_rule_ref.into(),
            },
        };
        role.validate()?;

        Ok(role)
    }

    /// Checks the invariants a deserialized role must hold.
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation(
                "role name must not be empty".to_owned(),
            ));
        }

        let mut seen = BTreeSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "role '{}' has a provider without a name",
                    self.name
                )));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(AppError::Validation(format!(
                    "role '{}' has duplicate provider name '{}'",
                    self.name, provider.name
                )));
            }
        }

        Ok(())
    }

    /// Returns the role id, falling back to its name.
    #[must_use]
    pub fn id(&self) -> &str {
        if self.id.is_empty() {
            self.name.as_str()
        } else {
            self.id.as_str()
        }
    }

    /// Returns the unique role name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the role description.
    #[must_use]
    pub fn description(&self) -> &str {
        self.description.as_str()
    }

    /// Returns role tags.
    #[must_use]
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Returns free-form role annotations.
    #[must_use]
    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    /// Returns provider bindings in configured order.
    #[must_use]
    pub fn providers(&self) -> &[ProviderConfig] {
        &self.providers
    }

    /// Returns the approval rule reference.
    #[must_use]
    pub fn approval_rule_ref(&self) -> &ApprovalRuleRef {
        &self.approval_rule_ref
    }

    /// Returns a copy with tags attached.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }
}
