use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How the caller was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    /// Interactive human user evaluated against approval rules.
    User,
    /// Trusted service caller that bypasses approval rules.
    Token,
}

impl PrincipalType {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Token => "token",
        }
    }
}

/// Authenticated caller handed to lifecycle operations.
///
/// Verification happens upstream. This type only carries the resulting
/// identity triple plus any provider username mapping found in the claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    user_id: String,
    groups: Vec<String>,
    principal_type: PrincipalType,
    #[serde(default)]
    provider_usernames: BTreeMap<String, String>,
}

impl Principal {
    /// Creates a human principal.
    #[must_use]
    pub fn user(user_id: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            groups,
            principal_type: PrincipalType::User,
            provider_usernames: BTreeMap::new(),
        }
    }

    /// Creates a trusted service principal.
    #[must_use]
    pub fn service(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            groups: Vec::new(),
            principal_type: PrincipalType::Token,
            provider_usernames: BTreeMap::new(),
        }
    }

    /// Attaches the claim-provided provider username mapping.
    #[must_use]
    pub fn with_provider_usernames(mut self, provider_usernames: BTreeMap<String, String>) -> Self {
        self.provider_usernames = provider_usernames;
        self
    }

    /// Returns the caller user id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        self.user_id.as_str()
    }

    /// Returns the caller group memberships.
    #[must_use]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Returns how the caller authenticated.
    #[must_use]
    pub fn principal_type(&self) -> PrincipalType {
        self.principal_type
    }

    /// Returns whether the caller is a trusted service.
    #[must_use]
    pub fn is_service(&self) -> bool {
        self.principal_type == PrincipalType::Token
    }

    /// Returns claim-provided provider usernames.
    #[must_use]
    pub fn provider_usernames(&self) -> &BTreeMap<String, String> {
        &self.provider_usernames
    }
}
