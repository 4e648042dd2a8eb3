use std::collections::BTreeMap;

use passage_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Provider keys seeded into a fresh profile.
pub const DEFAULT_PROFILE_PROVIDERS: [&str; 5] = ["gitlab", "teleport", "google", "aws", "azure"];

/// Stored per-user settings used to resolve provider usernames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    provider_usernames: BTreeMap<String, String>,
}

impl UserProfile {
    /// Creates a profile.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        provider_usernames: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            provider_usernames,
        }
    }

    /// Creates the default profile with blank usernames for every known provider.
    #[must_use]
    pub fn default_for(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            username: id.clone(),
            id,
            provider_usernames: DEFAULT_PROFILE_PROVIDERS
                .iter()
                .map(|provider| ((*provider).to_owned(), String::new()))
                .collect(),
        }
    }

    /// Returns the user id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Returns the display username.
    #[must_use]
    pub fn username(&self) -> &str {
        self.username.as_str()
    }

    /// Returns provider usernames keyed by provider kind.
    #[must_use]
    pub fn provider_usernames(&self) -> &BTreeMap<String, String> {
        &self.provider_usernames
    }

    /// Replaces provider usernames.
    pub fn set_provider_usernames(&mut self, usernames: BTreeMap<String, String>) -> &mut Self {
        self.provider_usernames = usernames;
        self
    }

    /// Returns provider keys whose username is blank.
    #[must_use]
    pub fn missing_usernames(&self) -> Vec<&str> {
        self.provider_usernames
            .iter()
            .filter(|(_, username)| username.trim().is_empty())
            .map(|(provider, _)| provider.as_str())
            .collect()
    }

    /// Rejects profiles with blank provider usernames.
    pub fn validate(&self) -> AppResult<()> {
        let missing = self.missing_usernames();
        if missing.is_empty() {
            return Ok(());
        }

        Err(AppError::Validation(format!(
            "missing username: [{}]",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use passage_core::AppError;

    use super::{DEFAULT_PROFILE_PROVIDERS, UserProfile};

    #[test]
    fn default_profile_seeds_every_known_provider() {
        let profile = UserProfile::default_for("alice");
        assert_eq!(profile.username(), "alice");
        assert_eq!(
            profile.provider_usernames().len(),
            DEFAULT_PROFILE_PROVIDERS.len()
        );
        assert!(profile.validate().is_err());
    }

    #[test]
    fn validate_lists_blank_providers() {
        let profile = UserProfile::new(
            "alice",
            "alice",
            BTreeMap::from([
                ("aws".to_owned(), String::new()),
                ("gitlab".to_owned(), "alice.gl".to_owned()),
                ("google".to_owned(), " ".to_owned()),
            ]),
        );

        let result = profile.validate();
        assert!(
            matches!(result, Err(AppError::Validation(message)) if message == "missing username: [aws, google]")
        );
    }

    #[test]
    fn complete_profile_validates() {
        let profile = UserProfile::new(
            "alice",
            "alice",
            BTreeMap::from([("gitlab".to_owned(), "alice.gl".to_owned())]),
        );
        assert!(profile.validate().is_ok());
    }
}
