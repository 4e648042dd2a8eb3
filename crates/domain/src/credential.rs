use std::collections::BTreeMap;

use passage_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Named secret bundle referenced by provider bindings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    name: String,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

impl Credential {
    /// Creates a credential.
    #[must_use]
    pub fn new(name: impl Into<String>, data: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Returns the credential name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns a value, or empty when the key is missing.
    #[must_use]
    pub fn get_string(&self, key: &str) -> &str {
        self.data.get(key).map_or("", String::as_str)
    }

    /// Returns a non-blank value or a configuration error.
    pub fn require(&self, key: &str) -> AppResult<&str> {
        let value = self.get_string(key);
        if value.trim().is_empty() {
            return Err(AppError::Configuration(format!(
                "credential '{}' is missing field '{key}'",
                self.name
            )));
        }

        Ok(value)
    }
}

// Secret values stay out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Credential")
            .field("name", &self.name)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::Credential;

    #[test]
    fn require_reports_missing_field() {
        let credential = Credential::new(
            "gitlab",
            BTreeMap::from([("token".to_owned(), "glpat-123".to_owned())]),
        );

        assert_eq!(credential.require("token").ok(), Some("glpat-123"));
        assert_eq!(credential.get_string("email"), "");
        assert!(credential.require("email").is_err());
    }

    #[test]
    fn debug_output_hides_values() {
        let credential = Credential::new(
            "gitlab",
            BTreeMap::from([("token".to_owned(), "glpat-123".to_owned())]),
        );

        let rendered = format!("{credential:?}");
        assert!(rendered.contains("token"));
        assert!(!rendered.contains("glpat-123"));
    }
}
