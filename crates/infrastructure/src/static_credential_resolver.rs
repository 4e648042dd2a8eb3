use std::collections::HashMap;

use async_trait::async_trait;
use passage_application::CredentialResolver;
use passage_core::{AppError, AppResult};
use passage_domain::Credential;

/// Credential resolver over a fixed set loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialResolver {
    credentials: HashMap<String, Credential>,
}

impl StaticCredentialResolver {
    /// Creates a resolver. Later entries win on duplicate names.
    #[must_use]
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Self {
        Self {
            credentials: credentials
                .into_iter()
                .map(|credential| (credential.name().to_owned(), credential))
                .collect(),
        }
    }

    /// Returns the number of loaded credentials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Returns whether no credentials are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn get_credentials(&self, name: &str) -> AppResult<Credential> {
        self.credentials
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("credential '{name}' does not exist")))
    }
}
