//! YAML documents for the role catalog and provider credentials.

use std::path::Path;

use passage_application::RoleCatalog;
use passage_core::{AppError, AppResult};
use passage_domain::{AccessRole, ApprovalRule, Credential};
use serde::Deserialize;

use crate::StaticCredentialResolver;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogDocument {
    #[serde(default)]
    roles: Vec<AccessRole>,
    #[serde(default)]
    approval_rules: Vec<ApprovalRule>,
}

#[derive(Debug, Deserialize)]
struct CredentialsDocument {
    #[serde(default)]
    credentials: Vec<Credential>,
}

/// Parses and validates a role catalog document.
///
/// ```yaml
/// approvalRules:
///   - name: leads
///     users: [carol]
/// roles:
///   - name: dev
///     approvalRuleRef: { name: leads }
///     providers:
///       - name: gitlab
///         provider: gitlab
///         credentialRef: { name: gitlab-bot }
///         parameters: { group: platform/dev }
/// ```
pub fn parse_role_catalog(source: &str) -> AppResult<RoleCatalog> {
    let document: CatalogDocument = serde_yaml::from_str(source)
        .map_err(|error| AppError::Configuration(format!("invalid role catalog: {error}")))?;

    RoleCatalog::new(document.roles, document.approval_rules)
        .map_err(|error| AppError::Configuration(format!("invalid role catalog: {error}")))
}

/// Reads and validates the role catalog file.
pub fn load_role_catalog(path: &Path) -> AppResult<RoleCatalog> {
    parse_role_catalog(read_file(path)?.as_str())
}

/// Parses a credentials document into a resolver.
pub fn parse_credentials(source: &str) -> AppResult<StaticCredentialResolver> {
    let document: CredentialsDocument = serde_yaml::from_str(source)
        .map_err(|error| AppError::Configuration(format!("invalid credentials file: {error}")))?;

    if let Some(unnamed) = document
        .credentials
        .iter()
        .position(|credential| credential.name().trim().is_empty())
    {
        return Err(AppError::Configuration(format!(
            "credential at index {unnamed} has no name"
        )));
    }

    Ok(StaticCredentialResolver::new(document.credentials))
}

/// Reads the credentials file.
pub fn load_credentials(path: &Path) -> AppResult<StaticCredentialResolver> {
    parse_credentials(read_file(path)?.as_str())
}

fn read_file(path: &Path) -> AppResult<String> {
    std::fs::read_to_string(path).map_err(|error| {
        AppError::Configuration(format!("failed to read '{}': {error}", path.display()))
    })
}
