use std::path::{Path, PathBuf};

use passage_core::{AppError, AppResult};
use passage_domain::Credential;
use tokio::sync::OnceCell;

/// Reads a secret referenced by path without blocking the runtime.
pub(crate) async fn read_secret_file(path: &Path, purpose: &str) -> AppResult<String> {
    tokio::fs::read_to_string(path).await.map_err(|error| {
        AppError::Configuration(format!(
            "failed to read {purpose} file '{}': {error}",
            path.display()
        ))
    })
}

/// Bearer token given inline or read once from a file on first use.
pub(crate) enum ApiToken {
    /// Token stored on the credential.
    Inline(String),
    /// Token stored in the file named by `credentialsfile`.
    File {
        path: PathBuf,
        loaded: OnceCell<String>,
    },
}

impl ApiToken {
    /// Reads `token`, falling back to the file named by `credentialsfile`.
    pub(crate) fn from_credential(credential: &Credential) -> AppResult<Self> {
        let token = credential.get_string("token").trim();
        if !token.is_empty() {
            return Ok(Self::Inline(token.to_owned()));
        }

        let path = credential.require("credentialsfile").map_err(|_| {
            AppError::Configuration(format!(
                "credential '{}' needs either 'token' or 'credentialsfile'",
                credential.name()
            ))
        })?;

        Ok(Self::File {
            path: PathBuf::from(path),
            loaded: OnceCell::new(),
        })
    }

    /// Returns the token, reading the file the first time.
    pub(crate) async fn value(&self, purpose: &str) -> AppResult<&str> {
        match self {
            Self::Inline(token) => Ok(token.as_str()),
            Self::File { path, loaded } => loaded
                .get_or_try_init(|| async {
                    let raw = read_secret_file(path, purpose).await?;
                    let token = raw.trim();
                    if token.is_empty() {
                        return Err(AppError::Configuration(format!(
                            "{purpose} file '{}' is empty",
                            path.display()
                        )));
                    }
                    Ok(token.to_owned())
                })
                .await
                .map(String::as_str),
        }
    }
}
