//! Shared primitives for all Rust crates in Passage.

#![forbid(unsafe_code)]

/// Caller identity primitives shared across services.
pub mod auth;

use thiserror::Error;

pub use auth::{Principal, PrincipalType};

/// Result type used across Passage crates.
pub type AppResult<T> = Result<T, AppError>;

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller is identified but blocked by an approval rule.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Provider binding cannot be built from its configuration or credentials.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// External provider call failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// Persistence layer failed.
    #[error("store error: {0}")]
    Store(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn store_errors_keep_message_verbatim() {
        let error = AppError::Store("connection reset".to_owned());
        assert_eq!(error.to_string(), "store error: connection reset");
    }
}
