use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use passage_application::{DEFAULT_FANOUT_CONCURRENCY, DEFAULT_SWEEP_PRINCIPAL};
use passage_core::{AppError, AppResult};

/// Where audit events are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSinkKind {
    /// Structured log events.
    Console,
    /// The `audit_events` table.
    Database,
}

impl FromStr for AuditSinkKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "database" => Ok(Self::Database),
            other => Err(AppError::Validation(format!(
                "PASSAGE_AUDIT_SINK must be 'console' or 'database', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub catalog_path: PathBuf,
    pub credentials_path: Option<PathBuf>,
    pub sweep_interval: Duration,
    pub fanout_max_concurrency: usize,
    pub sweep_principal: String,
    pub audit_sink: AuditSinkKind,
    pub provider_timeout: Duration,
}

impl WorkerConfig {
    pub fn load() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let database_url = optional("DATABASE_URL").ok_or_else(|| {
            AppError::Validation(
                "DATABASE_URL is required; the expiration sweep reads requests from PostgreSQL"
                    .to_owned(),
            )
        })?;
        let catalog_path = optional("PASSAGE_CATALOG_PATH")
            .map(PathBuf::from)
            .ok_or_else(|| AppError::Validation("PASSAGE_CATALOG_PATH is required".to_owned()))?;
        let credentials_path = optional("PASSAGE_CREDENTIALS_PATH").map(PathBuf::from);
        let sweep_interval_seconds = parse_value(
            "PASSAGE_SWEEP_INTERVAL_SECONDS",
            optional("PASSAGE_SWEEP_INTERVAL_SECONDS"),
            60_u64,
        )?;
        let fanout_max_concurrency = parse_value(
            "PASSAGE_FANOUT_MAX_CONCURRENCY",
            optional("PASSAGE_FANOUT_MAX_CONCURRENCY"),
            DEFAULT_FANOUT_CONCURRENCY,
        )?;
        let sweep_principal = optional("PASSAGE_SWEEP_PRINCIPAL")
            .unwrap_or_else(|| DEFAULT_SWEEP_PRINCIPAL.to_owned());
        let audit_sink = optional("PASSAGE_AUDIT_SINK")
            .map(|value| value.parse::<AuditSinkKind>())
            .transpose()?
            .unwrap_or(AuditSinkKind::Console);
        let provider_timeout_seconds = parse_value(
            "PASSAGE_PROVIDER_TIMEOUT_SECONDS",
            optional("PASSAGE_PROVIDER_TIMEOUT_SECONDS"),
            15_u64,
        )?;

        if sweep_interval_seconds == 0 {
            return Err(AppError::Validation(
                "PASSAGE_SWEEP_INTERVAL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        if fanout_max_concurrency == 0 {
            return Err(AppError::Validation(
                "PASSAGE_FANOUT_MAX_CONCURRENCY must be greater than zero".to_owned(),
            ));
        }

        if provider_timeout_seconds == 0 {
            return Err(AppError::Validation(
                "PASSAGE_PROVIDER_TIMEOUT_SECONDS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            catalog_path,
            credentials_path,
            sweep_interval: Duration::from_secs(sweep_interval_seconds),
            fanout_max_concurrency,
            sweep_principal,
            audit_sink,
            provider_timeout: Duration::from_secs(provider_timeout_seconds),
        })
    }
}

fn parse_value<T>(name: &str, value: Option<String>, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(value) => value.parse::<T>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use passage_core::AppError;

    use super::{AuditSinkKind, WorkerConfig};

    fn load(values: &[(&str, &str)]) -> Result<WorkerConfig, AppError> {
        let values: HashMap<String, String> = values
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        WorkerConfig::from_lookup(|name| values.get(name).cloned())
    }

    const DATABASE_URL: (&str, &str) = ("DATABASE_URL", "postgres://localhost/passage");

    #[test]
    fn defaults_apply_when_only_required_values_are_set() {
        let config = load(&[DATABASE_URL, ("PASSAGE_CATALOG_PATH", "roles.yaml")])
            .unwrap_or_else(|error| panic!("load failed: {error}"));

        assert_eq!(config.catalog_path, PathBuf::from("roles.yaml"));
        assert_eq!(config.database_url, "postgres://localhost/passage");
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.fanout_max_concurrency, 8);
        assert_eq!(config.sweep_principal, "internal-cron");
        assert_eq!(config.audit_sink, AuditSinkKind::Console);
        assert_eq!(config.provider_timeout, Duration::from_secs(15));
    }

    #[test]
    fn catalog_path_is_required() {
        assert!(matches!(load(&[DATABASE_URL]), Err(AppError::Validation(_))));
    }

    #[test]
    fn database_url_is_required() {
        assert!(matches!(
            load(&[("PASSAGE_CATALOG_PATH", "roles.yaml")]),
            Err(AppError::Validation(message)) if message.contains("DATABASE_URL")
        ));
        assert!(matches!(
            load(&[("DATABASE_URL", "  "), ("PASSAGE_CATALOG_PATH", "roles.yaml")]),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn invalid_numbers_and_zero_values_are_rejected() {
        assert!(matches!(
            load(&[
                DATABASE_URL,
                ("PASSAGE_CATALOG_PATH", "roles.yaml"),
                ("PASSAGE_SWEEP_INTERVAL_SECONDS", "soon"),
            ]),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            load(&[
                DATABASE_URL,
                ("PASSAGE_CATALOG_PATH", "roles.yaml"),
                ("PASSAGE_FANOUT_MAX_CONCURRENCY", "0"),
            ]),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn audit_sink_parses_case_insensitively() {
        let config = load(&[
            DATABASE_URL,
            ("PASSAGE_CATALOG_PATH", "roles.yaml"),
            ("PASSAGE_AUDIT_SINK", "Database"),
        ])
        .unwrap_or_else(|error| panic!("load failed: {error}"));
        assert_eq!(config.audit_sink, AuditSinkKind::Database);

        assert!(matches!(
            load(&[
                DATABASE_URL,
                ("PASSAGE_CATALOG_PATH", "roles.yaml"),
                ("PASSAGE_AUDIT_SINK", "syslog"),
            ]),
            Err(AppError::Validation(_))
        ));
    }
}
