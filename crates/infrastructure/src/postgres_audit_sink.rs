use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;

use passage_application::{AuditEvent, AuditSink};
use passage_core::{AppError, AppResult};

/// PostgreSQL-backed append-only audit sink.
#[derive(Clone)]
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    /// Creates a sink with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn append_event(&self, event: AuditEvent) -> AppResult<()> {
        let provider_name = event
            .provider
            .as_ref()
            .map(|provider| provider.name().to_owned());

        sqlx::query(
            r#"
            INSERT INTO audit_events (
                subject,
                action,
                resource_type,
                resource_id,
                detail,
                provider_name,
                error,
                request_document
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.subject)
        .bind(event.action.as_str())
        .bind(event.resource_type)
        .bind(event.resource_id)
        .bind(event.detail)
        .bind(provider_name)
        .bind(event.error)
        .bind(event.request.map(Json))
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Store(format!("failed to append audit event: {error}")))?;

        Ok(())
    }
}
