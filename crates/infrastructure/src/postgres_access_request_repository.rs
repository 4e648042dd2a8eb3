use async_trait::async_trait;
use passage_application::AccessRequestRepository;
use passage_core::{AppError, AppResult};
use passage_domain::{AccessRequest, AccessRequestId, AccessRequestState};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

/// PostgreSQL-backed access request repository.
///
/// The full request is stored as a JSONB document; indexed columns mirror the
/// fields the expiration sweep and per-user listings filter on.
#[derive(Clone)]
pub struct PostgresAccessRequestRepository {
    pool: PgPool,
}

impl PostgresAccessRequestRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct AccessRequestRow {
    document: Json<AccessRequest>,
}

#[async_trait]
impl AccessRequestRepository for PostgresAccessRequestRepository {
    async fn insert(&self, request: &AccessRequest) -> AppResult<()> {
        if !request.id().is_assigned() {
            return Err(AppError::Validation(
                "access request must be admitted before it is stored".to_owned(),
            ));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO access_requests (
                id,
                role_name,
                state,
                requested_by,
                expires_at,
                document,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(request.id().as_uuid())
        .bind(request.role_ref().name.as_str())
        .bind(request.state().as_str())
        .bind(request.requested_by())
        .bind(request.status().expires_at())
        .bind(Json(request))
        .bind(request.created_at())
        .bind(request.updated_at())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) => {
                if let sqlx::Error::Database(database_error) = &error
                    && database_error.code().as_deref() == Some("23505")
                {
                    return Err(AppError::Conflict(format!(
                        "access request '{}' already exists",
                        request.id()
                    )));
                }

                Err(AppError::Store(format!(
                    "failed to insert access request '{}': {error}",
                    request.id()
                )))
            }
        }
    }

    async fn update_if_state(
        &self,
        request: &AccessRequest,
        expected: AccessRequestState,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE access_requests
            SET role_name = $2,
                state = $3,
                requested_by = $4,
                expires_at = $5,
                document = $6,
                updated_at = $7
            WHERE id = $1
              AND state = $8
            "#,
        )
        .bind(request.id().as_uuid())
        .bind(request.role_ref().name.as_str())
        .bind(request.state().as_str())
        .bind(request.requested_by())
        .bind(request.status().expires_at())
        .bind(Json(request))
        .bind(request.updated_at())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to update access request '{}': {error}",
                request.id()
            ))
        })?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let current = sqlx::query_scalar::<_, String>(
            "SELECT state FROM access_requests WHERE id = $1",
        )
        .bind(request.id().as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to load access request '{}' state: {error}",
                request.id()
            ))
        })?;

        match current {
            Some(current) => Err(AppError::Conflict(format!(
                "access request '{}' is '{current}', expected '{}'",
                request.id(),
                expected.as_str()
            ))),
            None => Err(AppError::NotFound(format!(
                "access request '{}' does not exist",
                request.id()
            ))),
        }
    }

    async fn delete(&self, id: AccessRequestId) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM access_requests WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Store(format!("failed to delete access request '{id}': {error}"))
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "access request '{id}' does not exist"
            )));
        }

        Ok(())
    }

    async fn find(&self, id: AccessRequestId) -> AppResult<Option<AccessRequest>> {
        let row = sqlx::query_as::<_, AccessRequestRow>(
            r#"
            SELECT document
            FROM access_requests
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!("failed to load access request '{id}': {error}"))
        })?;

        Ok(row.map(|row| row.document.0))
    }

    async fn list(&self) -> AppResult<Vec<AccessRequest>> {
        let rows = sqlx::query_as::<_, AccessRequestRow>(
            r#"
            SELECT document
            FROM access_requests
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Store(format!("failed to list access requests: {error}")))?;

        Ok(rows.into_iter().map(|row| row.document.0).collect())
    }
}
