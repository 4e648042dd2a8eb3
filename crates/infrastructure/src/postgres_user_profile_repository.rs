use async_trait::async_trait;
use passage_application::UserProfileRepository;
use passage_core::{AppError, AppResult};
use passage_domain::UserProfile;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

/// PostgreSQL-backed user profile repository.
#[derive(Clone)]
pub struct PostgresUserProfileRepository {
    pool: PgPool,
}

impl PostgresUserProfileRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct UserProfileRow {
    document: Json<UserProfile>,
}

#[async_trait]
impl UserProfileRepository for PostgresUserProfileRepository {
    async fn insert(&self, profile: &UserProfile) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_profiles (id, username, document)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(profile.id())
        .bind(profile.username())
        .bind(Json(profile))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) => {
                if let sqlx::Error::Database(database_error) = &error
                    && database_error.code().as_deref() == Some("23505")
                {
                    return Err(AppError::Conflict(format!(
                        "user profile '{}' already exists",
                        profile.id()
                    )));
                }

                Err(AppError::Store(format!(
                    "failed to insert user profile '{}': {error}",
                    profile.id()
                )))
            }
        }
    }

    async fn update(&self, profile: &UserProfile) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE user_profiles
            SET username = $2,
                document = $3,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(profile.id())
        .bind(profile.username())
        .bind(Json(profile))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to update user profile '{}': {error}",
                profile.id()
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "user profile '{}' does not exist",
                profile.id()
            )));
        }

        Ok(())
    }

    async fn find(&self, user_id: &str) -> AppResult<Option<UserProfile>> {
        let row = sqlx::query_as::<_, UserProfileRow>(
            r#"
            SELECT document
            FROM user_profiles
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!("failed to load user profile '{user_id}': {error}"))
        })?;

        Ok(row.map(|row| row.document.0))
    }

    async fn list(&self) -> AppResult<Vec<UserProfile>> {
        let rows = sqlx::query_as::<_, UserProfileRow>(
            r#"
            SELECT document
            FROM user_profiles
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Store(format!("failed to list user profiles: {error}")))?;

        Ok(rows.into_iter().map(|row| row.document.0).collect())
    }
}
