use std::collections::HashMap;

use async_trait::async_trait;
use passage_application::UserProfileRepository;
use passage_core::{AppError, AppResult};
use passage_domain::UserProfile;
use tokio::sync::RwLock;

/// In-memory user profile repository implementation.
#[derive(Debug, Default)]
pub struct InMemoryUserProfileRepository {
    profiles: RwLock<HashMap<String, UserProfile>>,
}

impl InMemoryUserProfileRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl UserProfileRepository for InMemoryUserProfileRepository {
    async fn insert(&self, profile: &UserProfile) -> AppResult<()> {
        let mut profiles = self.profiles.write().await;
        if profiles.contains_key(profile.id()) {
            return Err(AppError::Conflict(format!(
                "user profile '{}' already exists",
                profile.id()
            )));
        }

        profiles.insert(profile.id().to_owned(), profile.clone());
        Ok(())
    }

    async fn update(&self, profile: &UserProfile) -> AppResult<()> {
        let mut profiles = self.profiles.write().await;
        let Some(stored) = profiles.get_mut(profile.id()) else {
            return Err(AppError::NotFound(format!(
                "user profile '{}' does not exist",
                profile.id()
            )));
        };

        *stored = profile.clone();
        Ok(())
    }

    async fn find(&self, user_id: &str) -> AppResult<Option<UserProfile>> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn list(&self) -> AppResult<Vec<UserProfile>> {
        let mut values: Vec<UserProfile> = self.profiles.read().await.values().cloned().collect();
        values.sort_by(|left, right| left.id().cmp(right.id()));
        Ok(values)
    }
}
