//! In-memory fakes shared by service tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use passage_core::{AppError, AppResult};
use passage_domain::{
    AccessRequest, AccessRequestId, AccessRequestState, AccessRoleRef, Credential, ProviderConfig, UserProfile,
};
use tokio::sync::Mutex;

use crate::{
    AccessProvider, AccessRequestRepository, AuditEvent, AuditSink, CredentialResolver,
    ProviderFactory, ProviderStatusWriter, UserProfileRepository,
};

#[derive(Default)]
pub(crate) struct FakeAccessRequestRepository {
    pub(crate) requests: Mutex<BTreeMap<AccessRequestId, AccessRequest>>,
}

#[async_trait]
impl AccessRequestRepository for FakeAccessRequestRepository {
    async fn insert(&self, request: &AccessRequest) -> AppResult<()> {
        self.requests
            .lock()
            .await
            .insert(request.id(), request.clone());
        Ok(())
    }

    async fn update_if_state(
        &self,
        request: &AccessRequest,
        expected: AccessRequestState,
    ) -> AppResult<()> {
        let mut requests = self.requests.lock().await;
        let Some(existing) = requests.get_mut(&request.id()) else {
            return Err(AppError::NotFound(request.id().to_string()));
        };
        if existing.state() != expected {
            return Err(AppError::Conflict(format!(
                "access request '{}' is '{}', expected '{}'",
                request.id(),
                existing.state().as_str(),
                expected.as_str()
            )));
        }
        *existing = request.clone();
        Ok(())
    }

    async fn delete(&self, id: AccessRequestId) -> AppResult<()> {
        self.requests
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    async fn find(&self, id: AccessRequestId) -> AppResult<Option<AccessRequest>> {
        Ok(self.requests.lock().await.get(&id).cloned())
    }

    async fn list(&self) -> AppResult<Vec<AccessRequest>> {
        Ok(self.requests.lock().await.values().cloned().collect())
    }
}

#[derive(Default)]
pub(crate) struct FakeUserProfileRepository {
    pub(crate) profiles: Mutex<BTreeMap<String, UserProfile>>,
}

#[async_trait]
impl UserProfileRepository for FakeUserProfileRepository {
    async fn insert(&self, profile: &UserProfile) -> AppResult<()> {
        self.profiles
            .lock()
            .await
            .insert(profile.id().to_owned(), profile.clone());
        Ok(())
    }

    async fn update(&self, profile: &UserProfile) -> AppResult<()> {
        self.insert(profile).await
    }

    async fn find(&self, user_id: &str) -> AppResult<Option<UserProfile>> {
        Ok(self.profiles.lock().await.get(user_id).cloned())
    }

    async fn list(&self) -> AppResult<Vec<UserProfile>> {
        Ok(self.profiles.lock().await.values().cloned().collect())
    }
}

#[derive(Default)]
pub(crate) struct RecordingAuditSink {
    pub(crate) events: Mutex<Vec<AuditEvent>>,
    pub(crate) fail: bool,
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn append_event(&self, event: AuditEvent) -> AppResult<()> {
        if self.fail {
            return Err(AppError::Internal("audit bus unavailable".to_owned()));
        }
        self.events.lock().await.push(event);
        Ok(())
    }
}

pub(crate) struct NoCredentials;

#[async_trait]
impl CredentialResolver for NoCredentials {
    async fn get_credentials(&self, name: &str) -> AppResult<Credential> {
        Err(AppError::NotFound(format!("credential '{name}' does not exist")))
    }
}

#[derive(Default)]
pub(crate) struct Directory {
    pub(crate) members: Mutex<BTreeSet<(String, String)>>,
    pub(crate) grants: Mutex<usize>,
    pub(crate) revokes: Mutex<usize>,
}

pub(crate) struct GroupProvider {
    group: String,
    username: String,
    fail: bool,
    directory: Arc<Directory>,
}

#[async_trait]
impl AccessProvider for GroupProvider {
    async fn grant_access(
        &self,
        _request: &AccessRequest,
        status: &ProviderStatusWriter,
    ) -> AppResult<()> {
        *self.directory.grants.lock().await += 1;
        if self.fail {
            return Err(AppError::Provider(format!("group '{}' is locked", self.group)));
        }
        self.directory
            .members
            .lock()
            .await
            .insert((self.group.clone(), self.username.clone()));
        status.granted(self.group.clone()).await;
        Ok(())
    }

    async fn revoke_access(
        &self,
        _request: &AccessRequest,
        status: &ProviderStatusWriter,
    ) -> AppResult<()> {
        *self.directory.revokes.lock().await += 1;
        let removed = self
            .directory
            .members
            .lock()
            .await
            .remove(&(self.group.clone(), self.username.clone()));
        let details = if removed {
            self.group.clone()
        } else {
            "already removed from group".to_owned()
        };
        status.revoked(details).await;
        Ok(())
    }

    async fn list_users_with_access(&self, _role: &AccessRoleRef) -> AppResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn is_access_expired(&self, _request: &AccessRequest) -> AppResult<bool> {
        Ok(false)
    }
}

pub(crate) struct GroupFactory {
    pub(crate) directory: Arc<Directory>,
}

impl ProviderFactory for GroupFactory {
    fn build(
        &self,
        config: &ProviderConfig,
        _credential: &Credential,
    ) -> AppResult<Arc<dyn AccessProvider>> {
        Ok(Arc::new(GroupProvider {
            group: config.required_parameter("group")?.to_owned(),
            username: config.parameter("username").unwrap_or("").to_owned(),
            fail: config.parameter("fail") == Some("true"),
            directory: Arc::clone(&self.directory),
        }))
    }
}
