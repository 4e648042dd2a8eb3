use std::collections::HashMap;

use async_trait::async_trait;
use passage_application::AccessRequestRepository;
use passage_core::{AppError, AppResult};
use passage_domain::{AccessRequest, AccessRequestId, AccessRequestState};
use tokio::sync::RwLock;

/// In-memory access request repository implementation.
#[derive(Debug, Default)]
pub struct InMemoryAccessRequestRepository {
    requests: RwLock<HashMap<AccessRequestId, AccessRequest>>,
}

impl InMemoryAccessRequestRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl AccessRequestRepository for InMemoryAccessRequestRepository {
    async fn insert(&self, request: &AccessRequest) -> AppResult<()> {
        if !request.id().is_assigned() {
            return Err(AppError::Validation(
                "access request must be admitted before it is stored".to_owned(),
            ));
        }

        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id()) {
            return Err(AppError::Conflict(format!(
                "access request '{}' already exists",
                request.id()
            )));
        }

        requests.insert(request.id(), request.clone());
        Ok(())
    }

    async fn update_if_state(
        &self,
        request: &AccessRequest,
        expected: AccessRequestState,
    ) -> AppResult<()> {
        let mut requests = self.requests.write().await;
        let Some(stored) = requests.get_mut(&request.id()) else {
            return Err(AppError::NotFound(format!(
                "access request '{}' does not exist",
                request.id()
            )));
        };

        if stored.state() != expected {
            return Err(AppError::Conflict(format!(
                "access request '{}' is '{}', expected '{}'",
                request.id(),
                stored.state().as_str(),
                expected.as_str()
            )));
        }

        *stored = request.clone();
        Ok(())
    }

    async fn delete(&self, id: AccessRequestId) -> AppResult<()> {
        self.requests
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("access request '{id}' does not exist")))
    }

    async fn find(&self, id: AccessRequestId) -> AppResult<Option<AccessRequest>> {
        Ok(self.requests.read().await.get(&id).cloned())
    }

    async fn list(&self) -> AppResult<Vec<AccessRequest>> {
        let requests = self.requests.read().await;

        let mut values: Vec<AccessRequest> = requests.values().cloned().collect();
        values.sort_by(|left, right| {
            left.created_at()
                .cmp(&right.created_at())
                .then_with(|| left.id().cmp(&right.id()))
        });

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use passage_application::AccessRequestRepository;
    use passage_core::AppError;
    use passage_domain::{
        AccessRequest, AccessRequestDetails, AccessRequestId, AccessRequestState, AccessRoleRef,
    };
    use serde_json::Map;
    use uuid::Uuid;

    use super::InMemoryAccessRequestRepository;

    fn admitted(role: &str, offset_minutes: i64) -> AccessRequest {
        let mut request = AccessRequest::new(
            AccessRoleRef::new(role),
            AccessRequestDetails::new("on-call", Map::new(), "1h"),
            Utc::now() + Duration::minutes(offset_minutes),
        );
        assert!(request.admit().is_ok());
        request
    }

    #[tokio::test]
    async fn insert_rejects_unadmitted_and_duplicate_requests() {
        let repository = InMemoryAccessRequestRepository::new();
        let draft = AccessRequest::new(
            AccessRoleRef::new("dev"),
            AccessRequestDetails::new("", Map::new(), "1h"),
            Utc::now(),
        );
        assert!(matches!(
            repository.insert(&draft).await,
            Err(AppError::Validation(_))
        ));

        let request = admitted("dev", 0);
        assert!(repository.insert(&request).await.is_ok());
        assert!(matches!(
            repository.insert(&request).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn update_replaces_the_full_record() {
        let repository = InMemoryAccessRequestRepository::new();
        let mut request = admitted("dev", 0);
        assert!(repository.insert(&request).await.is_ok());

        request.set_status_approved("carol");
        assert!(
            repository
                .update_if_state(&request, AccessRequestState::Pending)
                .await
                .is_ok()
        );

        let stored = repository.find(request.id()).await;
        assert!(matches!(stored, Ok(Some(stored)) if stored == request));
    }

    #[tokio::test]
    async fn update_rejects_a_record_moved_by_another_writer() {
        let repository = InMemoryAccessRequestRepository::new();
        let request = admitted("dev", 0);
        assert!(repository.insert(&request).await.is_ok());

        let mut approved = request.clone();
        approved.set_status_approved("carol");
        let mut denied = request.clone();
        denied.set_status_denied("dave");

        assert!(
            repository
                .update_if_state(&approved, AccessRequestState::Pending)
                .await
                .is_ok()
        );
        assert!(matches!(
            repository
                .update_if_state(&denied, AccessRequestState::Pending)
                .await,
            Err(AppError::Conflict(_))
        ));

        let stored = repository.find(request.id()).await;
        assert!(matches!(
            stored,
            Ok(Some(stored)) if stored.state() == AccessRequestState::Approved
        ));
    }

    #[tokio::test]
    async fn update_and_delete_report_missing_records() {
        let repository = InMemoryAccessRequestRepository::new();
        let request = admitted("dev", 0);

        assert!(matches!(
            repository
                .update_if_state(&request, AccessRequestState::Pending)
                .await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            repository
                .delete(AccessRequestId::from_uuid(Uuid::new_v4()))
                .await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_orders_by_creation_time() {
        let repository = InMemoryAccessRequestRepository::new();
        let later = admitted("ops", 5);
        let earlier = admitted("dev", -5);
        assert!(repository.insert(&later).await.is_ok());
        assert!(repository.insert(&earlier).await.is_ok());

        let listed = repository
            .list()
            .await
            .unwrap_or_else(|error| panic!("list failed: {error}"));
        let roles: Vec<_> = listed
            .iter()
            .map(|request| request.role_ref().name.as_str())
            .collect();
        assert_eq!(roles, vec!["dev", "ops"]);

        assert!(repository.delete(earlier.id()).await.is_ok());
        assert!(matches!(repository.find(earlier.id()).await, Ok(None)));
    }
}
