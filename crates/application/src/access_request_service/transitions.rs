use super::*;

impl AccessRequestService {
    /// Approves a pending request and grants access on every provider.
    ///
    /// The state change is written before any provider is called, so a
    /// concurrent deny or approve loses with a conflict and never reaches
    /// the providers.
    ///
    /// The request moves to approved even when some providers fail. Those
    /// failures come back as [`TransitionOutcome::PartiallyFailed`].
    pub async fn approve(
        &self,
        actor: &Principal,
        id: AccessRequestId,
        trace: Option<String>,
    ) -> AppResult<TransitionOutcome> {
        let mut request = self.load(id).await?;
        Self::require_permission(actor, &request)?;
        request.ensure_transition(AccessRequestState::Approved)?;

        let previous = request.state();
        request
            .set_status_approved(actor.user_id())
            .set_trace(trace_or_new(trace))
            .touch(Utc::now());
        self.repository.update_if_state(&request, previous).await?;

        let fanout = self.run_fanout(FanoutAction::Approve, &mut request).await;
        self.record_provider_statuses(&mut request).await;

        let detail = format!(
            "[{}] Approved AccessRequest [{}] Role [{}] added to user [{}]",
            actor.user_id(),
            request.id(),
            request.role_ref().name,
            request.requested_by()
        );
        self.finish_transition(actor, FanoutAction::Approve, request, fanout, detail)
            .await
    }

    /// Denies a pending request. No provider is called.
    pub async fn deny(
        &self,
        actor: &Principal,
        id: AccessRequestId,
        trace: Option<String>,
    ) -> AppResult<AccessRequest> {
        let mut request = self.load(id).await?;
        Self::require_permission(actor, &request)?;
        request.ensure_transition(AccessRequestState::Denied)?;

        let previous = request.state();
        request
            .set_status_denied(actor.user_id())
            .set_trace(trace_or_new(trace))
            .touch(Utc::now());
        self.repository.update_if_state(&request, previous).await?;

        self.emit(request_event(
            actor,
            AuditAction::AccessRequestDenied,
            &request,
            format!(
                "[{}] Denied AccessRequest [{}] for Role [{}]",
                actor.user_id(),
                request.id(),
                request.role_ref().name
            ),
        ))
        .await;

        Ok(request)
    }

    /// Expires an approved request and revokes access on every provider.
    pub async fn expire(
        &self,
        actor: &Principal,
        id: AccessRequestId,
        trace: Option<String>,
    ) -> AppResult<TransitionOutcome> {
        let mut request = self.load(id).await?;
        Self::require_permission(actor, &request)?;
        request.ensure_transition(AccessRequestState::Expired)?;

        let previous = request.state();
        request
            .set_status_expired()
            .set_trace(trace_or_new(trace))
            .touch(Utc::now());
        self.repository.update_if_state(&request, previous).await?;

        let fanout = self.run_fanout(FanoutAction::Expire, &mut request).await;
        self.record_provider_statuses(&mut request).await;

        let detail = format!(
            "[{}] Expired AccessRequest [{}] Role [{}] removed from user [{}]",
            actor.user_id(),
            request.id(),
            request.role_ref().name,
            request.requested_by()
        );
        self.finish_transition(actor, FanoutAction::Expire, request, fanout, detail)
            .await
    }

    /// Deletes the request record.
    ///
    /// Access already granted on providers is left in place.
    pub async fn delete(&self, actor: &Principal, id: AccessRequestId) -> AppResult<()> {
        let request = self.load(id).await?;
        Self::require_permission(actor, &request)?;

        self.repository.delete(id).await?;

        self.emit(request_event(
            actor,
            AuditAction::AccessRequestDeleted,
            &request,
            format!(
                "[{}] Deleted AccessRequest [{}] for Role [{}]",
                actor.user_id(),
                request.id(),
                request.role_ref().name
            ),
        ))
        .await;

        Ok(())
    }

    /// Persists provider statuses gathered after the transition was claimed.
    ///
    /// The state is already stored, so a failure here only loses the status
    /// board. A writer that moved the request on in the meantime wins.
    async fn record_provider_statuses(&self, request: &mut AccessRequest) {
        request.touch(Utc::now());
        if let Err(error) = self
            .repository
            .update_if_state(request, request.state())
            .await
        {
            warn!(
                request_id = %request.id(),
                state = request.state().as_str(),
                error = %error,
                "failed to store provider statuses"
            );
        }
    }

    async fn run_fanout(
        &self,
        action: FanoutAction,
        request: &mut AccessRequest,
    ) -> Result<(), FanoutError> {
        let role_name = request.role_ref().name.clone();
        let Some(role) = self.catalog.role(role_name.as_str()) else {
            warn!(
                request_id = %request.id(),
                role = %role_name,
                action = action.as_str(),
                "role missing from catalog"
            );
            return Err(FanoutError::role_unavailable(role_name.as_str()));
        };

        self.fanout
            .execute(action, request, role, &self.cancellation)
            .await
    }

    async fn finish_transition(
        &self,
        actor: &Principal,
        action: FanoutAction,
        request: AccessRequest,
        fanout: Result<(), FanoutError>,
        detail: String,
    ) -> AppResult<TransitionOutcome> {
        let audit_action = match action {
            FanoutAction::Approve => AuditAction::AccessRequestApproved,
            FanoutAction::Expire => AuditAction::AccessRequestExpired,
        };
        self.emit(request_event(actor, audit_action, &request, detail))
            .await;

        let Err(error) = fanout else {
            return Ok(TransitionOutcome::Completed(request));
        };

        let role = self.catalog.role(request.role_ref().name.as_str());
        for failure in error.failures() {
            let provider = role.and_then(|role| {
                role.providers()
                    .iter()
                    .find(|config| config.name() == failure.provider_name)
                    .cloned()
            });

            let mut event = request_event(
                actor,
                action.error_audit_action(),
                &request,
                format!(
                    "[{}] Provider [{}] failed to {} AccessRequest [{}]",
                    actor.user_id(),
                    failure.provider_name,
                    action.as_str(),
                    request.id()
                ),
            );
            event.provider = provider;
            event.error = Some(failure.error.clone());
            self.emit(event).await;
        }

        Ok(TransitionOutcome::PartiallyFailed { request, error })
    }
}
