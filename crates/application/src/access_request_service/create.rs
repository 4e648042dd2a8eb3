use super::*;

impl AccessRequestService {
    /// Creates a pending request for a catalog role.
    ///
    /// The role's approval rule is copied onto the request so later catalog
    /// edits never change who may act on it.
    pub async fn create(
        &self,
        actor: &Principal,
        input: CreateAccessRequestInput,
    ) -> AppResult<AccessRequest> {
        let CreateAccessRequestInput {
            role,
            justification,
            attributes,
            ttl,
            trace,
        } = input;

        let role = self.catalog.role(role.as_str()).ok_or_else(|| {
            AppError::Validation(format!("role '{role}' does not exist"))
        })?;
        let approval_rule = self.catalog.approval_rule_for(role);
        let provider_usernames = self.resolve_provider_usernames(actor).await?;

        let now = Utc::now();
        let mut request = AccessRequest::new(
            AccessRoleRef::new(role.name()),
            AccessRequestDetails::new(justification, attributes, ttl),
            now,
        );
        request.set_expiration(now)?;
        request
            .admit()?
            .set_approval_rule(approval_rule)
            .set_status_pending()
            .set_requester(actor.user_id())
            .set_provider_usernames(provider_usernames)
            .set_trace(trace_or_new(trace));

        self.repository.insert(&request).await?;

        self.emit(request_event(
            actor,
            AuditAction::AccessRequestCreated,
            &request,
            format!(
                "[{}] Created AccessRequest [{}] for Role [{}]",
                actor.user_id(),
                request.id(),
                request.role_ref().name
            ),
        ))
        .await;

        Ok(request)
    }

    /// Merges stored profile usernames with claim-provided ones.
    ///
    /// Non-blank claim values win. A missing profile counts as empty. Any
    /// provider still blank after the merge is a validation error.
    async fn resolve_provider_usernames(
        &self,
        actor: &Principal,
    ) -> AppResult<BTreeMap<String, String>> {
        let mut usernames = self
            .profiles
            .find(actor.user_id())
            .await?
            .map(|profile| profile.provider_usernames().clone())
            .unwrap_or_default();

        for (provider, username) in actor.provider_usernames() {
            if !username.trim().is_empty() {
                usernames.insert(provider.clone(), username.clone());
            }
        }

        let merged = UserProfile::new(actor.user_id(), actor.user_id(), usernames);
        merged.validate()?;

        Ok(merged.provider_usernames().clone())
    }
}
