use async_trait::async_trait;
use tracing::{info, warn};

use passage_application::{AuditEvent, AuditSink};
use passage_core::AppResult;

/// Console audit sink writing each event as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl TracingAuditSink {
    /// Creates a console audit sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append_event(&self, event: AuditEvent) -> AppResult<()> {
        let provider = event
            .provider
            .as_ref()
            .map(|provider| provider.name())
            .unwrap_or_default();
        let state = event
            .request
            .as_ref()
            .map(|request| request.state().as_str())
            .unwrap_or_default();
        let detail = event.detail.as_deref().unwrap_or_default();

        if event.action.is_error() {
            warn!(
                target: "passage::audit",
                subject = %event.subject,
                action = event.action.as_str(),
                resource_type = %event.resource_type,
                resource_id = %event.resource_id,
                provider,
                state,
                detail,
                error = event.error.as_deref().unwrap_or_default(),
                "audit event"
            );
        } else {
            info!(
                target: "passage::audit",
                subject = %event.subject,
                action = event.action.as_str(),
                resource_type = %event.resource_type,
                resource_id = %event.resource_id,
                provider,
                state,
                detail,
                "audit event"
            );
        }

        Ok(())
    }
}
