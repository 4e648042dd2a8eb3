use chrono::{DateTime, Utc};
use passage_core::{AppResult, Principal};
use tracing::{info, warn};

use crate::{AccessRequestService, TransitionOutcome};

/// Default service principal the sweep acts as.
pub const DEFAULT_SWEEP_PRINCIPAL: &str = "internal-cron";

/// Counters from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Requests inspected.
    pub examined: usize,
    /// Requests moved to expired, including partial failures.
    pub expired: usize,
    /// Expired requests where at least one provider failed to revoke.
    pub partially_failed: usize,
    /// Requests whose expire call returned an error.
    pub failed: usize,
}

/// Expires every approved request past its expiry.
///
/// Safe to re-run: expired requests are filtered out before any provider call.
#[derive(Clone)]
pub struct ExpirationSweep {
    service: AccessRequestService,
    principal: Principal,
}

impl ExpirationSweep {
    /// Creates a sweep acting as the named service principal.
    #[must_use]
    pub fn new(service: AccessRequestService, principal_name: impl Into<String>) -> Self {
        Self {
            service,
            principal: Principal::service(principal_name),
        }
    }

    /// Runs one pass using `now` as the cut-off.
    pub async fn run_once(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let requests = self.service.list(&self.principal).await?;
        let mut report = SweepReport {
            examined: requests.len(),
            ..SweepReport::default()
        };

        for request in requests
            .into_iter()
            .filter(|request| request.is_due_for_expiration(now))
        {
            info!(
                request_id = %request.id(),
                role = %request.role_ref().name,
                requester = request.requested_by(),
                expires = ?request.status().expires_at(),
                ttl = request.details().ttl(),
                "revoking access request"
            );

            match self.service.expire(&self.principal, request.id(), None).await {
                Ok(TransitionOutcome::Completed(_)) => report.expired += 1,
                Ok(TransitionOutcome::PartiallyFailed { error, .. }) => {
                    warn!(
                        request_id = %request.id(),
                        error = %error,
                        "access request expired with provider failures"
                    );
                    report.expired += 1;
                    report.partially_failed += 1;
                }
                Err(error) => {
                    warn!(
                        request_id = %request.id(),
                        error = %error,
                        "failed to expire access request"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
