pub mod approvals;
pub mod payments;
pub mod reports;

use std::time::Duration;

use payflow_core::errors::{ApplicationError, DomainError};
use payflow_db::repositories::RepositoryError;

pub use approvals::{ApprovalService, DecisionOutcome};
pub use payments::{EnrichedRequest, PaymentKind, PaymentQueueService, QueueBadges, QueuePage, QueueQuery};
pub use reports::{BalanceReport, BalanceReportService, BalanceRow, GrandTotals};

/// Bound on the aggregate fan-out behind list/report endpoints; a slow
/// store surfaces as a retryable failure instead of a hung request.
pub(crate) const AGGREGATE_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn storage_error(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

/// Map chain-protocol rejections onto the caller-facing taxonomy:
/// wrong actor is a permission problem, a decided entry is a conflict
/// the caller can refresh away.
pub(crate) fn decision_rejection(error: DomainError) -> ApplicationError {
    match error {
        DomainError::NotCurrentApprover { .. } => ApplicationError::Forbidden(error.to_string()),
        DomainError::AlreadyDecided { .. } => ApplicationError::Conflict(error.to_string()),
        other => ApplicationError::Domain(other),
    }
}
