use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use payflow_core::chain::{format_approval_code, propagation_update};
use payflow_core::domain::approval::{Approval, ApprovalId, ApproverStatus, SubjectRef};
use payflow_core::errors::ApplicationError;
use payflow_db::repositories::{ApprovalRepository, CounterRepository};

use super::{decision_rejection, storage_error};
use crate::notify::Notifier;

pub struct ApprovalService {
    approvals: Arc<dyn ApprovalRepository>,
    counters: Arc<dyn CounterRepository>,
    notifier: Arc<dyn Notifier>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DecisionOutcome {
    pub approval: Approval,
    /// Whether this decision resolved the chain and pushed a dependency
    /// update downstream.
    pub propagated: bool,
}

impl ApprovalService {
    pub fn new(
        approvals: Arc<dyn ApprovalRepository>,
        counters: Arc<dyn CounterRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { approvals, counters, notifier }
    }

    pub async fn create(
        &self,
        subject: SubjectRef,
        created_by: &str,
        approver_refs: Vec<String>,
    ) -> Result<Approval, ApplicationError> {
        if approver_refs.is_empty() {
            return Err(payflow_core::errors::DomainError::InvariantViolation(
                "an approval chain needs at least one approver".to_owned(),
            )
            .into());
        }

        let counter = self
            .counters
            .next(&format!("approval:{created_by}"))
            .await
            .map_err(storage_error)?;
        let approval = Approval::create(
            ApprovalId::generate(),
            format_approval_code(counter),
            subject,
            created_by,
            approver_refs,
            Utc::now(),
        );
        self.approvals.save(&approval).await.map_err(storage_error)?;

        if let Some(first) = approval.current_approver.as_deref() {
            self.notifier
                .notify(
                    first,
                    &format!("approval {} awaits your sign-off", approval.approval_code),
                    None,
                )
                .await;
        }
        tracing::info!(
            event_name = "approval.created",
            approval_id = %approval.id.0,
            approval_code = %approval.approval_code,
            approvers = approval.approvers.len(),
            "approval chain created"
        );
        Ok(approval)
    }

    /// Record the blocking approver's verdict. The write is conditional
    /// on the chain still pointing at the approver we loaded, so two
    /// racing decisions cannot both land.
    pub async fn decide(
        &self,
        approval_id: &ApprovalId,
        actor: &str,
        verdict: ApproverStatus,
        remarks: Option<String>,
    ) -> Result<DecisionOutcome, ApplicationError> {
        let mut approval = self.find(approval_id).await?;
        let expected_current = approval.current_approver.clone();

        approval
            .record_decision(actor, verdict, remarks, Utc::now())
            .map_err(decision_rejection)?;

        let committed = self
            .approvals
            .save_if_current(&approval, expected_current.as_deref())
            .await
            .map_err(storage_error)?;
        if !committed {
            return Err(ApplicationError::Conflict(
                "approval chain changed concurrently; refresh and retry".to_owned(),
            ));
        }

        let propagated = self.propagate(&approval).await?;

        if let Some(next) = approval.current_approver.as_deref() {
            if verdict == ApproverStatus::Approved {
                self.notifier
                    .notify(
                        next,
                        &format!("approval {} awaits your sign-off", approval.approval_code),
                        None,
                    )
                    .await;
            }
        }

        Ok(DecisionOutcome { approval, propagated })
    }

    /// Creator-only reopen of a rejected chain, under the same
    /// conditional write as a decision.
    pub async fn resubmit(
        &self,
        approval_id: &ApprovalId,
        actor: &str,
    ) -> Result<Approval, ApplicationError> {
        let mut approval = self.find(approval_id).await?;
        let expected_current = approval.current_approver.clone();

        approval.resubmit(actor, Utc::now())?;

        let committed = self
            .approvals
            .save_if_current(&approval, expected_current.as_deref())
            .await
            .map_err(storage_error)?;
        if !committed {
            return Err(ApplicationError::Conflict(
                "approval chain changed concurrently; refresh and retry".to_owned(),
            ));
        }

        if let Some(current) = approval.current_approver.as_deref() {
            self.notifier
                .notify(
                    current,
                    &format!("approval {} was resubmitted for your review", approval.approval_code),
                    None,
                )
                .await;
        }
        Ok(approval)
    }

    pub async fn find(&self, approval_id: &ApprovalId) -> Result<Approval, ApplicationError> {
        self.approvals
            .find_by_id(approval_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| ApplicationError::NotFound {
                entity: "approval",
                id: approval_id.0.clone(),
            })
    }

    /// Push the dependency update for a resolved chain. The repository
    /// marks each (activity, dependency) pair at most once, so a
    /// re-resolved chain after resubmission does not fire twice.
    async fn propagate(&self, approval: &Approval) -> Result<bool, ApplicationError> {
        let Some(update) = propagation_update(approval) else {
            return Ok(false);
        };
        let marked =
            self.approvals.mark_dependency_once(&update).await.map_err(storage_error)?;
        if marked {
            tracing::info!(
                event_name = "approval.dependency_propagated",
                approval_id = %approval.id.0,
                activity_id = %update.activity_id,
                dependency_id = %update.dependency_id,
                status = %update.status,
                "dependency status propagated"
            );
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use payflow_core::domain::approval::{
        ApprovalId, ApproverStatus, SubjectKind, SubjectRef,
    };
    use payflow_core::errors::ApplicationError;
    use payflow_db::repositories::{
        ApprovalRepository, InMemoryApprovalRepository, InMemoryCounterRepository,
    };

    use super::ApprovalService;
    use crate::notify::testing::RecordingNotifier;

    fn subject() -> SubjectRef {
        SubjectRef {
            kind: SubjectKind::PaymentRequest,
            id: "PR-1".to_string(),
            activity_id: None,
            dependency_id: None,
        }
    }

    fn subject_with_dependency() -> SubjectRef {
        SubjectRef {
            kind: SubjectKind::WorkPlan,
            id: "WP-1".to_string(),
            activity_id: Some("ACT-1".to_string()),
            dependency_id: Some("DEP-2".to_string()),
        }
    }

    fn harness() -> (ApprovalService, Arc<InMemoryApprovalRepository>, Arc<RecordingNotifier>) {
        let approvals = Arc::new(InMemoryApprovalRepository::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = ApprovalService::new(
            approvals.clone(),
            Arc::new(InMemoryCounterRepository::default()),
            notifier.clone(),
        );
        (service, approvals, notifier)
    }

    #[tokio::test]
    async fn creation_numbers_the_chain_and_notifies_the_first_approver() {
        let (service, _approvals, notifier) = harness();
        let approval = service
            .create(subject(), "u-creator", vec!["u-a".to_string(), "u-b".to_string()])
            .await
            .expect("create");

        assert_eq!(approval.approval_code, "APRV00001");
        assert_eq!(approval.current_approver.as_deref(), Some("u-a"));
        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "u-a");
    }

    #[tokio::test]
    async fn creation_rejects_an_empty_approver_list() {
        let (service, _approvals, _notifier) = harness();
        let error = service
            .create(subject(), "u-creator", Vec::new())
            .await
            .expect_err("empty chain");
        assert!(matches!(error, ApplicationError::Domain(_)));
    }

    #[tokio::test]
    async fn decisions_advance_the_chain_and_notify_the_next_approver() {
        let (service, _approvals, notifier) = harness();
        let approval = service
            .create(subject(), "u-creator", vec!["u-a".to_string(), "u-b".to_string()])
            .await
            .expect("create");

        let outcome = service
            .decide(&approval.id, "u-a", ApproverStatus::Approved, None)
            .await
            .expect("first decision");
        assert_eq!(outcome.approval.current_approver.as_deref(), Some("u-b"));
        assert!(!outcome.propagated);

        let sent = notifier.sent().await;
        assert_eq!(sent.last().map(|(to, _)| to.as_str()), Some("u-b"));
    }

    #[tokio::test]
    async fn out_of_turn_and_repeat_decisions_map_to_distinct_errors() {
        let (service, _approvals, _notifier) = harness();
        let approval = service
            .create(subject(), "u-creator", vec!["u-a".to_string(), "u-b".to_string()])
            .await
            .expect("create");

        let error = service
            .decide(&approval.id, "u-b", ApproverStatus::Approved, None)
            .await
            .expect_err("not the blocking approver");
        assert!(matches!(error, ApplicationError::Forbidden(_)));

        service
            .decide(&approval.id, "u-a", ApproverStatus::Rejected, Some("no PO".to_string()))
            .await
            .expect("rejection");
        let error = service
            .decide(&approval.id, "u-a", ApproverStatus::Approved, None)
            .await
            .expect_err("rejected entry is already decided");
        assert!(matches!(error, ApplicationError::Conflict(_)));
    }

    #[tokio::test]
    async fn stale_reads_surface_as_conflicts() {
        let (service, approvals, _notifier) = harness();
        let approval = service
            .create(subject(), "u-creator", vec!["u-a".to_string(), "u-b".to_string()])
            .await
            .expect("create");

        // Another writer advances the chain between our read and write.
        let mut moved = approval.clone();
        moved
            .record_decision("u-a", ApproverStatus::Approved, None, chrono::Utc::now())
            .expect("advance");
        approvals.save(&moved).await.expect("outside write");

        let error = service
            .decide(&approval.id, "u-a", ApproverStatus::Approved, None)
            .await
            .expect_err("conditional write must fail");
        assert!(matches!(error, ApplicationError::Conflict(_)));
    }

    #[tokio::test]
    async fn resolution_propagates_the_dependency_exactly_once() {
        let (service, _approvals, _notifier) = harness();
        let approval = service
            .create(subject_with_dependency(), "u-creator", vec!["u-a".to_string()])
            .await
            .expect("create");

        let outcome = service
            .decide(&approval.id, "u-a", ApproverStatus::Rejected, Some("no budget".to_string()))
            .await
            .expect("rejection resolves the chain");
        assert!(outcome.propagated);

        // Resubmit and re-resolve: the mark already exists.
        service.resubmit(&approval.id, "u-creator").await.expect("resubmit");
        let outcome = service
            .decide(&approval.id, "u-a", ApproverStatus::Approved, None)
            .await
            .expect("second resolution");
        assert!(!outcome.propagated);
    }

    #[tokio::test]
    async fn missing_chains_report_not_found() {
        let (service, _approvals, _notifier) = harness();
        let error = service
            .decide(
                &ApprovalId("AP-404".to_string()),
                "u-a",
                ApproverStatus::Approved,
                None,
            )
            .await
            .expect_err("unknown approval");
        assert!(matches!(error, ApplicationError::NotFound { entity: "approval", .. }));
    }
}
