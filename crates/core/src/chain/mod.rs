//! Sequential sign-off protocol.
//!
//! An [`Approval`] is generic over what it signs off; the subject kinds
//! live in [`crate::domain::approval`]. The single blocking approver is
//! always derived from the approver list, never edited directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{Approval, ApprovalId, Approver, ApproverStatus, SubjectRef};
use crate::errors::DomainError;

/// Collapsed outcome of a chain. Unambiguous only when every approver
/// approved or at least one rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainResolution {
    InFlight,
    Approved,
    Rejected,
}

pub fn resolution(approvers: &[Approver]) -> ChainResolution {
    if approvers.iter().any(|approver| approver.status == ApproverStatus::Rejected) {
        return ChainResolution::Rejected;
    }
    if !approvers.is_empty()
        && approvers.iter().all(|approver| approver.status == ApproverStatus::Approved)
    {
        return ChainResolution::Approved;
    }
    ChainResolution::InFlight
}

/// Sort by sequence, then pick the first approver still blocking the
/// chain. A rejected entry pins the chain on that approver until it is
/// resubmitted.
pub fn recompute_current(approvers: &mut [Approver]) -> Option<String> {
    approvers.sort_by_key(|approver| approver.sequence);
    approvers
        .iter()
        .find(|approver| {
            matches!(approver.status, ApproverStatus::Pending | ApproverStatus::Rejected)
        })
        .map(|approver| approver.user_ref.clone())
}

/// Status propagated to a dependency row on a related planning document
/// once the chain resolves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyUpdate {
    pub activity_id: String,
    pub dependency_id: String,
    pub status: String,
    pub remark: String,
}

/// The update to push downstream, if any. `None` while the chain is
/// still in flight or the subject carries no dependency pair. Callers
/// must apply the update at most once per resolution.
pub fn propagation_update(approval: &Approval) -> Option<DependencyUpdate> {
    let (activity_id, dependency_id) = approval.subject.dependency_pair()?;
    let (status, remark) = match resolution(&approval.approvers) {
        ChainResolution::Approved => ("approved".to_owned(), "approval chain cleared".to_owned()),
        ChainResolution::Rejected => {
            let remark = approval
                .approvers
                .iter()
                .find(|approver| approver.status == ApproverStatus::Rejected)
                .and_then(|approver| approver.remarks.clone())
                .unwrap_or_else(|| "rejected in approval chain".to_owned());
            ("not allowed".to_owned(), remark)
        }
        ChainResolution::InFlight => return None,
    };
    Some(DependencyUpdate {
        activity_id: activity_id.to_owned(),
        dependency_id: dependency_id.to_owned(),
        status,
        remark,
    })
}

pub fn format_approval_code(counter: u64) -> String {
    format!("APRV{counter:05}")
}

pub fn format_request_code(counter: u64) -> String {
    format!("PAY{counter:05}")
}

impl Approval {
    /// Snapshot the approver list at creation time; sequence is the
    /// 1-based position in the given order.
    pub fn create(
        id: ApprovalId,
        approval_code: String,
        subject: SubjectRef,
        created_by: impl Into<String>,
        approver_refs: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut approvers: Vec<Approver> = approver_refs
            .into_iter()
            .enumerate()
            .map(|(index, user_ref)| Approver {
                user_ref,
                sequence: index as u32 + 1,
                status: ApproverStatus::Pending,
                remarks: None,
            })
            .collect();
        let current_approver = recompute_current(&mut approvers);
        Self {
            id,
            approval_code,
            subject,
            created_by: created_by.into(),
            approvers,
            current_approver,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a decision for the blocking approver. Only the identity
    /// in `current_approver` may decide, and only while its own entry
    /// is still exactly `pending`.
    pub fn record_decision(
        &mut self,
        actor: &str,
        verdict: ApproverStatus,
        remarks: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if verdict == ApproverStatus::Pending {
            return Err(DomainError::InvariantViolation(
                "decision must be approved or rejected".to_owned(),
            ));
        }
        if self.current_approver.as_deref() != Some(actor) {
            return Err(DomainError::NotCurrentApprover {
                actor: actor.to_owned(),
                expected: self.current_approver.clone(),
            });
        }
        let entry = self
            .approvers
            .iter_mut()
            .find(|approver| approver.user_ref == actor)
            .ok_or_else(|| DomainError::NotCurrentApprover {
                actor: actor.to_owned(),
                expected: None,
            })?;
        if entry.status != ApproverStatus::Pending {
            return Err(DomainError::AlreadyDecided {
                user_ref: entry.user_ref.clone(),
                status: entry.status.as_str().to_owned(),
            });
        }

        entry.status = verdict;
        entry.remarks = remarks;
        self.current_approver = recompute_current(&mut self.approvers);
        self.updated_at = now;
        Ok(())
    }

    /// Reopen a rejected chain: the creator flips the pinned rejected
    /// entry back to `pending` so the same approver can re-decide.
    pub fn resubmit(&mut self, actor: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        if actor != self.created_by {
            return Err(DomainError::InvariantViolation(
                "only the chain creator may resubmit".to_owned(),
            ));
        }
        let entry = self
            .approvers
            .iter_mut()
            .find(|approver| approver.status == ApproverStatus::Rejected)
            .ok_or_else(|| {
                DomainError::InvariantViolation("no rejected approver to resubmit".to_owned())
            })?;

        entry.status = ApproverStatus::Pending;
        self.current_approver = recompute_current(&mut self.approvers);
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::approval::{
        Approval, ApprovalId, ApproverStatus, SubjectKind, SubjectRef,
    };
    use crate::errors::DomainError;

    use super::{format_approval_code, propagation_update, recompute_current};

    fn approval(approvers: &[&str]) -> Approval {
        Approval::create(
            ApprovalId("AP-1".to_string()),
            format_approval_code(7),
            SubjectRef {
                kind: SubjectKind::PaymentRequest,
                id: "PR-1".to_string(),
                activity_id: None,
                dependency_id: None,
            },
            "u-creator",
            approvers.iter().map(|user| user.to_string()).collect(),
            Utc::now(),
        )
    }

    #[test]
    fn creation_snapshots_ordered_pending_approvers() {
        let approval = approval(&["u-a", "u-b", "u-c"]);
        assert_eq!(approval.approval_code, "APRV00007");
        assert_eq!(
            approval.approvers.iter().map(|a| a.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(approval.current_approver.as_deref(), Some("u-a"));
    }

    #[test]
    fn chain_advances_in_sequence_and_clears_when_done() {
        let mut approval = approval(&["u-a", "u-b"]);
        approval
            .record_decision("u-a", ApproverStatus::Approved, None, Utc::now())
            .expect("first approver");
        assert_eq!(approval.current_approver.as_deref(), Some("u-b"));

        approval
            .record_decision("u-b", ApproverStatus::Approved, Some("ok".to_string()), Utc::now())
            .expect("second approver");
        assert_eq!(approval.current_approver, None);
    }

    #[test]
    fn only_the_blocking_approver_may_decide() {
        let mut approval = approval(&["u-a", "u-b"]);
        let error = approval
            .record_decision("u-b", ApproverStatus::Approved, None, Utc::now())
            .expect_err("u-b is not yet blocking");
        assert!(matches!(error, DomainError::NotCurrentApprover { .. }));
    }

    #[test]
    fn rejection_pins_the_chain_until_resubmitted() {
        let mut approval = approval(&["u-a", "u-b"]);
        approval
            .record_decision("u-a", ApproverStatus::Rejected, Some("missing PO".to_string()), Utc::now())
            .expect("rejection");
        assert_eq!(approval.current_approver.as_deref(), Some("u-a"));

        // The rejected entry cannot be re-decided directly.
        let error = approval
            .record_decision("u-a", ApproverStatus::Approved, None, Utc::now())
            .expect_err("already decided");
        assert!(matches!(error, DomainError::AlreadyDecided { .. }));

        // The creator reopens it.
        approval.resubmit("u-creator", Utc::now()).expect("resubmit");
        assert_eq!(approval.approvers[0].status, ApproverStatus::Pending);
        approval
            .record_decision("u-a", ApproverStatus::Approved, None, Utc::now())
            .expect("re-decision after resubmit");
        assert_eq!(approval.current_approver.as_deref(), Some("u-b"));
    }

    #[test]
    fn resubmit_is_creator_only() {
        let mut approval = approval(&["u-a"]);
        approval
            .record_decision("u-a", ApproverStatus::Rejected, None, Utc::now())
            .expect("rejection");
        let error = approval.resubmit("u-a", Utc::now()).expect_err("not the creator");
        assert!(matches!(error, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn current_approver_is_null_iff_all_approved() {
        let mut approval = approval(&["u-a", "u-b"]);
        for approver in &mut approval.approvers {
            approver.status = ApproverStatus::Approved;
        }
        assert_eq!(recompute_current(&mut approval.approvers), None);

        approval.approvers[1].status = ApproverStatus::Rejected;
        assert_eq!(recompute_current(&mut approval.approvers).as_deref(), Some("u-b"));
    }

    #[test]
    fn propagation_fires_only_for_resolved_chains_with_a_dependency() {
        let mut approval = approval(&["u-a"]);
        assert_eq!(propagation_update(&approval), None);

        approval.subject.activity_id = Some("ACT-1".to_string());
        approval.subject.dependency_id = Some("DEP-2".to_string());
        assert_eq!(propagation_update(&approval), None);

        approval
            .record_decision("u-a", ApproverStatus::Rejected, Some("no budget".to_string()), Utc::now())
            .expect("rejection");
        let update = propagation_update(&approval).expect("resolved with dependency");
        assert_eq!(update.status, "not allowed");
        assert_eq!(update.remark, "no budget");
        assert_eq!(update.activity_id, "ACT-1");
    }
}
