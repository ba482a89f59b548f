pub mod deadline;
pub mod scope;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::payment::{Disposition, PaymentRequest, Stage};
use crate::errors::DomainError;

/// Transition sources for a payment request. The first group is driven
/// by human actions; the `*Expired`/`*Lapsed` events are raised only by
/// the unattended sweeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageEvent {
    Submit,
    ClearCam,
    RouteFinalApproval,
    HoldForCredit,
    Approve,
    Reject,
    MoveToTrash,
    Restore,
    DraftExpired,
    CamExpired,
    CreditDeadlineLapsed,
}

impl StageEvent {
    pub fn is_timed(&self) -> bool {
        matches!(self, Self::DraftExpired | Self::CamExpired | Self::CreditDeadlineLapsed)
    }
}

/// Policy knobs for the timed transitions. The interval a scheduler
/// runs on is a deployment concern; these durations are correctness
/// requirements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepPolicy {
    pub stage_expiry: Duration,
    pub trash_retention: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self { stage_expiry: Duration::hours(52), trash_retention: Duration::days(15) }
    }
}

impl SweepPolicy {
    pub fn new(expiry_hours: i64, trash_retention_days: i64) -> Self {
        Self {
            stage_expiry: Duration::hours(expiry_hours),
            trash_retention: Duration::days(trash_retention_days),
        }
    }

    /// Purge eligibility: sat in trash past retention and never
    /// finally approved.
    pub fn purgeable(&self, request: &PaymentRequest, now: DateTime<Utc>) -> bool {
        if request.stage != Stage::TrashPending || request.approved == Disposition::Approved {
            return false;
        }
        match request.timers.trash_started_at {
            Some(entered) => now - entered > self.trash_retention,
            None => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
    pub event: StageEvent,
    pub verdict: Option<Disposition>,
}

/// Apply one event against the guarded transition table, mutating the
/// request's stage, timers, disposition and history in one step.
///
/// Freeze flags participate in the guards: a frozen Draft/CAM never
/// accepts its expiry event. Timed events act only on `Pending`
/// requests.
pub fn apply(
    request: &mut PaymentRequest,
    event: StageEvent,
    policy: &SweepPolicy,
    remarks: &str,
    now: DateTime<Utc>,
) -> Result<StageTransition, DomainError> {
    use Stage::{Account, Cam, CreditPending, Draft, InitialAccount, TrashPending};

    if event.is_timed() && request.approved != Disposition::Pending {
        return Err(DomainError::InvalidStageTransition { stage: request.stage, event });
    }

    let from = request.stage;
    let mut verdict = None;

    let to = match (from, event) {
        (Draft, StageEvent::Submit) => {
            request.timers.cam_started_at = Some(now);
            request.timers.draft_frozen_at = None;
            Cam
        }
        (Cam, StageEvent::ClearCam) => {
            request.timers.cam_frozen_at = None;
            Account
        }
        (Account, StageEvent::RouteFinalApproval) => InitialAccount,
        (Account, StageEvent::HoldForCredit) => {
            if request.credit.is_none() {
                return Err(DomainError::InvariantViolation(
                    "credit terms are required before holding for credit".to_owned(),
                ));
            }
            CreditPending
        }
        (stage, StageEvent::Approve) if stage.is_review_stage() => {
            request.record_verdict(Disposition::Approved, now)?;
            verdict = Some(Disposition::Approved);
            stage
        }
        (stage, StageEvent::Reject) if stage.is_review_stage() => {
            request.record_verdict(Disposition::Rejected, now)?;
            verdict = Some(Disposition::Rejected);
            stage
        }
        (stage, StageEvent::MoveToTrash) if stage != TrashPending => {
            if request.approved == Disposition::Approved {
                return Err(DomainError::InvariantViolation(
                    "approved requests are never trashed".to_owned(),
                ));
            }
            request.timers.trash_started_at = Some(now);
            TrashPending
        }
        (TrashPending, StageEvent::Restore) => {
            if request.approved != Disposition::Pending {
                return Err(DomainError::InvariantViolation(
                    "only pending requests can be restored to draft".to_owned(),
                ));
            }
            request.timers.trash_started_at = None;
            request.timers.draft_started_at = now;
            Draft
        }
        (Draft, StageEvent::DraftExpired) => {
            if request.timers.draft_frozen_at.is_some() {
                return Err(DomainError::StageFrozen { stage: Draft });
            }
            if now - request.timers.draft_started_at <= policy.stage_expiry {
                return Err(DomainError::NotYetDue { stage: Draft });
            }
            request.timers.trash_started_at = Some(now);
            TrashPending
        }
        (Cam, StageEvent::CamExpired) => {
            if request.timers.cam_frozen_at.is_some() {
                return Err(DomainError::StageFrozen { stage: Cam });
            }
            let anchor =
                request.timers.cam_started_at.unwrap_or(request.timers.draft_started_at);
            if now - anchor <= policy.stage_expiry {
                return Err(DomainError::NotYetDue { stage: Cam });
            }
            request.timers.trash_started_at = Some(now);
            TrashPending
        }
        (CreditPending, StageEvent::CreditDeadlineLapsed) => {
            let lapsed = request
                .credit
                .as_ref()
                .and_then(|terms| deadline::parse_deadline(&terms.deadline))
                .is_some_and(|deadline| deadline <= now);
            if !lapsed {
                return Err(DomainError::NotYetDue { stage: CreditPending });
            }
            // The 52-hour draft clock restarts from the lapse.
            request.timers.draft_started_at = now;
            Draft
        }
        (stage, event) => {
            return Err(DomainError::InvalidStageTransition { stage, event });
        }
    };

    request.stage = to;
    request.append_history(to, remarks, now);

    Ok(StageTransition { from, to, event, verdict })
}

/// Mark the current stage as being worked by a human, which suppresses
/// its expiry sweep until thawed. Only Draft and CAM carry freeze flags.
pub fn freeze(request: &mut PaymentRequest, now: DateTime<Utc>) -> Result<(), DomainError> {
    match request.stage {
        Stage::Draft => {
            request.timers.draft_frozen_at = Some(now);
            Ok(())
        }
        Stage::Cam => {
            request.timers.cam_frozen_at = Some(now);
            Ok(())
        }
        stage => Err(DomainError::InvariantViolation(format!(
            "stage {} carries no freeze flag",
            stage.as_str()
        ))),
    }
}

pub fn thaw(request: &mut PaymentRequest) {
    request.timers.draft_frozen_at = None;
    request.timers.cam_frozen_at = None;
}
