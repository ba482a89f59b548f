use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentRequestId(pub String);

impl PaymentRequestId {
    /// Fresh random id for a newly drafted request.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Position in the routing pipeline. Exactly one holds at any instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Draft,
    Cam,
    Account,
    InitialAccount,
    CreditPending,
    TrashPending,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Cam => "cam",
            Self::Account => "account",
            Self::InitialAccount => "initial_account",
            Self::CreditPending => "credit_pending",
            Self::TrashPending => "trash_pending",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "cam" => Some(Self::Cam),
            "account" => Some(Self::Account),
            "initial_account" => Some(Self::InitialAccount),
            "credit_pending" => Some(Self::CreditPending),
            "trash_pending" => Some(Self::TrashPending),
            _ => None,
        }
    }

    /// Stages where a final human verdict may be recorded.
    pub fn is_review_stage(&self) -> bool {
        matches!(self, Self::Account | Self::InitialAccount)
    }
}

/// The final human verdict, orthogonal to pipeline position.
/// Transitions only `Pending -> {Approved, Rejected}`, never back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Pending,
    Approved,
    Rejected,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Credit terms carried only by credit-type requests. The deadline is
/// kept as the raw upstream text; parsing happens at computation time so
/// an unparseable value degrades to "no deadline" instead of failing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTerms {
    pub deadline: String,
    pub extension: Option<String>,
    pub remarks: Option<String>,
    pub user_ref: String,
}

/// Clock anchors consumed by the unattended sweeps. A `*_frozen_at`
/// timestamp marks a human actively working the item and suppresses the
/// matching timed transition while present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimers {
    pub draft_started_at: DateTime<Utc>,
    pub draft_frozen_at: Option<DateTime<Utc>>,
    pub cam_started_at: Option<DateTime<Utc>>,
    pub cam_frozen_at: Option<DateTime<Utc>>,
    pub trash_started_at: Option<DateTime<Utc>>,
}

impl StageTimers {
    pub fn starting_now(now: DateTime<Utc>) -> Self {
        Self {
            draft_started_at: now,
            draft_frozen_at: None,
            cam_started_at: None,
            cam_frozen_at: None,
            trash_started_at: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub stage: Stage,
    pub remarks: String,
    pub recorded_at: DateTime<Utc>,
}

/// One disbursement ask against a project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: PaymentRequestId,
    pub project_ref: String,
    pub po_number: Option<String>,
    /// Marks an instant payment type when present.
    pub pay_id: Option<String>,
    /// Marks a credit-type payment when present.
    pub cr_id: Option<String>,
    pub amount_paid: Decimal,
    /// Bank confirmation reference, set after disbursement.
    pub utr: Option<String>,
    pub approved: Disposition,
    pub stage: Stage,
    pub credit: Option<CreditTerms>,
    pub timers: StageTimers,
    pub status_history: Vec<StatusEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRequest {
    pub fn draft(
        id: PaymentRequestId,
        project_ref: impl Into<String>,
        amount_paid: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            project_ref: project_ref.into(),
            po_number: None,
            pay_id: None,
            cr_id: None,
            amount_paid,
            utr: None,
            approved: Disposition::Pending,
            stage: Stage::Draft,
            credit: None,
            timers: StageTimers::starting_now(now),
            status_history: vec![StatusEntry {
                stage: Stage::Draft,
                remarks: "created".to_owned(),
                recorded_at: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_instant(&self) -> bool {
        self.pay_id.as_deref().is_some_and(|value| !value.trim().is_empty())
    }

    pub fn is_credit(&self) -> bool {
        self.cr_id.as_deref().is_some_and(|value| !value.trim().is_empty())
    }

    pub fn has_po(&self) -> bool {
        self.po_number.as_deref().is_some_and(|value| !value.trim().is_empty())
    }

    pub fn is_utr_confirmed(&self) -> bool {
        self.utr.as_deref().is_some_and(|value| !value.trim().is_empty())
    }

    /// `Pending -> {Approved, Rejected}` only; a final verdict never
    /// reverts and can only be recorded in a review stage.
    pub fn record_verdict(
        &mut self,
        verdict: Disposition,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.approved != Disposition::Pending {
            return Err(DomainError::DispositionFinal { current: self.approved });
        }
        if verdict == Disposition::Pending {
            return Err(DomainError::InvariantViolation(
                "verdict must be approved or rejected".to_owned(),
            ));
        }
        if !self.stage.is_review_stage() {
            return Err(DomainError::InvariantViolation(format!(
                "verdict recorded outside a review stage ({})",
                self.stage.as_str()
            )));
        }

        self.approved = verdict;
        self.updated_at = now;
        Ok(())
    }

    pub fn append_history(&mut self, stage: Stage, remarks: impl Into<String>, now: DateTime<Utc>) {
        self.status_history.push(StatusEntry { stage, remarks: remarks.into(), recorded_at: now });
        self.updated_at = now;
    }
}
