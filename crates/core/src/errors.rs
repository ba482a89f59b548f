use thiserror::Error;

use crate::domain::payment::{Disposition, Stage};
use crate::stages::StageEvent;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid transition from {stage:?} using event {event:?}")]
    InvalidStageTransition { stage: Stage, event: StageEvent },
    #[error("stage {stage:?} is frozen; timed transition suppressed")]
    StageFrozen { stage: Stage },
    #[error("stage {stage:?} has not reached its timed threshold")]
    NotYetDue { stage: Stage },
    #[error("disposition is already final ({current:?}) and cannot change")]
    DispositionFinal { current: Disposition },
    #[error("actor `{actor}` is not the current approver")]
    NotCurrentApprover { actor: String, expected: Option<String> },
    #[error("approver `{user_ref}` has already decided ({status})")]
    AlreadyDecided { user_ref: String, status: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Application-layer failures, mapped by callers onto their transport.
///
/// `NotFound`, `Forbidden` and `Conflict` are deliberately distinct so a
/// caller can tell "refresh and retry" apart from "you may not do this"
/// and from "this does not exist".
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("aggregate query timed out: {0}")]
    Timeout(String),
}

impl ApplicationError {
    /// Whether the caller can expect a retry to succeed without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Timeout(_))
    }
}
