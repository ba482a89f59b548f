pub mod chain;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ledger;
pub mod stages;

pub use chain::{
    format_approval_code, format_request_code, propagation_update, recompute_current,
    ChainResolution, DependencyUpdate,
};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::approval::{
    Approval, ApprovalId, Approver, ApproverStatus, SubjectKind, SubjectRef, SubjectRegistry,
};
pub use domain::payment::{
    CreditTerms, Disposition, PaymentRequest, PaymentRequestId, Stage, StageTimers, StatusEntry,
};
pub use domain::records::{
    coerce_amount, AdjustmentEntry, AdjustmentType, Bill, CreditEntry, DebitEntry, Project,
    PurchaseOrder,
};
pub use errors::{ApplicationError, DomainError};
pub use ledger::{
    compute_tcs, credit_balance, ApprovedPayment, ProjectBalance, ProjectRecords, TCS_THRESHOLD,
};
pub use stages::scope::{tab_retains, visible_stages, Actor, QueueTab};
pub use stages::{apply, freeze, thaw, StageEvent, StageTransition, SweepPolicy};
