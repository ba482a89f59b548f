use async_trait::async_trait;
use thiserror::Error;

use payflow_core::chain::DependencyUpdate;
use payflow_core::domain::approval::{Approval, ApprovalId};
use payflow_core::domain::payment::{PaymentRequest, PaymentRequestId, Stage};
use payflow_core::domain::records::{
    AdjustmentEntry, Bill, CreditEntry, DebitEntry, Project, PurchaseOrder,
};
use payflow_core::ledger::ApprovedPayment;
use payflow_core::stages::scope::Actor;

pub mod approval;
pub mod counter;
pub mod ledger;
pub mod memory;
pub mod payment;
pub mod users;

pub use approval::SqlApprovalRepository;
pub use counter::SqlCounterRepository;
pub use ledger::SqlLedgerRepository;
pub use memory::{
    InMemoryApprovalRepository, InMemoryCounterRepository, InMemoryLedgerRepository,
    InMemoryPaymentRequestRepository, InMemoryUserDirectory,
};
pub use payment::SqlPaymentRequestRepository;
pub use users::SqlUserDirectory;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// One page of results plus the total across the whole filtered set.
#[derive(Clone, Debug)]
pub struct PageOf<T> {
    pub items: Vec<T>,
    pub total: u64,
}

#[async_trait]
pub trait PaymentRequestRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &PaymentRequestId,
    ) -> Result<Option<PaymentRequest>, RepositoryError>;

    async fn save(&self, request: &PaymentRequest) -> Result<(), RepositoryError>;

    /// Stage-scoped listing with optional free-text search over the
    /// request id, project reference and PO number.
    async fn list_in_stages(
        &self,
        stages: &[Stage],
        search: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<PageOf<PaymentRequest>, RepositoryError>;

    /// Sweep input: every request still `pending` in the given stage.
    async fn list_stage_candidates(
        &self,
        stage: Stage,
    ) -> Result<Vec<PaymentRequest>, RepositoryError>;

    /// Purge input: trashed requests that never received final
    /// approval (pending or rejected).
    async fn list_trash_candidates(&self) -> Result<Vec<PaymentRequest>, RepositoryError>;

    /// Persist a stage transition only if the stored row is still in
    /// `expected_stage`, appending the request's newest history entry
    /// in the same transaction. Returns false when another writer got
    /// there first.
    async fn commit_transition(
        &self,
        request: &PaymentRequest,
        expected_stage: Stage,
    ) -> Result<bool, RepositoryError>;

    async fn delete(&self, id: &PaymentRequestId) -> Result<bool, RepositoryError>;

    /// Finally-approved requests for a project, as the aggregates
    /// consume them.
    async fn list_approved_payments(
        &self,
        project_ref: &str,
    ) -> Result<Vec<ApprovedPayment>, RepositoryError>;
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn find_project(&self, project_ref: &str) -> Result<Option<Project>, RepositoryError>;

    async fn list_projects(
        &self,
        search: Option<&str>,
        group: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<PageOf<Project>, RepositoryError>;

    async fn credits_for(&self, project_ref: &str) -> Result<Vec<CreditEntry>, RepositoryError>;

    async fn debits_for(&self, project_ref: &str) -> Result<Vec<DebitEntry>, RepositoryError>;

    async fn adjustments_for(
        &self,
        project_ref: &str,
    ) -> Result<Vec<AdjustmentEntry>, RepositoryError>;

    async fn purchase_orders_for(
        &self,
        project_ref: &str,
    ) -> Result<Vec<PurchaseOrder>, RepositoryError>;

    async fn bills_for_pos(&self, po_numbers: &[String]) -> Result<Vec<Bill>, RepositoryError>;

    async fn group_credits(&self, group: &str) -> Result<Vec<CreditEntry>, RepositoryError>;

    async fn group_debits(&self, group: &str) -> Result<Vec<DebitEntry>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError>;

    /// Upsert the approval and its approver list atomically, writing
    /// the derived `current_approver` in the same transaction.
    async fn save(&self, approval: &Approval) -> Result<(), RepositoryError>;

    /// Persist a mutated approval only if the stored row's
    /// `current_approver` still matches what the caller decided
    /// against. Returns false on a stale write.
    async fn save_if_current(
        &self,
        approval: &Approval,
        expected_current: Option<&str>,
    ) -> Result<bool, RepositoryError>;

    /// Record a dependency resolution at most once; a second attempt
    /// for the same pair is a no-op returning false.
    async fn mark_dependency_once(
        &self,
        update: &DependencyUpdate,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait CounterRepository: Send + Sync {
    /// Atomically increment and return the per-key monotonic counter.
    async fn next(&self, counter_key: &str) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_actor(&self, user_ref: &str) -> Result<Option<Actor>, RepositoryError>;

    async fn upsert_actor(
        &self,
        actor: &Actor,
        name: &str,
    ) -> Result<(), RepositoryError>;
}
