use std::collections::HashMap;

use tokio::sync::RwLock;

use payflow_core::chain::DependencyUpdate;
use payflow_core::domain::approval::{Approval, ApprovalId};
use payflow_core::domain::payment::{PaymentRequest, PaymentRequestId, Stage};
use payflow_core::domain::records::{
    AdjustmentEntry, Bill, CreditEntry, DebitEntry, Project, PurchaseOrder,
};
use payflow_core::ledger::ApprovedPayment;
use payflow_core::stages::scope::Actor;

use super::{
    ApprovalRepository, CounterRepository, LedgerRepository, PageOf, PaymentRequestRepository,
    RepositoryError, UserDirectory,
};

#[derive(Default)]
pub struct InMemoryPaymentRequestRepository {
    requests: RwLock<HashMap<String, PaymentRequest>>,
}

impl InMemoryPaymentRequestRepository {
    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.requests.read().await.is_empty()
    }
}

fn matches_search(request: &PaymentRequest, search: Option<&str>) -> bool {
    let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) else {
        return true;
    };
    request.id.0.contains(term)
        || request.project_ref.contains(term)
        || request.po_number.as_deref().is_some_and(|po| po.contains(term))
}

#[async_trait::async_trait]
impl PaymentRequestRepository for InMemoryPaymentRequestRepository {
    async fn find_by_id(
        &self,
        id: &PaymentRequestId,
    ) -> Result<Option<PaymentRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn save(&self, request: &PaymentRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        requests.insert(request.id.0.clone(), request.clone());
        Ok(())
    }

    async fn list_in_stages(
        &self,
        stages: &[Stage],
        search: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<PageOf<PaymentRequest>, RepositoryError> {
        if stages.is_empty() {
            return Ok(PageOf { items: Vec::new(), total: 0 });
        }
        let requests = self.requests.read().await;
        let mut matched: Vec<PaymentRequest> = requests
            .values()
            .filter(|request| stages.contains(&request.stage))
            .filter(|request| matches_search(request, search))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matched.len() as u64;
        let start = (page.saturating_sub(1) as usize) * page_size as usize;
        let items = matched.into_iter().skip(start).take(page_size as usize).collect();
        Ok(PageOf { items, total })
    }

    async fn list_stage_candidates(
        &self,
        stage: Stage,
    ) -> Result<Vec<PaymentRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .filter(|request| {
                request.stage == stage
                    && request.approved == payflow_core::Disposition::Pending
            })
            .cloned()
            .collect())
    }

    async fn list_trash_candidates(&self) -> Result<Vec<PaymentRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .filter(|request| {
                request.stage == Stage::TrashPending
                    && request.approved != payflow_core::Disposition::Approved
            })
            .cloned()
            .collect())
    }

    async fn commit_transition(
        &self,
        request: &PaymentRequest,
        expected_stage: Stage,
    ) -> Result<bool, RepositoryError> {
        let mut requests = self.requests.write().await;
        match requests.get(&request.id.0) {
            Some(stored) if stored.stage == expected_stage => {
                requests.insert(request.id.0.clone(), request.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &PaymentRequestId) -> Result<bool, RepositoryError> {
        let mut requests = self.requests.write().await;
        Ok(requests.remove(&id.0).is_some())
    }

    async fn list_approved_payments(
        &self,
        project_ref: &str,
    ) -> Result<Vec<ApprovedPayment>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .filter(|request| {
                request.project_ref == project_ref
                    && request.approved == payflow_core::Disposition::Approved
            })
            .map(|request| ApprovedPayment {
                project_ref: request.project_ref.clone(),
                po_number: request.po_number.clone(),
                amount_paid: request.amount_paid,
                utr_confirmed: request.is_utr_confirmed(),
            })
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryLedgerRepository {
    pub projects: RwLock<HashMap<String, Project>>,
    pub credits: RwLock<Vec<CreditEntry>>,
    pub debits: RwLock<Vec<DebitEntry>>,
    pub adjustments: RwLock<Vec<AdjustmentEntry>>,
    pub purchase_orders: RwLock<Vec<PurchaseOrder>>,
    pub bills: RwLock<Vec<Bill>>,
}

impl InMemoryLedgerRepository {
    pub async fn insert_project(&self, project: Project) {
        self.projects.write().await.insert(project.project_ref.clone(), project);
    }
}

#[async_trait::async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    async fn find_project(&self, project_ref: &str) -> Result<Option<Project>, RepositoryError> {
        Ok(self.projects.read().await.get(project_ref).cloned())
    }

    async fn list_projects(
        &self,
        search: Option<&str>,
        group: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<PageOf<Project>, RepositoryError> {
        let projects = self.projects.read().await;
        let mut matched: Vec<Project> = projects
            .values()
            .filter(|project| match search.map(str::trim).filter(|t| !t.is_empty()) {
                Some(term) => project.project_ref.contains(term) || project.name.contains(term),
                None => true,
            })
            .filter(|project| match group {
                Some(tag) => project.group_tag() == Some(tag),
                None => true,
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.project_ref.cmp(&b.project_ref));

        let total = matched.len() as u64;
        let start = (page.saturating_sub(1) as usize) * page_size as usize;
        let items = matched.into_iter().skip(start).take(page_size as usize).collect();
        Ok(PageOf { items, total })
    }

    async fn credits_for(&self, project_ref: &str) -> Result<Vec<CreditEntry>, RepositoryError> {
        Ok(self
            .credits
            .read()
            .await
            .iter()
            .filter(|entry| entry.project_ref == project_ref)
            .cloned()
            .collect())
    }

    async fn debits_for(&self, project_ref: &str) -> Result<Vec<DebitEntry>, RepositoryError> {
        Ok(self
            .debits
            .read()
            .await
            .iter()
            .filter(|entry| entry.project_ref == project_ref)
            .cloned()
            .collect())
    }

    async fn adjustments_for(
        &self,
        project_ref: &str,
    ) -> Result<Vec<AdjustmentEntry>, RepositoryError> {
        Ok(self
            .adjustments
            .read()
            .await
            .iter()
            .filter(|entry| entry.project_ref == project_ref)
            .cloned()
            .collect())
    }

    async fn purchase_orders_for(
        &self,
        project_ref: &str,
    ) -> Result<Vec<PurchaseOrder>, RepositoryError> {
        Ok(self
            .purchase_orders
            .read()
            .await
            .iter()
            .filter(|po| po.project_ref == project_ref)
            .cloned()
            .collect())
    }

    async fn bills_for_pos(&self, po_numbers: &[String]) -> Result<Vec<Bill>, RepositoryError> {
        Ok(self
            .bills
            .read()
            .await
            .iter()
            .filter(|bill| po_numbers.contains(&bill.po_number))
            .cloned()
            .collect())
    }

    async fn group_credits(&self, group: &str) -> Result<Vec<CreditEntry>, RepositoryError> {
        let projects = self.projects.read().await;
        let members: Vec<&str> = projects
            .values()
            .filter(|project| project.group_tag() == Some(group))
            .map(|project| project.project_ref.as_str())
            .collect();
        Ok(self
            .credits
            .read()
            .await
            .iter()
            .filter(|entry| members.contains(&entry.project_ref.as_str()))
            .cloned()
            .collect())
    }

    async fn group_debits(&self, group: &str) -> Result<Vec<DebitEntry>, RepositoryError> {
        let projects = self.projects.read().await;
        let members: Vec<&str> = projects
            .values()
            .filter(|project| project.group_tag() == Some(group))
            .map(|project| project.project_ref.as_str())
            .collect();
        Ok(self
            .debits
            .read()
            .await
            .iter()
            .filter(|entry| members.contains(&entry.project_ref.as_str()))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryApprovalRepository {
    approvals: RwLock<HashMap<String, Approval>>,
    dependency_marks: RwLock<HashMap<(String, String), String>>,
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        Ok(self.approvals.read().await.get(&id.0).cloned())
    }

    async fn save(&self, approval: &Approval) -> Result<(), RepositoryError> {
        self.approvals.write().await.insert(approval.id.0.clone(), approval.clone());
        Ok(())
    }

    async fn save_if_current(
        &self,
        approval: &Approval,
        expected_current: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let mut approvals = self.approvals.write().await;
        match approvals.get(&approval.id.0) {
            Some(stored) if stored.current_approver.as_deref() == expected_current => {
                approvals.insert(approval.id.0.clone(), approval.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_dependency_once(
        &self,
        update: &DependencyUpdate,
    ) -> Result<bool, RepositoryError> {
        let mut marks = self.dependency_marks.write().await;
        let key = (update.activity_id.clone(), update.dependency_id.clone());
        if marks.contains_key(&key) {
            return Ok(false);
        }
        marks.insert(key, update.status.clone());
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryCounterRepository {
    counters: RwLock<HashMap<String, u64>>,
}

#[async_trait::async_trait]
impl CounterRepository for InMemoryCounterRepository {
    async fn next(&self, counter_key: &str) -> Result<u64, RepositoryError> {
        let mut counters = self.counters.write().await;
        let value = counters.entry(counter_key.to_owned()).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    actors: RwLock<HashMap<String, Actor>>,
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_actor(&self, user_ref: &str) -> Result<Option<Actor>, RepositoryError> {
        Ok(self.actors.read().await.get(user_ref).cloned())
    }

    async fn upsert_actor(&self, actor: &Actor, _name: &str) -> Result<(), RepositoryError> {
        self.actors.write().await.insert(actor.user_ref.clone(), actor.clone());
        Ok(())
    }
}
