use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use payflow_core::chain::format_request_code;
use payflow_core::domain::payment::{CreditTerms, PaymentRequest, PaymentRequestId, Stage};
use payflow_core::errors::ApplicationError;
use payflow_core::ledger::credit_balance;
use payflow_core::stages::deadline::{is_due_soon, matches_delay_window, remaining_days};
use payflow_core::stages::scope::{tab_retains, visible_stages, QueueTab};
use payflow_core::stages::{apply, freeze, thaw, StageEvent, SweepPolicy};
use payflow_db::repositories::{
    CounterRepository, LedgerRepository, PaymentRequestRepository, UserDirectory,
};

use super::{storage_error, AGGREGATE_TIMEOUT};
use crate::notify::Notifier;

pub struct PaymentQueueService {
    requests: Arc<dyn PaymentRequestRepository>,
    ledger: Arc<dyn LedgerRepository>,
    users: Arc<dyn UserDirectory>,
    counters: Arc<dyn CounterRepository>,
    notifier: Arc<dyn Notifier>,
    policy: SweepPolicy,
}

#[derive(Clone, Debug, Default)]
pub struct QueueQuery {
    pub tab: Option<String>,
    pub search: Option<String>,
    pub page: u32,
    pub page_size: u32,
    pub delay_days: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct QueueBadges {
    pub payments: u64,
    pub final_approval: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct EnrichedRequest {
    #[serde(flatten)]
    pub request: PaymentRequest,
    pub credit_balance: Decimal,
    pub remaining_days: Option<i64>,
    pub due_soon: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueuePage {
    pub items: Vec<EnrichedRequest>,
    pub total: u64,
    pub due_soon_count: u64,
    pub badges: Option<QueueBadges>,
    pub message: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl QueuePage {
    fn denied(query: &QueueQuery, message: &str) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            due_soon_count: 0,
            badges: None,
            message: Some(message.to_owned()),
            page: query.page.max(1),
            page_size: query.page_size,
        }
    }
}

/// What kind of disbursement a new request asks for; the generated
/// request code lands in the matching marker field.
#[derive(Clone, Debug)]
pub enum PaymentKind {
    Standard,
    Instant,
    Credit(CreditTerms),
}

fn remaining_for(request: &PaymentRequest, now: DateTime<Utc>) -> Option<i64> {
    request.credit.as_ref().and_then(|terms| remaining_days(&terms.deadline, now))
}

impl PaymentQueueService {
    pub fn new(
        requests: Arc<dyn PaymentRequestRepository>,
        ledger: Arc<dyn LedgerRepository>,
        users: Arc<dyn UserDirectory>,
        counters: Arc<dyn CounterRepository>,
        notifier: Arc<dyn Notifier>,
        policy: SweepPolicy,
    ) -> Self {
        Self { requests, ledger, users, counters, notifier, policy }
    }

    /// Role-scoped queue listing. Unauthorized callers get an empty
    /// page with a message rather than an error, so the endpoint never
    /// leaks which requests exist.
    pub async fn list(
        &self,
        user_ref: &str,
        query: &QueueQuery,
    ) -> Result<QueuePage, ApplicationError> {
        let Some(actor) = self.users.find_actor(user_ref).await.map_err(storage_error)? else {
            return Ok(QueuePage::denied(query, "caller is not registered in the user directory"));
        };
        let stages = visible_stages(&actor);
        if stages.is_empty() {
            return Ok(QueuePage::denied(query, "role has no visible payment stages"));
        }

        let fetched = self
            .requests
            .list_in_stages(&stages, query.search.as_deref(), 1, u32::MAX)
            .await
            .map_err(storage_error)?;
        let mut visible = fetched.items;

        // Badge counts are computed over everything the role can see,
        // irrespective of the tab and deadline filters below.
        let badges = actor.is_privileged().then(|| QueueBadges {
            payments: visible.iter().filter(|r| tab_retains(QueueTab::Payments, r)).count() as u64,
            final_approval:
                visible.iter().filter(|r| tab_retains(QueueTab::FinalApproval, r)).count() as u64,
        });

        if let Some(tab) = query.tab.as_deref().and_then(QueueTab::parse) {
            visible.retain(|request| tab_retains(tab, request));
        }

        // The due-soon badge counts over the tab-scoped set; a caller
        // drilling into overdue items still sees what is about to lapse.
        let now = Utc::now();
        let due_soon_count =
            visible.iter().filter(|request| is_due_soon(remaining_for(request, now))).count()
                as u64;

        if let Some(delay_days) = query.delay_days {
            visible.retain(|request| {
                matches_delay_window(remaining_for(request, now), delay_days)
            });
        }

        let total = visible.len() as u64;

        let page = query.page.max(1);
        let start = (page as usize - 1) * query.page_size as usize;
        let mut items = Vec::new();
        for request in visible.into_iter().skip(start).take(query.page_size as usize) {
            items.push(self.enrich(request, now).await?);
        }

        Ok(QueuePage {
            items,
            total,
            due_soon_count,
            badges,
            message: None,
            page,
            page_size: query.page_size,
        })
    }

    /// Ledger enrichment for one request. The two record sets are
    /// disjoint, so they are fetched concurrently under one timeout.
    async fn enrich(
        &self,
        request: PaymentRequest,
        now: DateTime<Utc>,
    ) -> Result<EnrichedRequest, ApplicationError> {
        let (credits, approved) = tokio::time::timeout(AGGREGATE_TIMEOUT, async {
            tokio::try_join!(
                self.ledger.credits_for(&request.project_ref),
                self.requests.list_approved_payments(&request.project_ref),
            )
        })
        .await
        .map_err(|_| ApplicationError::Timeout("payment queue enrichment".to_owned()))?
        .map_err(storage_error)?;

        let remaining = remaining_for(&request, now);
        Ok(EnrichedRequest {
            credit_balance: credit_balance(&request, &credits, &approved),
            remaining_days: remaining,
            due_soon: is_due_soon(remaining),
            request,
        })
    }

    /// Create a new draft. Only roles that can see the draft queue may
    /// create requests.
    pub async fn create_request(
        &self,
        user_ref: &str,
        project_ref: &str,
        amount: Decimal,
        po_number: Option<String>,
        kind: PaymentKind,
    ) -> Result<PaymentRequest, ApplicationError> {
        let actor = self
            .users
            .find_actor(user_ref)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| ApplicationError::Forbidden("unknown caller".to_owned()))?;
        if !actor.is_privileged() && !visible_stages(&actor).contains(&Stage::Draft) {
            return Err(ApplicationError::Forbidden(
                "role may not create payment requests".to_owned(),
            ));
        }

        if self.ledger.find_project(project_ref).await.map_err(storage_error)?.is_none() {
            return Err(ApplicationError::NotFound {
                entity: "project",
                id: project_ref.to_owned(),
            });
        }

        let counter = self
            .counters
            .next(&format!("request:{user_ref}"))
            .await
            .map_err(storage_error)?;
        let code = format_request_code(counter);

        let now = Utc::now();
        let mut request =
            PaymentRequest::draft(PaymentRequestId::generate(), project_ref, amount, now);
        request.po_number = po_number;
        match kind {
            PaymentKind::Standard => {}
            PaymentKind::Instant => request.pay_id = Some(code),
            PaymentKind::Credit(terms) => {
                request.cr_id = Some(code);
                request.credit = Some(terms);
            }
        }

        self.requests.save(&request).await.map_err(storage_error)?;
        Ok(request)
    }

    /// Human-driven stage transition, persisted conditionally so a
    /// concurrent sweep or reviewer cannot be silently overwritten.
    pub async fn transition(
        &self,
        user_ref: &str,
        request_id: &PaymentRequestId,
        event: StageEvent,
        remarks: &str,
    ) -> Result<PaymentRequest, ApplicationError> {
        if event.is_timed() {
            return Err(ApplicationError::Forbidden(
                "timed transitions are scheduler-owned".to_owned(),
            ));
        }
        let actor = self
            .users
            .find_actor(user_ref)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| ApplicationError::Forbidden("unknown caller".to_owned()))?;
        let request = self
            .requests
            .find_by_id(request_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| ApplicationError::NotFound {
                entity: "payment request",
                id: request_id.0.clone(),
            })?;
        if !actor.is_privileged() && !visible_stages(&actor).contains(&request.stage) {
            return Err(ApplicationError::Forbidden(
                "request stage is outside the caller's scope".to_owned(),
            ));
        }

        let from = request.stage;
        let mut next = request.clone();
        apply(&mut next, event, &self.policy, remarks, Utc::now())?;

        let committed = self
            .requests
            .commit_transition(&next, from)
            .await
            .map_err(storage_error)?;
        if !committed {
            return Err(ApplicationError::Conflict(
                "payment request changed concurrently; refresh and retry".to_owned(),
            ));
        }

        if matches!(event, StageEvent::Approve | StageEvent::Reject) {
            self.notifier
                .notify(
                    &next.id.0,
                    &format!("payment request verdict recorded: {}", next.approved.as_str()),
                    None,
                )
                .await;
        }

        Ok(next)
    }

    /// Pause the expiry clock while a human works the item.
    pub async fn freeze_request(
        &self,
        user_ref: &str,
        request_id: &PaymentRequestId,
    ) -> Result<(), ApplicationError> {
        let mut request = self.scoped_request(user_ref, request_id).await?;
        freeze(&mut request, Utc::now())?;
        self.requests.save(&request).await.map_err(storage_error)
    }

    pub async fn thaw_request(
        &self,
        user_ref: &str,
        request_id: &PaymentRequestId,
    ) -> Result<(), ApplicationError> {
        let mut request = self.scoped_request(user_ref, request_id).await?;
        thaw(&mut request);
        self.requests.save(&request).await.map_err(storage_error)
    }

    async fn scoped_request(
        &self,
        user_ref: &str,
        request_id: &PaymentRequestId,
    ) -> Result<PaymentRequest, ApplicationError> {
        let actor = self
            .users
            .find_actor(user_ref)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| ApplicationError::Forbidden("unknown caller".to_owned()))?;
        let request = self
            .requests
            .find_by_id(request_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| ApplicationError::NotFound {
                entity: "payment request",
                id: request_id.0.clone(),
            })?;
        if !actor.is_privileged() && !visible_stages(&actor).contains(&request.stage) {
            return Err(ApplicationError::Forbidden(
                "request stage is outside the caller's scope".to_owned(),
            ));
        }
        Ok(request)
    }
}
