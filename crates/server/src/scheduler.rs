//! Unattended lifecycle sweeps.
//!
//! Each tick runs three independent sweeps: stage expiry into trash,
//! credit-deadline lapse back to draft, and trash purge. A failure in
//! one sweep is logged and never blocks the others. Every transition
//! goes through a conditional write keyed on the stored stage, so
//! overlapping ticks and concurrent human actions are safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use payflow_core::domain::payment::Stage;
use payflow_core::errors::DomainError;
use payflow_core::stages::{apply, StageEvent, SweepPolicy};
use payflow_db::repositories::{PaymentRequestRepository, RepositoryError};

pub struct StageScheduler {
    requests: Arc<dyn PaymentRequestRepository>,
    policy: SweepPolicy,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub expired_to_trash: u64,
    pub credit_lapsed: u64,
    pub purged: u64,
    pub sweep_failures: u64,
}

impl StageScheduler {
    pub fn new(requests: Arc<dyn PaymentRequestRepository>, policy: SweepPolicy) -> Self {
        Self { requests, policy }
    }

    /// Run the scheduler on a fixed interval until the task is aborted.
    pub fn spawn(self: Arc<Self>, tick: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let summary = self.run_tick(Utc::now()).await;
                tracing::info!(
                    event_name = "scheduler.tick.completed",
                    expired_to_trash = summary.expired_to_trash,
                    credit_lapsed = summary.credit_lapsed,
                    purged = summary.purged,
                    sweep_failures = summary.sweep_failures,
                    "scheduler tick completed"
                );
            }
        })
    }

    /// One full pass over all three sweeps. Never fails; per-sweep
    /// errors are counted and logged.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();

        match self.sweep_expiry(now).await {
            Ok(count) => summary.expired_to_trash = count,
            Err(error) => {
                summary.sweep_failures += 1;
                tracing::error!(
                    event_name = "scheduler.sweep.expiry_failed",
                    "stage expiry sweep failed: {error}"
                );
            }
        }

        match self.sweep_credit_lapse(now).await {
            Ok(count) => summary.credit_lapsed = count,
            Err(error) => {
                summary.sweep_failures += 1;
                tracing::error!(
                    event_name = "scheduler.sweep.credit_lapse_failed",
                    "credit lapse sweep failed: {error}"
                );
            }
        }

        match self.sweep_trash_purge(now).await {
            Ok(count) => summary.purged = count,
            Err(error) => {
                summary.sweep_failures += 1;
                tracing::error!(
                    event_name = "scheduler.sweep.purge_failed",
                    "trash purge sweep failed: {error}"
                );
            }
        }

        summary
    }

    async fn sweep_expiry(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut moved = 0;
        for (stage, event) in
            [(Stage::Draft, StageEvent::DraftExpired), (Stage::Cam, StageEvent::CamExpired)]
        {
            for candidate in self.requests.list_stage_candidates(stage).await? {
                let mut next = candidate.clone();
                match apply(&mut next, event, &self.policy, "expired after inactivity", now) {
                    Ok(_) => {
                        if self.requests.commit_transition(&next, stage).await? {
                            moved += 1;
                            tracing::info!(
                                event_name = "scheduler.request.expired",
                                request_id = %next.id.0,
                                from_stage = stage.as_str(),
                                "request moved to trash after inactivity"
                            );
                        }
                    }
                    Err(DomainError::NotYetDue { .. } | DomainError::StageFrozen { .. }) => {}
                    Err(error) => {
                        tracing::warn!(
                            event_name = "scheduler.request.expiry_skipped",
                            request_id = %candidate.id.0,
                            "expiry skipped: {error}"
                        );
                    }
                }
            }
        }
        Ok(moved)
    }

    async fn sweep_credit_lapse(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut lapsed = 0;
        for candidate in self.requests.list_stage_candidates(Stage::CreditPending).await? {
            let mut next = candidate.clone();
            match apply(
                &mut next,
                StageEvent::CreditDeadlineLapsed,
                &self.policy,
                "credit deadline lapsed",
                now,
            ) {
                Ok(_) => {
                    if self.requests.commit_transition(&next, Stage::CreditPending).await? {
                        lapsed += 1;
                        tracing::info!(
                            event_name = "scheduler.request.credit_lapsed",
                            request_id = %next.id.0,
                            "credit deadline lapsed; request returned to draft"
                        );
                    }
                }
                Err(DomainError::NotYetDue { .. }) => {}
                Err(error) => {
                    tracing::warn!(
                        event_name = "scheduler.request.lapse_skipped",
                        request_id = %candidate.id.0,
                        "credit lapse skipped: {error}"
                    );
                }
            }
        }
        Ok(lapsed)
    }

    async fn sweep_trash_purge(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut purged = 0;
        for candidate in self.requests.list_trash_candidates().await? {
            if !self.policy.purgeable(&candidate, now) {
                continue;
            }
            if self.requests.delete(&candidate.id).await? {
                purged += 1;
                tracing::info!(
                    event_name = "scheduler.request.purged",
                    request_id = %candidate.id.0,
                    "trashed request purged after retention"
                );
            }
        }
        Ok(purged)
    }
}
