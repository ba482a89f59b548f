use chrono::{DateTime, Utc};
use sqlx::Row;

use payflow_core::domain::payment::{
    CreditTerms, Disposition, PaymentRequest, PaymentRequestId, Stage, StageTimers, StatusEntry,
};
use payflow_core::domain::records::coerce_amount;
use payflow_core::ledger::ApprovedPayment;

use super::{PageOf, PaymentRequestRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPaymentRequestRepository {
    pool: DbPool,
}

impl SqlPaymentRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_history(&self, request_id: &str) -> Result<Vec<StatusEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT stage, remarks, recorded_at FROM payment_status_history
             WHERE request_id = ? ORDER BY id ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_status_entry).collect()
    }
}

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_optional_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref()
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_to_status_entry(row: &sqlx::sqlite::SqliteRow) -> Result<StatusEntry, RepositoryError> {
    let stage_str: String = decode(row.try_get("stage"))?;
    let remarks: String = decode(row.try_get("remarks"))?;
    let recorded_at_str: String = decode(row.try_get("recorded_at"))?;

    Ok(StatusEntry {
        stage: Stage::parse(&stage_str).unwrap_or(Stage::Draft),
        remarks,
        recorded_at: parse_timestamp(&recorded_at_str),
    })
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<PaymentRequest, RepositoryError> {
    let id: String = decode(row.try_get("id"))?;
    let project_ref: String = decode(row.try_get("project_ref"))?;
    let po_number: Option<String> = decode(row.try_get("po_number"))?;
    let pay_id: Option<String> = decode(row.try_get("pay_id"))?;
    let cr_id: Option<String> = decode(row.try_get("cr_id"))?;
    let amount_paid: String = decode(row.try_get("amount_paid"))?;
    let utr: Option<String> = decode(row.try_get("utr"))?;
    let approved_str: String = decode(row.try_get("approved"))?;
    let stage_str: String = decode(row.try_get("stage"))?;
    let credit_deadline: Option<String> = decode(row.try_get("credit_deadline"))?;
    let credit_extension: Option<String> = decode(row.try_get("credit_extension"))?;
    let credit_remarks: Option<String> = decode(row.try_get("credit_remarks"))?;
    let credit_user_ref: Option<String> = decode(row.try_get("credit_user_ref"))?;
    let draft_started_at: String = decode(row.try_get("draft_started_at"))?;
    let draft_frozen_at: Option<String> = decode(row.try_get("draft_frozen_at"))?;
    let cam_started_at: Option<String> = decode(row.try_get("cam_started_at"))?;
    let cam_frozen_at: Option<String> = decode(row.try_get("cam_frozen_at"))?;
    let trash_started_at: Option<String> = decode(row.try_get("trash_started_at"))?;
    let created_at: String = decode(row.try_get("created_at"))?;
    let updated_at: String = decode(row.try_get("updated_at"))?;

    let credit = match (credit_deadline, credit_user_ref) {
        (Some(deadline), Some(user_ref)) => Some(CreditTerms {
            deadline,
            extension: credit_extension,
            remarks: credit_remarks,
            user_ref,
        }),
        _ => None,
    };

    Ok(PaymentRequest {
        id: PaymentRequestId(id),
        project_ref,
        po_number,
        pay_id,
        cr_id,
        amount_paid: coerce_amount(&amount_paid),
        utr,
        approved: Disposition::parse(&approved_str).unwrap_or(Disposition::Pending),
        stage: Stage::parse(&stage_str).unwrap_or(Stage::Draft),
        credit,
        timers: StageTimers {
            draft_started_at: parse_timestamp(&draft_started_at),
            draft_frozen_at: parse_optional_timestamp(draft_frozen_at),
            cam_started_at: parse_optional_timestamp(cam_started_at),
            cam_frozen_at: parse_optional_timestamp(cam_frozen_at),
            trash_started_at: parse_optional_timestamp(trash_started_at),
        },
        status_history: Vec::new(),
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

const REQUEST_COLUMNS: &str = "id, project_ref, po_number, pay_id, cr_id, amount_paid, utr,
    approved, stage, credit_deadline, credit_extension, credit_remarks, credit_user_ref,
    draft_started_at, draft_frozen_at, cam_started_at, cam_frozen_at, trash_started_at,
    created_at, updated_at";

fn stage_placeholders(stages: &[Stage]) -> String {
    vec!["?"; stages.len()].join(", ")
}

#[async_trait::async_trait]
impl PaymentRequestRepository for SqlPaymentRequestRepository {
    async fn find_by_id(
        &self,
        id: &PaymentRequestId,
    ) -> Result<Option<PaymentRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM payment_requests WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => {
                let mut request = row_to_request(r)?;
                request.status_history = self.load_history(&request.id.0).await?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, request: &PaymentRequest) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO payment_requests (id, project_ref, po_number, pay_id, cr_id,
                 amount_paid, utr, approved, stage, credit_deadline, credit_extension,
                 credit_remarks, credit_user_ref, draft_started_at, draft_frozen_at,
                 cam_started_at, cam_frozen_at, trash_started_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 project_ref = excluded.project_ref,
                 po_number = excluded.po_number,
                 pay_id = excluded.pay_id,
                 cr_id = excluded.cr_id,
                 amount_paid = excluded.amount_paid,
                 utr = excluded.utr,
                 approved = excluded.approved,
                 stage = excluded.stage,
                 credit_deadline = excluded.credit_deadline,
                 credit_extension = excluded.credit_extension,
                 credit_remarks = excluded.credit_remarks,
                 credit_user_ref = excluded.credit_user_ref,
                 draft_started_at = excluded.draft_started_at,
                 draft_frozen_at = excluded.draft_frozen_at,
                 cam_started_at = excluded.cam_started_at,
                 cam_frozen_at = excluded.cam_frozen_at,
                 trash_started_at = excluded.trash_started_at,
                 updated_at = excluded.updated_at",
        )
        .bind(&request.id.0)
        .bind(&request.project_ref)
        .bind(&request.po_number)
        .bind(&request.pay_id)
        .bind(&request.cr_id)
        .bind(request.amount_paid.to_string())
        .bind(&request.utr)
        .bind(request.approved.as_str())
        .bind(request.stage.as_str())
        .bind(request.credit.as_ref().map(|c| c.deadline.clone()))
        .bind(request.credit.as_ref().and_then(|c| c.extension.clone()))
        .bind(request.credit.as_ref().and_then(|c| c.remarks.clone()))
        .bind(request.credit.as_ref().map(|c| c.user_ref.clone()))
        .bind(request.timers.draft_started_at.to_rfc3339())
        .bind(request.timers.draft_frozen_at.map(|dt| dt.to_rfc3339()))
        .bind(request.timers.cam_started_at.map(|dt| dt.to_rfc3339()))
        .bind(request.timers.cam_frozen_at.map(|dt| dt.to_rfc3339()))
        .bind(request.timers.trash_started_at.map(|dt| dt.to_rfc3339()))
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        // History is append-only; rewrite it wholesale so the stored
        // trail always mirrors the aggregate.
        sqlx::query("DELETE FROM payment_status_history WHERE request_id = ?")
            .bind(&request.id.0)
            .execute(&mut *tx)
            .await?;
        for entry in &request.status_history {
            sqlx::query(
                "INSERT INTO payment_status_history (request_id, stage, remarks, recorded_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&request.id.0)
            .bind(entry.stage.as_str())
            .bind(&entry.remarks)
            .bind(entry.recorded_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
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

        let placeholders = stage_placeholders(stages);
        let search_clause = if search.is_some() {
            " AND (id LIKE ? OR project_ref LIKE ? OR COALESCE(po_number, '') LIKE ?)"
        } else {
            ""
        };
        let pattern = search.map(|term| format!("%{}%", term.trim()));

        let count_sql = format!(
            "SELECT COUNT(*) AS count FROM payment_requests
             WHERE stage IN ({placeholders}){search_clause}"
        );
        let mut count_query = sqlx::query(&count_sql);
        for stage in stages {
            count_query = count_query.bind(stage.as_str());
        }
        if let Some(ref pattern) = pattern {
            count_query = count_query.bind(pattern).bind(pattern).bind(pattern);
        }
        let total = count_query.fetch_one(&self.pool).await?.get::<i64, _>("count") as u64;

        let list_sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM payment_requests
             WHERE stage IN ({placeholders}){search_clause}
             ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query(&list_sql);
        for stage in stages {
            list_query = list_query.bind(stage.as_str());
        }
        if let Some(ref pattern) = pattern {
            list_query = list_query.bind(pattern).bind(pattern).bind(pattern);
        }
        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
        let rows = list_query
            .bind(i64::from(page_size))
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut request = row_to_request(row)?;
            request.status_history = self.load_history(&request.id.0).await?;
            items.push(request);
        }

        Ok(PageOf { items, total })
    }

    async fn list_stage_candidates(
        &self,
        stage: Stage,
    ) -> Result<Vec<PaymentRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM payment_requests
             WHERE stage = ? AND approved = 'pending'"
        ))
        .bind(stage.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut request = row_to_request(row)?;
            request.status_history = self.load_history(&request.id.0).await?;
            items.push(request);
        }
        Ok(items)
    }

    async fn list_trash_candidates(&self) -> Result<Vec<PaymentRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM payment_requests
             WHERE stage = 'trash_pending' AND approved != 'approved'"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut request = row_to_request(row)?;
            request.status_history = self.load_history(&request.id.0).await?;
            items.push(request);
        }
        Ok(items)
    }

    async fn commit_transition(
        &self,
        request: &PaymentRequest,
        expected_stage: Stage,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE payment_requests SET
                 stage = ?,
                 approved = ?,
                 draft_started_at = ?,
                 draft_frozen_at = ?,
                 cam_started_at = ?,
                 cam_frozen_at = ?,
                 trash_started_at = ?,
                 updated_at = ?
             WHERE id = ? AND stage = ?",
        )
        .bind(request.stage.as_str())
        .bind(request.approved.as_str())
        .bind(request.timers.draft_started_at.to_rfc3339())
        .bind(request.timers.draft_frozen_at.map(|dt| dt.to_rfc3339()))
        .bind(request.timers.cam_started_at.map(|dt| dt.to_rfc3339()))
        .bind(request.timers.cam_frozen_at.map(|dt| dt.to_rfc3339()))
        .bind(request.timers.trash_started_at.map(|dt| dt.to_rfc3339()))
        .bind(request.updated_at.to_rfc3339())
        .bind(&request.id.0)
        .bind(expected_stage.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(entry) = request.status_history.last() {
            sqlx::query(
                "INSERT INTO payment_status_history (request_id, stage, remarks, recorded_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&request.id.0)
            .bind(entry.stage.as_str())
            .bind(&entry.remarks)
            .bind(entry.recorded_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn delete(&self, id: &PaymentRequestId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM payment_requests WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_approved_payments(
        &self,
        project_ref: &str,
    ) -> Result<Vec<ApprovedPayment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT project_ref, po_number, amount_paid, utr FROM payment_requests
             WHERE project_ref = ? AND approved = 'approved'",
        )
        .bind(project_ref)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let project_ref: String = decode(row.try_get("project_ref"))?;
                let po_number: Option<String> = decode(row.try_get("po_number"))?;
                let amount_paid: String = decode(row.try_get("amount_paid"))?;
                let utr: Option<String> = decode(row.try_get("utr"))?;
                Ok(ApprovedPayment {
                    project_ref,
                    po_number,
                    amount_paid: coerce_amount(&amount_paid),
                    utr_confirmed: utr.as_deref().is_some_and(|value| !value.trim().is_empty()),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use payflow_core::domain::payment::{
        Disposition, PaymentRequest, PaymentRequestId, Stage,
    };
    use payflow_core::stages::{apply, StageEvent, SweepPolicy};

    use super::SqlPaymentRequestRepository;
    use crate::repositories::PaymentRequestRepository;
    use crate::{connect_ephemeral, migrations};

    async fn repository() -> SqlPaymentRequestRepository {
        let pool = connect_ephemeral().await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlPaymentRequestRepository::new(pool)
    }

    fn request(id: &str, project_ref: &str) -> PaymentRequest {
        PaymentRequest::draft(
            PaymentRequestId(id.to_string()),
            project_ref,
            Decimal::new(250_000, 2),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn save_and_reload_round_trips_history() {
        let repo = repository().await;
        let mut request = request("PR-1", "PRJ-1");
        request.append_history(Stage::Cam, "sent for review", Utc::now());
        repo.save(&request).await.expect("save");

        let loaded = repo
            .find_by_id(&request.id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(loaded.status_history.len(), 2);
        assert_eq!(loaded.status_history[1].remarks, "sent for review");
        assert_eq!(loaded.amount_paid, request.amount_paid);
    }

    #[tokio::test]
    async fn listing_filters_by_stage_and_search() {
        let repo = repository().await;
        let mut in_cam = request("PR-1", "PRJ-100");
        in_cam.stage = Stage::Cam;
        repo.save(&in_cam).await.expect("save cam");
        repo.save(&request("PR-2", "PRJ-200")).await.expect("save draft");

        let page = repo
            .list_in_stages(&[Stage::Cam], None, 1, 10)
            .await
            .expect("list");
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id.0, "PR-1");

        let searched = repo
            .list_in_stages(&[Stage::Draft, Stage::Cam], Some("PRJ-200"), 1, 10)
            .await
            .expect("search");
        assert_eq!(searched.total, 1);
        assert_eq!(searched.items[0].id.0, "PR-2");

        let empty = repo.list_in_stages(&[], None, 1, 10).await.expect("empty scope");
        assert_eq!(empty.total, 0);
    }

    #[tokio::test]
    async fn commit_transition_is_conditional_on_the_stored_stage() {
        let repo = repository().await;
        let mut stale = request("PR-1", "PRJ-1");
        stale.timers.draft_started_at = Utc::now() - Duration::hours(60);
        repo.save(&stale).await.expect("save");

        let policy = SweepPolicy::default();
        let mut expired = stale.clone();
        apply(&mut expired, StageEvent::DraftExpired, &policy, "expired", Utc::now())
            .expect("expire");

        assert!(repo.commit_transition(&expired, Stage::Draft).await.expect("first commit"));
        // Second writer raced on the same draft; the row moved already.
        assert!(!repo.commit_transition(&expired, Stage::Draft).await.expect("second commit"));

        let loaded = repo.find_by_id(&stale.id).await.expect("find").expect("present");
        assert_eq!(loaded.stage, Stage::TrashPending);
        assert_eq!(loaded.status_history.len(), 2);
    }

    #[tokio::test]
    async fn approved_payments_projection_reads_utr_presence() {
        let repo = repository().await;
        let mut approved = request("PR-1", "PRJ-1");
        approved.stage = Stage::Account;
        approved.approved = Disposition::Approved;
        approved.po_number = Some("PO-1".to_string());
        approved.utr = Some("UTR123".to_string());
        repo.save(&approved).await.expect("save approved");

        let mut pending = request("PR-2", "PRJ-1");
        pending.stage = Stage::Account;
        repo.save(&pending).await.expect("save pending");

        let payments = repo.list_approved_payments("PRJ-1").await.expect("list");
        assert_eq!(payments.len(), 1);
        assert!(payments[0].utr_confirmed);
        assert_eq!(payments[0].po_number.as_deref(), Some("PO-1"));
    }
}
