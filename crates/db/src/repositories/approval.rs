use chrono::{DateTime, Utc};
use sqlx::Row;

use payflow_core::chain::DependencyUpdate;
use payflow_core::domain::approval::{
    Approval, ApprovalId, Approver, ApproverStatus, SubjectKind, SubjectRef, SubjectRegistry,
};

use super::{ApprovalRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
    registry: SubjectRegistry,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, registry: SubjectRegistry::default() }
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

fn row_to_approver(row: &sqlx::sqlite::SqliteRow) -> Result<Approver, RepositoryError> {
    let user_ref: String = decode(row.try_get("user_ref"))?;
    let sequence: i64 = decode(row.try_get("sequence"))?;
    let status_str: String = decode(row.try_get("status"))?;
    let remarks: Option<String> = decode(row.try_get("remarks"))?;

    Ok(Approver {
        user_ref,
        sequence: sequence as u32,
        status: ApproverStatus::parse(&status_str).unwrap_or(ApproverStatus::Pending),
        remarks,
    })
}

impl SqlApprovalRepository {
    fn row_to_approval(
        &self,
        row: &sqlx::sqlite::SqliteRow,
        approvers: Vec<Approver>,
    ) -> Result<Approval, RepositoryError> {
        let id: String = decode(row.try_get("id"))?;
        let approval_code: String = decode(row.try_get("approval_code"))?;
        let subject_kind_str: String = decode(row.try_get("subject_kind"))?;
        let subject_id: String = decode(row.try_get("subject_id"))?;
        let activity_id: Option<String> = decode(row.try_get("activity_id"))?;
        let dependency_id: Option<String> = decode(row.try_get("dependency_id"))?;
        let created_by: String = decode(row.try_get("created_by"))?;
        let current_approver: Option<String> = decode(row.try_get("current_approver"))?;
        let created_at_str: String = decode(row.try_get("created_at"))?;
        let updated_at_str: String = decode(row.try_get("updated_at"))?;

        let kind = self.registry.resolve(&subject_kind_str).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown subject kind `{subject_kind_str}`"))
        })?;

        Ok(Approval {
            id: ApprovalId(id),
            approval_code,
            subject: SubjectRef { kind, id: subject_id, activity_id, dependency_id },
            created_by,
            approvers,
            current_approver,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }
}

async fn write_approvers(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    approval: &Approval,
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM approval_approvers WHERE approval_id = ?")
        .bind(&approval.id.0)
        .execute(&mut **tx)
        .await?;
    for approver in &approval.approvers {
        sqlx::query(
            "INSERT INTO approval_approvers (approval_id, user_ref, sequence, status, remarks)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&approval.id.0)
        .bind(&approver.user_ref)
        .bind(i64::from(approver.sequence))
        .bind(approver.status.as_str())
        .bind(&approver.remarks)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn subject_kind_str(kind: SubjectKind) -> &'static str {
    kind.as_str()
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, approval_code, subject_kind, subject_id, activity_id, dependency_id,
                    created_by, current_approver, created_at, updated_at
             FROM approvals WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let approver_rows = sqlx::query(
            "SELECT user_ref, sequence, status, remarks FROM approval_approvers
             WHERE approval_id = ? ORDER BY sequence ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;
        let approvers =
            approver_rows.iter().map(row_to_approver).collect::<Result<Vec<_>, _>>()?;

        Ok(Some(self.row_to_approval(&row, approvers)?))
    }

    async fn save(&self, approval: &Approval) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approvals (id, approval_code, subject_kind, subject_id, activity_id,
                 dependency_id, created_by, current_approver, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 approval_code = excluded.approval_code,
                 current_approver = excluded.current_approver,
                 updated_at = excluded.updated_at",
        )
        .bind(&approval.id.0)
        .bind(&approval.approval_code)
        .bind(subject_kind_str(approval.subject.kind))
        .bind(&approval.subject.id)
        .bind(&approval.subject.activity_id)
        .bind(&approval.subject.dependency_id)
        .bind(&approval.created_by)
        .bind(&approval.current_approver)
        .bind(approval.created_at.to_rfc3339())
        .bind(approval.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        write_approvers(&mut tx, approval).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_if_current(
        &self,
        approval: &Approval,
        expected_current: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE approvals SET current_approver = ?, updated_at = ?
             WHERE id = ? AND current_approver IS ?",
        )
        .bind(&approval.current_approver)
        .bind(approval.updated_at.to_rfc3339())
        .bind(&approval.id.0)
        .bind(expected_current)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        write_approvers(&mut tx, approval).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn mark_dependency_once(
        &self,
        update: &DependencyUpdate,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO dependency_status (activity_id, dependency_id, status, remark, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(activity_id, dependency_id) DO NOTHING",
        )
        .bind(&update.activity_id)
        .bind(&update.dependency_id)
        .bind(&update.status)
        .bind(&update.remark)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use payflow_core::chain::{format_approval_code, DependencyUpdate};
    use payflow_core::domain::approval::{Approval, ApprovalId, ApproverStatus, SubjectKind, SubjectRef};

    use super::SqlApprovalRepository;
    use crate::repositories::ApprovalRepository;
    use crate::{connect_ephemeral, migrations};

    async fn repository() -> SqlApprovalRepository {
        let pool = connect_ephemeral().await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlApprovalRepository::new(pool)
    }

    fn approval(approvers: &[&str]) -> Approval {
        Approval::create(
            ApprovalId("AP-1".to_string()),
            format_approval_code(1),
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

    #[tokio::test]
    async fn save_and_reload_preserves_approver_order() {
        let repo = repository().await;
        let approval = approval(&["u-a", "u-b", "u-c"]);
        repo.save(&approval).await.expect("save");

        let loaded = repo.find_by_id(&approval.id).await.expect("find").expect("present");
        assert_eq!(loaded.approvers.len(), 3);
        assert_eq!(loaded.current_approver.as_deref(), Some("u-a"));
        assert_eq!(
            loaded.approvers.iter().map(|a| a.user_ref.as_str()).collect::<Vec<_>>(),
            vec!["u-a", "u-b", "u-c"]
        );
    }

    #[tokio::test]
    async fn stale_decision_writes_are_rejected() {
        let repo = repository().await;
        let mut approval = approval(&["u-a", "u-b"]);
        repo.save(&approval).await.expect("save");

        approval
            .record_decision("u-a", ApproverStatus::Approved, None, Utc::now())
            .expect("decision");
        // The caller decided while current_approver was u-a.
        assert!(repo.save_if_current(&approval, Some("u-a")).await.expect("fresh write"));
        // A second caller raced on the same snapshot.
        assert!(!repo.save_if_current(&approval, Some("u-a")).await.expect("stale write"));

        let loaded = repo.find_by_id(&approval.id).await.expect("find").expect("present");
        assert_eq!(loaded.current_approver.as_deref(), Some("u-b"));
    }

    #[tokio::test]
    async fn dependency_marks_apply_exactly_once() {
        let repo = repository().await;
        let update = DependencyUpdate {
            activity_id: "ACT-1".to_string(),
            dependency_id: "DEP-2".to_string(),
            status: "approved".to_string(),
            remark: "approval chain cleared".to_string(),
        };

        assert!(repo.mark_dependency_once(&update).await.expect("first mark"));
        assert!(!repo.mark_dependency_once(&update).await.expect("second mark"));
    }
}
