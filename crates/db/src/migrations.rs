use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_ephemeral, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "projects",
        "payment_requests",
        "payment_status_history",
        "credits",
        "debits",
        "adjustments",
        "purchase_orders",
        "bills",
        "approvals",
        "approval_approvers",
        "dependency_status",
        "code_counters",
        "users",
        "idx_payment_requests_stage",
        "idx_payment_requests_project_ref",
        "idx_payment_status_history_request_id",
        "idx_credits_project_ref",
        "idx_debits_project_ref",
        "idx_adjustments_project_ref",
        "idx_purchase_orders_project_ref",
        "idx_bills_po_number",
        "idx_approvals_subject",
        "idx_approval_approvers_approval_id",
    ];

    #[tokio::test]
    async fn migrations_create_the_baseline_schema() {
        let pool = connect_ephemeral().await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for object in MANAGED_SCHEMA_OBJECTS {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master WHERE name = ?",
            )
            .bind(object)
            .fetch_one(&pool)
            .await
            .expect("query sqlite_master")
            .get::<i64, _>("count");
            assert_eq!(count, 1, "missing schema object `{object}`");
        }
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_ephemeral().await.expect("connect");
        run_pending(&pool).await.expect("up");
        MIGRATOR.undo(&pool, 0).await.expect("down");

        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master
             WHERE type = 'table' AND name = 'payment_requests'",
        )
        .fetch_one(&pool)
        .await
        .expect("query sqlite_master")
        .get::<i64, _>("count");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = connect_ephemeral().await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run");
    }
}
