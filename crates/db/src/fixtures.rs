//! Demo dataset for local development and smoke testing.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use payflow_core::domain::payment::{CreditTerms, PaymentRequest, PaymentRequestId, Stage};
use payflow_core::stages::scope::Actor;

use crate::repositories::{
    PaymentRequestRepository, RepositoryError, SqlPaymentRequestRepository, SqlUserDirectory,
    UserDirectory,
};
use crate::DbPool;

#[derive(Clone, Debug, Default)]
pub struct SeedSummary {
    pub projects: u64,
    pub users: u64,
    pub payment_requests: u64,
    pub ledger_rows: u64,
}

/// Seed two projects with ledger records, a small user directory and a
/// handful of payment requests spread across the pipeline. Idempotent
/// via upserts; safe to run repeatedly.
pub async fn seed_demo(pool: &DbPool) -> Result<SeedSummary, RepositoryError> {
    let mut summary = SeedSummary::default();
    let now = Utc::now();

    for (project_ref, name, group) in [
        ("PRJ-1001", "Ajmer Rooftop 120kW", Some("G-WEST")),
        ("PRJ-1002", "Jodhpur Ground Mount 2MW", Some("G-WEST")),
        ("PRJ-2001", "Patna Rooftop 60kW", None),
    ] {
        sqlx::query(
            "INSERT INTO projects (project_ref, name, project_group) VALUES (?, ?, ?)
             ON CONFLICT(project_ref) DO UPDATE SET
                 name = excluded.name, project_group = excluded.project_group",
        )
        .bind(project_ref)
        .bind(name)
        .bind(group)
        .execute(pool)
        .await?;
        summary.projects += 1;
    }

    let directory = SqlUserDirectory::new(pool.clone());
    for (user_ref, name, department, role) in [
        ("u-scm", "R. Verma", "SCM", "Manager"),
        ("u-site", "K. Nair", "Projects", "Visitor"),
        ("u-accounts", "S. Iyer", "Accounts", "Manager"),
        ("u-admin", "P. Gupta", "Accounts", "Superadmin"),
    ] {
        let actor = Actor {
            user_ref: user_ref.to_string(),
            department: department.to_string(),
            role: role.to_string(),
        };
        directory.upsert_actor(&actor, name).await?;
        summary.users += 1;
    }

    // Ledger rows have no natural key; clear the seeded projects first
    // so re-running does not duplicate them.
    for table in ["credits", "debits"] {
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE project_ref IN ('PRJ-1001', 'PRJ-1002', 'PRJ-2001')"
        ))
        .execute(pool)
        .await?;
    }
    sqlx::query("DELETE FROM bills WHERE po_number IN ('PO-101', 'PO-201')")
        .execute(pool)
        .await?;

    for (project_ref, amount) in
        [("PRJ-1001", "2500000"), ("PRJ-1001", "1500000"), ("PRJ-1002", "6000000")]
    {
        sqlx::query("INSERT INTO credits (project_ref, amount, credited_at) VALUES (?, ?, ?)")
            .bind(project_ref)
            .bind(amount)
            .bind(now.to_rfc3339())
            .execute(pool)
            .await?;
        summary.ledger_rows += 1;
    }
    for (project_ref, amount, paid_for) in [
        ("PRJ-1001", "800000", "Vendor"),
        ("PRJ-1001", "50000", "Customer Adjustment"),
        ("PRJ-1002", "1200000", "Vendor"),
    ] {
        sqlx::query(
            "INSERT INTO debits (project_ref, amount, paid_for, debited_at) VALUES (?, ?, ?, ?)",
        )
        .bind(project_ref)
        .bind(amount)
        .bind(paid_for)
        .bind(now.to_rfc3339())
        .execute(pool)
        .await?;
        summary.ledger_rows += 1;
    }
    for (po_number, project_ref, po_basic, gst) in
        [("PO-101", "PRJ-1001", "900000", "162000"), ("PO-201", "PRJ-1002", "2400000", "432000")]
    {
        sqlx::query(
            "INSERT INTO purchase_orders (po_number, project_ref, po_basic, gst)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(po_number) DO UPDATE SET
                 project_ref = excluded.project_ref,
                 po_basic = excluded.po_basic,
                 gst = excluded.gst",
        )
        .bind(po_number)
        .bind(project_ref)
        .bind(po_basic)
        .bind(gst)
        .execute(pool)
        .await?;
        summary.ledger_rows += 1;
    }
    sqlx::query("INSERT INTO bills (po_number, bill_value) VALUES ('PO-101', '400000')")
        .execute(pool)
        .await?;
    summary.ledger_rows += 1;

    let requests = SqlPaymentRequestRepository::new(pool.clone());

    let draft = PaymentRequest::draft(
        PaymentRequestId("PR-1".to_string()),
        "PRJ-1001",
        Decimal::new(45_000_000, 2),
        now - Duration::hours(6),
    );
    requests.save(&draft).await?;

    let mut in_cam = PaymentRequest::draft(
        PaymentRequestId("PR-2".to_string()),
        "PRJ-1001",
        Decimal::new(12_500_000, 2),
        now - Duration::hours(30),
    );
    in_cam.stage = Stage::Cam;
    in_cam.timers.cam_started_at = Some(now - Duration::hours(4));
    in_cam.po_number = Some("PO-101".to_string());
    in_cam.append_history(Stage::Cam, "sent for review", now - Duration::hours(4));
    requests.save(&in_cam).await?;

    let mut credit_hold = PaymentRequest::draft(
        PaymentRequestId("PR-3".to_string()),
        "PRJ-1002",
        Decimal::new(80_000_000, 2),
        now - Duration::days(2),
    );
    credit_hold.stage = Stage::CreditPending;
    credit_hold.cr_id = Some("CR-1".to_string());
    credit_hold.credit = Some(CreditTerms {
        deadline: (now + Duration::days(5)).to_rfc3339(),
        extension: None,
        remarks: Some("vendor credit window".to_string()),
        user_ref: "u-scm".to_string(),
    });
    credit_hold.append_history(Stage::CreditPending, "held for credit", now - Duration::days(1));
    requests.save(&credit_hold).await?;

    summary.payment_requests = 3;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::seed_demo;
    use crate::repositories::{LedgerRepository, SqlLedgerRepository};
    use crate::{connect_ephemeral, migrations};

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let pool = connect_ephemeral().await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let first = seed_demo(&pool).await.expect("first seed");
        assert_eq!(first.projects, 3);
        assert_eq!(first.payment_requests, 3);

        seed_demo(&pool).await.expect("second seed");
        let ledger = SqlLedgerRepository::new(pool);
        let projects = ledger.list_projects(None, None, 1, 50).await.expect("projects");
        assert_eq!(projects.total, 3);
    }
}
