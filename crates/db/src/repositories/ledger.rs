use chrono::{DateTime, Utc};
use sqlx::Row;

use payflow_core::domain::records::{
    coerce_amount, AdjustmentEntry, AdjustmentType, Bill, CreditEntry, DebitEntry, Project,
    PurchaseOrder,
};

use super::{LedgerRepository, PageOf, RepositoryError};
use crate::DbPool;

pub struct SqlLedgerRepository {
    pool: DbPool,
}

impl SqlLedgerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn parse_optional_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref()
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_to_project(row: &sqlx::sqlite::SqliteRow) -> Result<Project, RepositoryError> {
    let project_ref: String = decode(row.try_get("project_ref"))?;
    let name: String = decode(row.try_get("name"))?;
    let group: Option<String> = decode(row.try_get("project_group"))?;
    Ok(Project { project_ref, name, group })
}

fn row_to_credit(row: &sqlx::sqlite::SqliteRow) -> Result<CreditEntry, RepositoryError> {
    let project_ref: String = decode(row.try_get("project_ref"))?;
    let amount: String = decode(row.try_get("amount"))?;
    let credited_at: Option<String> = decode(row.try_get("credited_at"))?;
    Ok(CreditEntry {
        project_ref,
        amount: coerce_amount(&amount),
        credited_at: parse_optional_timestamp(credited_at),
    })
}

fn row_to_debit(row: &sqlx::sqlite::SqliteRow) -> Result<DebitEntry, RepositoryError> {
    let project_ref: String = decode(row.try_get("project_ref"))?;
    let amount: String = decode(row.try_get("amount"))?;
    let paid_for: String = decode(row.try_get("paid_for"))?;
    let debited_at: Option<String> = decode(row.try_get("debited_at"))?;
    Ok(DebitEntry {
        project_ref,
        amount: coerce_amount(&amount),
        paid_for,
        debited_at: parse_optional_timestamp(debited_at),
    })
}

#[async_trait::async_trait]
impl LedgerRepository for SqlLedgerRepository {
    async fn find_project(&self, project_ref: &str) -> Result<Option<Project>, RepositoryError> {
        let row = sqlx::query(
            "SELECT project_ref, name, project_group FROM projects WHERE project_ref = ?",
        )
        .bind(project_ref)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_project(r)?)),
            None => Ok(None),
        }
    }

    async fn list_projects(
        &self,
        search: Option<&str>,
        group: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<PageOf<Project>, RepositoryError> {
        let mut clauses = Vec::new();
        if search.is_some() {
            clauses.push("(project_ref LIKE ? OR name LIKE ?)");
        }
        if group.is_some() {
            clauses.push("project_group = ?");
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let pattern = search.map(|term| format!("%{}%", term.trim()));

        let count_sql = format!("SELECT COUNT(*) AS count FROM projects{where_clause}");
        let mut count_query = sqlx::query(&count_sql);
        if let Some(ref pattern) = pattern {
            count_query = count_query.bind(pattern).bind(pattern);
        }
        if let Some(group) = group {
            count_query = count_query.bind(group);
        }
        let total = count_query.fetch_one(&self.pool).await?.get::<i64, _>("count") as u64;

        let list_sql = format!(
            "SELECT project_ref, name, project_group FROM projects{where_clause}
             ORDER BY project_ref ASC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query(&list_sql);
        if let Some(ref pattern) = pattern {
            list_query = list_query.bind(pattern).bind(pattern);
        }
        if let Some(group) = group {
            list_query = list_query.bind(group);
        }
        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
        let rows = list_query
            .bind(i64::from(page_size))
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let items = rows.iter().map(row_to_project).collect::<Result<Vec<_>, _>>()?;
        Ok(PageOf { items, total })
    }

    async fn credits_for(&self, project_ref: &str) -> Result<Vec<CreditEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT project_ref, amount, credited_at FROM credits WHERE project_ref = ?",
        )
        .bind(project_ref)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_credit).collect()
    }

    async fn debits_for(&self, project_ref: &str) -> Result<Vec<DebitEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT project_ref, amount, paid_for, debited_at FROM debits WHERE project_ref = ?",
        )
        .bind(project_ref)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_debit).collect()
    }

    async fn adjustments_for(
        &self,
        project_ref: &str,
    ) -> Result<Vec<AdjustmentEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT project_ref, adj_type, amount FROM adjustments WHERE project_ref = ?",
        )
        .bind(project_ref)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let project_ref: String = decode(row.try_get("project_ref"))?;
                let adj_type_str: String = decode(row.try_get("adj_type"))?;
                let amount: String = decode(row.try_get("amount"))?;
                Ok(AdjustmentEntry {
                    project_ref,
                    adj_type: AdjustmentType::parse(&adj_type_str)
                        .unwrap_or(AdjustmentType::Add),
                    amount: coerce_amount(&amount),
                })
            })
            .collect()
    }

    async fn purchase_orders_for(
        &self,
        project_ref: &str,
    ) -> Result<Vec<PurchaseOrder>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT project_ref, po_number, po_basic, gst FROM purchase_orders
             WHERE project_ref = ?",
        )
        .bind(project_ref)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let project_ref: String = decode(row.try_get("project_ref"))?;
                let po_number: String = decode(row.try_get("po_number"))?;
                let po_basic: String = decode(row.try_get("po_basic"))?;
                let gst: String = decode(row.try_get("gst"))?;
                Ok(PurchaseOrder {
                    project_ref,
                    po_number,
                    po_basic: coerce_amount(&po_basic),
                    gst: coerce_amount(&gst),
                })
            })
            .collect()
    }

    async fn bills_for_pos(&self, po_numbers: &[String]) -> Result<Vec<Bill>, RepositoryError> {
        if po_numbers.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; po_numbers.len()].join(", ");
        let sql = format!(
            "SELECT po_number, bill_value FROM bills WHERE po_number IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql);
        for po_number in po_numbers {
            query = query.bind(po_number);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let po_number: String = decode(row.try_get("po_number"))?;
                let bill_value: String = decode(row.try_get("bill_value"))?;
                Ok(Bill { po_number, bill_value: coerce_amount(&bill_value) })
            })
            .collect()
    }

    async fn group_credits(&self, group: &str) -> Result<Vec<CreditEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT c.project_ref, c.amount, c.credited_at FROM credits c
             JOIN projects p ON p.project_ref = c.project_ref
             WHERE p.project_group = ?",
        )
        .bind(group)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_credit).collect()
    }

    async fn group_debits(&self, group: &str) -> Result<Vec<DebitEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT d.project_ref, d.amount, d.paid_for, d.debited_at FROM debits d
             JOIN projects p ON p.project_ref = d.project_ref
             WHERE p.project_group = ?",
        )
        .bind(group)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_debit).collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::SqlLedgerRepository;
    use crate::repositories::LedgerRepository;
    use crate::{connect_ephemeral, migrations, DbPool};

    async fn setup() -> (SqlLedgerRepository, DbPool) {
        let pool = connect_ephemeral().await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        (SqlLedgerRepository::new(pool.clone()), pool)
    }

    async fn seed_project(pool: &DbPool, project_ref: &str, group: Option<&str>) {
        sqlx::query("INSERT INTO projects (project_ref, name, project_group) VALUES (?, ?, ?)")
            .bind(project_ref)
            .bind(format!("Project {project_ref}"))
            .bind(group)
            .execute(pool)
            .await
            .expect("seed project");
    }

    #[tokio::test]
    async fn text_amounts_are_coerced_on_read() {
        let (repo, pool) = setup().await;
        seed_project(&pool, "PRJ-1", None).await;
        sqlx::query("INSERT INTO credits (project_ref, amount) VALUES ('PRJ-1', '1,200.50')")
            .execute(&pool)
            .await
            .expect("seed credit");
        sqlx::query("INSERT INTO credits (project_ref, amount) VALUES ('PRJ-1', 'n/a')")
            .execute(&pool)
            .await
            .expect("seed bad credit");

        let credits = repo.credits_for("PRJ-1").await.expect("credits");
        assert_eq!(credits.len(), 2);
        assert_eq!(credits[0].amount, Decimal::new(120_050, 2));
        assert_eq!(credits[1].amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn group_reads_span_sibling_projects() {
        let (repo, pool) = setup().await;
        seed_project(&pool, "PRJ-1", Some("G1")).await;
        seed_project(&pool, "PRJ-2", Some("G1")).await;
        seed_project(&pool, "PRJ-3", None).await;
        for (project, amount) in [("PRJ-1", "100"), ("PRJ-2", "250"), ("PRJ-3", "999")] {
            sqlx::query("INSERT INTO credits (project_ref, amount) VALUES (?, ?)")
                .bind(project)
                .bind(amount)
                .execute(&pool)
                .await
                .expect("seed credit");
        }

        let credits = repo.group_credits("G1").await.expect("group credits");
        assert_eq!(credits.len(), 2);
    }

    #[tokio::test]
    async fn project_listing_supports_search_and_group_filters() {
        let (repo, pool) = setup().await;
        seed_project(&pool, "PRJ-1", Some("G1")).await;
        seed_project(&pool, "PRJ-2", Some("G2")).await;

        let by_group = repo.list_projects(None, Some("G2"), 1, 10).await.expect("by group");
        assert_eq!(by_group.total, 1);
        assert_eq!(by_group.items[0].project_ref, "PRJ-2");

        let by_search = repo.list_projects(Some("PRJ-1"), None, 1, 10).await.expect("by search");
        assert_eq!(by_search.total, 1);

        let all = repo.list_projects(None, None, 1, 1).await.expect("paged");
        assert_eq!(all.total, 2);
        assert_eq!(all.items.len(), 1);
    }

    #[tokio::test]
    async fn bills_lookup_is_scoped_to_the_po_set() {
        let (repo, pool) = setup().await;
        sqlx::query("INSERT INTO bills (po_number, bill_value) VALUES ('PO-1', '10')")
            .execute(&pool)
            .await
            .expect("seed bill");
        sqlx::query("INSERT INTO bills (po_number, bill_value) VALUES ('PO-2', '20')")
            .execute(&pool)
            .await
            .expect("seed other bill");

        let bills = repo.bills_for_pos(&["PO-1".to_string()]).await.expect("bills");
        assert_eq!(bills.len(), 1);
        assert_eq!(bills[0].po_number, "PO-1");

        let none = repo.bills_for_pos(&[]).await.expect("no pos");
        assert!(none.is_empty());
    }
}
