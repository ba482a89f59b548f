use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use payflow_core::domain::records::Project;
use payflow_core::errors::ApplicationError;
use payflow_core::ledger::{ProjectBalance, ProjectRecords};
use payflow_db::repositories::{LedgerRepository, PaymentRequestRepository};

use super::{storage_error, AGGREGATE_TIMEOUT};

/// Fans out across every ledger record set to produce the derived
/// balance chain per project, plus grand totals over the whole filtered
/// result set (not just the returned page).
pub struct BalanceReportService {
    ledger: Arc<dyn LedgerRepository>,
    requests: Arc<dyn PaymentRequestRepository>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BalanceRow {
    pub project: Project,
    #[serde(flatten)]
    pub balance: ProjectBalance,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GrandTotals {
    pub total_credit: Decimal,
    pub total_debit: Decimal,
    pub available_amount: Decimal,
    pub total_adjustment: Decimal,
    pub balance_slnko: Decimal,
    pub balance_payable: Decimal,
    pub balance_required: Decimal,
}

impl GrandTotals {
    fn absorb(&mut self, balance: &ProjectBalance) {
        self.total_credit += balance.total_credit;
        self.total_debit += balance.total_debit;
        self.available_amount += balance.available_amount;
        self.total_adjustment += balance.total_adjustment;
        self.balance_slnko += balance.balance_slnko;
        self.balance_payable += balance.balance_payable;
        self.balance_required += balance.balance_required;
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BalanceReport {
    pub rows: Vec<BalanceRow>,
    pub totals: GrandTotals,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl BalanceReportService {
    pub fn new(
        ledger: Arc<dyn LedgerRepository>,
        requests: Arc<dyn PaymentRequestRepository>,
    ) -> Self {
        Self { ledger, requests }
    }

    pub async fn project_balance_report(
        &self,
        search: Option<&str>,
        group: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<BalanceReport, ApplicationError> {
        let matched = self
            .ledger
            .list_projects(search, group, 1, u32::MAX)
            .await
            .map_err(storage_error)?;
        let total = matched.total;

        let mut rows = Vec::with_capacity(matched.items.len());
        let mut totals = GrandTotals::default();
        for project in matched.items {
            let balance = self.balance_for(&project).await?;
            totals.absorb(&balance);
            rows.push(BalanceRow { project, balance });
        }

        let effective_page = page.max(1);
        let start = (effective_page as usize - 1) * page_size as usize;
        let rows = rows.into_iter().skip(start).take(page_size as usize).collect();

        Ok(BalanceReport { rows, totals, total, page: effective_page, page_size })
    }

    pub async fn project_balance(
        &self,
        project_ref: &str,
    ) -> Result<BalanceRow, ApplicationError> {
        let project = self
            .ledger
            .find_project(project_ref)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| ApplicationError::NotFound {
                entity: "project",
                id: project_ref.to_owned(),
            })?;
        let balance = self.balance_for(&project).await?;
        Ok(BalanceRow { project, balance })
    }

    async fn balance_for(&self, project: &Project) -> Result<ProjectBalance, ApplicationError> {
        let records = tokio::time::timeout(AGGREGATE_TIMEOUT, self.fetch_records(project))
            .await
            .map_err(|_| ApplicationError::Timeout("project balance fan-out".to_owned()))??;
        Ok(ProjectBalance::compute(project, &records))
    }

    /// The first five record sets are independent of each other; bills
    /// depend on the purchase-order list and the group spans depend on
    /// the project's tag, so those follow in a second step.
    async fn fetch_records(&self, project: &Project) -> Result<ProjectRecords, ApplicationError> {
        let project_ref = project.project_ref.as_str();
        let (credits, debits, adjustments, purchase_orders, approved_payments) = tokio::try_join!(
            self.ledger.credits_for(project_ref),
            self.ledger.debits_for(project_ref),
            self.ledger.adjustments_for(project_ref),
            self.ledger.purchase_orders_for(project_ref),
            self.requests.list_approved_payments(project_ref),
        )
        .map_err(storage_error)?;

        let po_numbers: Vec<String> =
            purchase_orders.iter().map(|po| po.po_number.clone()).collect();
        let bills = self.ledger.bills_for_pos(&po_numbers).await.map_err(storage_error)?;

        let (group_credits, group_debits) = match project.group_tag() {
            Some(tag) => tokio::try_join!(
                self.ledger.group_credits(tag),
                self.ledger.group_debits(tag),
            )
            .map_err(storage_error)?,
            None => (Vec::new(), Vec::new()),
        };

        Ok(ProjectRecords {
            credits,
            debits,
            adjustments,
            purchase_orders,
            bills,
            approved_payments,
            group_credits,
            group_debits,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use payflow_core::domain::payment::{Disposition, PaymentRequest, PaymentRequestId, Stage};
    use payflow_core::domain::records::{Bill, CreditEntry, DebitEntry, Project, PurchaseOrder};
    use payflow_core::errors::ApplicationError;
    use payflow_db::repositories::{
        InMemoryLedgerRepository, InMemoryPaymentRequestRepository, PaymentRequestRepository,
    };

    use super::BalanceReportService;

    fn dec(raw: &str) -> Decimal {
        raw.parse().expect("decimal literal")
    }

    async fn service_with_two_projects(
    ) -> (BalanceReportService, Arc<InMemoryLedgerRepository>) {
        let ledger = Arc::new(InMemoryLedgerRepository::default());
        let requests = Arc::new(InMemoryPaymentRequestRepository::default());

        for (project_ref, group) in [("PRJ-1", Some("G1")), ("PRJ-2", Some("G1"))] {
            ledger
                .insert_project(Project {
                    project_ref: project_ref.to_string(),
                    name: format!("Site {project_ref}"),
                    group: group.map(str::to_string),
                })
                .await;
        }
        {
            let mut credits = ledger.credits.write().await;
            credits.push(CreditEntry {
                project_ref: "PRJ-1".to_string(),
                amount: dec("100000"),
                credited_at: None,
            });
            credits.push(CreditEntry {
                project_ref: "PRJ-2".to_string(),
                amount: dec("40000"),
                credited_at: None,
            });
        }
        ledger.debits.write().await.push(DebitEntry {
            project_ref: "PRJ-1".to_string(),
            amount: dec("25000"),
            paid_for: "Vendor".to_string(),
            debited_at: None,
        });
        ledger.purchase_orders.write().await.push(PurchaseOrder {
            project_ref: "PRJ-1".to_string(),
            po_number: "PO-1".to_string(),
            po_basic: dec("50000"),
            gst: dec("9000"),
        });
        ledger.bills.write().await.push(Bill {
            po_number: "PO-1".to_string(),
            bill_value: dec("20000"),
        });

        let mut paid = PaymentRequest::draft(
            PaymentRequestId("PR-paid".to_string()),
            "PRJ-1",
            dec("30000"),
            Utc::now(),
        );
        paid.stage = Stage::Account;
        paid.approved = Disposition::Approved;
        paid.po_number = Some("PO-1".to_string());
        paid.utr = Some("UTR-1".to_string());
        requests.save(&paid).await.expect("seed");

        (BalanceReportService::new(ledger.clone(), requests), ledger)
    }

    #[tokio::test]
    async fn report_rows_carry_the_full_balance_chain() {
        let (service, _ledger) = service_with_two_projects().await;

        let report = service.project_balance_report(None, None, 1, 20).await.expect("report");
        assert_eq!(report.total, 2);
        assert_eq!(report.rows.len(), 2);

        let row = report
            .rows
            .iter()
            .find(|row| row.project.project_ref == "PRJ-1")
            .expect("PRJ-1 row");
        assert_eq!(row.balance.total_credit, dec("100000.00"));
        assert_eq!(row.balance.total_debit, dec("25000.00"));
        assert_eq!(row.balance.available_amount, dec("75000.00"));
        assert_eq!(row.balance.total_po_with_gst, dec("59000.00"));
        assert_eq!(row.balance.total_bill_value, dec("20000.00"));
        // 30000 paid against PO-1 minus the billed 20000.
        assert_eq!(row.balance.net_advance, dec("10000.00"));
        // Both projects share G1, so the group span covers both.
        assert_eq!(row.balance.group_balance, dec("115000.00"));
    }

    #[tokio::test]
    async fn grand_totals_cover_the_whole_filtered_set_not_the_page() {
        let (service, _ledger) = service_with_two_projects().await;

        let report = service.project_balance_report(None, None, 1, 1).await.expect("report");
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.total, 2);
        assert_eq!(report.totals.total_credit, dec("140000.00"));
        assert_eq!(report.totals.total_debit, dec("25000.00"));
        assert_eq!(report.totals.available_amount, dec("115000.00"));
    }

    #[tokio::test]
    async fn group_filter_narrows_the_report() {
        let (service, ledger) = service_with_two_projects().await;
        ledger
            .insert_project(Project {
                project_ref: "PRJ-9".to_string(),
                name: "Ungrouped".to_string(),
                group: None,
            })
            .await;

        let report =
            service.project_balance_report(None, Some("G1"), 1, 20).await.expect("report");
        assert_eq!(report.total, 2);
        assert!(report.rows.iter().all(|row| row.project.group.as_deref() == Some("G1")));
    }

    #[tokio::test]
    async fn single_project_lookup_reports_missing_projects() {
        let (service, _ledger) = service_with_two_projects().await;

        let row = service.project_balance("PRJ-1").await.expect("row");
        assert_eq!(row.balance.available_amount, dec("75000.00"));

        let error = service.project_balance("PRJ-404").await.expect_err("missing");
        assert!(matches!(error, ApplicationError::NotFound { entity: "project", .. }));
    }
}
