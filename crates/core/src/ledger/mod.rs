//! Project balance arithmetic.
//!
//! Everything here is a pure function over record sets fetched by the
//! caller. No mutation, no IO. All derived monetary values are rounded
//! to 2 decimal places except TCS, which is rounded to a whole amount.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::payment::PaymentRequest;
use crate::domain::records::{
    AdjustmentEntry, AdjustmentType, Bill, CreditEntry, DebitEntry, Project, PurchaseOrder,
};

/// Debit tag whose entries are excluded from the net balance.
pub const CUSTOMER_ADJUSTMENT_TAG: &str = "Customer Adjustment";

/// TCS applies at 0.1% to the portion of net balance above this.
pub const TCS_THRESHOLD: Decimal = Decimal::from_parts(5_000_000, 0, 0, false, 0);

const TCS_RATE_PER_MILLE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// Slim projection of a finally-approved payment request, as the
/// aggregate queries return it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovedPayment {
    pub project_ref: String,
    pub po_number: Option<String>,
    pub amount_paid: Decimal,
    pub utr_confirmed: bool,
}

/// The record sets one balance computation consumes. `group_credits`
/// and `group_debits` span every project sharing the group tag and are
/// empty for ungrouped projects.
#[derive(Clone, Debug, Default)]
pub struct ProjectRecords {
    pub credits: Vec<CreditEntry>,
    pub debits: Vec<DebitEntry>,
    pub adjustments: Vec<AdjustmentEntry>,
    pub purchase_orders: Vec<PurchaseOrder>,
    pub bills: Vec<Bill>,
    pub approved_payments: Vec<ApprovedPayment>,
    pub group_credits: Vec<CreditEntry>,
    pub group_debits: Vec<DebitEntry>,
}

/// The full derived chain for one project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectBalance {
    pub total_credit: Decimal,
    pub total_debit: Decimal,
    pub available_amount: Decimal,
    pub group_balance: Decimal,
    pub customer_adjustment_total: Decimal,
    pub credit_adjustment: Decimal,
    pub debit_adjustment: Decimal,
    pub total_adjustment: Decimal,
    pub net_balance: Decimal,
    pub total_po_basic: Decimal,
    pub gst_as_po_basic: Decimal,
    pub total_po_with_gst: Decimal,
    pub total_bill_value: Decimal,
    pub net_advance: Decimal,
    pub total_amount_paid: Decimal,
    pub balance_slnko: Decimal,
    pub balance_payable: Decimal,
    pub tcs: Decimal,
    pub balance_required: Decimal,
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp(2)
}

fn sum_credits(entries: &[CreditEntry]) -> Decimal {
    entries.iter().map(|entry| entry.amount).sum()
}

fn sum_debits(entries: &[DebitEntry]) -> Decimal {
    entries.iter().map(|entry| entry.amount).sum()
}

impl ProjectBalance {
    pub fn compute(project: &Project, records: &ProjectRecords) -> Self {
        let total_credit = round2(sum_credits(&records.credits));
        let total_debit = round2(sum_debits(&records.debits));
        let available_amount = round2(total_credit - total_debit);

        let group_balance = if project.group_tag().is_some() {
            round2(sum_credits(&records.group_credits) - sum_debits(&records.group_debits))
        } else {
            Decimal::ZERO
        };

        let customer_adjustment_total = round2(
            records
                .debits
                .iter()
                .filter(|entry| entry.paid_for.trim() == CUSTOMER_ADJUSTMENT_TAG)
                .map(|entry| entry.amount)
                .sum::<Decimal>(),
        );

        let credit_adjustment = round2(sum_adjustments(&records.adjustments, AdjustmentType::Add));
        let debit_adjustment =
            round2(sum_adjustments(&records.adjustments, AdjustmentType::Subtract));
        let total_adjustment = round2(credit_adjustment - debit_adjustment);

        let net_balance = round2(total_credit - customer_adjustment_total);

        let total_po_basic =
            round2(records.purchase_orders.iter().map(|po| po.po_basic).sum::<Decimal>());
        let gst_as_po_basic =
            round2(records.purchase_orders.iter().map(|po| po.gst).sum::<Decimal>());
        let total_po_with_gst = round2(total_po_basic + gst_as_po_basic);

        let total_bill_value = round2(project_bill_total(records));

        let advance_paid = records
            .approved_payments
            .iter()
            .filter(|payment| payment.utr_confirmed && payment_matches_po(payment, records))
            .map(|payment| payment.amount_paid)
            .sum::<Decimal>();
        let net_advance = round2(advance_paid - total_bill_value);

        let total_amount_paid = total_debit;
        let balance_slnko = round2(net_balance - total_amount_paid - total_adjustment);
        let balance_payable = round2((total_po_with_gst - total_bill_value) - net_advance);

        let tcs = compute_tcs(net_balance);
        let balance_required = round2(balance_slnko - balance_payable - tcs);

        Self {
            total_credit,
            total_debit,
            available_amount,
            group_balance,
            customer_adjustment_total,
            credit_adjustment,
            debit_adjustment,
            total_adjustment,
            net_balance,
            total_po_basic,
            gst_as_po_basic,
            total_po_with_gst,
            total_bill_value,
            net_advance,
            total_amount_paid,
            balance_slnko,
            balance_payable,
            tcs,
            balance_required,
        }
    }
}

fn sum_adjustments(entries: &[AdjustmentEntry], wanted: AdjustmentType) -> Decimal {
    entries
        .iter()
        .filter(|entry| entry.adj_type == wanted)
        .map(|entry| entry.amount.abs())
        .sum()
}

fn project_bill_total(records: &ProjectRecords) -> Decimal {
    records
        .bills
        .iter()
        .filter(|bill| {
            records.purchase_orders.iter().any(|po| po.po_number == bill.po_number)
        })
        .map(|bill| bill.bill_value)
        .sum()
}

fn payment_matches_po(payment: &ApprovedPayment, records: &ProjectRecords) -> bool {
    payment
        .po_number
        .as_deref()
        .map(str::trim)
        .filter(|po| !po.is_empty())
        .is_some_and(|po| records.purchase_orders.iter().any(|order| order.po_number == po))
}

/// Flat 0.1% levy on the net-balance excess over the threshold, rounded
/// to a whole amount.
pub fn compute_tcs(net_balance: Decimal) -> Decimal {
    if net_balance <= TCS_THRESHOLD {
        return Decimal::ZERO;
    }
    ((net_balance - TCS_THRESHOLD) * TCS_RATE_PER_MILLE).round_dp(0)
}

/// Per-request credit headroom: instant payments carry none, credit
/// requests see project credits less already-approved spend, everything
/// else reads zero.
pub fn credit_balance(
    request: &PaymentRequest,
    credits: &[CreditEntry],
    approved_payments: &[ApprovedPayment],
) -> Decimal {
    if request.is_instant() {
        return Decimal::ZERO;
    }
    if !request.is_credit() {
        return Decimal::ZERO;
    }
    let credited = sum_credits(credits);
    let spent = approved_payments
        .iter()
        .filter(|payment| payment.project_ref == request.project_ref)
        .map(|payment| payment.amount_paid)
        .sum::<Decimal>();
    round2(credited - spent)
}
