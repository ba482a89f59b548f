use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Project master record; `group` ties sibling projects together for
/// group-balance aggregation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub project_ref: String,
    pub name: String,
    pub group: Option<String>,
}

impl Project {
    pub fn group_tag(&self) -> Option<&str> {
        self.group.as_deref().map(str::trim).filter(|tag| !tag.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreditEntry {
    pub project_ref: String,
    pub amount: Decimal,
    pub credited_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebitEntry {
    pub project_ref: String,
    pub amount: Decimal,
    pub paid_for: String,
    pub debited_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    Add,
    Subtract,
}

impl AdjustmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "add" => Some(Self::Add),
            "subtract" => Some(Self::Subtract),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentEntry {
    pub project_ref: String,
    pub adj_type: AdjustmentType,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub project_ref: String,
    pub po_number: String,
    pub po_basic: Decimal,
    pub gst: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub po_number: String,
    pub bill_value: Decimal,
}

/// Lenient coercion for amount fields that arrive as text from upstream
/// systems. Non-numeric or missing input degrades to zero rather than
/// failing the whole aggregation.
pub fn coerce_amount(raw: &str) -> Decimal {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() {
        return Decimal::ZERO;
    }
    cleaned.parse::<Decimal>().unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{coerce_amount, Project};

    #[test]
    fn coerce_handles_text_amounts() {
        assert_eq!(coerce_amount("1234.56"), Decimal::new(123_456, 2));
        assert_eq!(coerce_amount(" 1,00,000 "), Decimal::new(100_000, 0));
        assert_eq!(coerce_amount(""), Decimal::ZERO);
        assert_eq!(coerce_amount("n/a"), Decimal::ZERO);
    }

    #[test]
    fn blank_group_tag_counts_as_ungrouped() {
        let project = Project {
            project_ref: "PRJ-1".to_string(),
            name: "Rooftop 40kW".to_string(),
            group: Some("   ".to_string()),
        };
        assert_eq!(project.group_tag(), None);

        let grouped = Project { group: Some("G1".to_string()), ..project };
        assert_eq!(grouped.group_tag(), Some("G1"));
    }
}
