use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    /// Fresh random id for a newly opened chain.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Closed set of entity kinds an approval can reference. New kinds are
/// added here and registered in [`SubjectRegistry`]; there is no runtime
/// reflection over live types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    PaymentRequest,
    PurchaseOrder,
    WorkPlan,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentRequest => "payment_request",
            Self::PurchaseOrder => "purchase_order",
            Self::WorkPlan => "work_plan",
        }
    }
}

/// Registry resolving a stored kind name to a [`SubjectKind`].
#[derive(Clone, Debug)]
pub struct SubjectRegistry {
    kinds: HashMap<String, SubjectKind>,
}

impl Default for SubjectRegistry {
    fn default() -> Self {
        let mut kinds = HashMap::new();
        for kind in [SubjectKind::PaymentRequest, SubjectKind::PurchaseOrder, SubjectKind::WorkPlan]
        {
            kinds.insert(kind.as_str().to_owned(), kind);
        }
        Self { kinds }
    }
}

impl SubjectRegistry {
    pub fn resolve(&self, name: &str) -> Option<SubjectKind> {
        self.kinds.get(name.trim().to_ascii_lowercase().as_str()).copied()
    }
}

/// Polymorphic reference to the thing being signed off. The optional
/// activity/dependency pair narrows the subject to one dependency row of
/// a related planning document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
    pub kind: SubjectKind,
    pub id: String,
    pub activity_id: Option<String>,
    pub dependency_id: Option<String>,
}

impl SubjectRef {
    pub fn dependency_pair(&self) -> Option<(&str, &str)> {
        match (self.activity_id.as_deref(), self.dependency_id.as_deref()) {
            (Some(activity), Some(dependency)) => Some((activity, dependency)),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApproverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    pub user_ref: String,
    pub sequence: u32,
    pub status: ApproverStatus,
    pub remarks: Option<String>,
}

/// One instance of a sequential sign-off. `current_approver` is derived
/// from `approvers` and recomputed on every mutation; it is never edited
/// independently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub approval_code: String,
    pub subject: SubjectRef,
    pub created_by: String,
    pub approvers: Vec<Approver>,
    pub current_approver: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{SubjectKind, SubjectRef, SubjectRegistry};

    #[test]
    fn registry_resolves_known_kinds_case_insensitively() {
        let registry = SubjectRegistry::default();
        assert_eq!(registry.resolve("payment_request"), Some(SubjectKind::PaymentRequest));
        assert_eq!(registry.resolve(" Work_Plan "), Some(SubjectKind::WorkPlan));
        assert_eq!(registry.resolve("lead"), None);
    }

    #[test]
    fn dependency_pair_requires_both_halves() {
        let subject = SubjectRef {
            kind: SubjectKind::WorkPlan,
            id: "WP-7".to_string(),
            activity_id: Some("ACT-1".to_string()),
            dependency_id: None,
        };
        assert_eq!(subject.dependency_pair(), None);

        let narrowed = SubjectRef { dependency_id: Some("DEP-2".to_string()), ..subject };
        assert_eq!(narrowed.dependency_pair(), Some(("ACT-1", "DEP-2")));
    }
}
