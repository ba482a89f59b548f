//! Queue visibility rules.
//!
//! Which pipeline stages a user sees is a pure function of their
//! department and role. An empty visible set means the listing endpoints
//! return an empty page with an explanatory message rather than an error.

use serde::{Deserialize, Serialize};

use crate::domain::payment::{PaymentRequest, Stage};

/// The acting user as the directory describes them. Department and role
/// are free text upstream; matching is case-insensitive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_ref: String,
    pub department: String,
    pub role: String,
}

impl Actor {
    fn department_is(&self, name: &str) -> bool {
        self.department.trim().eq_ignore_ascii_case(name)
    }

    fn role_is(&self, name: &str) -> bool {
        self.role.trim().eq_ignore_ascii_case(name)
    }

    /// Admin-tier roles bypass departmental scoping on reports.
    pub fn is_privileged(&self) -> bool {
        self.role_is("admin") || self.role_is("superadmin")
    }
}

/// Stages visible to an actor. Unknown department/role combinations see
/// nothing.
pub fn visible_stages(actor: &Actor) -> Vec<Stage> {
    if actor.department_is("scm") && actor.role_is("manager") {
        return vec![Stage::Draft, Stage::CreditPending];
    }
    if actor.department_is("projects") && actor.role_is("visitor") {
        return vec![Stage::Cam];
    }
    if actor.department_is("accounts")
        && (actor.role_is("manager") || actor.is_privileged())
    {
        return vec![Stage::Account, Stage::InitialAccount];
    }
    Vec::new()
}

/// The two queue tabs the review screens render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueTab {
    Payments,
    FinalApproval,
}

impl QueueTab {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "payments" => Some(Self::Payments),
            "finalApprovalPayments" => Some(Self::FinalApproval),
            _ => None,
        }
    }
}

/// Tab filtering applies on top of stage visibility. The payments tab
/// shows Account-stage items that are ready to disburse: against a
/// purchase order, as an instant payment, or on credit terms. Items
/// carrying none of the three markers stay off both tabs. The final
/// approval tab shows items escalated for sign-off.
pub fn tab_retains(tab: QueueTab, request: &PaymentRequest) -> bool {
    match tab {
        QueueTab::Payments => {
            request.stage == Stage::Account
                && (request.has_po() || request.is_instant() || request.is_credit())
        }
        QueueTab::FinalApproval => request.stage == Stage::InitialAccount,
    }
}
