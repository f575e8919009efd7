use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::{Status, ValuationRecord};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Manager,
    Admin,
}

impl Role {
    pub fn is_reviewer(&self) -> bool {
        matches!(self, Role::Manager | Role::Admin)
    }
}

/// Whether the approval pipeline allows `role` to move a record `from` → `to`.
pub fn can_transition(role: Role, from: Status, to: Status) -> bool {
    use Status::*;

    if from == to {
        return false;
    }
    if role == Role::Admin {
        return true;
    }

    match (from, to) {
        (Rework, Pending) => true,
        (Pending, OnProgress) => role.is_reviewer(),
        (Pending | OnProgress, Approved | Rejected) => role.is_reviewer(),
        (Approved | Rejected, Rework) => role.is_reviewer(),
        _ => false,
    }
}

/// Apply a status change, stamping `lastUpdatedAt`.
///
/// Feedback, when given, replaces the previous reviewer note.
pub fn transition(
    record: &mut ValuationRecord,
    role: Role,
    to: Status,
    feedback: Option<String>,
    now: DateTime<Utc>,
) -> Result<()> {
    let from = record.status;
    if !can_transition(role, from, to) {
        let reviewer_may = can_transition(Role::Manager, from, to);
        return Err(if reviewer_may {
            Error::Forbidden(format!("only a manager or admin can mark a record {}", to))
        } else {
            Error::InvalidTransition { from, to }
        });
    }

    record.status = to;
    if let Some(note) = feedback.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
        record.manager_feedback = Some(note);
    }
    record.touch(now);
    Ok(())
}
