//! Explicit caller identity.
//!
//! Every workflow operation takes the acting identity as a parameter instead
//! of consulting an ambient security context. Handlers decide per command what
//! an operator may do versus what the owning branch may do.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::BranchId;

/// Who is invoking a workflow operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "branch_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Actor {
    /// Central operator staff (approves, rejects, fulfills, settles).
    Operator,
    /// A branch pharmacy acting on its own records.
    Branch(BranchId),
}

impl Actor {
    pub fn is_operator(&self) -> bool {
        matches!(self, Actor::Operator)
    }

    /// Operator, or the branch that owns the record.
    pub fn may_act_on(&self, owner: BranchId) -> bool {
        match self {
            Actor::Operator => true,
            Actor::Branch(id) => *id == owner,
        }
    }

    pub fn require_operator(&self, operation: &str) -> DomainResult<()> {
        if self.is_operator() {
            Ok(())
        } else {
            Err(DomainError::forbidden(format!(
                "{operation} requires operator identity"
            )))
        }
    }
}
