//! Branch directory collaborator.
//!
//! Branch registration and approval live outside the ledger; the core only
//! reads branch status (a PENDING or REJECTED branch may not order) and the
//! display name snapshotted into order/return responses.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use apotheca_core::{BranchId, DomainError, DomainResult};

/// Branch registration status. Transitions PENDING→ACTIVE|REJECTED once,
/// by an administrative action outside this system.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchStatus {
    Pending,
    Active,
    Rejected,
}

/// Read-only branch reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub branch_id: BranchId,
    pub name: String,
    /// Business registration number (unique in the directory).
    pub registration_no: String,
    pub status: BranchStatus,
}

/// Branch directory lookup contract. The ledger never writes branch status.
pub trait BranchDirectory: Send + Sync {
    /// Fails with [`DomainError::NotFound`] if the branch does not exist.
    fn get(&self, branch_id: BranchId) -> DomainResult<BranchInfo>;
}

impl<D> BranchDirectory for Arc<D>
where
    D: BranchDirectory + ?Sized,
{
    fn get(&self, branch_id: BranchId) -> DomainResult<BranchInfo> {
        (**self).get(branch_id)
    }
}

/// In-memory directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryBranchDirectory {
    branches: RwLock<HashMap<BranchId, BranchInfo>>,
}

impl InMemoryBranchDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: BranchInfo) {
        if let Ok(mut map) = self.branches.write() {
            map.insert(info.branch_id, info);
        }
    }
}

impl BranchDirectory for InMemoryBranchDirectory {
    fn get(&self, branch_id: BranchId) -> DomainResult<BranchInfo> {
        let map = self
            .branches
            .read()
            .map_err(|_| DomainError::conflict("directory lock poisoned"))?;
        map.get(&branch_id).cloned().ok_or(DomainError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_missing_branch_is_not_found() {
        let dir = InMemoryBranchDirectory::new();
        assert_eq!(dir.get(BranchId::new()).unwrap_err(), DomainError::NotFound);
    }

    #[test]
    fn get_returns_registered_branch() {
        let dir = InMemoryBranchDirectory::new();
        let id = BranchId::new();
        dir.insert(BranchInfo {
            branch_id: id,
            name: "Haeundae Branch".to_string(),
            registration_no: "214-87-00001".to_string(),
            status: BranchStatus::Active,
        });

        assert_eq!(dir.get(id).unwrap().status, BranchStatus::Active);
    }
}
