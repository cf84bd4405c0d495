use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use apotheca_core::{AggregateId, BranchId};

use super::ProjectionError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    branch_id: BranchId,
    aggregate_id: AggregateId,
}

/// Per-stream cursors supporting at-least-once delivery.
///
/// Replays at or below the cursor are ignored; gaps after the first observed
/// event are rejected so a dropped message cannot silently corrupt the model.
#[derive(Debug, Default)]
pub(crate) struct StreamCursors {
    inner: RwLock<HashMap<CursorKey, u64>>,
}

impl StreamCursors {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether an envelope at `seq` should be applied now.
    pub(crate) fn should_apply(
        &self,
        branch_id: BranchId,
        aggregate_id: AggregateId,
        seq: u64,
    ) -> Result<bool, ProjectionError> {
        let key = CursorKey {
            branch_id,
            aggregate_id,
        };
        // A poisoned lock still holds valid cursors.
        let cursors = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let last = *cursors.get(&key).unwrap_or(&0);

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(false);
        }
        if last != 0 && seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        Ok(true)
    }

    /// Advance the cursor after a successful apply.
    pub(crate) fn advance(&self, branch_id: BranchId, aggregate_id: AggregateId, seq: u64) {
        let key = CursorKey {
            branch_id,
            aggregate_id,
        };
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, seq);
    }

    pub(crate) fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
