use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use apotheca_core::{BranchId, OrderId, ReturnId};
use apotheca_events::EventEnvelope;
use apotheca_returns::{ReturnEvent, ReturnLine, ReturnStatus};

use crate::pagination::{Page, PageRequest, paginate};
use crate::read_model::BranchStore;

use super::ProjectionError;
use super::cursor::StreamCursors;

/// Stream type published by the return aggregate.
pub const RETURN_AGGREGATE_TYPE: &str = "returns.return";

/// Queryable return read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnReadModel {
    pub return_id: ReturnId,
    pub branch_id: BranchId,
    pub branch_name: String,
    pub order_id: Option<OrderId>,
    pub reason: String,
    pub status: ReturnStatus,
    pub lines: Vec<ReturnLine>,
    pub total_price: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Operator-side list filter.
#[derive(Debug, Clone, Default)]
pub struct ReturnListFilter {
    pub status: Option<ReturnStatus>,
    pub branch_name_contains: Option<String>,
}

impl ReturnListFilter {
    fn matches(&self, rm: &ReturnReadModel) -> bool {
        if let Some(status) = self.status {
            if rm.status != status {
                return false;
            }
        }
        if let Some(needle) = &self.branch_name_contains {
            if !rm
                .branch_name
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// Return read-model projection.
#[derive(Debug)]
pub struct ReturnsProjection<S>
where
    S: BranchStore<ReturnId, ReturnReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ReturnsProjection<S>
where
    S: BranchStore<ReturnId, ReturnReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, branch_id: BranchId, return_id: ReturnId) -> Option<ReturnReadModel> {
        self.store.get(branch_id, &return_id)
    }

    pub fn list(&self, filter: &ReturnListFilter, page: PageRequest) -> Page<ReturnReadModel> {
        let mut rows: Vec<ReturnReadModel> = self
            .store
            .list_all()
            .into_iter()
            .filter(|rm| filter.matches(rm))
            .collect();
        sort_newest_first(&mut rows);
        paginate(rows, page)
    }

    pub fn list_by_branch(
        &self,
        branch_id: BranchId,
        status: Option<ReturnStatus>,
        page: PageRequest,
    ) -> Page<ReturnReadModel> {
        let mut rows: Vec<ReturnReadModel> = self
            .store
            .list(branch_id)
            .into_iter()
            .filter(|rm| status.is_none_or(|s| rm.status == s))
            .collect();
        sort_newest_first(&mut rows);
        paginate(rows, page)
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != RETURN_AGGREGATE_TYPE {
            return Ok(());
        }

        let branch_id = envelope.branch_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if !self.cursors.should_apply(branch_id, aggregate_id, seq)? {
            return Ok(());
        }

        let event: ReturnEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let event_branch = match &event {
            ReturnEvent::ReturnOpened(e) => e.branch_id,
            ReturnEvent::ReturnStatusChanged(e) => e.branch_id,
        };
        if event_branch != branch_id {
            return Err(ProjectionError::BranchIsolation(
                "event branch_id does not match envelope branch_id".to_string(),
            ));
        }

        match event {
            ReturnEvent::ReturnOpened(e) => {
                self.store.upsert(
                    branch_id,
                    e.return_id,
                    ReturnReadModel {
                        return_id: e.return_id,
                        branch_id: e.branch_id,
                        branch_name: e.branch_name,
                        order_id: e.order_id,
                        reason: e.reason,
                        status: ReturnStatus::Requested,
                        lines: e.lines,
                        total_price: e.total_price,
                        created_at: e.occurred_at,
                        updated_at: None,
                    },
                );
            }
            ReturnEvent::ReturnStatusChanged(e) => {
                if let Some(mut rm) = self.store.get(branch_id, &e.return_id) {
                    rm.status = e.to;
                    rm.updated_at = Some(e.occurred_at);
                    self.store.upsert(branch_id, e.return_id, rm);
                }
            }
        }

        self.cursors.advance(branch_id, aggregate_id, seq);
        Ok(())
    }
}

fn sort_newest_first(rows: &mut [ReturnReadModel]) {
    rows.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.return_id.cmp(&a.return_id))
    });
}
