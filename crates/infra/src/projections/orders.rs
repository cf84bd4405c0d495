use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use apotheca_core::{BranchId, OrderId};
use apotheca_events::EventEnvelope;
use apotheca_orders::{OrderEvent, OrderLine, OrderStatus};

use crate::pagination::{Page, PageRequest, paginate};
use crate::read_model::BranchStore;

use super::ProjectionError;
use super::cursor::StreamCursors;

/// Stream type published by the order aggregate.
pub const ORDER_AGGREGATE_TYPE: &str = "orders.order";

/// Queryable order read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReadModel {
    pub order_id: OrderId,
    pub branch_id: BranchId,
    pub branch_name: String,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    pub total_price: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Operator-side list filter. `branch_name_contains` is a case-insensitive
/// substring match on the snapshotted branch name.
#[derive(Debug, Clone, Default)]
pub struct OrderListFilter {
    pub status: Option<OrderStatus>,
    pub branch_name_contains: Option<String>,
}

impl OrderListFilter {
    fn matches(&self, rm: &OrderReadModel) -> bool {
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

/// Order read-model projection.
#[derive(Debug)]
pub struct OrdersProjection<S>
where
    S: BranchStore<OrderId, OrderReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> OrdersProjection<S>
where
    S: BranchStore<OrderId, OrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, branch_id: BranchId, order_id: OrderId) -> Option<OrderReadModel> {
        self.store.get(branch_id, &order_id)
    }

    /// Operator-wide listing with filters and pagination, newest first.
    pub fn list(&self, filter: &OrderListFilter, page: PageRequest) -> Page<OrderReadModel> {
        let mut rows: Vec<OrderReadModel> = self
            .store
            .list_all()
            .into_iter()
            .filter(|rm| filter.matches(rm))
            .collect();
        sort_newest_first(&mut rows);
        paginate(rows, page)
    }

    /// Branch-scoped listing with an optional status filter, newest first.
    pub fn list_by_branch(
        &self,
        branch_id: BranchId,
        status: Option<OrderStatus>,
        page: PageRequest,
    ) -> Page<OrderReadModel> {
        let mut rows: Vec<OrderReadModel> = self
            .store
            .list(branch_id)
            .into_iter()
            .filter(|rm| status.is_none_or(|s| rm.status == s))
            .collect();
        sort_newest_first(&mut rows);
        paginate(rows, page)
    }

    /// Apply a published envelope. Envelopes for other aggregate types are
    /// ignored; duplicates are skipped via the stream cursor.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != ORDER_AGGREGATE_TYPE {
            return Ok(());
        }

        let branch_id = envelope.branch_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if !self.cursors.should_apply(branch_id, aggregate_id, seq)? {
            return Ok(());
        }

        let event: OrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let event_branch = match &event {
            OrderEvent::OrderPlaced(e) => e.branch_id,
            OrderEvent::OrderStatusChanged(e) => e.branch_id,
            OrderEvent::OrderDeleted(e) => e.branch_id,
        };
        if event_branch != branch_id {
            return Err(ProjectionError::BranchIsolation(
                "event branch_id does not match envelope branch_id".to_string(),
            ));
        }

        match event {
            OrderEvent::OrderPlaced(e) => {
                self.store.upsert(
                    branch_id,
                    e.order_id,
                    OrderReadModel {
                        order_id: e.order_id,
                        branch_id: e.branch_id,
                        branch_name: e.branch_name,
                        status: OrderStatus::Requested,
                        lines: e.lines,
                        total_price: e.total_price,
                        created_at: e.occurred_at,
                        updated_at: None,
                    },
                );
            }
            OrderEvent::OrderStatusChanged(e) => {
                if let Some(mut rm) = self.store.get(branch_id, &e.order_id) {
                    rm.status = e.to;
                    rm.updated_at = Some(e.occurred_at);
                    self.store.upsert(branch_id, e.order_id, rm);
                }
            }
            OrderEvent::OrderDeleted(e) => {
                self.store.remove(branch_id, &e.order_id);
            }
        }

        self.cursors.advance(branch_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild from scratch by replaying envelopes in deterministic order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.cursors.clear();

        let mut envs: Vec<_> = envelopes
            .into_iter()
            .filter(|e| e.aggregate_type() == ORDER_AGGREGATE_TYPE)
            .collect();

        let mut branches: Vec<_> = envs.iter().map(|e| e.branch_id()).collect();
        branches.sort();
        branches.dedup();
        for b in branches {
            self.store.clear_branch(b);
        }

        envs.sort_by_key(|e| {
            (
                *e.branch_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}

fn sort_newest_first(rows: &mut [OrderReadModel]) {
    rows.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.order_id.cmp(&a.order_id))
    });
}
