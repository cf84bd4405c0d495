//! Command execution pipeline.
//!
//! One consistent lifecycle for every aggregate:
//!
//! ```text
//! load stream (branch-scoped)
//!   -> rehydrate aggregate
//!   -> handle command (pure)
//!   -> append with optimistic concurrency
//!   -> publish committed events
//! ```
//!
//! The dispatcher composes the `EventStore` and `EventBus` traits and maps
//! their failures into one `DispatchError`. If publication fails after a
//! successful append the events are already durable, so delivery is
//! at-least-once and consumers must be idempotent.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use apotheca_core::{Aggregate, AggregateId, BranchId, DomainError, ExpectedVersion};
use apotheca_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale aggregate version).
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// Branch isolation violation (cross-branch stream mixing).
    #[error("branch isolation violation: {0}")]
    BranchIsolation(String),

    /// Deterministic business-rule failure from the aggregate.
    #[error(transparent)]
    Domain(DomainError),

    /// Failed to deserialize historical payloads into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    /// Persisting to the event store failed.
    #[error("event store failure: {0}")]
    Store(EventStoreError),

    /// Publication failed after a successful append (at-least-once; a retry
    /// may duplicate delivery).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::BranchIsolation(msg) => DispatchError::BranchIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        DispatchError::Domain(value)
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run fully in memory and a durable
/// backend can be swapped in without touching domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline and return the committed
    /// events with their assigned sequence numbers.
    ///
    /// Optimistic concurrency: the version read during load is expected at
    /// append time, so of two racing writers exactly one wins; the loser gets
    /// `DispatchError::Concurrency` and may reload and retry.
    pub fn dispatch<A>(
        &self,
        branch_id: BranchId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: apotheca_events::Event + Serialize + DeserializeOwned,
    {
        let history = self.store.load_stream(branch_id, aggregate_id)?;
        validate_loaded_stream(branch_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    branch_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;
        debug!(
            %branch_id,
            %aggregate_id,
            aggregate_type = %aggregate_type,
            count = committed.len(),
            "events committed"
        );

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    branch_id: BranchId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Branch isolation and sequence monotonicity are re-checked here even
    // though the store enforces them, so a buggy backend cannot leak another
    // branch's events into a rehydration.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.branch_id != branch_id {
            return Err(DispatchError::BranchIsolation(format!(
                "loaded stream contains wrong branch_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::BranchIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    use apotheca_events::InMemoryEventBus;
    use apotheca_orders::{Order, OrderCommand, OrderStatus, PlaceOrder, TransitionOrder};
    use apotheca_core::{Actor, OrderId, ProductId};

    use crate::event_store::InMemoryEventStore;

    fn dispatcher() -> CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>
    {
        CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        )
    }

    fn place(branch: BranchId, order_id: OrderId) -> OrderCommand {
        OrderCommand::PlaceOrder(PlaceOrder {
            actor: Actor::Branch(branch),
            branch_id: branch,
            order_id,
            branch_name: "B".to_string(),
            lines: vec![apotheca_orders::LineSpec {
                product_id: ProductId::new(),
                product_name: "P".to_string(),
                quantity: 2,
                unit_price: 500,
            }],
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn dispatch_persists_and_rehydrates_across_calls() {
        let d = dispatcher();
        let branch = BranchId::new();
        let order_id = OrderId::new();
        let agg_id = AggregateId::from_uuid(*order_id.as_uuid());

        let committed = d
            .dispatch::<Order>(branch, agg_id, "orders.order", place(branch, order_id), |_| {
                Order::empty(order_id)
            })
            .unwrap();
        assert_eq!(committed[0].sequence_number, 1);

        // Second command sees the rehydrated state.
        let committed = d
            .dispatch::<Order>(
                branch,
                agg_id,
                "orders.order",
                OrderCommand::TransitionOrder(TransitionOrder {
                    actor: Actor::Operator,
                    order_id,
                    to: OrderStatus::Approved,
                    occurred_at: Utc::now(),
                }),
                |_| Order::empty(order_id),
            )
            .unwrap();
        assert_eq!(committed[0].sequence_number, 2);
    }

    #[test]
    fn domain_failures_surface_and_persist_nothing() {
        let d = dispatcher();
        let branch = BranchId::new();
        let order_id = OrderId::new();
        let agg_id = AggregateId::from_uuid(*order_id.as_uuid());

        // Transitioning an order that was never placed.
        let err = d
            .dispatch::<Order>(
                branch,
                agg_id,
                "orders.order",
                OrderCommand::TransitionOrder(TransitionOrder {
                    actor: Actor::Operator,
                    order_id,
                    to: OrderStatus::Approved,
                    occurred_at: Utc::now(),
                }),
                |_| Order::empty(order_id),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Domain(DomainError::NotFound)));
        assert!(d.store().load_stream(branch, agg_id).unwrap().is_empty());
    }
}
