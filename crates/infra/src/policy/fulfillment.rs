//! Fulfillment completion -> stock movement policy.
//!
//! Stock moves when fulfillment completes, not when an order is placed:
//!
//! - an order reaching COMPLETED records one INBOUND transaction per line
//!   at the owning branch (goods arrived from the operator);
//! - a return reaching COMPLETED records one OUTBOUND transaction per line
//!   (goods shipped back).
//!
//! The policy consumes the same envelope feed as the projections and must
//! run after them, since it reads the completed order/return lines from the
//! read models. Processed envelopes are tracked by per-stream cursors, so
//! redelivery does not double-record stock. An error leaves the cursor
//! untouched; the subscriber must re-present the envelope until it succeeds.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;

use apotheca_core::{Actor, BranchId};
use apotheca_events::{EventBus, EventEnvelope};
use apotheca_orders::{OrderEvent, OrderStatus};
use apotheca_returns::{ReturnEvent, ReturnStatus};
use apotheca_stock::{
    RecordStockTransaction, StockLedger, StockLedgerCommand, TransactionKind, stock_stream_id,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::cursor::StreamCursors;
use crate::projections::orders::{ORDER_AGGREGATE_TYPE, OrderReadModel, OrdersProjection};
use crate::projections::returns::{RETURN_AGGREGATE_TYPE, ReturnReadModel, ReturnsProjection};
use crate::read_model::BranchStore;

use crate::projections::ProjectionError;

/// Extra attempts per stock stream after a lost optimistic race.
const RECORD_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Cursor(#[from] ProjectionError),

    /// The read model has not seen the completed order/return yet. The
    /// envelope can be redelivered once the projection caught up.
    #[error("read model missing for {0}")]
    MissingReadModel(String),

    #[error("stock dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Policy translating fulfillment completion events into stock commands.
pub struct FulfillmentStockPolicy<S, B, OS, RS>
where
    OS: BranchStore<apotheca_core::OrderId, OrderReadModel>,
    RS: BranchStore<apotheca_core::ReturnId, ReturnReadModel>,
{
    dispatcher: Arc<CommandDispatcher<S, B>>,
    orders: Arc<OrdersProjection<OS>>,
    returns: Arc<ReturnsProjection<RS>>,
    cursors: StreamCursors,
}

impl<S, B, OS, RS> FulfillmentStockPolicy<S, B, OS, RS>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    OS: BranchStore<apotheca_core::OrderId, OrderReadModel>,
    RS: BranchStore<apotheca_core::ReturnId, ReturnReadModel>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        orders: Arc<OrdersProjection<OS>>,
        returns: Arc<ReturnsProjection<RS>>,
    ) -> Self {
        Self {
            dispatcher,
            orders,
            returns,
            cursors: StreamCursors::new(),
        }
    }

    pub fn handle_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), PolicyError> {
        match envelope.aggregate_type() {
            ORDER_AGGREGATE_TYPE => self.handle_order_envelope(envelope),
            RETURN_AGGREGATE_TYPE => self.handle_return_envelope(envelope),
            _ => Ok(()),
        }
    }

    fn handle_order_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), PolicyError> {
        let branch_id = envelope.branch_id();
        if !self
            .cursors
            .should_apply(branch_id, envelope.aggregate_id(), envelope.sequence_number())?
        {
            return Ok(());
        }

        let event: OrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| PolicyError::Deserialize(e.to_string()))?;

        if let OrderEvent::OrderStatusChanged(e) = &event {
            if e.to == OrderStatus::Completed {
                let order = self
                    .orders
                    .get(branch_id, e.order_id)
                    .ok_or_else(|| PolicyError::MissingReadModel(format!("order {}", e.order_id)))?;

                for line in &order.lines {
                    self.record(
                        branch_id,
                        line.product_id,
                        &line.product_name,
                        line.quantity,
                        TransactionKind::Inbound,
                        e.occurred_at,
                    )?;
                }
                info!(%branch_id, order_id = %e.order_id, lines = order.lines.len(),
                    "order completed, inbound stock recorded");
            }
        }

        self.cursors
            .advance(branch_id, envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }

    fn handle_return_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), PolicyError> {
        let branch_id = envelope.branch_id();
        if !self
            .cursors
            .should_apply(branch_id, envelope.aggregate_id(), envelope.sequence_number())?
        {
            return Ok(());
        }

        let event: ReturnEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| PolicyError::Deserialize(e.to_string()))?;

        if let ReturnEvent::ReturnStatusChanged(e) = &event {
            if e.to == ReturnStatus::Completed {
                let ret = self.returns.get(branch_id, e.return_id).ok_or_else(|| {
                    PolicyError::MissingReadModel(format!("return {}", e.return_id))
                })?;

                for line in &ret.lines {
                    self.record(
                        branch_id,
                        line.product_id,
                        &line.product_name,
                        line.quantity,
                        TransactionKind::Outbound,
                        e.occurred_at,
                    )?;
                }
                info!(%branch_id, return_id = %e.return_id, lines = ret.lines.len(),
                    "return completed, outbound stock recorded");
            }
        }

        self.cursors
            .advance(branch_id, envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }

    /// Append one stock transaction, retrying lost optimistic races.
    ///
    /// Ad-hoc stock transactions land on the same (branch, product) stream,
    /// so a dispatch can lose the version check to a concurrent append. Each
    /// attempt reloads the stream, so replaying the command appends exactly
    /// one new transaction. Retrying here keeps the per-line loop in the
    /// callers from failing halfway through an order.
    fn record(
        &self,
        branch_id: BranchId,
        product_id: apotheca_core::ProductId,
        product_name: &str,
        magnitude: u32,
        kind: TransactionKind,
        occurred_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), PolicyError> {
        let stream = stock_stream_id(branch_id, product_id);
        let mut attempts = 0;
        loop {
            let result = self.dispatcher.dispatch::<StockLedger>(
                branch_id,
                stream,
                crate::projections::STOCK_AGGREGATE_TYPE,
                StockLedgerCommand::RecordStockTransaction(RecordStockTransaction {
                    actor: Actor::Operator,
                    branch_id,
                    product_id,
                    product_name: product_name.to_string(),
                    magnitude,
                    kind,
                    occurred_at,
                }),
                StockLedger::empty,
            );
            match result {
                Ok(_) => return Ok(()),
                Err(DispatchError::Concurrency(_)) if attempts < RECORD_RETRIES => {
                    attempts += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
