//! Infrastructure wiring behind the HTTP handlers.
//!
//! The command path is strongly consistent (dispatch appends to the event
//! store synchronously); the query path is eventually consistent (a
//! background subscriber feeds projections and the fulfillment policy from
//! the bus). Callers observing a fresh write through a query endpoint must
//! poll, same as against the real deployment.

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use serde_json::Value as JsonValue;

use apotheca_branches::{BranchDirectory, BranchInfo, BranchStatus, InMemoryBranchDirectory};
use apotheca_catalog::{Catalog, InMemoryCatalog, ProductInfo};
use apotheca_core::{
    AccountId, AggregateId, BranchId, DomainError, DomainResult, OrderId, ProductId, ReturnId,
};
use apotheca_events::{EventBus, EventEnvelope, InMemoryEventBus};
use apotheca_infra::command_dispatcher::{CommandDispatcher, DispatchError};
use apotheca_infra::event_store::{InMemoryEventStore, StoredEvent};
use apotheca_infra::policy::FulfillmentStockPolicy;
use apotheca_infra::projections::{
    ACCOUNT_AGGREGATE_TYPE, AccountReadModel, CreditAccountsProjection, ORDER_AGGREGATE_TYPE,
    OrderReadModel, OrdersProjection, RETURN_AGGREGATE_TYPE, ReturnReadModel, ReturnsProjection,
    STOCK_AGGREGATE_TYPE, StockPositionReadModel, StockPositionsProjection,
};
use apotheca_infra::read_model::InMemoryBranchStore;

/// Delivery attempts per envelope in the background subscriber.
const DELIVERY_ATTEMPTS: u32 = 20;
const DELIVERY_BACKOFF: Duration = Duration::from_millis(25);

pub type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;
pub type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<Bus>>;

type OrdersStore = Arc<InMemoryBranchStore<OrderId, OrderReadModel>>;
type ReturnsStore = Arc<InMemoryBranchStore<ReturnId, ReturnReadModel>>;
type StockStore = Arc<InMemoryBranchStore<ProductId, StockPositionReadModel>>;
type CreditStore = Arc<InMemoryBranchStore<AccountId, AccountReadModel>>;

pub struct AppServices {
    dispatcher: Arc<Dispatcher>,
    pub orders: Arc<OrdersProjection<OrdersStore>>,
    pub returns: Arc<ReturnsProjection<ReturnsStore>>,
    pub stock: Arc<StockPositionsProjection<StockStore>>,
    pub credit: Arc<CreditAccountsProjection<CreditStore>>,
    pub catalog: Arc<InMemoryCatalog>,
    pub directory: Arc<InMemoryBranchDirectory>,
    /// Calendar bucketing zone for stock statistics (APOTHECA_STATS_TZ).
    pub stats_tz: Tz,
}

/// Wire the in-memory stack: store + bus + dispatcher + projections + policy,
/// with a background subscriber pumping the bus into the read side.
pub fn build_services() -> AppServices {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<Bus> = Arc::new(InMemoryEventBus::new());
    let subscription = bus.subscribe();
    let dispatcher = Arc::new(CommandDispatcher::new(store, bus));

    let orders = Arc::new(OrdersProjection::new(Arc::new(InMemoryBranchStore::new())));
    let returns = Arc::new(ReturnsProjection::new(Arc::new(InMemoryBranchStore::new())));
    let stock = Arc::new(StockPositionsProjection::new(Arc::new(
        InMemoryBranchStore::new(),
    )));
    let credit = Arc::new(CreditAccountsProjection::new(Arc::new(
        InMemoryBranchStore::new(),
    )));

    let stats_tz = std::env::var("APOTHECA_STATS_TZ")
        .ok()
        .and_then(|s| s.parse::<Tz>().ok())
        .unwrap_or(chrono_tz::Asia::Seoul);

    // Background subscriber: bus -> projections -> policy. The policy runs
    // after the projections so it reads the already-updated read models; its
    // follow-up stock commands publish back onto the same bus and are picked
    // up by later iterations of this loop.
    {
        let sub = subscription;
        let orders = orders.clone();
        let returns = returns.clone();
        let stock = stock.clone();
        let credit = credit.clone();
        let policy =
            FulfillmentStockPolicy::new(dispatcher.clone(), orders.clone(), returns.clone());
        // The loop owns the policy, whose dispatcher keeps the bus (and so
        // this subscription's sender) alive; `recv` never disconnects. It
        // must therefore run on a detached OS thread, not a blocking task:
        // tokio waits for blocking tasks on runtime drop, and a loop that
        // never exits would hang shutdown.
        std::thread::spawn(move || {
            let handle_one = |envelope: &EventEnvelope<JsonValue>| -> Result<(), String> {
                match envelope.aggregate_type() {
                    ORDER_AGGREGATE_TYPE => {
                        orders.apply_envelope(envelope).map_err(|e| e.to_string())?
                    }
                    RETURN_AGGREGATE_TYPE => {
                        returns.apply_envelope(envelope).map_err(|e| e.to_string())?
                    }
                    STOCK_AGGREGATE_TYPE => {
                        stock.apply_envelope(envelope).map_err(|e| e.to_string())?
                    }
                    ACCOUNT_AGGREGATE_TYPE => {
                        credit.apply_envelope(envelope).map_err(|e| e.to_string())?
                    }
                    _ => {}
                }
                policy.handle_envelope(envelope).map_err(|e| e.to_string())
            };

            // Projections and the policy advance their cursors only on
            // success, so re-presenting the same envelope is idempotent.
            // A failure here is usually transient (the read model lagging
            // behind a completion event, or a lost optimistic race on a
            // stock stream); a deterministic failure exhausts the attempts
            // and the envelope is dropped with an error log.
            while let Ok(envelope) = sub.recv() {
                let mut attempts = 0;
                while let Err(e) = handle_one(&envelope) {
                    attempts += 1;
                    if attempts >= DELIVERY_ATTEMPTS {
                        tracing::error!(
                            aggregate_type = envelope.aggregate_type(),
                            sequence = envelope.sequence_number(),
                            "dropping envelope after {attempts} attempts: {e}"
                        );
                        break;
                    }
                    tracing::warn!("envelope handling failed, retrying: {e}");
                    std::thread::sleep(DELIVERY_BACKOFF);
                }
            }
        });
    }

    AppServices {
        dispatcher,
        orders,
        returns,
        stock,
        credit,
        catalog: Arc::new(InMemoryCatalog::new()),
        directory: Arc::new(InMemoryBranchDirectory::new()),
        stats_tz,
    }
}

impl AppServices {
    pub fn dispatch<A>(
        &self,
        branch_id: BranchId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: apotheca_core::Aggregate<Error = DomainError>,
        A::Event: apotheca_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        self.dispatcher
            .dispatch::<A>(branch_id, aggregate_id, aggregate_type, command, make_aggregate)
    }

    pub fn branch(&self, branch_id: BranchId) -> DomainResult<BranchInfo> {
        self.directory.get(branch_id)
    }

    /// Branch lookup that additionally requires ACTIVE status.
    pub fn active_branch(&self, branch_id: BranchId) -> DomainResult<BranchInfo> {
        let info = self.directory.get(branch_id)?;
        if info.status != BranchStatus::Active {
            return Err(DomainError::invalid_state(format!(
                "branch {branch_id} is not active"
            )));
        }
        Ok(info)
    }

    pub fn product(&self, product_id: ProductId) -> DomainResult<ProductInfo> {
        self.catalog.lookup(product_id)
    }
}
