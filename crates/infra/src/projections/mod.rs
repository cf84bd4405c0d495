//! Read-model projections over published event envelopes.
//!
//! Every projection consumes the same bus feed, filters for its aggregate
//! type, enforces idempotency via per-stream cursors and maintains a
//! disposable, rebuildable read model.

pub mod credit_accounts;
pub(crate) mod cursor;
pub mod orders;
pub mod returns;
pub mod stock_positions;

use thiserror::Error;

pub use credit_accounts::{ACCOUNT_AGGREGATE_TYPE, AccountReadModel, CreditAccountsProjection};
pub use orders::{ORDER_AGGREGATE_TYPE, OrderListFilter, OrderReadModel, OrdersProjection};
pub use returns::{RETURN_AGGREGATE_TYPE, ReturnListFilter, ReturnReadModel, ReturnsProjection};
pub use stock_positions::{
    DailyStockStat, STOCK_AGGREGATE_TYPE, StockHistoryFilter, StockPositionReadModel,
    StockPositionsProjection, StockSummaryFilter, StockTransactionView,
};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("branch isolation violation: {0}")]
    BranchIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}
