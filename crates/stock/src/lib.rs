//! Stock ledger domain module (event-sourced).
//!
//! An append-only transaction log per (branch, product) key, with the
//! on-hand quantity derived by folding the log. The log is permissive
//! (every requested magnitude is recorded); the derived position is
//! defensive (clamped at zero).

pub mod ledger;

pub use ledger::{
    RecordStockTransaction, StockLedger, StockLedgerCommand, StockLedgerEvent, StockStatusLabel,
    StockTransactionRecorded, TransactionKind, WARNING_MAX_QUANTITY, stock_stream_id,
};
