//! Credit/point ledger domain module (event-sourced).
//!
//! One account per branch: a signed balance, charge (top-up) requests,
//! and the settlement flow that zeroes a negative balance under
//! administrative approval.

pub mod account;

pub use account::{
    Account, AccountCommand, AccountEvent, AccountOpened, ApproveCharge, ApproveSettlement,
    BalanceAdjusted, ChargeApproved, ChargeRejected, ChargeRequest, ChargeRequested, ChargeStatus,
    CreditStatus, OpenAccount, RecordAdjustment, RejectCharge, RequestCharge, RequestSettlement,
    SettlementApproved, SettlementRequested,
};
