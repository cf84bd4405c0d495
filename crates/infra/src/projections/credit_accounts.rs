use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use apotheca_core::{AccountId, BranchId};
use apotheca_credit::{AccountEvent, ChargeRequest, ChargeStatus, CreditStatus};
use apotheca_events::EventEnvelope;

use crate::read_model::BranchStore;

use super::ProjectionError;
use super::cursor::StreamCursors;

/// Stream type published by the account aggregate.
pub const ACCOUNT_AGGREGATE_TYPE: &str = "credit.account";

/// Queryable account read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountReadModel {
    pub account_id: AccountId,
    pub branch_id: BranchId,
    pub branch_name: String,
    pub balance: i64,
    pub credit_status: CreditStatus,
    pub charges: Vec<ChargeRequest>,
}

/// Credit account read-model projection.
#[derive(Debug)]
pub struct CreditAccountsProjection<S>
where
    S: BranchStore<AccountId, AccountReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> CreditAccountsProjection<S>
where
    S: BranchStore<AccountId, AccountReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, branch_id: BranchId, account_id: AccountId) -> Option<AccountReadModel> {
        self.store.get(branch_id, &account_id)
    }

    /// Operator-side lookup when only the account id is known.
    pub fn find(&self, account_id: AccountId) -> Option<AccountReadModel> {
        self.store
            .list_all()
            .into_iter()
            .find(|rm| rm.account_id == account_id)
    }

    /// Accounts awaiting settlement: negative balance or an explicit
    /// settlement request. Account ids are time-ordered, so sorting by id
    /// preserves account creation order (a stable, de-duplicated union).
    pub fn pending(&self) -> Vec<AccountReadModel> {
        let mut rows: Vec<AccountReadModel> = self
            .store
            .list_all()
            .into_iter()
            .filter(|rm| rm.balance < 0 || rm.credit_status == CreditStatus::SettlementRequired)
            .collect();
        rows.sort_by_key(|rm| rm.account_id);
        rows
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != ACCOUNT_AGGREGATE_TYPE {
            return Ok(());
        }

        let branch_id = envelope.branch_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if !self.cursors.should_apply(branch_id, aggregate_id, seq)? {
            return Ok(());
        }

        let event: AccountEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_branch, account_id) = match &event {
            AccountEvent::AccountOpened(e) => (e.branch_id, e.account_id),
            AccountEvent::ChargeRequested(e) => (e.branch_id, e.account_id),
            AccountEvent::ChargeApproved(e) => (e.branch_id, e.account_id),
            AccountEvent::ChargeRejected(e) => (e.branch_id, e.account_id),
            AccountEvent::SettlementRequested(e) => (e.branch_id, e.account_id),
            AccountEvent::SettlementApproved(e) => (e.branch_id, e.account_id),
            AccountEvent::BalanceAdjusted(e) => (e.branch_id, e.account_id),
        };
        if event_branch != branch_id {
            return Err(ProjectionError::BranchIsolation(
                "event branch_id does not match envelope branch_id".to_string(),
            ));
        }

        match event {
            AccountEvent::AccountOpened(e) => {
                self.store.upsert(
                    branch_id,
                    e.account_id,
                    AccountReadModel {
                        account_id: e.account_id,
                        branch_id: e.branch_id,
                        branch_name: e.branch_name,
                        balance: 0,
                        credit_status: CreditStatus::Full,
                        charges: Vec::new(),
                    },
                );
            }
            AccountEvent::ChargeRequested(e) => {
                self.mutate(branch_id, account_id, |rm| {
                    rm.charges.push(ChargeRequest {
                        charge_id: e.charge_id,
                        amount: e.amount,
                        status: ChargeStatus::Requested,
                        requested_at: e.occurred_at,
                    });
                });
            }
            AccountEvent::ChargeApproved(e) => {
                self.mutate(branch_id, account_id, |rm| {
                    if let Some(c) = rm.charges.iter_mut().find(|c| c.charge_id == e.charge_id) {
                        c.status = ChargeStatus::Approved;
                    }
                    rm.balance += e.amount;
                });
            }
            AccountEvent::ChargeRejected(e) => {
                self.mutate(branch_id, account_id, |rm| {
                    if let Some(c) = rm.charges.iter_mut().find(|c| c.charge_id == e.charge_id) {
                        c.status = ChargeStatus::Rejected;
                    }
                });
            }
            AccountEvent::SettlementRequested(_) => {
                self.mutate(branch_id, account_id, |rm| {
                    rm.credit_status = CreditStatus::SettlementRequired;
                });
            }
            AccountEvent::SettlementApproved(_) => {
                self.mutate(branch_id, account_id, |rm| {
                    rm.balance = 0;
                    rm.credit_status = CreditStatus::Full;
                });
            }
            AccountEvent::BalanceAdjusted(e) => {
                self.mutate(branch_id, account_id, |rm| {
                    rm.balance += e.delta;
                });
            }
        }

        self.cursors.advance(branch_id, aggregate_id, seq);
        Ok(())
    }

    fn mutate(&self, branch_id: BranchId, account_id: AccountId, f: impl FnOnce(&mut AccountReadModel)) {
        if let Some(mut rm) = self.store.get(branch_id, &account_id) {
            f(&mut rm);
            self.store.upsert(branch_id, account_id, rm);
        }
    }
}
