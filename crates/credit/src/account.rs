use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use apotheca_core::{AccountId, Actor, Aggregate, AggregateRoot, BranchId, DomainError};
use apotheca_events::Event;

/// Settlement standing of an account.
///
/// Sign convention for the balance: negative means the branch owes the
/// operator, positive is prepaid credit in the branch's favor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditStatus {
    Full,
    SettlementRequired,
}

impl CreditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::SettlementRequired => "SETTLEMENT_REQUIRED",
        }
    }
}

impl core::fmt::Display for CreditStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreditStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FULL" => Ok(Self::Full),
            "SETTLEMENT_REQUIRED" => Ok(Self::SettlementRequired),
            other => Err(DomainError::validation(format!(
                "malformed credit status: {other}"
            ))),
        }
    }
}

/// Lifecycle of a balance top-up request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Requested,
    Approved,
    Rejected,
}

/// A branch-initiated top-up awaiting the operator's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub charge_id: Uuid,
    pub amount: i64,
    pub status: ChargeStatus,
    pub requested_at: DateTime<Utc>,
}

/// Aggregate root: Account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: AccountId,
    branch_id: Option<BranchId>,
    branch_name: String,
    balance: i64,
    credit_status: CreditStatus,
    charges: Vec<ChargeRequest>,
    version: u64,
    created: bool,
}

impl Account {
    pub fn empty(id: AccountId) -> Self {
        Self {
            id,
            branch_id: None,
            branch_name: String::new(),
            balance: 0,
            credit_status: CreditStatus::Full,
            charges: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> AccountId {
        self.id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn credit_status(&self) -> CreditStatus {
        self.credit_status
    }

    /// Charge requests in submission order.
    pub fn charges(&self) -> &[ChargeRequest] {
        &self.charges
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    fn charge(&self, charge_id: Uuid) -> Option<&ChargeRequest> {
        self.charges.iter().find(|c| c.charge_id == charge_id)
    }
}

impl AggregateRoot for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenAccount (administrative, at branch approval time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    pub actor: Actor,
    pub account_id: AccountId,
    pub branch_id: BranchId,
    pub branch_name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RequestCharge (branch asks for a balance top-up).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCharge {
    pub actor: Actor,
    pub account_id: AccountId,
    pub charge_id: Uuid,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveCharge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveCharge {
    pub actor: Actor,
    pub account_id: AccountId,
    pub charge_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectCharge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectCharge {
    pub actor: Actor,
    pub account_id: AccountId,
    pub charge_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RequestSettlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSettlement {
    pub actor: Actor,
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveSettlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveSettlement {
    pub actor: Actor,
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordAdjustment (administrative bookkeeping entry, signed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAdjustment {
    pub actor: Actor,
    pub account_id: AccountId,
    pub delta: i64,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountCommand {
    OpenAccount(OpenAccount),
    RequestCharge(RequestCharge),
    ApproveCharge(ApproveCharge),
    RejectCharge(RejectCharge),
    RequestSettlement(RequestSettlement),
    ApproveSettlement(ApproveSettlement),
    RecordAdjustment(RecordAdjustment),
}

/// Event: AccountOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub account_id: AccountId,
    pub branch_id: BranchId,
    pub branch_name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ChargeRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequested {
    pub account_id: AccountId,
    pub branch_id: BranchId,
    pub charge_id: Uuid,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ChargeApproved. The amount lands on the balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeApproved {
    pub account_id: AccountId,
    pub branch_id: BranchId,
    pub charge_id: Uuid,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ChargeRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRejected {
    pub account_id: AccountId,
    pub branch_id: BranchId,
    pub charge_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequested {
    pub account_id: AccountId,
    pub branch_id: BranchId,
    pub balance: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementApproved. An immutable record of the settled magnitude,
/// mirroring the stock ledger's append-only pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementApproved {
    pub account_id: AccountId,
    pub branch_id: BranchId,
    pub previous_balance: i64,
    /// abs(previous_balance).
    pub settled_amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BalanceAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAdjusted {
    pub account_id: AccountId,
    pub branch_id: BranchId,
    pub delta: i64,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    AccountOpened(AccountOpened),
    ChargeRequested(ChargeRequested),
    ChargeApproved(ChargeApproved),
    ChargeRejected(ChargeRejected),
    SettlementRequested(SettlementRequested),
    SettlementApproved(SettlementApproved),
    BalanceAdjusted(BalanceAdjusted),
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountOpened(_) => "credit.account_opened",
            AccountEvent::ChargeRequested(_) => "credit.charge_requested",
            AccountEvent::ChargeApproved(_) => "credit.charge_approved",
            AccountEvent::ChargeRejected(_) => "credit.charge_rejected",
            AccountEvent::SettlementRequested(_) => "credit.settlement_requested",
            AccountEvent::SettlementApproved(_) => "credit.settlement_approved",
            AccountEvent::BalanceAdjusted(_) => "credit.balance_adjusted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccountEvent::AccountOpened(e) => e.occurred_at,
            AccountEvent::ChargeRequested(e) => e.occurred_at,
            AccountEvent::ChargeApproved(e) => e.occurred_at,
            AccountEvent::ChargeRejected(e) => e.occurred_at,
            AccountEvent::SettlementRequested(e) => e.occurred_at,
            AccountEvent::SettlementApproved(e) => e.occurred_at,
            AccountEvent::BalanceAdjusted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Account {
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AccountEvent::AccountOpened(e) => {
                self.id = e.account_id;
                self.branch_id = Some(e.branch_id);
                self.branch_name = e.branch_name.clone();
                self.balance = 0;
                self.credit_status = CreditStatus::Full;
                self.created = true;
            }
            AccountEvent::ChargeRequested(e) => {
                self.charges.push(ChargeRequest {
                    charge_id: e.charge_id,
                    amount: e.amount,
                    status: ChargeStatus::Requested,
                    requested_at: e.occurred_at,
                });
            }
            AccountEvent::ChargeApproved(e) => {
                if let Some(c) = self.charges.iter_mut().find(|c| c.charge_id == e.charge_id) {
                    c.status = ChargeStatus::Approved;
                }
                self.balance += e.amount;
            }
            AccountEvent::ChargeRejected(e) => {
                if let Some(c) = self.charges.iter_mut().find(|c| c.charge_id == e.charge_id) {
                    c.status = ChargeStatus::Rejected;
                }
            }
            AccountEvent::SettlementRequested(_) => {
                self.credit_status = CreditStatus::SettlementRequired;
            }
            AccountEvent::SettlementApproved(_) => {
                self.balance = 0;
                self.credit_status = CreditStatus::Full;
            }
            AccountEvent::BalanceAdjusted(e) => {
                self.balance += e.delta;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AccountCommand::OpenAccount(cmd) => self.handle_open(cmd),
            AccountCommand::RequestCharge(cmd) => self.handle_request_charge(cmd),
            AccountCommand::ApproveCharge(cmd) => self.handle_approve_charge(cmd),
            AccountCommand::RejectCharge(cmd) => self.handle_reject_charge(cmd),
            AccountCommand::RequestSettlement(cmd) => self.handle_request_settlement(cmd),
            AccountCommand::ApproveSettlement(cmd) => self.handle_approve_settlement(cmd),
            AccountCommand::RecordAdjustment(cmd) => self.handle_adjustment(cmd),
        }
    }
}

impl Account {
    fn ensure_exists(&self) -> Result<BranchId, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.branch_id.ok_or(DomainError::NotFound)
    }

    fn handle_open(&self, cmd: &OpenAccount) -> Result<Vec<AccountEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("account already exists"));
        }
        cmd.actor.require_operator("account opening")?;

        Ok(vec![AccountEvent::AccountOpened(AccountOpened {
            account_id: cmd.account_id,
            branch_id: cmd.branch_id,
            branch_name: cmd.branch_name.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_request_charge(&self, cmd: &RequestCharge) -> Result<Vec<AccountEvent>, DomainError> {
        let branch_id = self.ensure_exists()?;
        if !cmd.actor.may_act_on(branch_id) {
            return Err(DomainError::ownership_mismatch(
                "cannot request a charge on another branch's account",
            ));
        }
        if cmd.amount < 1 {
            return Err(DomainError::validation("charge amount must be positive"));
        }
        if self.charge(cmd.charge_id).is_some() {
            return Err(DomainError::conflict("charge request already exists"));
        }

        Ok(vec![AccountEvent::ChargeRequested(ChargeRequested {
            account_id: self.id,
            branch_id,
            charge_id: cmd.charge_id,
            amount: cmd.amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn pending_charge(&self, charge_id: Uuid) -> Result<&ChargeRequest, DomainError> {
        let charge = self.charge(charge_id).ok_or(DomainError::NotFound)?;
        if charge.status != ChargeStatus::Requested {
            return Err(DomainError::already_finalized(
                "charge request already processed",
            ));
        }
        Ok(charge)
    }

    fn handle_approve_charge(&self, cmd: &ApproveCharge) -> Result<Vec<AccountEvent>, DomainError> {
        let branch_id = self.ensure_exists()?;
        cmd.actor.require_operator("charge approval")?;
        let charge = self.pending_charge(cmd.charge_id)?;

        Ok(vec![AccountEvent::ChargeApproved(ChargeApproved {
            account_id: self.id,
            branch_id,
            charge_id: charge.charge_id,
            amount: charge.amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject_charge(&self, cmd: &RejectCharge) -> Result<Vec<AccountEvent>, DomainError> {
        let branch_id = self.ensure_exists()?;
        cmd.actor.require_operator("charge rejection")?;
        let charge = self.pending_charge(cmd.charge_id)?;

        Ok(vec![AccountEvent::ChargeRejected(ChargeRejected {
            account_id: self.id,
            branch_id,
            charge_id: charge.charge_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_request_settlement(
        &self,
        cmd: &RequestSettlement,
    ) -> Result<Vec<AccountEvent>, DomainError> {
        let branch_id = self.ensure_exists()?;
        if !cmd.actor.may_act_on(branch_id) {
            return Err(DomainError::ownership_mismatch(
                "cannot request settlement on another branch's account",
            ));
        }
        if self.credit_status == CreditStatus::SettlementRequired {
            return Err(DomainError::invalid_state("settlement already requested"));
        }

        Ok(vec![AccountEvent::SettlementRequested(SettlementRequested {
            account_id: self.id,
            branch_id,
            balance: self.balance,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve_settlement(
        &self,
        cmd: &ApproveSettlement,
    ) -> Result<Vec<AccountEvent>, DomainError> {
        let branch_id = self.ensure_exists()?;
        cmd.actor.require_operator("settlement approval")?;

        Ok(vec![AccountEvent::SettlementApproved(SettlementApproved {
            account_id: self.id,
            branch_id,
            previous_balance: self.balance,
            settled_amount: self.balance.abs(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjustment(&self, cmd: &RecordAdjustment) -> Result<Vec<AccountEvent>, DomainError> {
        let branch_id = self.ensure_exists()?;
        cmd.actor.require_operator("balance adjustment")?;
        if cmd.delta == 0 {
            return Err(DomainError::validation("adjustment delta must be non-zero"));
        }

        Ok(vec![AccountEvent::BalanceAdjusted(BalanceAdjusted {
            account_id: self.id,
            branch_id,
            delta: cmd.delta,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened_account(branch: BranchId) -> Account {
        let mut account = Account::empty(AccountId::new());
        let account_id = account.id_typed();
        let cmd = OpenAccount {
            actor: Actor::Operator,
            account_id,
            branch_id: branch,
            branch_name: "Seomyeon Branch".to_string(),
            occurred_at: Utc::now(),
        };
        let events = account.handle(&AccountCommand::OpenAccount(cmd)).unwrap();
        for e in &events {
            account.apply(e);
        }
        account
    }

    fn run(account: &mut Account, cmd: AccountCommand) -> Result<Vec<AccountEvent>, DomainError> {
        let events = account.handle(&cmd)?;
        for e in &events {
            account.apply(e);
        }
        Ok(events)
    }

    #[test]
    fn charge_flow_credits_balance_on_approval_only() {
        let branch = BranchId::new();
        let mut account = opened_account(branch);
        let account_id = account.id_typed();
        let charge_id = Uuid::now_v7();

        run(
            &mut account,
            AccountCommand::RequestCharge(RequestCharge {
                actor: Actor::Branch(branch),
                account_id,
                charge_id,
                amount: 5000,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(account.balance(), 0);
        assert_eq!(account.charges()[0].status, ChargeStatus::Requested);

        run(
            &mut account,
            AccountCommand::ApproveCharge(ApproveCharge {
                actor: Actor::Operator,
                account_id,
                charge_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(account.balance(), 5000);
        assert_eq!(account.charges()[0].status, ChargeStatus::Approved);
    }

    #[test]
    fn processed_charge_cannot_be_decided_again() {
        let branch = BranchId::new();
        let mut account = opened_account(branch);
        let account_id = account.id_typed();
        let charge_id = Uuid::now_v7();

        run(
            &mut account,
            AccountCommand::RequestCharge(RequestCharge {
                actor: Actor::Branch(branch),
                account_id,
                charge_id,
                amount: 1000,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        run(
            &mut account,
            AccountCommand::RejectCharge(RejectCharge {
                actor: Actor::Operator,
                account_id,
                charge_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(account.balance(), 0);

        let err = run(
            &mut account,
            AccountCommand::ApproveCharge(ApproveCharge {
                actor: Actor::Operator,
                account_id,
                charge_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::AlreadyFinalized(_)));
    }

    #[test]
    fn settlement_zeroes_a_negative_balance() {
        let branch = BranchId::new();
        let mut account = opened_account(branch);
        let account_id = account.id_typed();

        run(
            &mut account,
            AccountCommand::RecordAdjustment(RecordAdjustment {
                actor: Actor::Operator,
                account_id,
                delta: -3000,
                reason: "opening balance carried over".to_string(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        run(
            &mut account,
            AccountCommand::RequestSettlement(RequestSettlement {
                actor: Actor::Branch(branch),
                account_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(account.balance(), -3000);
        assert_eq!(account.credit_status(), CreditStatus::SettlementRequired);

        let events = run(
            &mut account,
            AccountCommand::ApproveSettlement(ApproveSettlement {
                actor: Actor::Operator,
                account_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let AccountEvent::SettlementApproved(approved) = &events[0] else {
            panic!("expected SettlementApproved");
        };
        assert_eq!(approved.settled_amount, 3000);
        assert_eq!(approved.previous_balance, -3000);
        assert_eq!(account.balance(), 0);
        assert_eq!(account.credit_status(), CreditStatus::Full);
    }

    #[test]
    fn settlement_cannot_be_requested_twice() {
        let branch = BranchId::new();
        let mut account = opened_account(branch);
        let account_id = account.id_typed();

        run(
            &mut account,
            AccountCommand::RequestSettlement(RequestSettlement {
                actor: Actor::Branch(branch),
                account_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let err = run(
            &mut account,
            AccountCommand::RequestSettlement(RequestSettlement {
                actor: Actor::Branch(branch),
                account_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn foreign_branch_cannot_touch_the_account() {
        let mut account = opened_account(BranchId::new());
        let account_id = account.id_typed();

        let err = run(
            &mut account,
            AccountCommand::RequestCharge(RequestCharge {
                actor: Actor::Branch(BranchId::new()),
                account_id,
                charge_id: Uuid::now_v7(),
                amount: 100,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::OwnershipMismatch(_)));
    }

    #[test]
    fn operations_on_an_unopened_account_are_not_found() {
        let mut account = Account::empty(AccountId::new());
        let account_id = account.id_typed();

        let err = run(
            &mut account,
            AccountCommand::ApproveSettlement(ApproveSettlement {
                actor: Actor::Operator,
                account_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }
}
