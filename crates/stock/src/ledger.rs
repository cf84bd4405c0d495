use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use apotheca_core::{
    Actor, Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, ProductId,
};
use apotheca_events::Event;

/// Namespace for deriving stock stream ids (UUIDv5 over branch + product).
const STOCK_STREAM_NAMESPACE: Uuid = Uuid::from_u128(0x8f2b1c64_9a3d_4e71_b0c5_2d94a6f01e37);

/// Deterministic stream id for the (branch, product) stock key.
///
/// The same key always maps to the same stream, so optimistic concurrency on
/// the stream serializes concurrent writers for one key while leaving other
/// keys fully parallel.
pub fn stock_stream_id(branch_id: BranchId, product_id: ProductId) -> AggregateId {
    let mut name = [0u8; 32];
    name[..16].copy_from_slice(branch_id.as_uuid().as_bytes());
    name[16..].copy_from_slice(product_id.as_uuid().as_bytes());
    AggregateId::from_uuid(Uuid::new_v5(&STOCK_STREAM_NAMESPACE, &name))
}

/// Direction of a stock movement. The magnitude is always positive; the
/// kind carries the sign.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Inbound,
    Outbound,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "INBOUND",
            Self::Outbound => "OUTBOUND",
        }
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INBOUND" => Ok(Self::Inbound),
            "OUTBOUND" => Ok(Self::Outbound),
            other => Err(DomainError::validation(format!(
                "malformed transaction kind: {other}"
            ))),
        }
    }
}

/// Quantities at or below this label the position "warning"; zero or less
/// is "danger". Fixed business constants.
pub const WARNING_MAX_QUANTITY: i64 = 3;

/// Derived health label for a stock position.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockStatusLabel {
    Danger,
    Warning,
    Normal,
}

impl StockStatusLabel {
    pub fn for_quantity(quantity: i64) -> Self {
        if quantity <= 0 {
            Self::Danger
        } else if quantity <= WARNING_MAX_QUANTITY {
            Self::Warning
        } else {
            Self::Normal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Danger => "danger",
            Self::Warning => "warning",
            Self::Normal => "normal",
        }
    }
}

/// Aggregate root: the stock ledger for one (branch, product) key.
///
/// Rehydrating the stream replays every recorded transaction, so the derived
/// quantity is always rebuildable from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLedger {
    id: AggregateId,
    branch_id: Option<BranchId>,
    product_id: Option<ProductId>,
    product_name: String,
    quantity: i64,
    last_inbound_at: Option<DateTime<Utc>>,
    last_outbound_at: Option<DateTime<Utc>>,
    version: u64,
}

impl StockLedger {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            branch_id: None,
            product_id: None,
            product_name: String::new(),
            quantity: 0,
            last_inbound_at: None,
            last_outbound_at: None,
            version: 0,
        }
    }

    /// Convenience constructor from the key itself.
    pub fn for_key(branch_id: BranchId, product_id: ProductId) -> Self {
        Self::empty(stock_stream_id(branch_id, product_id))
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    /// Derived on-hand quantity, never negative.
    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn last_inbound_at(&self) -> Option<DateTime<Utc>> {
        self.last_inbound_at
    }

    pub fn last_outbound_at(&self) -> Option<DateTime<Utc>> {
        self.last_outbound_at
    }

    pub fn status_label(&self) -> StockStatusLabel {
        StockStatusLabel::for_quantity(self.quantity)
    }
}

impl AggregateRoot for StockLedger {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordStockTransaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStockTransaction {
    pub actor: Actor,
    pub branch_id: BranchId,
    pub product_id: ProductId,
    /// Display name snapshot carried into summaries.
    pub product_name: String,
    pub magnitude: u32,
    pub kind: TransactionKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockLedgerCommand {
    RecordStockTransaction(RecordStockTransaction),
}

/// Event: StockTransactionRecorded. Append-only audit record; the full
/// requested magnitude is kept even when the position clamps at zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransactionRecorded {
    pub branch_id: BranchId,
    pub product_id: ProductId,
    pub product_name: String,
    pub magnitude: u32,
    pub kind: TransactionKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockLedgerEvent {
    StockTransactionRecorded(StockTransactionRecorded),
}

impl Event for StockLedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockLedgerEvent::StockTransactionRecorded(_) => "stock.transaction_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockLedgerEvent::StockTransactionRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockLedger {
    type Command = StockLedgerCommand;
    type Event = StockLedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockLedgerEvent::StockTransactionRecorded(e) => {
                self.branch_id = Some(e.branch_id);
                self.product_id = Some(e.product_id);
                self.product_name = e.product_name.clone();
                match e.kind {
                    TransactionKind::Inbound => {
                        self.quantity += i64::from(e.magnitude);
                        self.last_inbound_at = Some(e.occurred_at);
                    }
                    TransactionKind::Outbound => {
                        // The log keeps the full magnitude; only the derived
                        // position clamps.
                        self.quantity = (self.quantity - i64::from(e.magnitude)).max(0);
                        self.last_outbound_at = Some(e.occurred_at);
                    }
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockLedgerCommand::RecordStockTransaction(cmd) => self.handle_record(cmd),
        }
    }
}

impl StockLedger {
    fn handle_record(
        &self,
        cmd: &RecordStockTransaction,
    ) -> Result<Vec<StockLedgerEvent>, DomainError> {
        if !cmd.actor.may_act_on(cmd.branch_id) {
            return Err(DomainError::ownership_mismatch(
                "cannot record stock for another branch",
            ));
        }
        if cmd.magnitude < 1 {
            return Err(DomainError::validation("magnitude must be at least 1"));
        }
        if let (Some(branch), Some(product)) = (self.branch_id, self.product_id) {
            if branch != cmd.branch_id || product != cmd.product_id {
                return Err(DomainError::validation(
                    "transaction key does not match this stream",
                ));
            }
        }

        Ok(vec![StockLedgerEvent::StockTransactionRecorded(
            StockTransactionRecorded {
                branch_id: cmd.branch_id,
                product_id: cmd.product_id,
                product_name: cmd.product_name.clone(),
                magnitude: cmd.magnitude,
                kind: cmd.kind,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}
