use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use apotheca_core::{
    Actor, Aggregate, AggregateRoot, BranchId, DomainError, OrderId, ProductId, ReturnId,
};
use apotheca_events::Event;

use crate::status::{ReturnStatus, TransitionPath};

/// Caller-supplied line input for [`OpenReturn`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnLineSpec {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    /// Unit price snapshot at return time.
    pub unit_price: i64,
}

/// Return line as recorded: input plus the computed subtotal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: i64,
    pub subtotal: i64,
}

/// Snapshot of the originating order, loaded by the caller before the
/// command is handled. The aggregate never loads other aggregates itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub order_id: OrderId,
    pub branch_id: BranchId,
    /// Products appearing among the order's lines.
    pub products: Vec<ProductId>,
}

/// Aggregate root: Return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Return {
    id: ReturnId,
    branch_id: Option<BranchId>,
    branch_name: String,
    order_id: Option<OrderId>,
    reason: String,
    status: ReturnStatus,
    lines: Vec<ReturnLine>,
    total_price: i64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Return {
    /// Empty, not-yet-created instance for rehydration.
    pub fn empty(id: ReturnId) -> Self {
        Self {
            id,
            branch_id: None,
            branch_name: String::new(),
            order_id: None,
            reason: String::new(),
            status: ReturnStatus::Requested,
            lines: Vec::new(),
            total_price: 0,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ReturnId {
        self.id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn status(&self) -> ReturnStatus {
        self.status
    }

    pub fn lines(&self) -> &[ReturnLine] {
        &self.lines
    }

    pub fn total_price(&self) -> i64 {
        self.total_price
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Return {
    type Id = ReturnId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenReturn. Lines commit with the return as one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenReturn {
    pub actor: Actor,
    pub branch_id: BranchId,
    pub return_id: ReturnId,
    pub branch_name: String,
    /// Originating order, when the return is raised against one.
    pub order: Option<OrderRef>,
    pub reason: String,
    pub lines: Vec<ReturnLineSpec>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransitionReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionReturn {
    pub actor: Actor,
    pub return_id: ReturnId,
    pub to: ReturnStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCommand {
    OpenReturn(OpenReturn),
    TransitionReturn(TransitionReturn),
}

/// Event: ReturnOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnOpened {
    pub branch_id: BranchId,
    pub return_id: ReturnId,
    pub branch_name: String,
    pub order_id: Option<OrderId>,
    pub reason: String,
    pub lines: Vec<ReturnLine>,
    pub total_price: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnStatusChanged {
    pub branch_id: BranchId,
    pub return_id: ReturnId,
    pub from: ReturnStatus,
    pub to: ReturnStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnEvent {
    ReturnOpened(ReturnOpened),
    ReturnStatusChanged(ReturnStatusChanged),
}

impl Event for ReturnEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReturnEvent::ReturnOpened(_) => "returns.opened",
            ReturnEvent::ReturnStatusChanged(_) => "returns.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReturnEvent::ReturnOpened(e) => e.occurred_at,
            ReturnEvent::ReturnStatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Return {
    type Command = ReturnCommand;
    type Event = ReturnEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReturnEvent::ReturnOpened(e) => {
                self.id = e.return_id;
                self.branch_id = Some(e.branch_id);
                self.branch_name = e.branch_name.clone();
                self.order_id = e.order_id;
                self.reason = e.reason.clone();
                self.status = ReturnStatus::Requested;
                self.lines = e.lines.clone();
                self.total_price = e.total_price;
                self.created_at = Some(e.occurred_at);
                self.updated_at = None;
                self.created = true;
            }
            ReturnEvent::ReturnStatusChanged(e) => {
                self.status = e.to;
                self.updated_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReturnCommand::OpenReturn(cmd) => self.handle_open(cmd),
            ReturnCommand::TransitionReturn(cmd) => self.handle_transition(cmd),
        }
    }
}

impl Return {
    fn handle_open(&self, cmd: &OpenReturn) -> Result<Vec<ReturnEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("return already exists"));
        }
        if !cmd.actor.may_act_on(cmd.branch_id) {
            return Err(DomainError::ownership_mismatch(
                "cannot open a return for another branch",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "return must have at least one line",
            ));
        }

        if let Some(order) = &cmd.order {
            if order.branch_id != cmd.branch_id {
                return Err(DomainError::ownership_mismatch(
                    "referenced order belongs to another branch",
                ));
            }
            for spec in &cmd.lines {
                if !order.products.contains(&spec.product_id) {
                    return Err(DomainError::not_in_original_order(format!(
                        "product {} does not appear in order {}",
                        spec.product_id, order.order_id
                    )));
                }
            }
        }

        let mut lines = Vec::with_capacity(cmd.lines.len());
        let mut total_price: i64 = 0;
        for spec in &cmd.lines {
            if spec.quantity < 1 {
                return Err(DomainError::validation("quantity must be at least 1"));
            }
            if spec.unit_price <= 0 {
                return Err(DomainError::validation("unit price must be positive"));
            }
            let subtotal = i64::from(spec.quantity) * spec.unit_price;
            total_price += subtotal;
            lines.push(ReturnLine {
                product_id: spec.product_id,
                product_name: spec.product_name.clone(),
                quantity: spec.quantity,
                unit_price: spec.unit_price,
                subtotal,
            });
        }

        Ok(vec![ReturnEvent::ReturnOpened(ReturnOpened {
            branch_id: cmd.branch_id,
            return_id: cmd.return_id,
            branch_name: cmd.branch_name.clone(),
            order_id: cmd.order.as_ref().map(|o| o.order_id),
            reason: cmd.reason.clone(),
            lines,
            total_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transition(&self, cmd: &TransitionReturn) -> Result<Vec<ReturnEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        let branch_id = self.branch_id.ok_or(DomainError::NotFound)?;

        if self.status.is_terminal() {
            return Err(DomainError::already_finalized(format!(
                "return is terminal in status {}",
                self.status
            )));
        }

        match self.status.may_transition(cmd.to) {
            TransitionPath::Ordinary => {
                cmd.actor.require_operator("return workflow transition")?;
            }
            TransitionPath::OverrideOnly => {
                cmd.actor.require_operator("return transition override")?;
            }
            TransitionPath::Forbidden => {
                return Err(DomainError::invalid_state(format!(
                    "transition {} -> {} is not permitted",
                    self.status, cmd.to
                )));
            }
        }

        Ok(vec![ReturnEvent::ReturnStatusChanged(ReturnStatusChanged {
            branch_id,
            return_id: self.id,
            from: self.status,
            to: cmd.to,
            occurred_at: cmd.occurred_at,
        })])
    }
}
