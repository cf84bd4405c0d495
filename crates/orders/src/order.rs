use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use apotheca_core::{
    Actor, Aggregate, AggregateRoot, BranchId, DomainError, OrderId, ProductId,
};
use apotheca_events::Event;

use crate::status::{OrderStatus, TransitionPath};

/// Caller-supplied line input for [`PlaceOrder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpec {
    pub product_id: ProductId,
    /// Display name snapshotted from the catalog at order time.
    pub product_name: String,
    pub quantity: u32,
    /// Unit price snapshot in the smallest currency unit. Catalog price
    /// changes never retroactively alter historical orders.
    pub unit_price: i64,
}

/// Order line as recorded: input plus the computed subtotal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: i64,
    /// quantity × unit_price, fixed at creation.
    pub subtotal: i64,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    branch_id: Option<BranchId>,
    branch_name: String,
    status: OrderStatus,
    lines: Vec<OrderLine>,
    total_price: i64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl Order {
    /// Empty, not-yet-created instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            branch_id: None,
            branch_name: String::new(),
            status: OrderStatus::Requested,
            lines: Vec::new(),
            total_price: 0,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
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
        self.created && !self.deleted
    }

    /// Products appearing among this order's lines. Returns validate their
    /// lines against this set.
    pub fn line_products(&self) -> Vec<ProductId> {
        self.lines.iter().map(|l| l.product_id).collect()
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder. The order and all its lines commit as one event,
/// so a multi-line create is all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub actor: Actor,
    pub branch_id: BranchId,
    pub order_id: OrderId,
    /// Branch display name snapshotted from the directory.
    pub branch_name: String,
    pub lines: Vec<LineSpec>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransitionOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOrder {
    pub actor: Actor,
    pub order_id: OrderId,
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteOrder (operator hard delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOrder {
    pub actor: Actor,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    TransitionOrder(TransitionOrder),
    DeleteOrder(DeleteOrder),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub branch_id: BranchId,
    pub order_id: OrderId,
    pub branch_name: String,
    pub lines: Vec<OrderLine>,
    pub total_price: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub branch_id: BranchId,
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDeleted. Previously recorded stock transactions are untouched;
/// the audit trail survives order deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDeleted {
    pub branch_id: BranchId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderStatusChanged(OrderStatusChanged),
    OrderDeleted(OrderDeleted),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.placed",
            OrderEvent::OrderStatusChanged(_) => "orders.status_changed",
            OrderEvent::OrderDeleted(_) => "orders.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderStatusChanged(e) => e.occurred_at,
            OrderEvent::OrderDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.branch_id = Some(e.branch_id);
                self.branch_name = e.branch_name.clone();
                self.status = OrderStatus::Requested;
                self.lines = e.lines.clone();
                self.total_price = e.total_price;
                self.created_at = Some(e.occurred_at);
                self.updated_at = None;
                self.created = true;
            }
            OrderEvent::OrderStatusChanged(e) => {
                self.status = e.to;
                self.updated_at = Some(e.occurred_at);
            }
            OrderEvent::OrderDeleted(_) => {
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::TransitionOrder(cmd) => self.handle_transition(cmd),
            OrderCommand::DeleteOrder(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Order {
    fn ensure_exists(&self) -> Result<BranchId, DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        self.branch_id.ok_or(DomainError::NotFound)
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if !cmd.actor.may_act_on(cmd.branch_id) {
            return Err(DomainError::ownership_mismatch(
                "cannot place an order for another branch",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("order must have at least one line"));
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
            lines.push(OrderLine {
                product_id: spec.product_id,
                product_name: spec.product_name.clone(),
                quantity: spec.quantity,
                unit_price: spec.unit_price,
                subtotal,
            });
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            branch_id: cmd.branch_id,
            order_id: cmd.order_id,
            branch_name: cmd.branch_name.clone(),
            lines,
            total_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transition(&self, cmd: &TransitionOrder) -> Result<Vec<OrderEvent>, DomainError> {
        let branch_id = self.ensure_exists()?;

        if self.status.is_terminal() {
            return Err(DomainError::already_finalized(format!(
                "order is terminal in status {}",
                self.status
            )));
        }

        match self.status.may_transition(cmd.to) {
            TransitionPath::Ordinary => match cmd.to {
                // Cancellation belongs to the owning branch (or the operator).
                OrderStatus::Canceled => {
                    if !cmd.actor.may_act_on(branch_id) {
                        return Err(DomainError::ownership_mismatch(
                            "cannot cancel another branch's order",
                        ));
                    }
                }
                _ => cmd.actor.require_operator("order fulfillment transition")?,
            },
            TransitionPath::OverrideOnly => {
                cmd.actor.require_operator("order transition override")?;
            }
            TransitionPath::Forbidden => {
                return Err(DomainError::invalid_state(format!(
                    "transition {} -> {} is not permitted",
                    self.status, cmd.to
                )));
            }
        }

        Ok(vec![OrderEvent::OrderStatusChanged(OrderStatusChanged {
            branch_id,
            order_id: self.id,
            from: self.status,
            to: cmd.to,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteOrder) -> Result<Vec<OrderEvent>, DomainError> {
        let branch_id = self.ensure_exists()?;
        cmd.actor.require_operator("order hard delete")?;

        Ok(vec![OrderEvent::OrderDeleted(OrderDeleted {
            branch_id,
            order_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_branch() -> BranchId {
        BranchId::new()
    }

    fn test_order_id() -> OrderId {
        OrderId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn line(qty: u32, price: i64) -> LineSpec {
        LineSpec {
            product_id: ProductId::new(),
            product_name: "Ibuprofen 200mg".to_string(),
            quantity: qty,
            unit_price: price,
        }
    }

    fn placed_order(branch: BranchId, lines: Vec<LineSpec>) -> Order {
        let mut order = Order::empty(test_order_id());
        let cmd = PlaceOrder {
            actor: Actor::Branch(branch),
            branch_id: branch,
            order_id: order.id_typed(),
            branch_name: "Central Branch".to_string(),
            lines,
            occurred_at: test_time(),
        };
        let events = order.handle(&OrderCommand::PlaceOrder(cmd)).unwrap();
        for e in &events {
            order.apply(e);
        }
        order
    }

    fn transition(order: &mut Order, actor: Actor, to: OrderStatus) -> Result<(), DomainError> {
        let cmd = TransitionOrder {
            actor,
            order_id: order.id_typed(),
            to,
            occurred_at: test_time(),
        };
        let events = order.handle(&OrderCommand::TransitionOrder(cmd))?;
        for e in &events {
            order.apply(e);
        }
        Ok(())
    }

    #[test]
    fn place_computes_snapshot_totals() {
        let order = placed_order(test_branch(), vec![line(10, 1000)]);

        assert_eq!(order.status(), OrderStatus::Requested);
        assert_eq!(order.total_price(), 10_000);
        assert_eq!(order.lines()[0].subtotal, 10_000);
        assert!(order.created_at().is_some());
        assert!(order.updated_at().is_none());
    }

    #[test]
    fn place_rejects_empty_and_invalid_lines() {
        let branch = test_branch();
        let mut order = Order::empty(test_order_id());

        let empty = PlaceOrder {
            actor: Actor::Branch(branch),
            branch_id: branch,
            order_id: order.id_typed(),
            branch_name: "B".to_string(),
            lines: vec![],
            occurred_at: test_time(),
        };
        assert!(matches!(
            order.handle(&OrderCommand::PlaceOrder(empty)),
            Err(DomainError::Validation(_))
        ));

        let zero_qty = PlaceOrder {
            actor: Actor::Branch(branch),
            branch_id: branch,
            order_id: order.id_typed(),
            branch_name: "B".to_string(),
            lines: vec![line(0, 1000)],
            occurred_at: test_time(),
        };
        assert!(matches!(
            order.handle(&OrderCommand::PlaceOrder(zero_qty)),
            Err(DomainError::Validation(_))
        ));

        // Rejected command left no state behind.
        assert!(!order.exists());
        assert_eq!(order.version(), 0);
    }

    #[test]
    fn place_for_another_branch_is_ownership_mismatch() {
        let order = Order::empty(test_order_id());
        let cmd = PlaceOrder {
            actor: Actor::Branch(test_branch()),
            branch_id: test_branch(),
            order_id: order.id_typed(),
            branch_name: "B".to_string(),
            lines: vec![line(1, 100)],
            occurred_at: test_time(),
        };
        assert!(matches!(
            order.handle(&OrderCommand::PlaceOrder(cmd)),
            Err(DomainError::OwnershipMismatch(_))
        ));
    }

    #[test]
    fn full_lifecycle_each_transition_succeeds_once() {
        let mut order = placed_order(test_branch(), vec![line(10, 1000)]);

        for to in [
            OrderStatus::Approved,
            OrderStatus::Processing,
            OrderStatus::Shipping,
            OrderStatus::Completed,
        ] {
            transition(&mut order, Actor::Operator, to).unwrap();
            assert_eq!(order.status(), to);
        }

        // Repeating the last transition fails: COMPLETED is terminal.
        let err = transition(&mut order, Actor::Operator, OrderStatus::Completed).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyFinalized(_)));
    }

    #[test]
    fn repeating_a_non_terminal_transition_fails() {
        let mut order = placed_order(test_branch(), vec![line(1, 100)]);
        transition(&mut order, Actor::Operator, OrderStatus::Approved).unwrap();
        transition(&mut order, Actor::Operator, OrderStatus::Processing).unwrap();

        let err = transition(&mut order, Actor::Operator, OrderStatus::Processing).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn every_terminal_status_refuses_transitions() {
        for terminal in [
            OrderStatus::Rejected,
            OrderStatus::Canceled,
            OrderStatus::Completed,
        ] {
            let mut order = placed_order(test_branch(), vec![line(1, 100)]);
            match terminal {
                OrderStatus::Rejected => {
                    transition(&mut order, Actor::Operator, OrderStatus::Rejected).unwrap()
                }
                OrderStatus::Canceled => {
                    transition(&mut order, Actor::Operator, OrderStatus::Canceled).unwrap()
                }
                _ => {
                    transition(&mut order, Actor::Operator, OrderStatus::Completed).unwrap();
                }
            }

            for to in [
                OrderStatus::Requested,
                OrderStatus::Approved,
                OrderStatus::Processing,
                OrderStatus::Completed,
            ] {
                let err = transition(&mut order, Actor::Operator, to).unwrap_err();
                assert!(
                    matches!(err, DomainError::AlreadyFinalized(_)),
                    "expected AlreadyFinalized from {terminal:?} to {to:?}, got {err:?}"
                );
            }
        }
    }

    #[test]
    fn branch_may_cancel_own_requested_order_only() {
        let branch = test_branch();
        let mut order = placed_order(branch, vec![line(1, 100)]);

        let err =
            transition(&mut order, Actor::Branch(test_branch()), OrderStatus::Canceled).unwrap_err();
        assert!(matches!(err, DomainError::OwnershipMismatch(_)));

        transition(&mut order, Actor::Branch(branch), OrderStatus::Canceled).unwrap();
        assert_eq!(order.status(), OrderStatus::Canceled);
    }

    #[test]
    fn branch_may_not_run_fulfillment_transitions() {
        let branch = test_branch();
        let mut order = placed_order(branch, vec![line(1, 100)]);

        let err = transition(&mut order, Actor::Branch(branch), OrderStatus::Approved).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn forward_skip_is_operator_override() {
        let branch = test_branch();
        let mut order = placed_order(branch, vec![line(1, 100)]);

        let err = transition(&mut order, Actor::Branch(branch), OrderStatus::Completed).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));

        transition(&mut order, Actor::Operator, OrderStatus::Completed).unwrap();
        assert_eq!(order.status(), OrderStatus::Completed);
    }

    #[test]
    fn delete_is_operator_only_and_hides_the_order() {
        let branch = test_branch();
        let mut order = placed_order(branch, vec![line(1, 100)]);

        let branch_delete = DeleteOrder {
            actor: Actor::Branch(branch),
            order_id: order.id_typed(),
            occurred_at: test_time(),
        };
        assert!(matches!(
            order.handle(&OrderCommand::DeleteOrder(branch_delete)),
            Err(DomainError::Forbidden(_))
        ));

        let delete = DeleteOrder {
            actor: Actor::Operator,
            order_id: order.id_typed(),
            occurred_at: test_time(),
        };
        let events = order.handle(&OrderCommand::DeleteOrder(delete)).unwrap();
        for e in &events {
            order.apply(e);
        }
        assert!(!order.exists());

        // Anything after the delete sees nothing.
        let err = transition(&mut order, Actor::Operator, OrderStatus::Approved).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let order = placed_order(test_branch(), vec![line(2, 300)]);
        let before = order.clone();

        let cmd = OrderCommand::TransitionOrder(TransitionOrder {
            actor: Actor::Operator,
            order_id: order.id_typed(),
            to: OrderStatus::Approved,
            occurred_at: test_time(),
        });
        let events1 = order.handle(&cmd).unwrap();
        let events2 = order.handle(&cmd).unwrap();

        assert_eq!(order, before);
        assert_eq!(events1, events2);
    }

    proptest! {
        /// totalPrice always equals the sum of line subtotals, and each
        /// subtotal equals quantity × unit-price snapshot.
        #[test]
        fn total_price_is_sum_of_subtotals(
            specs in prop::collection::vec((1u32..500, 1i64..100_000), 1..12)
        ) {
            let lines: Vec<LineSpec> = specs
                .iter()
                .map(|&(qty, price)| line(qty, price))
                .collect();
            let order = placed_order(test_branch(), lines);

            let expected: i64 = specs
                .iter()
                .map(|&(qty, price)| i64::from(qty) * price)
                .sum();
            prop_assert_eq!(order.total_price(), expected);

            for (l, &(qty, price)) in order.lines().iter().zip(specs.iter()) {
                prop_assert_eq!(l.subtotal, i64::from(qty) * price);
            }
        }
    }
}
