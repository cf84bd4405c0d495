//! Order status lifecycle.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use apotheca_core::DomainError;

/// Order status.
///
/// ```text
/// REQUESTED ──▶ APPROVED ──▶ PROCESSING ──▶ SHIPPING ──▶ COMPLETED
///     │  │
///     │  └────▶ REJECTED
///     └───────▶ CANCELED
/// ```
///
/// REJECTED, CANCELED and COMPLETED are terminal. The ordinary API only
/// reaches adjacent transitions; an operator override may skip forward along
/// the fulfillment chain (see [`OrderStatus::may_transition`]).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Requested,
    Approved,
    Rejected,
    Processing,
    Shipping,
    Completed,
    Canceled,
}

/// How a transition may be reached.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransitionPath {
    /// Reachable through the ordinary API.
    Ordinary,
    /// Reachable only as an operator override (forward skip).
    OverrideOnly,
    /// Never permitted.
    Forbidden,
}

impl OrderStatus {
    /// Terminal statuses have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Canceled | Self::Completed)
    }

    /// Position in the fulfillment chain; side exits have no rank.
    fn fulfillment_rank(self) -> Option<u8> {
        match self {
            Self::Requested => Some(0),
            Self::Approved => Some(1),
            Self::Processing => Some(2),
            Self::Shipping => Some(3),
            Self::Completed => Some(4),
            Self::Rejected | Self::Canceled => None,
        }
    }

    /// The transition table. Callers must check `is_terminal` on the source
    /// first and surface `AlreadyFinalized`; this table only distinguishes
    /// ordinary transitions from operator overrides.
    pub fn may_transition(self, to: OrderStatus) -> TransitionPath {
        use OrderStatus::*;
        match (self, to) {
            (Requested, Approved | Rejected | Canceled) => TransitionPath::Ordinary,
            (Approved, Processing) => TransitionPath::Ordinary,
            (Processing, Shipping) => TransitionPath::Ordinary,
            (Shipping, Completed) => TransitionPath::Ordinary,
            _ => match (self.fulfillment_rank(), to.fulfillment_rank()) {
                // Forward skip along the chain (e.g. REQUESTED → COMPLETED).
                (Some(from), Some(target)) if target > from => TransitionPath::OverrideOnly,
                _ => TransitionPath::Forbidden,
            },
        }
    }

    /// Canonical upper-case name, as serialized outward.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Processing => "PROCESSING",
            Self::Shipping => "SHIPPING",
            Self::Completed => "COMPLETED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    /// Case-insensitive on input, canonical case on output.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REQUESTED" => Ok(Self::Requested),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "PROCESSING" => Ok(Self::Processing),
            "SHIPPING" => Ok(Self::Shipping),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(DomainError::validation(format!(
                "malformed order status: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(!OrderStatus::Requested.is_terminal());
        assert!(!OrderStatus::Shipping.is_terminal());
    }

    #[test]
    fn ordinary_chain_is_adjacent() {
        use OrderStatus::*;
        assert_eq!(Requested.may_transition(Approved), TransitionPath::Ordinary);
        assert_eq!(Requested.may_transition(Rejected), TransitionPath::Ordinary);
        assert_eq!(Requested.may_transition(Canceled), TransitionPath::Ordinary);
        assert_eq!(Approved.may_transition(Processing), TransitionPath::Ordinary);
        assert_eq!(Processing.may_transition(Shipping), TransitionPath::Ordinary);
        assert_eq!(Shipping.may_transition(Completed), TransitionPath::Ordinary);
    }

    #[test]
    fn forward_skips_are_override_only() {
        use OrderStatus::*;
        assert_eq!(
            Requested.may_transition(Completed),
            TransitionPath::OverrideOnly
        );
        assert_eq!(
            Approved.may_transition(Shipping),
            TransitionPath::OverrideOnly
        );
    }

    #[test]
    fn backwards_and_side_moves_are_forbidden() {
        use OrderStatus::*;
        assert_eq!(Approved.may_transition(Requested), TransitionPath::Forbidden);
        assert_eq!(Approved.may_transition(Rejected), TransitionPath::Forbidden);
        assert_eq!(Shipping.may_transition(Canceled), TransitionPath::Forbidden);
        assert_eq!(Approved.may_transition(Approved), TransitionPath::Forbidden);
    }

    #[test]
    fn parse_is_case_insensitive_display_is_canonical() {
        let s: OrderStatus = "shipping".parse().unwrap();
        assert_eq!(s, OrderStatus::Shipping);
        assert_eq!(s.to_string(), "SHIPPING");
        assert!("IN_TRANSIT".parse::<OrderStatus>().is_err());
    }
}
