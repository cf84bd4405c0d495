//! Return status lifecycle.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use apotheca_core::DomainError;

/// Return status.
///
/// ```text
/// REQUESTED ──▶ APPROVED ──▶ PROCESSING ──▶ COMPLETED
///     │
///     └───────▶ REJECTED
/// ```
///
/// REJECTED and COMPLETED are terminal. There is no CANCELED state for
/// returns; a rejected return is final.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnStatus {
    Requested,
    Approved,
    Rejected,
    Processing,
    Completed,
}

/// How a transition may be reached.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransitionPath {
    Ordinary,
    OverrideOnly,
    Forbidden,
}

impl ReturnStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Completed)
    }

    fn fulfillment_rank(self) -> Option<u8> {
        match self {
            Self::Requested => Some(0),
            Self::Approved => Some(1),
            Self::Processing => Some(2),
            Self::Completed => Some(3),
            Self::Rejected => None,
        }
    }

    /// Transition table. Callers check `is_terminal` on the source first and
    /// surface `AlreadyFinalized`.
    pub fn may_transition(self, to: ReturnStatus) -> TransitionPath {
        use ReturnStatus::*;
        match (self, to) {
            (Requested, Approved | Rejected) => TransitionPath::Ordinary,
            (Approved, Processing) => TransitionPath::Ordinary,
            (Processing, Completed) => TransitionPath::Ordinary,
            _ => match (self.fulfillment_rank(), to.fulfillment_rank()) {
                (Some(from), Some(target)) if target > from => TransitionPath::OverrideOnly,
                _ => TransitionPath::Forbidden,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
        }
    }
}

impl core::fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReturnStatus {
    type Err = DomainError;

    /// Case-insensitive on input, canonical case on output.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REQUESTED" => Ok(Self::Requested),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(DomainError::validation(format!(
                "malformed return status: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(ReturnStatus::Rejected.is_terminal());
        assert!(ReturnStatus::Completed.is_terminal());
        assert!(!ReturnStatus::Requested.is_terminal());
        assert!(!ReturnStatus::Processing.is_terminal());
    }

    #[test]
    fn ordinary_chain_is_adjacent() {
        use ReturnStatus::*;
        assert_eq!(Requested.may_transition(Approved), TransitionPath::Ordinary);
        assert_eq!(Requested.may_transition(Rejected), TransitionPath::Ordinary);
        assert_eq!(Approved.may_transition(Processing), TransitionPath::Ordinary);
        assert_eq!(Processing.may_transition(Completed), TransitionPath::Ordinary);
    }

    #[test]
    fn no_cancellation_path_exists() {
        // Returns have no CANCELED; the only side exit is REJECTED from
        // REQUESTED.
        use ReturnStatus::*;
        assert_eq!(Approved.may_transition(Rejected), TransitionPath::Forbidden);
        assert_eq!(
            Processing.may_transition(Rejected),
            TransitionPath::Forbidden
        );
    }

    #[test]
    fn forward_skips_are_override_only() {
        use ReturnStatus::*;
        assert_eq!(
            Requested.may_transition(Completed),
            TransitionPath::OverrideOnly
        );
        assert_eq!(
            Approved.may_transition(Completed),
            TransitionPath::OverrideOnly
        );
    }

    #[test]
    fn parse_is_case_insensitive_display_is_canonical() {
        let s: ReturnStatus = "Processing".parse().unwrap();
        assert_eq!(s, ReturnStatus::Processing);
        assert_eq!(s.to_string(), "PROCESSING");
        assert!("CANCELED".parse::<ReturnStatus>().is_err());
    }
}
