//! Return workflow domain module (event-sourced).
//!
//! Business rules for returns raised by branch pharmacies, optionally
//! against a prior order. Pure domain logic; the originating order is
//! loaded by the caller and passed in as a reference snapshot.

pub mod ret;
pub mod status;

pub use ret::{
    OpenReturn, OrderRef, Return, ReturnCommand, ReturnEvent, ReturnLine, ReturnLineSpec,
    ReturnOpened, ReturnStatusChanged, TransitionReturn,
};
pub use status::ReturnStatus;
