//! This module contains errors pertaining to the symbolic execution of the
//! module under analysis.
//!
//! These are _internal_ faults of the engine or malformed interactions with
//! it. Program-level failures discovered along an explored path (assertion
//! violations, out-of-bounds pointers, and so on) are not errors in this
//! sense; they terminate the offending state and are reported through the
//! run handler as [`crate::error::ErrorKind`] events.

use thiserror::Error;

use crate::{
    error::container,
    ir::{BlockId, FunctionId, GlobalId, RegisterId},
};

/// Errors that occur while the executor is stepping states.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Instruction index {requested:?} is out of bounds in a function of {available:?} instructions")]
    InstructionOutOfBounds { requested: usize, available: usize },

    #[error("Maximum stack depth exceeded with request for {requested:?} frames")]
    StackDepthExceeded { requested: usize },

    #[error("A call frame was requested but none was available")]
    NoSuchFrame,

    #[error("An execution state was requested but none are live")]
    NoSuchState,

    #[error("Register {register:?} was read before any value was bound to it")]
    UnboundRegister { register: RegisterId },

    #[error("Block {block:?} does not exist in function {function:?}")]
    NoSuchBlock {
        function: FunctionId,
        block: BlockId,
    },

    #[error("Function {function:?} does not exist in the module")]
    NoSuchFunction { function: FunctionId },

    #[error("Global {global:?} is not bound in the address space")]
    UnboundGlobal { global: GlobalId },

    #[error("A phi instruction was reached with no incoming edge from the previous block")]
    MissingPhiIncoming,

    #[error("Attempt to add a constant-false constraint to a path condition")]
    InvalidConstraint,

    #[error("The replay path ran out of branch decisions")]
    ReplayExhausted,

    #[error("The replay path disagrees with a determined branch direction")]
    ReplayDivergence,

    #[error("Execution was stopped by the watchdog")]
    StoppedByWatchdog,

    #[error("Width {width:?} is not representable by the expression algebra")]
    UnsupportedWidth { width: u32 },
}

/// An execution error with an associated module location.
pub type LocatedError = container::Located<Error>;

/// A container of execution errors used for aggregation during a run.
pub type Errors = container::Errors<LocatedError>;

/// The result type for methods that may have execution errors.
pub type Result<T> = std::result::Result<T, LocatedError>;

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, location: crate::ir::InstId) -> Self::Located {
        container::Located {
            location,
            payload: self,
        }
    }
}
