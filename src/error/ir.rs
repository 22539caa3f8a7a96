//! This module contains errors produced while constructing or validating the
//! intermediate representation consumed by the engine.

use thiserror::Error;

use crate::error::container;

/// Errors that occur during module construction and validation.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Block {block:?} is empty")]
    EmptyBlock { block: u32 },

    #[error("Block {block:?} does not end with a terminator instruction")]
    UnterminatedBlock { block: u32 },

    #[error("A terminator occurs before the end of block {block:?}")]
    TerminatorNotLast { block: u32 },

    #[error("Branch target {target:?} does not name a block of the function")]
    NoSuchTarget { target: u32 },

    #[error("Register {register:?} exceeds the function's declared register count {count:?}")]
    RegisterOutOfRange { register: u32, count: u32 },

    #[error("Integer width {width:?} is outside the supported range 1..=256")]
    InvalidWidth { width: u32 },

    #[error("A function named {name:?} already exists in the module")]
    DuplicateFunction { name: String },

    #[error("A global named {name:?} already exists in the module")]
    DuplicateGlobal { name: String },

    #[error("Function {name:?} has no blocks")]
    EmptyFunction { name: String },

    #[error("Global initializer length {actual:?} does not match the declared size {declared:?}")]
    InitializerSizeMismatch { declared: u64, actual: u64 },
}

/// An IR error with an associated module location.
pub type LocatedError = container::Located<Error>;

/// A container of IR errors used for aggregation during validation.
pub type Errors = container::Errors<LocatedError>;

/// The result type for methods that may have IR errors.
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
