//! This module contains errors pertaining to the solver chain.

use thiserror::Error;

use crate::error::container;

/// Errors that occur while the solver chain is deciding queries.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("The solver query exceeded its time budget")]
    Timeout,

    #[error("The back-end could not decide the query")]
    Undecided,

    #[error("Cross-checked back-ends disagree: {primary:?} versus {reference:?}")]
    BackendDisagreement {
        primary: String,
        reference: String,
    },

    #[error("A model was requested for an unsatisfiable constraint set")]
    NoModelAvailable,

    #[error("Expression of width {width:?} cannot be decided by this back-end")]
    UnsupportedWidth { width: u32 },
}

/// A solver error with an associated module location.
pub type LocatedError = container::Located<Error>;

/// The result type for methods that may have solver errors.
pub type Result<T> = std::result::Result<T, Error>;

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
