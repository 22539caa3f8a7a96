//! This module contains the primary error type for the engine's interface.
//! It also re-exports the more specific error types that are
//! subsystem-specific.
//!
//! # Anyhow
//!
//! All of the errors implement [`std::error::Error`], and hence can be used
//! with [`anyhow::Error`] internally. It is _not_ recommended to use that
//! error type in the interface of the library, as this forces clients to
//! also use `anyhow`.

pub mod container;
pub mod execution;
pub mod ir;
pub mod solver;

use std::rc::Rc;

use thiserror::Error;

/// The interface result type for the library.
///
/// Any function considered to be part of the public interface of the library
/// should return this result type. Note that _all_ of the library is public
/// in order to facilitate use-cases beyond the ones designed for.
pub type Result<T> = std::result::Result<T, Errors>;

/// The interface error type for the library.
///
/// All errors returned from the library interface (and hence encountered by
/// the clients of the library) should be members of this enum.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Errors that come from constructing or validating the IR.
    #[error(transparent)]
    Ir(#[from] ir::Error),

    /// Errors from the execution subsystem of the library.
    #[error(transparent)]
    Execution(#[from] execution::Error),

    /// Errors from the solver chain.
    #[error(transparent)]
    Solver(#[from] solver::Error),

    /// Unknown errors, usually from the dependencies of the library.
    ///
    /// It is wrapped in an [`Rc`] to ensure that it can be cloned like the
    /// other error types in this interface error.
    #[error(transparent)]
    Other(Rc<anyhow::Error>),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(Rc::new(value))
    }
}

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

/// A library error with an associated module location.
pub type LocatedError = container::Located<Error>;

/// Allow simple conversions from located IR errors by re-wrapping the
/// located error around the more general payload.
impl From<ir::LocatedError> for LocatedError {
    fn from(value: ir::LocatedError) -> Self {
        let location = value.location;
        let payload = Error::from(value.payload);
        Self { location, payload }
    }
}

/// Allow simple conversions from located IR errors by re-wrapping the
/// located error around the more general payload in the errors container.
impl From<ir::LocatedError> for Errors {
    fn from(value: ir::LocatedError) -> Self {
        let re_wrapped: LocatedError = value.into();
        re_wrapped.into()
    }
}

/// Allow simple conversions from located execution errors by re-wrapping the
/// located error around the more general payload.
impl From<execution::LocatedError> for LocatedError {
    fn from(value: execution::LocatedError) -> Self {
        let location = value.location;
        let payload = Error::from(value.payload);
        Self { location, payload }
    }
}

/// Allow simple conversions from located execution errors by re-wrapping the
/// located error around the more general payload in the errors container.
impl From<execution::LocatedError> for Errors {
    fn from(value: execution::LocatedError) -> Self {
        let re_wrapped: LocatedError = value.into();
        re_wrapped.into()
    }
}

/// Allow conversion from the execution errors container to the general
/// errors container.
impl From<execution::Errors> for Errors {
    fn from(value: execution::Errors) -> Self {
        let errs: Vec<execution::LocatedError> = value.into();
        let new_errs: Vec<LocatedError> = errs.into_iter().map(|e| e.into()).collect();

        new_errs.into()
    }
}

/// A container of errors that may occur in the engine.
pub type Errors = container::Errors<LocatedError>;

/// The kinds of program-level failure that terminate an explored path.
///
/// Unlike [`Error`], these are not faults of the engine: they are properties
/// of the program under analysis, discovered along one path. Each produces a
/// test-case record through the run handler unless suppressed by
/// configuration.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// The program called its abort routine.
    Abort,

    /// An assertion in the program failed.
    Assert,

    /// An instruction could not be executed.
    Exec,

    /// A call to a host-provided external function failed.
    External,

    /// The program freed an address that is not the base of a live heap
    /// allocation.
    Free,

    /// A limit of the symbolic memory model was reached.
    Model,

    /// An arithmetic overflow check failed.
    Overflow,

    /// A memory access was out of bounds.
    Ptr,

    /// A write was directed at read-only memory.
    ReadOnly,

    /// The program invoked its error-reporting routine.
    ReportError,

    /// The engine API was used incorrectly by the program.
    User,

    /// An instruction kind the engine does not handle.
    Unhandled,
}

impl ErrorKind {
    /// Gets the file suffix used for test cases produced by this kind of
    /// error.
    #[must_use]
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Abort => "abort.err",
            Self::Assert => "assert.err",
            Self::Exec => "exec.err",
            Self::External => "external.err",
            Self::Free => "free.err",
            Self::Model => "model.err",
            Self::Overflow => "overflow.err",
            Self::Ptr => "ptr.err",
            Self::ReadOnly => "readonly.err",
            Self::ReportError => "report.err",
            Self::User => "user.err",
            Self::Unhandled => "unhandled.err",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Abort => "abort",
            Self::Assert => "assertion failure",
            Self::Exec => "execution error",
            Self::External => "external call failure",
            Self::Free => "invalid free",
            Self::Model => "memory model limit",
            Self::Overflow => "overflow",
            Self::Ptr => "out of bound pointer",
            Self::ReadOnly => "write to read-only memory",
            Self::ReportError => "reported error",
            Self::User => "user error",
            Self::Unhandled => "unhandled instruction",
        };
        write!(f, "{text}")
    }
}
