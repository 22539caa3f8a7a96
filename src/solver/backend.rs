//! This module contains the back-end seam of the solver chain.
//!
//! A back-end decides satisfiability of a conjunction of width-1 terms.
//! Everything else the engine asks of the chain (validity with unsat
//! cores, witness values, initial assignments, ranges) is derived from
//! satisfiability checks by the chain head, so back-ends stay minimal and
//! external SMT integrations only have one method to provide.

use std::fmt::Debug;

use downcast_rs::{impl_downcast, Downcast};

use crate::{error::solver::Result, expr::{Assignment, ExprRef}};

/// The result of one satisfiability check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CheckResult {
    /// The conjunction is satisfiable, witnessed by the assignment.
    Sat(Assignment),

    /// The conjunction is unsatisfiable.
    Unsat,

    /// The back-end could not decide the conjunction within its limits.
    Unknown,
}

/// The interface to a satisfiability back-end.
///
/// # Term Ordering
///
/// Callers place the focus of the query, the literal whose feasibility is
/// being decided, as the _last_ element of `terms`. Layers are free to use
/// this to slice the conjunction, and must preserve the convention when
/// forwarding inward.
///
/// # Object Safety
///
/// The trait must remain object safe: chains are composed of boxed layers,
/// and [`Downcast`] lets the engine recover concrete layers to collect
/// their statistics.
pub trait Backend
where
    Self: Debug + Downcast,
{
    /// Decides satisfiability of the conjunction of `terms`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the back-end fails in a way that is not captured
    /// by [`CheckResult::Unknown`].
    fn check(&mut self, terms: &[ExprRef]) -> Result<CheckResult>;

    /// Gets a short name for the back-end, used in diagnostics.
    fn name(&self) -> &'static str;

    /// Gets the layer this one wraps, where the back-end is a wrapping
    /// layer rather than a leaf.
    fn inner(&self) -> Option<&dyn Backend> {
        None
    }
}

impl_downcast!(Backend);

/// The type of a boxed back-end layer.
pub type DynBackend = Box<dyn Backend>;
