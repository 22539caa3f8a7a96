//! This module contains the independence-slicing layer of the solver
//! chain.
//!
//! Before forwarding a conjunction inward, the layer discards every term
//! that shares no array, directly or transitively, with the focus
//! literal. Discarding independent terms cannot turn an unsatisfiable
//! conjunction satisfiable, and the engine maintains the invariant that
//! the path-condition prefix of every check is satisfiable on its own, so
//! slicing preserves the answer while shrinking the work the back-end
//! sees.

use std::collections::HashSet;

use itertools::Itertools;
use uuid::Uuid;

use crate::{
    error::solver::Result,
    expr::{ArrayRef, ExprRef},
    solver::backend::{Backend, CheckResult, DynBackend},
};

/// A layer that slices conjunctions to the terms relevant to the focus
/// literal.
#[derive(Debug)]
pub struct IndependentBackend {
    inner: DynBackend,
    sliced_terms: u64,
}

impl IndependentBackend {
    /// Constructs the layer around `inner`.
    #[must_use]
    pub fn new(inner: DynBackend) -> Self {
        Self {
            inner,
            sliced_terms: 0,
        }
    }

    /// Gets the total number of terms discarded by slicing.
    #[must_use]
    pub fn sliced_terms(&self) -> u64 {
        self.sliced_terms
    }

    /// Gets the identities of the arrays mentioned by `term`.
    fn arrays_of(term: &ExprRef) -> HashSet<Uuid> {
        let mut arrays: Vec<ArrayRef> = Vec::new();
        term.collect_arrays(&mut arrays);
        arrays.into_iter().map(|a| a.id).collect()
    }
}

impl Backend for IndependentBackend {
    fn check(&mut self, terms: &[ExprRef]) -> Result<CheckResult> {
        let Some((focus, rest)) = terms.split_last() else {
            return self.inner.check(terms);
        };

        let term_arrays: Vec<HashSet<Uuid>> =
            rest.iter().map(Self::arrays_of).collect_vec();
        let mut relevant = Self::arrays_of(focus);
        let mut included = vec![false; rest.len()];

        // Closure over shared arrays: a term joins the slice when it shares
        // an array with anything already in it, and its arrays then become
        // relevant too.
        loop {
            let mut changed = false;
            for (i, arrays) in term_arrays.iter().enumerate() {
                if included[i] || arrays.is_disjoint(&relevant) {
                    continue;
                }
                included[i] = true;
                relevant.extend(arrays.iter().copied());
                changed = true;
            }
            if !changed {
                break;
            }
        }

        let mut sliced: Vec<ExprRef> = rest
            .iter()
            .enumerate()
            .filter(|(i, _)| included[*i])
            .map(|(_, t)| t.clone())
            .collect();
        self.sliced_terms += (rest.len() - sliced.len()) as u64;
        sliced.push(focus.clone());

        self.inner.check(&sliced)
    }

    fn name(&self) -> &'static str {
        "independent"
    }

    fn inner(&self) -> Option<&dyn Backend> {
        Some(self.inner.as_ref())
    }
}

#[cfg(test)]
mod test {
    use super::IndependentBackend;
    use crate::{
        constant::DEFAULT_MODEL_ENUMERATION_LIMIT,
        expr::{Array, ExprBuilder, UpdateList},
        solver::{
            backend::{Backend, CheckResult},
            boundary::BoundaryBackend,
        },
    };

    #[test]
    fn unrelated_terms_are_sliced_away() -> anyhow::Result<()> {
        let builder = ExprBuilder::new();

        let x_array = Array::new("x", 4);
        let x = builder.read(&UpdateList::new(x_array), builder.constant_u64(64, 0), 32);
        let y_array = Array::new("y", 4);
        let y = builder.read(&UpdateList::new(y_array), builder.constant_u64(64, 0), 32);

        let about_y = builder.ult(y, builder.constant_u64(32, 3));
        let focus = builder.ugt(x, builder.constant_u64(32, 100));

        let inner = Box::new(BoundaryBackend::new(DEFAULT_MODEL_ENUMERATION_LIMIT));
        let mut layer = IndependentBackend::new(inner);

        let result = layer.check(&[about_y, focus])?;
        assert!(matches!(result, CheckResult::Sat(_)));
        assert_eq!(layer.sliced_terms(), 1);

        Ok(())
    }

    #[test]
    fn transitively_related_terms_are_kept() -> anyhow::Result<()> {
        let builder = ExprBuilder::new();

        let x_array = Array::new("x", 4);
        let x = builder.read(&UpdateList::new(x_array), builder.constant_u64(64, 0), 32);
        let y_array = Array::new("y", 4);
        let y = builder.read(&UpdateList::new(y_array), builder.constant_u64(64, 0), 32);

        // `x = y` links the two arrays, so a constraint on `y` must stay.
        let link = builder.equals(x.clone(), y.clone());
        let about_y = builder.ugt(y, builder.constant_u64(32, 50));
        let focus = builder.ult(x, builder.constant_u64(32, 10));

        let inner = Box::new(BoundaryBackend::new(DEFAULT_MODEL_ENUMERATION_LIMIT));
        let mut layer = IndependentBackend::new(inner);

        let result = layer.check(&[link, about_y, focus])?;
        assert_eq!(result, CheckResult::Unsat);
        assert_eq!(layer.sliced_terms(), 0);

        Ok(())
    }
}
