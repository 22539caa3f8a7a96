//! This module contains the fast counter-example layer of the solver
//! chain.
//!
//! The layer tries a handful of cheap constant-propagation models before
//! consulting the wrapped back-end: the all-zero model and uniform fill
//! patterns over the arrays the query mentions. A hit avoids the full
//! back-end entirely; a miss forwards unchanged.

use crate::{
    error::solver::Result,
    expr::{ArrayRef, Assignment, ExprRef},
    solver::backend::{Backend, CheckResult, DynBackend},
};

/// The uniform byte patterns the layer tries, in order.
const FILL_PATTERNS: [u8; 3] = [0x00, 0x01, 0xff];

/// A layer that quickly accepts conjunctions satisfied by trivial models.
#[derive(Debug)]
pub struct FastCexBackend {
    inner: DynBackend,
    hits: u64,
    misses: u64,
}

impl FastCexBackend {
    /// Constructs the layer around `inner`.
    #[must_use]
    pub fn new(inner: DynBackend) -> Self {
        Self {
            inner,
            hits: 0,
            misses: 0,
        }
    }

    /// Gets the number of checks answered without the wrapped back-end.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Gets the number of checks forwarded to the wrapped back-end.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

impl Backend for FastCexBackend {
    fn check(&mut self, terms: &[ExprRef]) -> Result<CheckResult> {
        let mut arrays: Vec<ArrayRef> = Vec::new();
        for term in terms {
            term.collect_arrays(&mut arrays);
        }

        for pattern in FILL_PATTERNS {
            let mut assignment = Assignment::new();
            for array in &arrays {
                let size = usize::try_from(array.size).unwrap_or(usize::MAX);
                assignment.bind(array.id, vec![pattern; size]);
            }

            if assignment.satisfies(terms) {
                self.hits += 1;
                return Ok(CheckResult::Sat(assignment));
            }
        }

        self.misses += 1;
        self.inner.check(terms)
    }

    fn name(&self) -> &'static str {
        "fast-cex"
    }

    fn inner(&self) -> Option<&dyn Backend> {
        Some(self.inner.as_ref())
    }
}

#[cfg(test)]
mod test {
    use super::FastCexBackend;
    use crate::{
        constant::DEFAULT_MODEL_ENUMERATION_LIMIT,
        expr::{Array, ExprBuilder, UpdateList},
        solver::{
            backend::{Backend, CheckResult},
            boundary::BoundaryBackend,
        },
    };

    #[test]
    fn trivial_models_short_circuit() -> anyhow::Result<()> {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);
        let x = builder.read(&updates, builder.constant_u64(64, 0), 32);
        let constraint = builder.ult(x, builder.constant_u64(32, 100));

        let inner = Box::new(BoundaryBackend::new(DEFAULT_MODEL_ENUMERATION_LIMIT));
        let mut layer = FastCexBackend::new(inner);

        let result = layer.check(&[constraint])?;
        assert!(matches!(result, CheckResult::Sat(_)));
        assert_eq!(layer.hits(), 1);
        assert_eq!(layer.misses(), 0);

        Ok(())
    }

    #[test]
    fn hard_queries_forward_inward() -> anyhow::Result<()> {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);
        let x = builder.read(&updates, builder.constant_u64(64, 0), 32);
        let constraint = builder.equals(x, builder.constant_u64(32, 0x1234));

        let inner = Box::new(BoundaryBackend::new(DEFAULT_MODEL_ENUMERATION_LIMIT));
        let mut layer = FastCexBackend::new(inner);

        let result = layer.check(&[constraint])?;
        assert!(matches!(result, CheckResult::Sat(_)));
        assert_eq!(layer.misses(), 1);

        Ok(())
    }
}
