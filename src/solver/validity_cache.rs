//! This module contains the validity cache layer of the solver chain.
//!
//! The layer memoises unsatisfiability: a conjunction proved unsatisfiable
//! once stays unsatisfiable forever (expressions are immutable), so equal
//! conjunctions are answered without re-solving. Satisfiable results are
//! left to the counter-example cache, which remembers the richer witness.

use std::{collections::HashMap, rc::Rc};

use crate::{
    error::solver::Result,
    expr::ExprRef,
    solver::backend::{Backend, CheckResult, DynBackend},
};

/// A layer that memoises unsatisfiable conjunctions.
///
/// Conjunctions are keyed by the pointer identities of their terms; the
/// stored terms pin the interned expressions so the pointers stay valid
/// for the cache's lifetime.
#[derive(Debug)]
pub struct ValidityCacheBackend {
    inner: DynBackend,
    unsat: HashMap<Vec<usize>, Vec<ExprRef>>,
    hits: u64,
    misses: u64,
}

impl ValidityCacheBackend {
    /// Constructs the layer around `inner`.
    #[must_use]
    pub fn new(inner: DynBackend) -> Self {
        Self {
            inner,
            unsat: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Gets the number of checks answered from the cache.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Gets the number of checks forwarded to the wrapped back-end.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Gets the cache key for `terms`: the sorted pointer identities.
    fn key(terms: &[ExprRef]) -> Vec<usize> {
        let mut key: Vec<usize> = terms.iter().map(|t| Rc::as_ptr(t) as usize).collect();
        key.sort_unstable();
        key.dedup();
        key
    }
}

impl Backend for ValidityCacheBackend {
    fn check(&mut self, terms: &[ExprRef]) -> Result<CheckResult> {
        let key = Self::key(terms);
        if self.unsat.contains_key(&key) {
            self.hits += 1;
            return Ok(CheckResult::Unsat);
        }

        self.misses += 1;
        let result = self.inner.check(terms)?;
        if result == CheckResult::Unsat {
            self.unsat.insert(key, terms.to_vec());
        }

        Ok(result)
    }

    fn name(&self) -> &'static str {
        "validity-cache"
    }

    fn inner(&self) -> Option<&dyn Backend> {
        Some(self.inner.as_ref())
    }
}

#[cfg(test)]
mod test {
    use super::ValidityCacheBackend;
    use crate::{
        constant::DEFAULT_MODEL_ENUMERATION_LIMIT,
        expr::{Array, ExprBuilder, UpdateList},
        solver::{
            backend::{Backend, CheckResult},
            boundary::BoundaryBackend,
        },
    };

    #[test]
    fn unsat_conjunctions_are_memoised() -> anyhow::Result<()> {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);
        let x = builder.read(&updates, builder.constant_u64(64, 0), 32);

        let low = builder.ult(x.clone(), builder.constant_u64(32, 10));
        let high = builder.ugt(x, builder.constant_u64(32, 100));
        let terms = vec![low, high];

        let inner = Box::new(BoundaryBackend::new(DEFAULT_MODEL_ENUMERATION_LIMIT));
        let mut layer = ValidityCacheBackend::new(inner);

        assert_eq!(layer.check(&terms)?, CheckResult::Unsat);
        assert_eq!(layer.hits(), 0);

        // The order of the conjuncts does not matter to the cache.
        let reversed: Vec<_> = terms.iter().rev().cloned().collect();
        assert_eq!(layer.check(&reversed)?, CheckResult::Unsat);
        assert_eq!(layer.hits(), 1);

        Ok(())
    }
}
