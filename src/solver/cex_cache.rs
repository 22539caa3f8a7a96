//! This module contains the counter-example cache layer of the solver
//! chain.
//!
//! Witness assignments returned by the wrapped layers are memoised; a later
//! conjunction satisfied by any cached witness is answered without
//! consulting the rest of the chain. The cache is purely additive with
//! respect to query meaning: a stale witness can only fail to satisfy a
//! conjunction, never wrongly satisfy one.

use std::collections::VecDeque;

use crate::{
    error::solver::Result,
    expr::{Assignment, ExprRef},
    solver::backend::{Backend, CheckResult, DynBackend},
};

/// The maximum number of witnesses retained by the cache.
const CACHE_CAPACITY: usize = 64;

/// A layer that memoises witness assignments.
#[derive(Debug)]
pub struct CexCacheBackend {
    inner: DynBackend,
    witnesses: VecDeque<Assignment>,
    hits: u64,
    misses: u64,
}

impl CexCacheBackend {
    /// Constructs the layer around `inner`.
    #[must_use]
    pub fn new(inner: DynBackend) -> Self {
        Self {
            inner,
            witnesses: VecDeque::new(),
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

    /// Records `witness` for future checks, evicting the oldest entry when
    /// full.
    fn remember(&mut self, witness: Assignment) {
        if self.witnesses.contains(&witness) {
            return;
        }
        if self.witnesses.len() >= CACHE_CAPACITY {
            self.witnesses.pop_back();
        }
        self.witnesses.push_front(witness);
    }
}

impl Backend for CexCacheBackend {
    fn check(&mut self, terms: &[ExprRef]) -> Result<CheckResult> {
        for witness in &self.witnesses {
            if witness.satisfies(terms) {
                self.hits += 1;
                return Ok(CheckResult::Sat(witness.clone()));
            }
        }

        self.misses += 1;
        let result = self.inner.check(terms)?;
        if let CheckResult::Sat(witness) = &result {
            self.remember(witness.clone());
        }

        Ok(result)
    }

    fn name(&self) -> &'static str {
        "cex-cache"
    }

    fn inner(&self) -> Option<&dyn Backend> {
        Some(self.inner.as_ref())
    }
}

#[cfg(test)]
mod test {
    use super::CexCacheBackend;
    use crate::{
        constant::DEFAULT_MODEL_ENUMERATION_LIMIT,
        expr::{Array, ExprBuilder, UpdateList},
        solver::{
            backend::{Backend, CheckResult},
            boundary::BoundaryBackend,
        },
    };

    #[test]
    fn repeated_queries_hit_the_cache() -> anyhow::Result<()> {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);
        let x = builder.read(&updates, builder.constant_u64(64, 0), 32);
        let constraint = builder.equals(x, builder.constant_u64(32, 7));

        let inner = Box::new(BoundaryBackend::new(DEFAULT_MODEL_ENUMERATION_LIMIT));
        let mut layer = CexCacheBackend::new(inner);

        let first = layer.check(std::slice::from_ref(&constraint))?;
        assert!(matches!(first, CheckResult::Sat(_)));
        assert_eq!(layer.hits(), 0);

        let second = layer.check(std::slice::from_ref(&constraint))?;
        assert!(matches!(second, CheckResult::Sat(_)));
        assert_eq!(layer.hits(), 1);

        Ok(())
    }
}
