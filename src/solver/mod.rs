//! This module contains the solver chain: the stack of caching and slicing
//! layers through which every satisfiability question flows, topped by the
//! [`CoreSolver`] that turns satisfiability checks into the validity,
//! witness, and range operations the engine consumes.
//!
//! Layer order, outermost first: counter-example cache, validity cache,
//! independence slicing, fast counter-example, optional cross-checker, and
//! the concrete back-end. Every layer preserves the contract that unsat
//! cores are subsets of the input constraint vector.

pub mod backend;
pub mod boundary;
pub mod cex_cache;
pub mod cross_check;
pub mod fast_cex;
pub mod independent;
pub mod validity_cache;

pub use backend::{Backend, CheckResult, DynBackend};
pub use boundary::BoundaryBackend;

use std::{
    collections::HashMap,
    rc::Rc,
    time::{Duration, Instant},
};

use ethnum::U256;

use crate::{
    constant::DEFAULT_MODEL_ENUMERATION_LIMIT,
    error::solver::{Error, Result},
    expr::{mask, ArrayRef, Assignment, CompareOp, ExprBuilder, ExprKind, ExprRef},
    solver::{
        cex_cache::CexCacheBackend,
        cross_check::CrossCheckBackend,
        fast_cex::FastCexBackend,
        independent::IndependentBackend,
        validity_cache::ValidityCacheBackend,
    },
};

/// The three-valued answer to a validity question.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Validity {
    /// The query is true under every model of the constraints.
    True,

    /// The query is false under every model of the constraints.
    False,

    /// Both truth values have models, or the chain could not decide.
    Unknown,
}

/// The operations the engine asks of the solver chain.
pub trait Solver {
    /// Decides the validity of `query` under `constraints`.
    ///
    /// When the result is [`Validity::True`] or [`Validity::False`], the
    /// returned vector is an unsat core: a subset of `constraints` that
    /// already entails the answer.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the chain fails or exceeds its time budget.
    fn evaluate(
        &mut self,
        constraints: &[ExprRef],
        query: &ExprRef,
    ) -> Result<(Validity, Vec<ExprRef>)>;

    /// Gets one concrete value `query` can take under `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no model is available or the chain fails.
    fn get_value(&mut self, constraints: &[ExprRef], query: &ExprRef) -> Result<U256>;

    /// Gets concrete contents for `arrays` under one model of
    /// `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no model is available or the chain fails.
    fn get_initial_values(
        &mut self,
        constraints: &[ExprRef],
        arrays: &[ArrayRef],
    ) -> Result<Assignment>;

    /// Gets an enclosing `[low, high]` range for the values `query` can
    /// take under `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the chain fails or exceeds its time budget.
    fn get_range(&mut self, constraints: &[ExprRef], query: &ExprRef) -> Result<(U256, U256)>;

    /// Sets the per-query time budget; [`None`] removes the budget.
    fn set_timeout(&mut self, timeout: Option<Duration>);

    /// Checks whether `query` holds under every model of `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the chain fails or exceeds its time budget.
    fn must_be_true(&mut self, constraints: &[ExprRef], query: &ExprRef) -> Result<bool> {
        Ok(self.evaluate(constraints, query)?.0 == Validity::True)
    }

    /// Checks whether `query` holds under some model of `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the chain fails or exceeds its time budget.
    fn may_be_true(&mut self, constraints: &[ExprRef], query: &ExprRef) -> Result<bool> {
        Ok(self.evaluate(constraints, query)?.0 != Validity::False)
    }

    /// Checks whether `query` is false under some model of `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the chain fails or exceeds its time budget.
    fn may_be_false(&mut self, constraints: &[ExprRef], query: &ExprRef) -> Result<bool> {
        Ok(self.evaluate(constraints, query)?.0 != Validity::True)
    }
}

/// The composition switches for the solver chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChainConfig {
    /// Whether the counter-example cache layer is present.
    pub use_cex_cache: bool,

    /// Whether the validity (unsatisfiability) cache layer is present.
    pub use_validity_cache: bool,

    /// Whether the independence-slicing layer is present.
    pub use_independent: bool,

    /// Whether the fast counter-example layer is present.
    pub use_fast_cex: bool,

    /// Whether queries are simplified through the path condition's
    /// equalities before being checked.
    pub equality_substitution: bool,

    /// Whether the back-end is cross-checked against the built-in one.
    pub cross_check: bool,

    /// The candidate-model enumeration limit of the built-in back-end.
    pub model_limit: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            use_cex_cache: true,
            use_validity_cache: true,
            use_independent: true,
            use_fast_cex: true,
            equality_substitution: true,
            cross_check: false,
            model_limit: DEFAULT_MODEL_ENUMERATION_LIMIT,
        }
    }
}

/// Cache effectiveness counters harvested from the chain layers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChainStats {
    /// Checks answered by a cached witness.
    pub cex_cache_hits: u64,

    /// Checks answered by the unsatisfiability cache.
    pub validity_cache_hits: u64,

    /// Checks answered by a trivial model.
    pub fast_cex_hits: u64,

    /// Terms discarded by independence slicing.
    pub sliced_terms: u64,
}

/// The head of the solver chain.
///
/// The core solver owns the layered back-end stack and derives the full
/// [`Solver`] surface from satisfiability checks, including greedy unsat
/// core minimisation for the interpolation subsystem.
#[derive(Debug)]
pub struct CoreSolver {
    backend: DynBackend,
    builder: Rc<ExprBuilder>,
    equality_substitution: bool,
    timeout: Option<Duration>,
}

impl CoreSolver {
    /// Constructs a core solver over the provided back-end stack.
    #[must_use]
    pub fn new(backend: DynBackend, builder: Rc<ExprBuilder>, equality_substitution: bool) -> Self {
        Self {
            backend,
            builder,
            equality_substitution,
            timeout: None,
        }
    }

    /// Gets the cache counters accumulated by the chain layers.
    #[must_use]
    pub fn chain_stats(&self) -> ChainStats {
        let mut stats = ChainStats::default();
        let mut layer: Option<&dyn Backend> = Some(self.backend.as_ref());

        while let Some(current) = layer {
            if let Some(cex) = current.downcast_ref::<CexCacheBackend>() {
                stats.cex_cache_hits = cex.hits();
            }
            if let Some(validity) = current.downcast_ref::<ValidityCacheBackend>() {
                stats.validity_cache_hits = validity.hits();
            }
            if let Some(fast) = current.downcast_ref::<FastCexBackend>() {
                stats.fast_cex_hits = fast.hits();
            }
            if let Some(independent) = current.downcast_ref::<IndependentBackend>() {
                stats.sliced_terms = independent.sliced_terms();
            }
            layer = current.inner();
        }

        stats
    }

    /// Gets the deadline for a query starting now.
    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| Instant::now() + t)
    }

    /// Runs one satisfiability check, honouring the deadline.
    fn check(&mut self, terms: &[ExprRef], deadline: Option<Instant>) -> Result<CheckResult> {
        if let Some(deadline) = deadline {
            if Instant::now() > deadline {
                return Err(Error::Timeout);
            }
        }
        self.backend.check(terms)
    }

    /// Simplifies `query` through the equalities of `constraints`.
    fn simplify_query(&self, constraints: &[ExprRef], query: &ExprRef) -> ExprRef {
        if !self.equality_substitution {
            return query.clone();
        }

        let mut map = HashMap::new();
        for constraint in constraints {
            if let ExprKind::Compare {
                op: CompareOp::Eq,
                lhs,
                rhs,
            } = &constraint.kind
            {
                if lhs.is_constant() && !rhs.is_constant() {
                    map.insert(Rc::as_ptr(rhs) as usize, lhs.clone());
                }
            }
        }

        if map.is_empty() {
            query.clone()
        } else {
            self.builder.substitute(query, &map)
        }
    }

    /// Shrinks `constraints` to a subset that, together with `extra`,
    /// remains unsatisfiable.
    ///
    /// Minimisation is greedy and abandons early if the deadline passes;
    /// the unminimised remainder is still a correct (if larger) core.
    fn minimize_core(
        &mut self,
        constraints: &[ExprRef],
        extra: &ExprRef,
        deadline: Option<Instant>,
    ) -> Result<Vec<ExprRef>> {
        let mut kept: Vec<ExprRef> = constraints.to_vec();

        let mut i = 0;
        while i < kept.len() {
            if let Some(deadline) = deadline {
                if Instant::now() > deadline {
                    break;
                }
            }

            let mut subset: Vec<ExprRef> = kept.clone();
            subset.remove(i);
            subset.push(extra.clone());

            match self.check(&subset, deadline)? {
                CheckResult::Unsat => {
                    kept.remove(i);
                }
                _ => i += 1,
            }
        }

        Ok(kept)
    }
}

impl Solver for CoreSolver {
    fn evaluate(
        &mut self,
        constraints: &[ExprRef],
        query: &ExprRef,
    ) -> Result<(Validity, Vec<ExprRef>)> {
        let deadline = self.deadline();
        let query = self.simplify_query(constraints, query);

        if query.is_true() {
            return Ok((Validity::True, vec![]));
        }
        if query.is_false() {
            return Ok((Validity::False, vec![]));
        }

        // Validity of the query is unsatisfiability of its negation.
        let negated = self.builder.not_bool(query.clone());
        let mut with_negated: Vec<ExprRef> = constraints.to_vec();
        with_negated.push(negated.clone());

        match self.check(&with_negated, deadline)? {
            CheckResult::Unsat => {
                let core = self.minimize_core(constraints, &negated, deadline)?;
                return Ok((Validity::True, core));
            }
            CheckResult::Unknown => return Ok((Validity::Unknown, vec![])),
            CheckResult::Sat(_) => {}
        }

        let mut with_query: Vec<ExprRef> = constraints.to_vec();
        with_query.push(query.clone());

        match self.check(&with_query, deadline)? {
            CheckResult::Unsat => {
                let core = self.minimize_core(constraints, &query, deadline)?;
                Ok((Validity::False, core))
            }
            CheckResult::Sat(_) => Ok((Validity::Unknown, vec![])),
            CheckResult::Unknown => Ok((Validity::Unknown, vec![])),
        }
    }

    fn get_value(&mut self, constraints: &[ExprRef], query: &ExprRef) -> Result<U256> {
        let deadline = self.deadline();
        let query = self.simplify_query(constraints, query);

        if let Some(value) = query.as_constant() {
            return Ok(value);
        }

        match self.check(constraints, deadline)? {
            CheckResult::Sat(model) => Ok(model.evaluate(&query)),
            CheckResult::Unsat => Err(Error::NoModelAvailable),
            CheckResult::Unknown => Err(Error::Undecided),
        }
    }

    fn get_initial_values(
        &mut self,
        constraints: &[ExprRef],
        arrays: &[ArrayRef],
    ) -> Result<Assignment> {
        let deadline = self.deadline();

        match self.check(constraints, deadline)? {
            CheckResult::Sat(model) => {
                let mut assignment = Assignment::new();
                for array in arrays {
                    let size = usize::try_from(array.size).unwrap_or(usize::MAX);
                    let bytes = (0..size).map(|i| model.byte(array.id, i)).collect();
                    assignment.bind(array.id, bytes);
                }
                Ok(assignment)
            }
            CheckResult::Unsat => Err(Error::NoModelAvailable),
            CheckResult::Unknown => Err(Error::Undecided),
        }
    }

    fn get_range(&mut self, constraints: &[ExprRef], query: &ExprRef) -> Result<(U256, U256)> {
        let query = self.simplify_query(constraints, query);
        if let Some(value) = query.as_constant() {
            return Ok((value, value));
        }

        let builder = self.builder.clone();
        let width = query.width;

        // Binary search for the least reachable value.
        let mut lo = U256::ZERO;
        let mut hi = mask(width);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let below = builder.ule(query.clone(), builder.constant(width, mid));
            if self.may_be_true(constraints, &below)? {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        let least = lo;

        // Binary search for the greatest reachable value.
        let mut lo = least;
        let mut hi = mask(width);
        while lo < hi {
            let mid = hi - (hi - lo) / 2;
            let above = builder.uge(query.clone(), builder.constant(width, mid));
            if self.may_be_true(constraints, &above)? {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        Ok((least, lo))
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }
}

/// Builds the layered chain described by `config` over the built-in
/// back-end.
#[must_use]
pub fn build_chain(builder: Rc<ExprBuilder>, config: &ChainConfig) -> CoreSolver {
    build_chain_over(Box::new(BoundaryBackend::new(config.model_limit)), builder, config)
}

/// Builds the layered chain described by `config` over an externally
/// provided back-end, cross-checking it against the built-in one when the
/// configuration asks for that.
#[must_use]
pub fn build_chain_over(
    backend: DynBackend,
    builder: Rc<ExprBuilder>,
    config: &ChainConfig,
) -> CoreSolver {
    let mut stack: DynBackend = if config.cross_check {
        Box::new(CrossCheckBackend::new(
            backend,
            Box::new(BoundaryBackend::new(config.model_limit)),
        ))
    } else {
        backend
    };

    if config.use_fast_cex {
        stack = Box::new(FastCexBackend::new(stack));
    }
    if config.use_independent {
        stack = Box::new(IndependentBackend::new(stack));
    }
    if config.use_validity_cache {
        stack = Box::new(ValidityCacheBackend::new(stack));
    }
    if config.use_cex_cache {
        stack = Box::new(CexCacheBackend::new(stack));
    }

    CoreSolver::new(stack, builder, config.equality_substitution)
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use ethnum::U256;

    use super::{build_chain, ChainConfig, Solver, Validity};
    use crate::expr::{Array, ExprBuilder, UpdateList};

    fn symbolic_word(builder: &ExprBuilder) -> crate::expr::ExprRef {
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);
        builder.read(&updates, builder.constant_u64(64, 0), 32)
    }

    #[test]
    fn undetermined_branches_evaluate_unknown() -> anyhow::Result<()> {
        let builder = Rc::new(ExprBuilder::new());
        let mut solver = build_chain(builder.clone(), &ChainConfig::default());
        let x = symbolic_word(&builder);

        let branch = builder.ult(x, builder.constant_u64(32, 10));
        let (validity, core) = solver.evaluate(&[], &branch).map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(validity, Validity::Unknown);
        assert!(core.is_empty());

        Ok(())
    }

    #[test]
    fn entailed_branches_evaluate_true_with_core() -> anyhow::Result<()> {
        let builder = Rc::new(ExprBuilder::new());
        let mut solver = build_chain(builder.clone(), &ChainConfig::default());
        let x = symbolic_word(&builder);

        let assumed = builder.ugt(x.clone(), builder.constant_u64(32, 100));
        let query = builder.uge(x, builder.constant_u64(32, 10));

        let (validity, core) = solver
            .evaluate(std::slice::from_ref(&assumed), &query)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(validity, Validity::True);
        assert_eq!(core, vec![assumed]);

        Ok(())
    }

    #[test]
    fn contradicted_branches_evaluate_false() -> anyhow::Result<()> {
        let builder = Rc::new(ExprBuilder::new());
        let mut solver = build_chain(builder.clone(), &ChainConfig::default());
        let x = symbolic_word(&builder);

        let assumed = builder.ugt(x.clone(), builder.constant_u64(32, 100));
        let query = builder.ult(x, builder.constant_u64(32, 10));

        let (validity, core) = solver
            .evaluate(std::slice::from_ref(&assumed), &query)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(validity, Validity::False);
        assert_eq!(core, vec![assumed]);

        Ok(())
    }

    #[test]
    fn witness_values_satisfy_the_constraints() -> anyhow::Result<()> {
        let builder = Rc::new(ExprBuilder::new());
        let mut solver = build_chain(builder.clone(), &ChainConfig::default());
        let x = symbolic_word(&builder);

        let assumed = builder.ugt(x.clone(), builder.constant_u64(32, 41));
        let value = solver
            .get_value(std::slice::from_ref(&assumed), &x)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        assert!(value > U256::from(41u8));

        Ok(())
    }

    #[test]
    fn equality_substitution_short_circuits_queries() -> anyhow::Result<()> {
        let builder = Rc::new(ExprBuilder::new());
        let mut solver = build_chain(builder.clone(), &ChainConfig::default());
        let x = symbolic_word(&builder);

        let equality = builder.equals(x.clone(), builder.constant_u64(32, 5));
        let query = builder.ult(x, builder.constant_u64(32, 10));

        // With `x = 5` in the constraints the query folds to a constant
        // before any back-end sees it.
        let (validity, _) = solver
            .evaluate(std::slice::from_ref(&equality), &query)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(validity, Validity::True);

        Ok(())
    }

    #[test]
    fn ranges_enclose_reachable_values() -> anyhow::Result<()> {
        let builder = Rc::new(ExprBuilder::new());
        let mut solver = build_chain(builder.clone(), &ChainConfig::default());
        let x = symbolic_word(&builder);

        let equality = builder.equals(x.clone(), builder.constant_u64(32, 77));
        let (low, high) = solver
            .get_range(std::slice::from_ref(&equality), &x)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(low, U256::from(77u8));
        assert_eq!(high, U256::from(77u8));

        Ok(())
    }
}
