//! This module contains the path condition: the ordered conjunction of
//! branch predicates accumulated along one explored path.
//!
//! The set keeps an auxiliary substitution map: when an equality `x = k`
//! with constant `k` is added, later simplifications replace `x` by `k`,
//! and every previously stored constraint is rewritten under the new
//! equality. Rewriting uses the expression builder, so rewritten
//! constraints re-simplify and the set never stores a tautology that the
//! algebra can discharge.

use std::{collections::HashMap, rc::Rc};

use crate::{
    error::execution::Error,
    expr::{CompareOp, ExprBuilder, ExprKind, ExprRef},
};

/// The ordered, append-only conjunction of boolean constraints carried by
/// one execution state.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConstraintSet {
    /// The constraints, in the order they were added.
    constraints: Vec<ExprRef>,

    /// The substitution map from equality constraints: keys are interned
    /// expression pointers, images are the constants they equal.
    equalities: HashMap<usize, ExprRef>,
}

impl ConstraintSet {
    /// Constructs an empty constraint set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the constraints in insertion order.
    #[must_use]
    pub fn constraints(&self) -> &[ExprRef] {
        self.constraints.as_slice()
    }

    /// Gets the number of constraints in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Checks if the set contains no constraints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Iterates over the constraints in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ExprRef> {
        self.constraints.iter()
    }

    /// Adds `constraint` to the set, returning the constraints actually
    /// appended after simplification and conjunction splitting.
    ///
    /// Conjunctions are split and added conjunct-by-conjunct. Equalities of
    /// the form `k = x` with constant `k` extend the substitution map and
    /// rewrite every previously stored constraint.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the constraint simplifies to constant false:
    /// callers only add constraints the solver has witnessed satisfiable,
    /// so a false constraint is an engine invariant violation.
    pub fn add(&mut self, builder: &ExprBuilder, constraint: ExprRef) -> Result<Vec<ExprRef>, Error> {
        let simplified = self.simplify_expr(builder, &constraint);

        if simplified.is_true() {
            return Ok(vec![]);
        }
        if simplified.is_false() {
            return Err(Error::InvalidConstraint);
        }

        if let ExprKind::Binary {
            op: crate::expr::BinaryOp::And,
            lhs,
            rhs,
        } = &simplified.kind
        {
            if simplified.width == 1 {
                let (lhs, rhs) = (lhs.clone(), rhs.clone());
                let mut appended = self.add(builder, lhs)?;
                appended.extend(self.add(builder, rhs)?);
                return Ok(appended);
            }
        }

        if let ExprKind::Compare {
            op: CompareOp::Eq,
            lhs,
            rhs,
        } = &simplified.kind
        {
            // The builder canonicalises constants to the left of an
            // equality, so `lhs` constant means this is `k = x`.
            if lhs.is_constant() && !rhs.is_constant() {
                self.equalities
                    .insert(Rc::as_ptr(rhs) as usize, lhs.clone());
                self.rewrite_existing(builder);
            }
        }

        self.constraints.push(simplified.clone());
        Ok(vec![simplified])
    }

    /// Simplifies `expr` by back-substituting the recorded equalities until
    /// a fixed point is reached.
    #[must_use]
    pub fn simplify_expr(&self, builder: &ExprBuilder, expr: &ExprRef) -> ExprRef {
        if self.equalities.is_empty() {
            return expr.clone();
        }

        let mut current = expr.clone();
        loop {
            let next = builder.substitute(&current, &self.equalities);
            if Rc::ptr_eq(&next, &current) {
                return next;
            }
            current = next;
        }
    }

    /// Rewrites every stored constraint under the current substitution map,
    /// dropping any that simplify to true.
    fn rewrite_existing(&mut self, builder: &ExprBuilder) {
        let rewritten: Vec<ExprRef> = self
            .constraints
            .iter()
            .map(|c| {
                let mut current = c.clone();
                loop {
                    let next = builder.substitute(&current, &self.equalities);
                    if Rc::ptr_eq(&next, &current) {
                        return next;
                    }
                    current = next;
                }
            })
            .filter(|c| !c.is_true())
            .collect();
        self.constraints = rewritten;
    }
}

impl<'a> IntoIterator for &'a ConstraintSet {
    type IntoIter = std::slice::Iter<'a, ExprRef>;
    type Item = &'a ExprRef;

    fn into_iter(self) -> Self::IntoIter {
        self.constraints.iter()
    }
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use super::ConstraintSet;
    use crate::expr::{Array, ExprBuilder, UpdateList};

    fn symbolic_word(builder: &ExprBuilder) -> crate::expr::ExprRef {
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);
        builder.read(&updates, builder.constant_u64(32, 0), 32)
    }

    #[test]
    fn adding_true_is_a_no_op() -> anyhow::Result<()> {
        let builder = ExprBuilder::new();
        let mut set = ConstraintSet::new();
        set.add(&builder, builder.bool_true())
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        assert!(set.is_empty());

        Ok(())
    }

    #[test]
    fn adding_false_is_an_invariant_violation() {
        let builder = ExprBuilder::new();
        let mut set = ConstraintSet::new();
        set.add(&builder, builder.bool_false())
            .expect_err("Adding a false constraint did not fail");
    }

    #[test]
    fn conjunctions_are_split() -> anyhow::Result<()> {
        let builder = ExprBuilder::new();
        let mut set = ConstraintSet::new();
        let x = symbolic_word(&builder);

        let low = builder.ult(x.clone(), builder.constant_u64(32, 10));
        let high = builder.ugt(x, builder.constant_u64(32, 3));
        let both = builder.and_bool(low.clone(), high.clone());

        set.add(&builder, both).map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(set.len(), 2);

        Ok(())
    }

    #[test]
    fn equality_substitution_reaches_later_queries() -> anyhow::Result<()> {
        let builder = ExprBuilder::new();
        let mut set = ConstraintSet::new();
        let x = symbolic_word(&builder);
        let k = builder.constant_u64(32, 42);

        let equality = builder.equals(x.clone(), k.clone());
        set.add(&builder, equality).map_err(|e| anyhow::anyhow!("{e}"))?;

        // After `x = 42`, `x` itself simplifies to the constant.
        let simplified = set.simplify_expr(&builder, &x);
        assert_eq!(simplified.as_constant(), Some(U256::from(42u8)));

        // And an expression over `x` folds away entirely.
        let sum = builder.add(x, builder.constant_u64(32, 1));
        let simplified = set.simplify_expr(&builder, &sum);
        assert_eq!(simplified.as_constant(), Some(U256::from(43u8)));

        Ok(())
    }

    #[test]
    fn equality_substitution_rewrites_prior_constraints() -> anyhow::Result<()> {
        let builder = ExprBuilder::new();
        let mut set = ConstraintSet::new();
        let x = symbolic_word(&builder);

        let low = builder.ult(x.clone(), builder.constant_u64(32, 10));
        set.add(&builder, low).map_err(|e| anyhow::anyhow!("{e}"))?;

        let equality = builder.equals(x, builder.constant_u64(32, 4));
        set.add(&builder, equality).map_err(|e| anyhow::anyhow!("{e}"))?;

        // The prior `x < 10` became `4 < 10`, which is true and dropped;
        // only the equality remains.
        assert_eq!(set.len(), 1);

        Ok(())
    }

    #[test]
    fn simplification_is_idempotent() -> anyhow::Result<()> {
        let builder = ExprBuilder::new();
        let mut set = ConstraintSet::new();
        let x = symbolic_word(&builder);

        set.add(&builder, builder.equals(x.clone(), builder.constant_u64(32, 7)))
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        let once = set.simplify_expr(&builder, &x);
        let twice = set.simplify_expr(&builder, &once);
        assert!(std::rc::Rc::ptr_eq(&once, &twice));

        Ok(())
    }
}
