//! This module contains the dependency analysis used by interpolation
//! marking and speculation independence decisions.
//!
//! Expressions are hash-consed terms whose leaves are reads of named
//! arrays, so the expression DAG _is_ the data-flow graph: the variables an
//! expression depends on are exactly the arrays reachable from it, and the
//! dependency ancestors of an unsat-core literal are the path-condition
//! constraints sharing arrays with it.

use std::collections::BTreeSet;

use crate::expr::{ArrayRef, ExprRef};

/// Gets the names of the source variables `expr` depends on.
///
/// Shadow arrays report the name of the array they shadow, so dependency
/// comparison is stable across interpolant renaming.
#[must_use]
pub fn variables_of(expr: &ExprRef) -> BTreeSet<String> {
    let mut arrays: Vec<ArrayRef> = Vec::new();
    expr.collect_arrays(&mut arrays);
    arrays
        .into_iter()
        .map(|a| a.name.trim_end_matches('\'').to_string())
        .collect()
}

/// Gets the union of source variables over a set of expressions.
#[must_use]
pub fn variables_of_all<'a>(exprs: impl IntoIterator<Item = &'a ExprRef>) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for expr in exprs {
        out.extend(variables_of(expr));
    }
    out
}

/// Checks whether `vars` is independent of every avoid set: no avoid set
/// mentions any of the variables.
#[must_use]
pub fn is_independent(vars: &BTreeSet<String>, avoid_sets: &[BTreeSet<String>]) -> bool {
    avoid_sets
        .iter()
        .all(|avoid| avoid.is_disjoint(vars))
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use super::{is_independent, variables_of};
    use crate::expr::{Array, ExprBuilder, UpdateList};

    #[test]
    fn variables_are_collected_transitively() {
        let builder = ExprBuilder::new();
        let x = Array::new("x", 4);
        let y = Array::new("y", 4);

        let read_x = builder.read(&UpdateList::new(x), builder.constant_u64(64, 0), 32);
        let read_y = builder.read(&UpdateList::new(y), builder.constant_u64(64, 0), 32);
        let sum = builder.add(read_x, read_y);
        let cond = builder.ult(sum, builder.constant_u64(32, 10));

        let vars = variables_of(&cond);
        assert!(vars.contains("x"));
        assert!(vars.contains("y"));
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn independence_requires_disjoint_avoid_sets() {
        let vars: BTreeSet<String> = ["x".to_string()].into();
        let avoid_hit: Vec<BTreeSet<String>> = vec![["x".to_string(), "z".to_string()].into()];
        let avoid_miss: Vec<BTreeSet<String>> = vec![["y".to_string()].into()];

        assert!(!is_independent(&vars, &avoid_hit));
        assert!(is_independent(&vars, &avoid_miss));
        assert!(is_independent(&vars, &[]));
    }
}
