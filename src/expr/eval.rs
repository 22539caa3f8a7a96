//! This module contains concrete evaluation of expressions under an
//! assignment of byte values to arrays.
//!
//! Evaluation is what grounds counter-example caching, seed replay, and the
//! built-in solver back-end: all three need to know what an expression
//! denotes once every array has concrete contents.

use std::collections::HashMap;

use ethnum::U256;
use uuid::Uuid;

use crate::expr::{
    apply_binary,
    apply_compare,
    sign_extend,
    truncate,
    ExprKind,
    ExprRef,
};

/// A binding of concrete byte contents to arrays, keyed by array identity.
///
/// Arrays without a binding read as all zeroes, which mirrors the engine's
/// zero-initialised memory objects.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Assignment {
    /// The concrete bytes bound to each array.
    pub bindings: HashMap<Uuid, Vec<u8>>,
}

impl Assignment {
    /// Constructs an empty assignment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `bytes` as the contents of the array identified by `id`.
    pub fn bind(&mut self, id: Uuid, bytes: Vec<u8>) {
        self.bindings.insert(id, bytes);
    }

    /// Gets the byte at `index` of the array identified by `id`, reading
    /// zero where no binding exists or the binding is too short.
    #[must_use]
    pub fn byte(&self, id: Uuid, index: usize) -> u8 {
        self.bindings
            .get(&id)
            .and_then(|bytes| bytes.get(index))
            .copied()
            .unwrap_or(0)
    }

    /// Evaluates `expr` to the concrete word it denotes under this
    /// assignment.
    #[must_use]
    pub fn evaluate(&self, expr: &ExprRef) -> U256 {
        match &expr.kind {
            ExprKind::Constant(v) => *v,
            ExprKind::Read { updates, index } => {
                let concrete_index = self.evaluate(index);

                // Walk the writes newest-first; the first write whose index
                // evaluates to the read index wins.
                let mut node = updates.head.as_ref();
                while let Some(n) = node {
                    if self.evaluate(&n.index) == concrete_index {
                        return truncate(self.evaluate(&n.value), 8);
                    }
                    node = n.next.as_ref();
                }

                let index = usize::try_from(concrete_index.as_u128()).unwrap_or(usize::MAX);
                U256::from(self.byte(updates.array.id, index))
            }
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                if self.evaluate(cond) == U256::ZERO {
                    self.evaluate(on_false)
                } else {
                    self.evaluate(on_true)
                }
            }
            ExprKind::Concat { hi, lo } => {
                (self.evaluate(hi) << lo.width) | truncate(self.evaluate(lo), lo.width)
            }
            ExprKind::Extract { src, offset } => {
                truncate(self.evaluate(src) >> *offset, expr.width)
            }
            ExprKind::Not { value } => truncate(!self.evaluate(value), expr.width),
            ExprKind::ZExt { value } => truncate(self.evaluate(value), value.width),
            ExprKind::SExt { value } => {
                truncate(sign_extend(self.evaluate(value), value.width), expr.width)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                apply_binary(*op, expr.width, self.evaluate(lhs), self.evaluate(rhs))
            }
            ExprKind::Compare { op, lhs, rhs } => {
                let result =
                    apply_compare(*op, lhs.width, self.evaluate(lhs), self.evaluate(rhs));
                U256::from(u8::from(result))
            }
        }
    }

    /// Evaluates a width-1 `expr` as a boolean.
    #[must_use]
    pub fn evaluate_bool(&self, expr: &ExprRef) -> bool {
        self.evaluate(expr) != U256::ZERO
    }

    /// Checks whether every expression of `constraints` evaluates to true.
    #[must_use]
    pub fn satisfies<'a>(&self, constraints: impl IntoIterator<Item = &'a ExprRef>) -> bool {
        constraints.into_iter().all(|c| self.evaluate_bool(c))
    }
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use super::Assignment;
    use crate::expr::{Array, ExprBuilder, UpdateList};

    #[test]
    fn unbound_arrays_read_as_zero() {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);
        let read = builder.read8(&updates, builder.constant_u64(32, 0));

        let assignment = Assignment::new();
        assert_eq!(assignment.evaluate(&read), U256::ZERO);
    }

    #[test]
    fn bound_arrays_read_their_bytes() {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array.clone());
        let word = builder.read(&updates, builder.constant_u64(32, 0), 32);

        let mut assignment = Assignment::new();
        assignment.bind(array.id, vec![0x78, 0x56, 0x34, 0x12]);

        // Reads are little-endian.
        assert_eq!(assignment.evaluate(&word), U256::from(0x1234_5678u32));
    }

    #[test]
    fn updates_shadow_base_contents() {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array.clone());

        // A write through a symbolic index cannot be simplified away, but
        // evaluation still resolves it.
        let symbolic_index = builder.read8(&updates, builder.constant_u64(32, 3));
        let index = builder.zext(symbolic_index, 32);
        let updates = updates.write(index, builder.constant_u64(8, 0x99));

        let read = builder.read8(&updates, builder.constant_u64(32, 0));
        let assignment = Assignment::new();

        // The symbolic write index evaluates to zero, so it shadows byte 0.
        assert_eq!(assignment.evaluate(&read), U256::from(0x99u8));
    }

    #[test]
    fn satisfies_checks_all_constraints() {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array.clone());
        let x = builder.read(&updates, builder.constant_u64(32, 0), 32);

        let low = builder.ult(x.clone(), builder.constant_u64(32, 10));
        let high = builder.ugt(x, builder.constant_u64(32, 3));

        let mut assignment = Assignment::new();
        assignment.bind(array.id, vec![5, 0, 0, 0]);
        assert!(assignment.satisfies([&low, &high]));

        assignment.bind(array.id, vec![2, 0, 0, 0]);
        assert!(!assignment.satisfies([&low, &high]));
    }
}
