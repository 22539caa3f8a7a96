//! This module contains the [`ExprBuilder`], the sole constructor of
//! expressions.
//!
//! The builder owns the hash-consing table: every canonical constructor
//! folds constants, applies its algebraic identities, and then interns the
//! result, so structurally equal expressions produced by one builder are
//! pointer-equal. The set of identities is deterministic: two equal inputs
//! always produce the same output object.

use std::{
    cell::RefCell,
    collections::HashMap,
    rc::{Rc, Weak},
};

use derivative::Derivative;
use ethnum::U256;
use uuid::Uuid;

use crate::expr::{
    apply_binary,
    apply_compare,
    array::{Array, ArrayRef, UpdateList},
    mask,
    truncate,
    BinaryOp,
    CompareOp,
    Expr,
    ExprKind,
    ExprRef,
};

/// The interning key of an expression.
///
/// Children are keyed by pointer: because children are themselves interned,
/// pointer identity coincides with structural identity, which keeps key
/// comparison constant-time.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum ExprKey {
    Constant(u32, U256),
    Read {
        array: Uuid,
        head: usize,
        index: usize,
    },
    Select(usize, usize, usize),
    Concat(usize, usize),
    Extract(usize, u32, u32),
    Not(usize),
    ZExt(u32, usize),
    SExt(u32, usize),
    Binary(BinaryOp, usize, usize),
    Compare(CompareOp, usize, usize),
}

/// Gets the interning key component for one child expression.
fn ptr(e: &ExprRef) -> usize {
    Rc::as_ptr(e) as usize
}

/// The builder and interner for all expressions used by one engine
/// instance.
///
/// # Lifecycle
///
/// The table holds weak references: dropping every expression that mentions
/// a term allows the term to be freed, and [`Self::sweep`] removes the dead
/// entries. The engine sweeps the builder when it samples its memory
/// footprint.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ExprBuilder {
    /// The interning table.
    #[derivative(Debug = "ignore")]
    table: RefCell<HashMap<ExprKey, Weak<Expr>>>,

    /// The lazily-created shadow counterpart of each array.
    #[derivative(Debug = "ignore")]
    shadows: RefCell<HashMap<Uuid, ArrayRef>>,
}

impl ExprBuilder {
    /// Constructs a new builder with an empty interning table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: RefCell::new(HashMap::new()),
            shadows: RefCell::new(HashMap::new()),
        }
    }

    /// Gets the number of live interned expressions.
    #[must_use]
    pub fn interned_count(&self) -> usize {
        self.table
            .borrow()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Removes dead entries from the interning table.
    pub fn sweep(&self) {
        self.table.borrow_mut().retain(|_, w| w.strong_count() > 0);
    }

    /// Interns the provided term, returning the canonical object for it.
    fn intern(&self, width: u32, kind: ExprKind) -> ExprRef {
        let key = match &kind {
            ExprKind::Constant(v) => ExprKey::Constant(width, *v),
            ExprKind::Read { updates, index } => ExprKey::Read {
                array: updates.array.id,
                head: updates.head.as_ref().map_or(0, |n| Rc::as_ptr(n) as usize),
                index: ptr(index),
            },
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => ExprKey::Select(ptr(cond), ptr(on_true), ptr(on_false)),
            ExprKind::Concat { hi, lo } => ExprKey::Concat(ptr(hi), ptr(lo)),
            ExprKind::Extract { src, offset } => ExprKey::Extract(ptr(src), *offset, width),
            ExprKind::Not { value } => ExprKey::Not(ptr(value)),
            ExprKind::ZExt { value } => ExprKey::ZExt(width, ptr(value)),
            ExprKind::SExt { value } => ExprKey::SExt(width, ptr(value)),
            ExprKind::Binary { op, lhs, rhs } => ExprKey::Binary(*op, ptr(lhs), ptr(rhs)),
            ExprKind::Compare { op, lhs, rhs } => ExprKey::Compare(*op, ptr(lhs), ptr(rhs)),
        };

        if let Some(existing) = self.table.borrow().get(&key).and_then(Weak::upgrade) {
            return existing;
        }

        let expr = Rc::new(Expr { width, kind });
        self.table.borrow_mut().insert(key, Rc::downgrade(&expr));
        expr
    }

    /// Constructs a constant of the provided `width`.
    #[must_use]
    pub fn constant(&self, width: u32, value: U256) -> ExprRef {
        self.intern(width, ExprKind::Constant(truncate(value, width)))
    }

    /// Constructs a constant of the provided `width` from a native integer.
    #[must_use]
    pub fn constant_u64(&self, width: u32, value: u64) -> ExprRef {
        self.constant(width, U256::from(value))
    }

    /// Constructs the width-1 constant true.
    #[must_use]
    pub fn bool_true(&self) -> ExprRef {
        self.constant(1, U256::ONE)
    }

    /// Constructs the width-1 constant false.
    #[must_use]
    pub fn bool_false(&self) -> ExprRef {
        self.constant(1, U256::ZERO)
    }

    /// Constructs the width-1 constant for `value`.
    #[must_use]
    pub fn bool(&self, value: bool) -> ExprRef {
        if value {
            self.bool_true()
        } else {
            self.bool_false()
        }
    }

    /// Constructs a single-byte read through `updates` at `index`.
    ///
    /// When the index is concrete the read is simplified against the update
    /// list: a matching concrete write yields the written value, and
    /// non-matching concrete writes are skipped. Simplification stops at
    /// the first write with a symbolic index, as such a write may alias any
    /// position.
    #[must_use]
    pub fn read8(&self, updates: &UpdateList, index: ExprRef) -> ExprRef {
        if let Some(concrete_index) = index.as_constant() {
            let mut node = updates.head.as_ref();
            while let Some(n) = node {
                match n.index.as_constant() {
                    Some(written) if written == concrete_index => return n.value.clone(),
                    Some(_) => node = n.next.as_ref(),
                    None => break,
                }
            }

            // Every write before the stop point was skipped, so the read
            // only needs the remainder of the list.
            if node.map_or(0, |n| Rc::as_ptr(n) as usize)
                != updates.head.as_ref().map_or(0, |n| Rc::as_ptr(n) as usize)
            {
                let remainder = UpdateList {
                    array: updates.array.clone(),
                    head: node.cloned(),
                };
                return self.intern(
                    8,
                    ExprKind::Read {
                        updates: remainder,
                        index,
                    },
                );
            }
        }

        self.intern(
            8,
            ExprKind::Read {
                updates: updates.clone(),
                index,
            },
        )
    }

    /// Constructs a `width`-bit little-endian read through `updates`
    /// starting at byte `index`.
    ///
    /// # Panics
    ///
    /// Panics if `width` is zero. This is a programmer bug.
    #[must_use]
    pub fn read(&self, updates: &UpdateList, index: ExprRef, width: u32) -> ExprRef {
        assert!(width > 0, "Cannot read zero bits");
        let bytes = width.div_ceil(8);

        let mut result = self.read8(updates, index.clone());
        for i in 1..bytes {
            let offset = self.add(
                index.clone(),
                self.constant_u64(index.width, u64::from(i)),
            );
            let byte = self.read8(updates, offset);
            result = self.concat(byte, result);
        }

        if bytes * 8 == width {
            result
        } else {
            self.extract(result, 0, width)
        }
    }

    /// Constructs an if-then-else over values of equal width.
    ///
    /// # Panics
    ///
    /// Panics if `cond` is not width 1 or the branch widths differ. This is
    /// a programmer bug.
    #[must_use]
    pub fn select(&self, cond: ExprRef, on_true: ExprRef, on_false: ExprRef) -> ExprRef {
        assert_eq!(cond.width, 1, "Select condition must have width 1");
        assert_eq!(
            on_true.width, on_false.width,
            "Select branches must share a width"
        );

        if let Some(c) = cond.as_constant() {
            return if c == U256::ZERO { on_false } else { on_true };
        }
        if Rc::ptr_eq(&on_true, &on_false) {
            return on_true;
        }

        let width = on_true.width;
        self.intern(
            width,
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            },
        )
    }

    /// Constructs the concatenation of `hi` and `lo`, with `hi` occupying
    /// the most significant bits.
    ///
    /// Concatenations are normalised to a right-associative chain, and
    /// adjacent extractions of one source are merged.
    ///
    /// # Panics
    ///
    /// Panics if the combined width exceeds the maximum. This is a
    /// programmer bug.
    #[must_use]
    pub fn concat(&self, hi: ExprRef, lo: ExprRef) -> ExprRef {
        let width = hi.width + lo.width;
        assert!(width <= 256, "Concatenation exceeds the maximum width");

        if let (Some(h), Some(l)) = (hi.as_constant(), lo.as_constant()) {
            return self.constant(width, (h << lo.width) | l);
        }

        // Merge (concat (extract x o+k w1) (extract x o k)) into one
        // extraction over the shared source.
        if let (
            ExprKind::Extract {
                src: hi_src,
                offset: hi_off,
            },
            ExprKind::Extract {
                src: lo_src,
                offset: lo_off,
            },
        ) = (&hi.kind, &lo.kind)
        {
            if Rc::ptr_eq(hi_src, lo_src) && *hi_off == lo_off + lo.width {
                return self.extract(hi_src.clone(), *lo_off, width);
            }
        }

        // Normalise to right-associative form.
        if let ExprKind::Concat {
            hi: inner_hi,
            lo: inner_lo,
        } = &hi.kind
        {
            let new_lo = self.concat(inner_lo.clone(), lo);
            return self.concat(inner_hi.clone(), new_lo);
        }

        self.intern(width, ExprKind::Concat { hi, lo })
    }

    /// Constructs the extraction of `width` bits starting at bit `offset`
    /// of `src`.
    ///
    /// # Panics
    ///
    /// Panics if the extraction reaches outside `src`. This is a programmer
    /// bug.
    #[must_use]
    pub fn extract(&self, src: ExprRef, offset: u32, width: u32) -> ExprRef {
        assert!(
            offset + width <= src.width,
            "Extraction of {width} bits at {offset} exceeds source width {}",
            src.width
        );

        if width == src.width {
            return src;
        }
        if let Some(v) = src.as_constant() {
            return self.constant(width, v >> offset);
        }

        match &src.kind {
            // Collapse nested extractions.
            ExprKind::Extract {
                src: inner,
                offset: inner_offset,
            } => self.extract(inner.clone(), offset + inner_offset, width),

            // Descend into a concatenation when the extraction is fully
            // contained in one side.
            ExprKind::Concat { hi, lo } => {
                if offset + width <= lo.width {
                    self.extract(lo.clone(), offset, width)
                } else if offset >= lo.width {
                    self.extract(hi.clone(), offset - lo.width, width)
                } else {
                    self.intern(width, ExprKind::Extract { src, offset })
                }
            }

            // The low bits of a zero extension are the original value.
            ExprKind::ZExt { value } if offset == 0 && width == value.width => value.clone(),
            ExprKind::SExt { value } if offset == 0 && width == value.width => value.clone(),

            _ => self.intern(width, ExprKind::Extract { src, offset }),
        }
    }

    /// Constructs the bitwise complement of `value`.
    #[must_use]
    pub fn not(&self, value: ExprRef) -> ExprRef {
        if let Some(v) = value.as_constant() {
            return self.constant(value.width, !v);
        }
        if let ExprKind::Not { value: inner } = &value.kind {
            return inner.clone();
        }

        let width = value.width;
        self.intern(width, ExprKind::Not { value })
    }

    /// Constructs the zero extension of `value` to `width` bits.
    ///
    /// # Panics
    ///
    /// Panics if `width` is narrower than the value. This is a programmer
    /// bug.
    #[must_use]
    pub fn zext(&self, value: ExprRef, width: u32) -> ExprRef {
        assert!(width >= value.width, "Cannot zero-extend to a narrower width");
        if width == value.width {
            return value;
        }
        if let Some(v) = value.as_constant() {
            return self.constant(width, v);
        }

        self.intern(width, ExprKind::ZExt { value })
    }

    /// Constructs the sign extension of `value` to `width` bits.
    ///
    /// # Panics
    ///
    /// Panics if `width` is narrower than the value. This is a programmer
    /// bug.
    #[must_use]
    pub fn sext(&self, value: ExprRef, width: u32) -> ExprRef {
        assert!(width >= value.width, "Cannot sign-extend to a narrower width");
        if width == value.width {
            return value;
        }
        if let Some(v) = value.as_constant() {
            let extended = crate::expr::sign_extend(v, value.width);
            return self.constant(width, extended);
        }

        self.intern(width, ExprKind::SExt { value })
    }

    /// Constructs the binary operation `op` over operands of equal width.
    ///
    /// # Panics
    ///
    /// Panics if the operand widths differ. This is a programmer bug.
    #[must_use]
    pub fn binary(&self, op: BinaryOp, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        assert_eq!(
            lhs.width, rhs.width,
            "Binary operands must share a width for {op:?}"
        );
        let width = lhs.width;

        if let (Some(l), Some(r)) = (lhs.as_constant(), rhs.as_constant()) {
            return self.constant(width, apply_binary(op, width, l, r));
        }

        // Canonical operand order: a constant operand of a commutative
        // operation sits on the left.
        let (lhs, rhs) = if op.is_commutative() && rhs.is_constant() && !lhs.is_constant() {
            (rhs, lhs)
        } else {
            (lhs, rhs)
        };

        if let Some(simplified) = self.binary_identity(op, &lhs, &rhs) {
            return simplified;
        }

        self.intern(width, ExprKind::Binary { op, lhs, rhs })
    }

    /// Applies the algebraic identities for `op`, if one matches.
    fn binary_identity(&self, op: BinaryOp, lhs: &ExprRef, rhs: &ExprRef) -> Option<ExprRef> {
        let width = lhs.width;
        let l = lhs.as_constant();
        let same = Rc::ptr_eq(lhs, rhs);

        match op {
            BinaryOp::Add => {
                if l == Some(U256::ZERO) {
                    return Some(rhs.clone());
                }
            }
            BinaryOp::Sub => {
                if rhs.as_constant() == Some(U256::ZERO) {
                    return Some(lhs.clone());
                }
                if same {
                    return Some(self.constant(width, U256::ZERO));
                }
            }
            BinaryOp::Mul => {
                if l == Some(U256::ONE) {
                    return Some(rhs.clone());
                }
                if l == Some(U256::ZERO) {
                    return Some(self.constant(width, U256::ZERO));
                }
            }
            BinaryOp::And => {
                if l == Some(U256::ZERO) {
                    return Some(self.constant(width, U256::ZERO));
                }
                if l == Some(mask(width)) {
                    return Some(rhs.clone());
                }
                if same {
                    return Some(lhs.clone());
                }
            }
            BinaryOp::Or => {
                if l == Some(U256::ZERO) {
                    return Some(rhs.clone());
                }
                if l == Some(mask(width)) {
                    return Some(self.constant(width, mask(width)));
                }
                if same {
                    return Some(lhs.clone());
                }
            }
            BinaryOp::Xor => {
                if l == Some(U256::ZERO) {
                    return Some(rhs.clone());
                }
                if same {
                    return Some(self.constant(width, U256::ZERO));
                }
            }
            BinaryOp::UDiv | BinaryOp::SDiv => {
                if rhs.as_constant() == Some(U256::ONE) {
                    return Some(lhs.clone());
                }
            }
            BinaryOp::Shl | BinaryOp::LShr | BinaryOp::AShr => {
                if rhs.as_constant() == Some(U256::ZERO) {
                    return Some(lhs.clone());
                }
            }
            BinaryOp::URem | BinaryOp::SRem => {}
        }

        None
    }

    /// Constructs the comparison `op` over operands of equal width.
    ///
    /// # Panics
    ///
    /// Panics if the operand widths differ. This is a programmer bug.
    #[must_use]
    pub fn compare(&self, op: CompareOp, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        assert_eq!(
            lhs.width, rhs.width,
            "Comparison operands must share a width for {op:?}"
        );
        let width = lhs.width;

        if let (Some(l), Some(r)) = (lhs.as_constant(), rhs.as_constant()) {
            return self.bool(apply_compare(op, width, l, r));
        }

        match op {
            CompareOp::Eq => self.eq(lhs, rhs),
            CompareOp::Ne => {
                let eq = self.eq(lhs, rhs);
                self.is_zero(eq)
            }
            _ => {
                if Rc::ptr_eq(&lhs, &rhs) {
                    return self.bool(matches!(op, CompareOp::Ule | CompareOp::Sle));
                }
                self.intern(1, ExprKind::Compare { op, lhs, rhs })
            }
        }
    }

    /// Constructs an equality, canonicalising a constant operand to the
    /// left and collapsing boolean double negation.
    fn eq(&self, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        if Rc::ptr_eq(&lhs, &rhs) {
            return self.bool_true();
        }

        let (lhs, rhs) = if rhs.is_constant() && !lhs.is_constant() {
            (rhs, lhs)
        } else {
            (lhs, rhs)
        };

        if lhs.width == 1 {
            if let Some(l) = lhs.as_constant() {
                if l == U256::ONE {
                    // (= true b) is b.
                    return rhs;
                }
                // (= false (= false b)) is b.
                if let ExprKind::Compare {
                    op: CompareOp::Eq,
                    lhs: inner_l,
                    rhs: inner_r,
                } = &rhs.kind
                {
                    if inner_l.is_false() && inner_r.width == 1 {
                        return inner_r.clone();
                    }
                }
            }
        }

        self.intern(
            1,
            ExprKind::Compare {
                op: CompareOp::Eq,
                lhs,
                rhs,
            },
        )
    }

    /// Constructs the test that `value` is zero.
    #[must_use]
    pub fn is_zero(&self, value: ExprRef) -> ExprRef {
        let zero = self.constant(value.width, U256::ZERO);
        self.compare(CompareOp::Eq, zero, value)
    }

    /// Constructs the boolean negation of a width-1 `value`.
    #[must_use]
    pub fn not_bool(&self, value: ExprRef) -> ExprRef {
        self.is_zero(value)
    }

    /// Constructs the conjunction of a width-1 pair.
    #[must_use]
    pub fn and_bool(&self, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        self.binary(BinaryOp::And, lhs, rhs)
    }

    /// Constructs the conjunction of an arbitrary number of width-1 terms,
    /// yielding true for an empty sequence.
    #[must_use]
    pub fn conjoin(&self, terms: impl IntoIterator<Item = ExprRef>) -> ExprRef {
        let mut result = self.bool_true();
        for term in terms {
            result = self.and_bool(result, term);
        }
        result
    }

    /// Shorthand constructors for the comparison surface used by the
    /// executor.
    #[must_use]
    pub fn ult(&self, l: ExprRef, r: ExprRef) -> ExprRef {
        self.compare(CompareOp::Ult, l, r)
    }

    /// See [`Self::ult`].
    #[must_use]
    pub fn ule(&self, l: ExprRef, r: ExprRef) -> ExprRef {
        self.compare(CompareOp::Ule, l, r)
    }

    /// See [`Self::ult`].
    #[must_use]
    pub fn ugt(&self, l: ExprRef, r: ExprRef) -> ExprRef {
        self.compare(CompareOp::Ult, r, l)
    }

    /// See [`Self::ult`].
    #[must_use]
    pub fn uge(&self, l: ExprRef, r: ExprRef) -> ExprRef {
        self.compare(CompareOp::Ule, r, l)
    }

    /// See [`Self::ult`].
    #[must_use]
    pub fn slt(&self, l: ExprRef, r: ExprRef) -> ExprRef {
        self.compare(CompareOp::Slt, l, r)
    }

    /// See [`Self::ult`].
    #[must_use]
    pub fn sle(&self, l: ExprRef, r: ExprRef) -> ExprRef {
        self.compare(CompareOp::Sle, l, r)
    }

    /// See [`Self::ult`].
    #[must_use]
    pub fn sgt(&self, l: ExprRef, r: ExprRef) -> ExprRef {
        self.compare(CompareOp::Slt, r, l)
    }

    /// See [`Self::ult`].
    #[must_use]
    pub fn sge(&self, l: ExprRef, r: ExprRef) -> ExprRef {
        self.compare(CompareOp::Sle, r, l)
    }

    /// See [`Self::ult`].
    #[must_use]
    pub fn equals(&self, l: ExprRef, r: ExprRef) -> ExprRef {
        self.compare(CompareOp::Eq, l, r)
    }

    /// Shorthand for addition.
    #[must_use]
    pub fn add(&self, l: ExprRef, r: ExprRef) -> ExprRef {
        self.binary(BinaryOp::Add, l, r)
    }

    /// Shorthand for subtraction.
    #[must_use]
    pub fn sub(&self, l: ExprRef, r: ExprRef) -> ExprRef {
        self.binary(BinaryOp::Sub, l, r)
    }

    /// Shorthand for multiplication.
    #[must_use]
    pub fn mul(&self, l: ExprRef, r: ExprRef) -> ExprRef {
        self.binary(BinaryOp::Mul, l, r)
    }

    /// Gets the shadow counterpart of `array`, creating it on first use.
    #[must_use]
    pub fn shadow_array(&self, array: &ArrayRef) -> ArrayRef {
        self.shadows
            .borrow_mut()
            .entry(array.id)
            .or_insert_with(|| Array::shadow_of(array))
            .clone()
    }

    /// Rewrites `expr`, replacing every sub-expression whose pointer occurs
    /// in `map` with its image.
    ///
    /// Replacement happens before descent, so images are not themselves
    /// rewritten. Rebuilding goes through the canonical constructors, which
    /// re-applies folding to the substituted result.
    #[must_use]
    pub fn substitute(&self, expr: &ExprRef, map: &HashMap<usize, ExprRef>) -> ExprRef {
        let mut cache = HashMap::new();
        self.substitute_cached(expr, map, &mut cache)
    }

    fn substitute_cached(
        &self,
        expr: &ExprRef,
        map: &HashMap<usize, ExprRef>,
        cache: &mut HashMap<usize, ExprRef>,
    ) -> ExprRef {
        let key = ptr(expr);
        if let Some(image) = map.get(&key) {
            return image.clone();
        }
        if let Some(done) = cache.get(&key) {
            return done.clone();
        }

        let rebuilt = match &expr.kind {
            ExprKind::Constant(_) | ExprKind::Read { .. } => expr.clone(),
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                let c = self.substitute_cached(cond, map, cache);
                let t = self.substitute_cached(on_true, map, cache);
                let f = self.substitute_cached(on_false, map, cache);
                if Rc::ptr_eq(&c, cond) && Rc::ptr_eq(&t, on_true) && Rc::ptr_eq(&f, on_false) {
                    expr.clone()
                } else {
                    self.select(c, t, f)
                }
            }
            ExprKind::Concat { hi, lo } => {
                let h = self.substitute_cached(hi, map, cache);
                let l = self.substitute_cached(lo, map, cache);
                if Rc::ptr_eq(&h, hi) && Rc::ptr_eq(&l, lo) {
                    expr.clone()
                } else {
                    self.concat(h, l)
                }
            }
            ExprKind::Extract { src, offset } => {
                let s = self.substitute_cached(src, map, cache);
                if Rc::ptr_eq(&s, src) {
                    expr.clone()
                } else {
                    self.extract(s, *offset, expr.width)
                }
            }
            ExprKind::Not { value } => {
                let v = self.substitute_cached(value, map, cache);
                if Rc::ptr_eq(&v, value) {
                    expr.clone()
                } else {
                    self.not(v)
                }
            }
            ExprKind::ZExt { value } => {
                let v = self.substitute_cached(value, map, cache);
                if Rc::ptr_eq(&v, value) {
                    expr.clone()
                } else {
                    self.zext(v, expr.width)
                }
            }
            ExprKind::SExt { value } => {
                let v = self.substitute_cached(value, map, cache);
                if Rc::ptr_eq(&v, value) {
                    expr.clone()
                } else {
                    self.sext(v, expr.width)
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.substitute_cached(lhs, map, cache);
                let r = self.substitute_cached(rhs, map, cache);
                if Rc::ptr_eq(&l, lhs) && Rc::ptr_eq(&r, rhs) {
                    expr.clone()
                } else {
                    self.binary(*op, l, r)
                }
            }
            ExprKind::Compare { op, lhs, rhs } => {
                let l = self.substitute_cached(lhs, map, cache);
                let r = self.substitute_cached(rhs, map, cache);
                if Rc::ptr_eq(&l, lhs) && Rc::ptr_eq(&r, rhs) {
                    expr.clone()
                } else {
                    self.compare(*op, l, r)
                }
            }
        };

        cache.insert(key, rebuilt.clone());
        rebuilt
    }

    /// Rewrites `expr`, replacing every read of an array in `renaming` with
    /// a read of the image array over a structurally identical update list.
    #[must_use]
    pub fn rename_arrays(&self, expr: &ExprRef, renaming: &HashMap<Uuid, ArrayRef>) -> ExprRef {
        let mut cache = HashMap::new();
        self.rename_cached(expr, renaming, &mut cache)
    }

    fn rename_cached(
        &self,
        expr: &ExprRef,
        renaming: &HashMap<Uuid, ArrayRef>,
        cache: &mut HashMap<usize, ExprRef>,
    ) -> ExprRef {
        let key = ptr(expr);
        if let Some(done) = cache.get(&key) {
            return done.clone();
        }

        let rebuilt = match &expr.kind {
            ExprKind::Read { updates, index } => {
                let index = self.rename_cached(index, renaming, cache);
                let array = renaming
                    .get(&updates.array.id)
                    .cloned()
                    .unwrap_or_else(|| updates.array.clone());

                // The update list is rebuilt oldest-first so that the write
                // ordering is preserved over the renamed array.
                let mut nodes = Vec::new();
                let mut node = updates.head.as_ref();
                while let Some(n) = node {
                    nodes.push(n);
                    node = n.next.as_ref();
                }
                let mut list = UpdateList::new(array);
                for n in nodes.iter().rev() {
                    let i = self.rename_cached(&n.index, renaming, cache);
                    let v = self.rename_cached(&n.value, renaming, cache);
                    list = list.write(i, v);
                }

                self.read8(&list, index)
            }
            ExprKind::Constant(_) => expr.clone(),
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                let c = self.rename_cached(cond, renaming, cache);
                let t = self.rename_cached(on_true, renaming, cache);
                let f = self.rename_cached(on_false, renaming, cache);
                self.select(c, t, f)
            }
            ExprKind::Concat { hi, lo } => {
                let h = self.rename_cached(hi, renaming, cache);
                let l = self.rename_cached(lo, renaming, cache);
                self.concat(h, l)
            }
            ExprKind::Extract { src, offset } => {
                let s = self.rename_cached(src, renaming, cache);
                self.extract(s, *offset, expr.width)
            }
            ExprKind::Not { value } => {
                let v = self.rename_cached(value, renaming, cache);
                self.not(v)
            }
            ExprKind::ZExt { value } => {
                let v = self.rename_cached(value, renaming, cache);
                self.zext(v, expr.width)
            }
            ExprKind::SExt { value } => {
                let v = self.rename_cached(value, renaming, cache);
                self.sext(v, expr.width)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.rename_cached(lhs, renaming, cache);
                let r = self.rename_cached(rhs, renaming, cache);
                self.binary(*op, l, r)
            }
            ExprKind::Compare { op, lhs, rhs } => {
                let l = self.rename_cached(lhs, renaming, cache);
                let r = self.rename_cached(rhs, renaming, cache);
                self.compare(*op, l, r)
            }
        };

        cache.insert(key, rebuilt.clone());
        rebuilt
    }
}

impl Default for ExprBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use ethnum::U256;

    use super::ExprBuilder;
    use crate::expr::{Array, BinaryOp, CompareOp, UpdateList};

    #[test]
    fn structurally_equal_expressions_are_pointer_equal() {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);

        let index = builder.constant_u64(32, 0);
        let a = builder.read8(&updates, index.clone());
        let b = builder.read8(&updates, index);
        assert!(Rc::ptr_eq(&a, &b));

        let sum_1 = builder.add(a.clone(), builder.constant_u64(8, 3));
        let sum_2 = builder.add(b, builder.constant_u64(8, 3));
        assert!(Rc::ptr_eq(&sum_1, &sum_2));
    }

    #[test]
    fn constant_folding_is_total_for_constants() {
        let builder = ExprBuilder::new();
        let three = builder.constant_u64(32, 3);
        let four = builder.constant_u64(32, 4);

        let sum = builder.add(three.clone(), four.clone());
        assert_eq!(sum.as_constant(), Some(U256::from(7u8)));

        let less = builder.ult(three, four);
        assert!(less.is_true());
    }

    #[test]
    fn additive_identity_is_elided() {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);
        let x = builder.read8(&updates, builder.constant_u64(32, 0));

        let zero = builder.constant_u64(8, 0);
        let sum = builder.add(x.clone(), zero);
        assert!(Rc::ptr_eq(&sum, &x));
    }

    #[test]
    fn xor_with_self_is_zero() {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);
        let x = builder.read8(&updates, builder.constant_u64(32, 0));

        let result = builder.binary(BinaryOp::Xor, x.clone(), x);
        assert_eq!(result.as_constant(), Some(U256::ZERO));
    }

    #[test]
    fn double_negation_of_boolean_collapses() {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);
        let x = builder.read8(&updates, builder.constant_u64(32, 0));
        let cond = builder.ult(x, builder.constant_u64(8, 10));

        let negated_twice = builder.not_bool(builder.not_bool(cond.clone()));
        assert!(Rc::ptr_eq(&negated_twice, &cond));
    }

    #[test]
    fn reads_simplify_against_concrete_updates() {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);

        let index = builder.constant_u64(32, 2);
        let value = builder.constant_u64(8, 0xab);
        let updates = updates.write(index.clone(), value.clone());

        let read = builder.read8(&updates, index);
        assert!(Rc::ptr_eq(&read, &value));

        // A non-matching concrete index skips the write entirely.
        let other = builder.read8(&updates, builder.constant_u64(32, 1));
        assert!(matches!(
            &other.kind,
            crate::expr::ExprKind::Read { updates, .. } if updates.is_empty()
        ));
    }

    #[test]
    fn extraction_of_concat_descends() {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);
        let lo = builder.read8(&updates, builder.constant_u64(32, 0));
        let hi = builder.read8(&updates, builder.constant_u64(32, 1));

        let word = builder.concat(hi.clone(), lo.clone());
        assert!(Rc::ptr_eq(&builder.extract(word.clone(), 0, 8), &lo));
        assert!(Rc::ptr_eq(&builder.extract(word, 8, 8), &hi));
    }

    #[test]
    fn comparison_canonicalises_greater_than() {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);
        let x = builder.read8(&updates, builder.constant_u64(32, 0));
        let k = builder.constant_u64(8, 5);

        let gt = builder.ugt(x.clone(), k.clone());
        let lt = builder.compare(CompareOp::Ult, k, x);
        assert!(Rc::ptr_eq(&gt, &lt));
    }

    #[test]
    fn substitution_rewrites_matching_subterms() {
        let builder = ExprBuilder::new();
        let array = Array::new("x", 4);
        let updates = UpdateList::new(array);
        let x = builder.read8(&updates, builder.constant_u64(32, 0));
        let sum = builder.add(x.clone(), builder.constant_u64(8, 1));

        let mut map = std::collections::HashMap::new();
        map.insert(
            Rc::as_ptr(&x) as usize,
            builder.constant_u64(8, 4),
        );
        let rewritten = builder.substitute(&sum, &map);
        assert_eq!(rewritten.as_constant(), Some(U256::from(5u8)));
    }
}
