//! This module contains the symbolic expression algebra.
//!
//! Expressions are immutable, reference-counted terms of a fixed bit-width.
//! All construction goes through the [`build::ExprBuilder`], which performs
//! width checking, total constant folding, a small set of algebraic
//! identities, and hash-consing: two structurally equal expressions built
//! by the same builder are pointer-equal.

pub mod array;
pub mod build;
pub mod eval;

pub use array::{Array, ArrayRef, UpdateList, UpdateNode};
pub use build::ExprBuilder;
pub use eval::Assignment;

use std::{fmt::Display, rc::Rc};

use ethnum::U256;

/// The type of a reference-counted expression.
pub type ExprRef = Rc<Expr>;

/// A symbolic expression of a fixed bit-width.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Expr {
    /// The bit-width of the expression, in the range `1..=256`.
    pub width: u32,

    /// The term structure of the expression.
    pub kind: ExprKind,
}

/// The term structure of an expression.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ExprKind {
    /// A constant of the expression's width.
    Constant(U256),

    /// A single-byte read through an update list.
    Read {
        /// The array and the writes stacked on it.
        updates: UpdateList,

        /// The byte index being read.
        index: ExprRef,
    },

    /// An if-then-else over two values of equal width.
    Select {
        cond: ExprRef,
        on_true: ExprRef,
        on_false: ExprRef,
    },

    /// Bit concatenation; `hi` occupies the most significant bits.
    Concat { hi: ExprRef, lo: ExprRef },

    /// Extraction of the expression's width in bits starting at bit
    /// `offset` of `src`.
    Extract { src: ExprRef, offset: u32 },

    /// Bitwise complement.
    Not { value: ExprRef },

    /// Zero extension to the expression's width.
    ZExt { value: ExprRef },

    /// Sign extension to the expression's width.
    SExt { value: ExprRef },

    /// A binary arithmetic or bitwise operation over operands of the
    /// expression's width.
    Binary {
        op: BinaryOp,
        lhs: ExprRef,
        rhs: ExprRef,
    },

    /// A comparison; the expression's width is always 1.
    Compare {
        op: CompareOp,
        lhs: ExprRef,
        rhs: ExprRef,
    },
}

/// The binary arithmetic and bitwise operations.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl BinaryOp {
    /// Checks whether the operation is commutative, which determines
    /// whether its operands are reordered into canonical form.
    #[must_use]
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor
        )
    }
}

/// The comparison predicates.
///
/// The greater-than forms do not appear here: the builder canonicalises
/// them to the corresponding less-than forms with swapped operands.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Ult,
    Ule,
    Slt,
    Sle,
}

impl Expr {
    /// Checks if the expression is a constant.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Constant(_))
    }

    /// Gets the constant value of the expression, if it is one.
    #[must_use]
    pub fn as_constant(&self) -> Option<U256> {
        match &self.kind {
            ExprKind::Constant(v) => Some(*v),
            _ => None,
        }
    }

    /// Checks if the expression is the width-1 constant true.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.width == 1 && self.as_constant() == Some(U256::ONE)
    }

    /// Checks if the expression is the width-1 constant false.
    #[must_use]
    pub fn is_false(&self) -> bool {
        self.width == 1 && self.as_constant() == Some(U256::ZERO)
    }

    /// Collects the identities of all arrays mentioned by the expression.
    pub fn collect_arrays(&self, out: &mut Vec<ArrayRef>) {
        match &self.kind {
            ExprKind::Constant(_) => {}
            ExprKind::Read { updates, index } => {
                if !out.iter().any(|a| a.id == updates.array.id) {
                    out.push(updates.array.clone());
                }
                index.collect_arrays(out);
                let mut node = updates.head.as_ref();
                while let Some(n) = node {
                    n.index.collect_arrays(out);
                    n.value.collect_arrays(out);
                    node = n.next.as_ref();
                }
            }
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                cond.collect_arrays(out);
                on_true.collect_arrays(out);
                on_false.collect_arrays(out);
            }
            ExprKind::Concat { hi, lo } => {
                hi.collect_arrays(out);
                lo.collect_arrays(out);
            }
            ExprKind::Extract { src, .. } => src.collect_arrays(out),
            ExprKind::Not { value } | ExprKind::ZExt { value } | ExprKind::SExt { value } => {
                value.collect_arrays(out);
            }
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Compare { lhs, rhs, .. } => {
                lhs.collect_arrays(out);
                rhs.collect_arrays(out);
            }
        }
    }

    /// Counts the nodes of the expression viewed as a tree.
    #[must_use]
    pub fn node_count(&self) -> usize {
        match &self.kind {
            ExprKind::Constant(_) => 1,
            ExprKind::Read { index, .. } => 1 + index.node_count(),
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => 1 + cond.node_count() + on_true.node_count() + on_false.node_count(),
            ExprKind::Concat { hi, lo } => 1 + hi.node_count() + lo.node_count(),
            ExprKind::Extract { src, .. } => 1 + src.node_count(),
            ExprKind::Not { value } | ExprKind::ZExt { value } | ExprKind::SExt { value } => {
                1 + value.node_count()
            }
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Compare { lhs, rhs, .. } => {
                1 + lhs.node_count() + rhs.node_count()
            }
        }
    }
}

/// Pretty-prints the expression in a compact prefix form.
impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ExprKind::Constant(v) => {
                let str = hex::encode(v.to_be_bytes());
                let str = str.trim_start_matches('0');
                let str = if str.is_empty() { "0" } else { str };
                write!(f, "0x{str}:{}", self.width)
            }
            ExprKind::Read { updates, index } => {
                write!(f, "(read {} {index})", updates.array.name)
            }
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => write!(f, "(select {cond} {on_true} {on_false})"),
            ExprKind::Concat { hi, lo } => write!(f, "(concat {hi} {lo})"),
            ExprKind::Extract { src, offset } => {
                write!(f, "(extract {src} {offset} {})", self.width)
            }
            ExprKind::Not { value } => write!(f, "(not {value})"),
            ExprKind::ZExt { value } => write!(f, "(zext {value} {})", self.width),
            ExprKind::SExt { value } => write!(f, "(sext {value} {})", self.width),
            ExprKind::Binary { op, lhs, rhs } => {
                write!(f, "({} {lhs} {rhs})", format!("{op:?}").to_lowercase())
            }
            ExprKind::Compare { op, lhs, rhs } => {
                write!(f, "({} {lhs} {rhs})", format!("{op:?}").to_lowercase())
            }
        }
    }
}

/// The bit mask selecting the low `width` bits of a word.
#[must_use]
pub fn mask(width: u32) -> U256 {
    if width >= 256 {
        U256::MAX
    } else {
        (U256::ONE << width) - 1
    }
}

/// Truncates `value` to `width` bits.
#[must_use]
pub fn truncate(value: U256, width: u32) -> U256 {
    value & mask(width)
}

/// Sign-extends the `width`-bit `value` to a full 256-bit two's-complement
/// word.
#[must_use]
pub fn sign_extend(value: U256, width: u32) -> U256 {
    if width >= 256 {
        return value;
    }
    let sign_bit = U256::ONE << (width - 1);
    if value & sign_bit != U256::ZERO {
        value | !mask(width)
    } else {
        value
    }
}

/// Checks whether the `width`-bit `value` is negative under a
/// two's-complement reading.
#[must_use]
pub fn is_negative(value: U256, width: u32) -> bool {
    value & (U256::ONE << (width - 1)) != U256::ZERO
}

/// The two's-complement negation of a `width`-bit value.
#[must_use]
fn negate(value: U256, width: u32) -> U256 {
    truncate((!value).wrapping_add(U256::ONE), width)
}

/// Applies the binary operation `op` to `width`-bit operands.
///
/// Division and remainder by zero follow the SMT-LIB bitvector semantics:
/// `udiv x 0 = 2^w - 1`, `urem x 0 = x`, `sdiv x 0 = (x < 0 ? 1 : -1)`,
/// `srem x 0 = x`.
#[must_use]
pub fn apply_binary(op: BinaryOp, width: u32, lhs: U256, rhs: U256) -> U256 {
    let m = mask(width);
    let result = match op {
        BinaryOp::Add => lhs.wrapping_add(rhs),
        BinaryOp::Sub => lhs.wrapping_sub(rhs),
        BinaryOp::Mul => lhs.wrapping_mul(rhs),
        BinaryOp::UDiv => {
            if rhs == U256::ZERO {
                m
            } else {
                lhs / rhs
            }
        }
        BinaryOp::URem => {
            if rhs == U256::ZERO {
                lhs
            } else {
                lhs % rhs
            }
        }
        BinaryOp::SDiv => {
            let neg_l = is_negative(lhs, width);
            let neg_r = is_negative(rhs, width);
            if rhs == U256::ZERO {
                if neg_l {
                    U256::ONE
                } else {
                    m
                }
            } else {
                let mag_l = if neg_l { negate(lhs, width) } else { lhs };
                let mag_r = if neg_r { negate(rhs, width) } else { rhs };
                let quotient = mag_l / mag_r;
                if neg_l != neg_r {
                    negate(quotient, width)
                } else {
                    quotient
                }
            }
        }
        BinaryOp::SRem => {
            let neg_l = is_negative(lhs, width);
            let neg_r = is_negative(rhs, width);
            if rhs == U256::ZERO {
                lhs
            } else {
                let mag_l = if neg_l { negate(lhs, width) } else { lhs };
                let mag_r = if neg_r { negate(rhs, width) } else { rhs };
                let remainder = mag_l % mag_r;
                if neg_l {
                    negate(remainder, width)
                } else {
                    remainder
                }
            }
        }
        BinaryOp::And => lhs & rhs,
        BinaryOp::Or => lhs | rhs,
        BinaryOp::Xor => lhs ^ rhs,
        BinaryOp::Shl => {
            if rhs >= U256::from(width) {
                U256::ZERO
            } else {
                lhs << rhs.as_u32()
            }
        }
        BinaryOp::LShr => {
            if rhs >= U256::from(width) {
                U256::ZERO
            } else {
                truncate(lhs, width) >> rhs.as_u32()
            }
        }
        BinaryOp::AShr => {
            let negative = is_negative(lhs, width);
            if rhs >= U256::from(width) {
                if negative {
                    m
                } else {
                    U256::ZERO
                }
            } else {
                let shift = rhs.as_u32();
                let shifted = truncate(lhs, width) >> shift;
                if negative && shift > 0 {
                    shifted | (m & !(mask(width - shift)))
                } else {
                    shifted
                }
            }
        }
    };

    truncate(result, width)
}

/// Applies the comparison `op` to `width`-bit operands.
///
/// Signed comparisons compare the sign-extended two's-complement readings;
/// for operands of equal sign this coincides with the unsigned ordering.
#[must_use]
pub fn apply_compare(op: CompareOp, width: u32, lhs: U256, rhs: U256) -> bool {
    match op {
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
        CompareOp::Ult => lhs < rhs,
        CompareOp::Ule => lhs <= rhs,
        CompareOp::Slt | CompareOp::Sle => {
            let neg_l = is_negative(lhs, width);
            let neg_r = is_negative(rhs, width);
            let strictly_less = if neg_l != neg_r { neg_l } else { lhs < rhs };
            match op {
                CompareOp::Slt => strictly_less,
                _ => strictly_less || lhs == rhs,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use super::{apply_binary, apply_compare, mask, sign_extend, BinaryOp, CompareOp};

    #[test]
    fn masks_select_low_bits() {
        assert_eq!(mask(1), U256::ONE);
        assert_eq!(mask(8), U256::from(0xffu8));
        assert_eq!(mask(256), U256::MAX);
    }

    #[test]
    fn signed_division_follows_smt_semantics() {
        // -7 sdiv 2 == -3 at width 8.
        let minus_seven = U256::from(0xf9u8);
        let result = apply_binary(BinaryOp::SDiv, 8, minus_seven, U256::from(2u8));
        assert_eq!(result, U256::from(0xfdu8));

        // Division by zero yields all-ones for a non-negative dividend.
        let result = apply_binary(BinaryOp::UDiv, 8, U256::from(7u8), U256::ZERO);
        assert_eq!(result, U256::from(0xffu8));
    }

    #[test]
    fn signed_comparison_respects_sign_bit() {
        let minus_one = U256::from(0xffu8);
        assert!(apply_compare(CompareOp::Slt, 8, minus_one, U256::ZERO));
        assert!(!apply_compare(CompareOp::Ult, 8, minus_one, U256::ZERO));
    }

    #[test]
    fn sign_extension_fills_high_bits() {
        let extended = sign_extend(U256::from(0x80u8), 8);
        assert_eq!(extended & !mask(8), !mask(8));
    }

    #[test]
    fn arithmetic_shifts_preserve_sign() {
        let minus_four = U256::from(0xfcu8);
        let result = apply_binary(BinaryOp::AShr, 8, minus_four, U256::ONE);
        assert_eq!(result, U256::from(0xfeu8));
    }
}
