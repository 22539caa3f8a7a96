//! This module contains the built-in satisfiability back-end.
//!
//! The back-end is a deterministic counter-model searcher: it harvests
//! candidate values from the comparison boundaries occurring in the query,
//! then enumerates combinations of candidates, testing each assignment by
//! concrete evaluation. It is complete for counter-models within its
//! candidate space and best-effort beyond it, which is the honest trade for
//! a solver with no external dependencies; production deployments plug a
//! real SMT back-end into the same seam.

use ethnum::U256;
use itertools::Itertools;

use crate::{
    error::solver::Result,
    expr::{
        mask,
        Assignment,
        ArrayRef,
        ExprKind,
        ExprRef,
    },
    solver::backend::{Backend, CheckResult},
};

/// One contiguous little-endian region of an array that the query compares
/// against constants, together with the candidate values worth trying for
/// it.
#[derive(Clone, Debug)]
struct Slot {
    array: ArrayRef,
    base: u64,
    bytes: u32,
    candidates: Vec<U256>,
}

impl Slot {
    /// Adds `value` to the candidate set if not already present, masked to
    /// the slot width.
    fn add_candidate(&mut self, value: U256) {
        let value = value & mask(self.bytes * 8);
        if !self.candidates.contains(&value) {
            self.candidates.push(value);
        }
    }

    /// Writes `value` little-endian into the slot's bytes of `assignment`.
    fn apply(&self, assignment: &mut Assignment, value: U256) {
        let size = usize::try_from(self.array.size).unwrap_or(usize::MAX);
        let bytes = assignment
            .bindings
            .entry(self.array.id)
            .or_insert_with(|| vec![0; size]);

        let le = value.to_le_bytes();
        for i in 0..self.bytes {
            let index = usize::try_from(self.base + u64::from(i)).unwrap_or(usize::MAX);
            if let Some(slot) = bytes.get_mut(index) {
                *slot = le[i as usize];
            }
        }
    }
}

/// The built-in boundary-value back-end.
#[derive(Clone, Debug)]
pub struct BoundaryBackend {
    /// The maximum number of candidate assignments enumerated per check.
    model_limit: usize,
}

impl BoundaryBackend {
    /// Constructs a back-end that enumerates at most `model_limit`
    /// candidate assignments per check.
    #[must_use]
    pub fn new(model_limit: usize) -> Self {
        Self { model_limit }
    }

    /// Recognises an expression that denotes a contiguous little-endian
    /// read of an array at a concrete offset.
    fn match_linear_read(expr: &ExprRef) -> Option<(ArrayRef, u64, u32)> {
        match &expr.kind {
            ExprKind::Read { updates, index } => {
                if !updates.is_empty() {
                    return None;
                }
                let base = index.as_constant()?.as_u128() as u64;
                Some((updates.array.clone(), base, 1))
            }
            ExprKind::ZExt { value } | ExprKind::SExt { value } => Self::match_linear_read(value),
            ExprKind::Extract { src, offset } if *offset == 0 => Self::match_linear_read(src),
            ExprKind::Concat { hi, lo } => {
                let (lo_array, lo_base, lo_bytes) = Self::match_linear_read(lo)?;
                let (hi_array, hi_base, hi_bytes) = Self::match_linear_read(hi)?;
                if lo_array.id == hi_array.id && hi_base == lo_base + u64::from(lo_bytes) {
                    Some((lo_array, lo_base, lo_bytes + hi_bytes))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Harvests candidate slots from the comparisons occurring in `expr`.
    fn harvest(expr: &ExprRef, slots: &mut Vec<Slot>) {
        if let ExprKind::Compare { lhs, rhs, .. } = &expr.kind {
            let pairs = [(lhs, rhs), (rhs, lhs)];
            for (constant, variable) in pairs {
                let Some(value) = constant.as_constant() else {
                    continue;
                };
                let Some((array, base, bytes)) = Self::match_linear_read(variable) else {
                    continue;
                };

                let slot = match slots
                    .iter_mut()
                    .find(|s| s.array.id == array.id && s.base == base && s.bytes == bytes)
                {
                    Some(slot) => slot,
                    None => {
                        slots.push(Slot {
                            array,
                            base,
                            bytes,
                            candidates: vec![U256::ZERO],
                        });
                        slots.last_mut().expect("Just pushed")
                    }
                };

                slot.add_candidate(value.wrapping_sub(U256::ONE));
                slot.add_candidate(value);
                slot.add_candidate(value.wrapping_add(U256::ONE));
            }
        }

        match &expr.kind {
            ExprKind::Constant(_) => {}
            ExprKind::Read { index, .. } => Self::harvest(index, slots),
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                Self::harvest(cond, slots);
                Self::harvest(on_true, slots);
                Self::harvest(on_false, slots);
            }
            ExprKind::Concat { hi, lo } => {
                Self::harvest(hi, slots);
                Self::harvest(lo, slots);
            }
            ExprKind::Extract { src, .. } => Self::harvest(src, slots),
            ExprKind::Not { value } | ExprKind::ZExt { value } | ExprKind::SExt { value } => {
                Self::harvest(value, slots);
            }
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Compare { lhs, rhs, .. } => {
                Self::harvest(lhs, slots);
                Self::harvest(rhs, slots);
            }
        }
    }
}

impl Backend for BoundaryBackend {
    fn check(&mut self, terms: &[ExprRef]) -> Result<CheckResult> {
        // The all-zero model decides constant conjunctions outright and is
        // the most common witness in practice.
        let zero = Assignment::new();
        if zero.satisfies(terms) {
            return Ok(CheckResult::Sat(zero));
        }

        let mut slots = Vec::new();
        for term in terms {
            Self::harvest(term, &mut slots);
        }

        if slots.is_empty() {
            // No comparison boundaries to explore: the zero model was the
            // only candidate, and it failed.
            return Ok(CheckResult::Unsat);
        }

        let candidate_lists: Vec<Vec<U256>> =
            slots.iter().map(|s| s.candidates.clone()).collect();

        let mut tried = 0usize;
        for combo in candidate_lists.into_iter().multi_cartesian_product() {
            if tried >= self.model_limit {
                return Ok(CheckResult::Unknown);
            }
            tried += 1;

            let mut assignment = Assignment::new();
            for (slot, value) in slots.iter().zip(combo) {
                slot.apply(&mut assignment, value);
            }

            if assignment.satisfies(terms) {
                return Ok(CheckResult::Sat(assignment));
            }
        }

        Ok(CheckResult::Unsat)
    }

    fn name(&self) -> &'static str {
        "boundary"
    }
}
