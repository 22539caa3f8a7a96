//! This module contains the subsumption table: the process-wide store of
//! interpolants keyed by program point, and the check that terminates a
//! state whose path condition entails a stored interpolant.

use std::collections::HashMap;

use itertools::Itertools;
use uuid::Uuid;

use crate::{
    expr::{ArrayRef, ExprBuilder, ExprRef},
    interpolation::dependency,
    ir::ProgramPoint,
    solver::{Solver, Validity},
};

/// One stored interpolant.
///
/// The literals are expressed over shadow arrays; `renaming` maps each
/// shadow back to the array it stands for, which is how the check
/// re-grounds the existentially-quantified formula in the checking state's
/// vocabulary.
#[derive(Clone, Debug)]
pub struct SubsumptionEntry {
    /// The interpolant literals, over shadow arrays.
    pub interpolant: Vec<ExprRef>,

    /// The renaming from shadow identity back to the shadowed array.
    pub renaming: HashMap<Uuid, ArrayRef>,

    /// The names of the source variables the interpolant depends on.
    pub dependency_signature: Vec<String>,
}

/// Counters describing the table's effectiveness over a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SubsumptionStats {
    /// The number of checks performed.
    pub checks: u64,

    /// The number of checks that subsumed their state.
    pub hits: u64,

    /// The number of stored entries.
    pub stored: u64,

    /// The number of entries dropped after repeated failures.
    pub dropped: u64,
}

/// The mapping from program points to the interpolants stored for them.
#[derive(Clone, Debug, Default)]
pub struct SubsumptionTable {
    entries: HashMap<ProgramPoint, Vec<SubsumptionEntry>>,
    fail_counts: HashMap<ProgramPoint, usize>,
    stats: SubsumptionStats,
}

impl SubsumptionTable {
    /// Constructs an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the effectiveness counters.
    #[must_use]
    pub fn stats(&self) -> SubsumptionStats {
        self.stats
    }

    /// Gets the entries stored for `point`.
    #[must_use]
    pub fn entries_at(&self, point: ProgramPoint) -> &[SubsumptionEntry] {
        self.entries.get(&point).map_or(&[], Vec::as_slice)
    }

    /// Iterates over the program points that have stored entries.
    pub fn points(&self) -> impl Iterator<Item = ProgramPoint> + '_ {
        self.entries
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(point, _)| *point)
    }

    /// Counts the entries stored across all points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Checks whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores the interpolant `literals` for `point`.
    ///
    /// Unless `no_existential` is set, every array mentioned by the
    /// literals is renamed to its shadow, recording the inverse renaming on
    /// the entry. Duplicate entries for a point are elided.
    pub fn store(
        &mut self,
        builder: &ExprBuilder,
        point: ProgramPoint,
        literals: Vec<ExprRef>,
        no_existential: bool,
    ) {
        let literals: Vec<ExprRef> = literals
            .into_iter()
            .unique_by(|e| std::rc::Rc::as_ptr(e) as usize)
            .collect();

        let entry = if no_existential {
            let signature = dependency::variables_of_all(literals.iter())
                .into_iter()
                .collect();
            SubsumptionEntry {
                interpolant: literals,
                renaming: HashMap::new(),
                dependency_signature: signature,
            }
        } else {
            let mut arrays: Vec<ArrayRef> = Vec::new();
            for literal in &literals {
                literal.collect_arrays(&mut arrays);
            }

            let mut forward = HashMap::new();
            let mut inverse = HashMap::new();
            for array in arrays.iter().unique_by(|a| a.id) {
                let shadow = builder.shadow_array(array);
                forward.insert(array.id, shadow.clone());
                inverse.insert(shadow.id, array.clone());
            }

            let signature = dependency::variables_of_all(literals.iter())
                .into_iter()
                .collect();
            let interpolant = literals
                .iter()
                .map(|l| builder.rename_arrays(l, &forward))
                .collect();

            SubsumptionEntry {
                interpolant,
                renaming: inverse,
                dependency_signature: signature,
            }
        };

        let at_point = self.entries.entry(point).or_default();
        let duplicate = at_point.iter().any(|existing| {
            existing.interpolant.len() == entry.interpolant.len()
                && existing
                    .interpolant
                    .iter()
                    .zip(entry.interpolant.iter())
                    .all(|(a, b)| a == b)
        });
        if !duplicate {
            at_point.push(entry);
            self.stats.stored += 1;
        }
    }

    /// Checks whether the path condition `constraints` entails any
    /// interpolant stored for `point`.
    ///
    /// Repeated failures at a point beyond `max_fail` drop the oldest
    /// entries for it.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver fails or times out.
    pub fn check(
        &mut self,
        solver: &mut dyn Solver,
        builder: &ExprBuilder,
        point: ProgramPoint,
        constraints: &[ExprRef],
        max_fail: usize,
    ) -> crate::error::solver::Result<bool> {
        let Some(entries) = self.entries.get(&point) else {
            return Ok(false);
        };
        if entries.is_empty() {
            return Ok(false);
        }
        self.stats.checks += 1;

        let mut hit = false;
        for entry in entries {
            // Re-ground the existential shadows in the entry's recorded
            // vocabulary before asking for the implication.
            let grounded: Vec<ExprRef> = if entry.renaming.is_empty() {
                entry.interpolant.clone()
            } else {
                entry
                    .interpolant
                    .iter()
                    .map(|l| builder.rename_arrays(l, &entry.renaming))
                    .collect()
            };

            let conjunction = builder.conjoin(grounded);
            let (validity, _) = solver.evaluate(constraints, &conjunction)?;
            if validity == Validity::True {
                hit = true;
                break;
            }
        }

        if hit {
            self.stats.hits += 1;
            self.fail_counts.remove(&point);
            return Ok(true);
        }

        // Every entry failed: charge one failure against the point, and
        // drop the oldest entries once the point has failed too often.
        let fails = self.fail_counts.entry(point).or_insert(0);
        *fails += 1;
        if *fails > max_fail {
            if let Some(entries) = self.entries.get_mut(&point) {
                let excess = entries.len().saturating_sub(max_fail);
                if excess > 0 {
                    entries.drain(0..excess);
                    self.stats.dropped += excess as u64;
                }
            }
            *fails = 0;
        }

        Ok(false)
    }
}
