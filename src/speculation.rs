//! This module contains the speculation controller: the policy that
//! decides when a branch may be explored provisionally, and the
//! bookkeeping that guards re-speculation after a rollback.
//!
//! Speculation wagers that a branch is irrelevant to the property being
//! checked. A winning wager skips a fork (and the whole subtree below it);
//! a losing one is rolled back by the executor, which removes the
//! speculation subtree and snapshots the visited-block count so the same
//! branch is not retried until genuinely new blocks appear.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fs,
    path::Path,
};

use crate::{
    expr::ExprRef,
    interpolation::dependency,
    ir::{InstId, ProgramPoint},
};

/// The property class speculation is allowed to wager against.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SpecType {
    /// Speculation is disabled.
    #[default]
    None,

    /// Speculation against safety properties.
    Safety,

    /// Speculation against coverage goals.
    Coverage,
}

/// The strategy deciding when to open a speculation subtree.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SpecStrategy {
    /// Assume independent branches without forking; never open a
    /// speculation subtree.
    #[default]
    Timid,

    /// Open a speculation subtree on every infeasible-side branch that is
    /// not statically independent.
    Aggressive,

    /// Like aggressive, but refuse to re-speculate a branch until new
    /// blocks have been visited since its last failed speculation.
    Custom,
}

/// What the controller tells the executor to do at one branch decision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpecDecision {
    /// Take the determined direction without speculating.
    Proceed,

    /// The branch is independent of the avoid sets: assume the determined
    /// direction and record an independence win.
    AssumeIndependent,

    /// Open a speculation subtree for the infeasible side.
    Open,

    /// Close speculation at this branch and convert the unsat core into
    /// interpolant marks.
    CloseAndMark,
}

/// The runtime data of the speculation controller.
#[derive(Clone, Debug, Default)]
pub struct SpeculationState {
    /// The variable sets that speculation must stay independent of, one
    /// per avoid file.
    pub avoid_sets: Vec<BTreeSet<String>>,

    /// Every block any state has visited, seeded from the initial
    /// visited-block file.
    pub visited_blocks: HashSet<ProgramPoint>,

    /// Per-branch snapshots of the visited-block count taken when a
    /// speculation at that branch failed.
    pub spec_snap: HashMap<InstId, usize>,
}

impl SpeculationState {
    /// Constructs an empty controller state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads avoid sets and the initial visited blocks from
    /// `dependency_folder`.
    ///
    /// Avoid sets come from files named `SpecAvoid_*`, one variable name
    /// per line. Initial visited blocks come from `InitialVisitedBB.txt`,
    /// one `<function> <block>` index pair per line. Missing files are
    /// simply absent data, not errors.
    #[must_use]
    pub fn load(dependency_folder: &Path) -> Self {
        let mut controller = Self::new();

        if let Ok(entries) = fs::read_dir(dependency_folder) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if !name.starts_with("SpecAvoid_") {
                    continue;
                }
                if let Ok(contents) = fs::read_to_string(entry.path()) {
                    let set: BTreeSet<String> = contents
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(String::from)
                        .collect();
                    if !set.is_empty() {
                        controller.avoid_sets.push(set);
                    }
                }
            }
        }

        let initial = dependency_folder.join("InitialVisitedBB.txt");
        if let Ok(contents) = fs::read_to_string(initial) {
            for line in contents.lines() {
                let mut parts = line.split_whitespace();
                let (Some(function), Some(block)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let (Ok(function), Ok(block)) = (function.parse(), block.parse()) else {
                    continue;
                };
                controller.visited_blocks.insert(ProgramPoint {
                    function: crate::ir::FunctionId(function),
                    block: crate::ir::BlockId(block),
                });
            }
        }

        controller
    }

    /// Records that `point` has been visited, returning whether it is new.
    pub fn record_visit(&mut self, point: ProgramPoint) -> bool {
        self.visited_blocks.insert(point)
    }

    /// Checks whether the branch condition is independent of every avoid
    /// set.
    #[must_use]
    pub fn is_independent(&self, condition: &ExprRef) -> bool {
        let vars = dependency::variables_of(condition);
        dependency::is_independent(&vars, &self.avoid_sets)
    }

    /// Checks whether the custom strategy permits speculating at `inst`:
    /// the visited-block count must differ from the snapshot taken at the
    /// last failed speculation there.
    #[must_use]
    pub fn may_respeculate(&self, inst: InstId) -> bool {
        self.spec_snap
            .get(&inst)
            .map_or(true, |snap| *snap != self.visited_blocks.len())
    }

    /// Snapshots the current visited-block count against `inst` after a
    /// failed speculation.
    pub fn snapshot(&mut self, inst: InstId) {
        self.spec_snap.insert(inst, self.visited_blocks.len());
    }

    /// Decides what to do at a branch whose solver answer left one side
    /// infeasible.
    ///
    /// `already_independent` carries the independence analysis of the
    /// branch condition; `inst` is the branch instruction.
    #[must_use]
    pub fn decide(
        &self,
        spec_type: SpecType,
        strategy: SpecStrategy,
        independent: bool,
        inst: InstId,
    ) -> SpecDecision {
        match spec_type {
            SpecType::None => SpecDecision::Proceed,
            SpecType::Safety => match strategy {
                // Timid makes no sense for safety: there is no avoid set
                // to be independent of, so it degenerates to proceeding.
                SpecStrategy::Timid => SpecDecision::Proceed,
                SpecStrategy::Aggressive => SpecDecision::Open,
                SpecStrategy::Custom => {
                    if self.may_respeculate(inst) {
                        SpecDecision::Open
                    } else {
                        SpecDecision::CloseAndMark
                    }
                }
            },
            SpecType::Coverage => match strategy {
                SpecStrategy::Timid => {
                    if independent {
                        SpecDecision::AssumeIndependent
                    } else {
                        SpecDecision::Proceed
                    }
                }
                SpecStrategy::Aggressive => {
                    if independent {
                        SpecDecision::AssumeIndependent
                    } else {
                        SpecDecision::Open
                    }
                }
                SpecStrategy::Custom => {
                    if independent {
                        SpecDecision::AssumeIndependent
                    } else if self.may_respeculate(inst) {
                        SpecDecision::Open
                    } else {
                        SpecDecision::CloseAndMark
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::{SpecDecision, SpecStrategy, SpecType, SpeculationState};
    use crate::{
        expr::{Array, ExprBuilder, UpdateList},
        ir::{BlockId, FunctionId, InstId, ProgramPoint},
    };

    fn branch_inst() -> InstId {
        InstId {
            function: FunctionId(0),
            index: 3,
        }
    }

    fn point(block: u32) -> ProgramPoint {
        ProgramPoint {
            function: FunctionId(0),
            block: BlockId(block),
        }
    }

    #[test]
    fn timid_coverage_assumes_independent_branches() {
        let controller = SpeculationState::new();
        let decision = controller.decide(
            SpecType::Coverage,
            SpecStrategy::Timid,
            true,
            branch_inst(),
        );
        assert_eq!(decision, SpecDecision::AssumeIndependent);

        let decision = controller.decide(
            SpecType::Coverage,
            SpecStrategy::Timid,
            false,
            branch_inst(),
        );
        assert_eq!(decision, SpecDecision::Proceed);
    }

    #[test]
    fn custom_strategy_refuses_respeculation_under_same_snapshot() {
        let mut controller = SpeculationState::new();
        controller.record_visit(point(0));
        controller.snapshot(branch_inst());

        // No new blocks since the snapshot: close.
        let decision = controller.decide(
            SpecType::Coverage,
            SpecStrategy::Custom,
            false,
            branch_inst(),
        );
        assert_eq!(decision, SpecDecision::CloseAndMark);

        // A new block reopens the wager.
        controller.record_visit(point(1));
        let decision = controller.decide(
            SpecType::Coverage,
            SpecStrategy::Custom,
            false,
            branch_inst(),
        );
        assert_eq!(decision, SpecDecision::Open);
    }

    #[test]
    fn independence_considers_branch_variables() {
        let builder = ExprBuilder::new();
        let mut controller = SpeculationState::new();
        controller.avoid_sets.push(["y".to_string()].into());

        let x = Array::new("x", 4);
        let cond = builder.ult(
            builder.read(&UpdateList::new(x), builder.constant_u64(64, 0), 32),
            builder.constant_u64(32, 10),
        );
        assert!(controller.is_independent(&cond));

        controller.avoid_sets.push(["x".to_string()].into());
        assert!(!controller.is_independent(&cond));
    }
}
