//! This module contains the fork procedure and its wrappers: the mediation
//! between solver, seeds, replay, speculation, and the bookkeeping of both
//! trees that happens every time a path splits.

use std::{rc::Rc, time::Instant};

use rand::Rng;

use crate::{
    constant::STATIC_THROTTLE_GRACE_SECONDS,
    error::{
        container::Locatable,
        execution::{Error, Result},
    },
    expr::ExprRef,
    solver::{Solver, Validity},
    speculation::{SpecDecision, SpecStrategy, SpecType},
    state::{ExecutionState, StateId},
};

use super::{Executor, Termination};

/// How a fork request resolved.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ForkOutcome {
    /// The branch is determined (or was decided) towards true; the current
    /// state continues alone.
    TakeTrue,

    /// As [`Self::TakeTrue`], towards false.
    TakeFalse,

    /// The state split. The current state continues on the side indicated
    /// by `current_is_true`; `other` is its registered sibling.
    Fork {
        /// The sibling state.
        other: StateId,

        /// Whether the current state holds the true side.
        current_is_true: bool,
    },

    /// The current state must be terminated with the contained reason; any
    /// sibling was already dealt with.
    Terminated(Termination),
}

/// The fork variants, which differ in how much of the surrounding
/// machinery participates.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ForkMode {
    /// An engine-internal fork (memory resolution, switch lowering):
    /// replay and speculation do not participate.
    Internal,

    /// A program branch: the full §4.I procedure including replay and the
    /// speculation controller.
    Branch,

    /// A branch inside a speculation subtree: seeds and replay are
    /// skipped, interpolation bookkeeping is kept.
    Speculation,
}

impl Executor {
    /// Forks `state` on `condition` for an engine-internal decision.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] on an internal invariant violation; solver timeouts
    /// are reported through [`ForkOutcome::Terminated`].
    pub(crate) fn fork(
        &mut self,
        state: &mut ExecutionState,
        condition: ExprRef,
    ) -> Result<ForkOutcome> {
        self.fork_with_mode(state, condition, ForkMode::Internal)
    }

    /// Forks `state` on a program branch, mediating between solver, seeds,
    /// replay, and the speculation controller.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] on an internal invariant violation; solver timeouts
    /// are reported through [`ForkOutcome::Terminated`].
    pub(crate) fn branch_fork(
        &mut self,
        state: &mut ExecutionState,
        condition: ExprRef,
    ) -> Result<ForkOutcome> {
        let speculating = self.config.interpolation_enabled()
            && self.config.spec_type != SpecType::None
            && state
                .itree_node
                .zip(self.itree.as_ref())
                .is_some_and(|(node, itree)| itree.is_speculation_node(node));

        if speculating && self.config.spec_strategy != SpecStrategy::Timid {
            let started = Instant::now();
            let outcome = self.fork_with_mode(state, condition, ForkMode::Speculation);
            if let Some(spec_time) = state
                .itree_node
                .and_then(|node| self.itree.as_ref()?.get(node)?.spec_time.clone())
            {
                *spec_time.borrow_mut() += started.elapsed();
            }
            return outcome;
        }

        self.fork_with_mode(state, condition, ForkMode::Branch)
    }

    /// The fork procedure proper.
    fn fork_with_mode(
        &mut self,
        state: &mut ExecutionState,
        mut condition: ExprRef,
        mode: ForkMode,
    ) -> Result<ForkOutcome> {
        let is_seeding = mode != ForkMode::Speculation && self.seed_map.contains_key(&state.id);

        // Static throttling: a branch point that has claimed more than its
        // share of forks is concretised instead of explored.
        if mode != ForkMode::Speculation
            && !is_seeding
            && !condition.is_constant()
            && self.throttle_applies(state)
        {
            let constraints: Vec<ExprRef> = state.constraints.constraints().to_vec();
            match self.solver.get_value(&constraints, &condition) {
                Ok(value) => {
                    let concrete = self.builder.constant(1, value);
                    let pinned = self.builder.equals(concrete.clone(), condition.clone());
                    self.add_constraint(state, pinned)?;
                    condition = concrete;
                }
                Err(_) => {
                    state.pc = state.prev_pc;
                    return Ok(ForkOutcome::Terminated(Termination::Early(
                        "query timed out (fork)".into(),
                    )));
                }
            }
        }

        // Seeded states scale the solver budget with the number of seeds
        // they carry.
        let mut timeout = self.config.max_core_solver_time;
        if is_seeding {
            let count = self.seed_map.get(&state.id).map_or(1, Vec::len).max(1);
            timeout = timeout.map(|t| t * u32::try_from(count).unwrap_or(u32::MAX));
        }
        self.solver.set_timeout(timeout);

        let constraints: Vec<ExprRef> = state.constraints.constraints().to_vec();
        let solve_started = Instant::now();
        let evaluated = self.solver.evaluate(&constraints, &condition);
        let solve_elapsed = solve_started.elapsed();
        self.total_solve_time += solve_elapsed;
        *self
            .solve_time_at
            .entry(state.prev_pc)
            .or_insert(std::time::Duration::ZERO) += solve_elapsed;
        *self
            .caller_solve_time
            .entry(state.prev_pc.function)
            .or_insert(std::time::Duration::ZERO) += solve_elapsed;
        self.solver.set_timeout(self.config.max_core_solver_time);
        let (mut validity, core) = match evaluated {
            Ok(result) => result,
            Err(_) => {
                state.pc = state.prev_pc;
                return Ok(ForkOutcome::Terminated(Termination::Early(
                    "query timed out (fork)".into(),
                )));
            }
        };

        // Replay consumes the next recorded branch bit and must agree with
        // any determined direction.
        if mode == ForkMode::Branch && !is_seeding && self.replay_path.is_some() {
            let path = self.replay_path.as_ref().expect("Checked above");
            let Some(bit) = path.get(self.replay_position).copied() else {
                return Err(Error::ReplayExhausted.locate(state.prev_pc));
            };
            self.replay_position += 1;

            match validity {
                Validity::True if !bit => {
                    return Err(Error::ReplayDivergence.locate(state.prev_pc))
                }
                Validity::False if bit => {
                    return Err(Error::ReplayDivergence.locate(state.prev_pc))
                }
                Validity::Unknown => {
                    let installed = if bit {
                        condition.clone()
                    } else {
                        self.builder.is_zero(condition.clone())
                    };
                    self.add_constraint(state, installed)?;
                    validity = if bit { Validity::True } else { Validity::False };
                }
                _ => {}
            }
        }

        // Inhibitors: when forking is not allowed, pick a direction by
        // coin flip and install its constraint.
        if mode != ForkMode::Speculation && !is_seeding && validity == Validity::Unknown {
            let inhibited = (self.governor.at_memory_limit && self.config.max_memory_inhibit)
                || state.fork_disabled
                || self.stats.forks >= self.config.max_forks;
            if inhibited {
                if self.rng.gen::<bool>() {
                    self.add_constraint(state, condition.clone())?;
                    validity = Validity::True;
                } else {
                    let negated = self.builder.is_zero(condition.clone());
                    self.add_constraint(state, negated)?;
                    validity = Validity::False;
                }
            }
        }

        // When only replaying seeds, a branch where the seeds all go one
        // way is fixed in that direction.
        if is_seeding
            && (state.fork_disabled || self.config.only_replay_seeds)
            && validity == Validity::Unknown
        {
            let seeds = self.seed_map.get(&state.id).expect("Seeding checked above");
            let mut true_seed = false;
            let mut false_seed = false;
            for seed in seeds {
                if seed.evaluate_bool(&condition) {
                    true_seed = true;
                } else {
                    false_seed = true;
                }
                if true_seed && false_seed {
                    break;
                }
            }
            if !(true_seed && false_seed) {
                let installed = if true_seed {
                    condition.clone()
                } else {
                    self.builder.is_zero(condition.clone())
                };
                self.add_constraint(state, installed)?;
                validity = if true_seed {
                    Validity::True
                } else {
                    Validity::False
                };
            }
        }

        match validity {
            Validity::True => {
                if mode == ForkMode::Branch {
                    if let Some(outcome) =
                        self.speculation_hook(state, &condition, &core, is_seeding, false)?
                    {
                        return Ok(outcome);
                    }
                }
                self.mark_core(state, &core);
                state.branch_history.push(true);
                Ok(ForkOutcome::TakeTrue)
            }
            Validity::False => {
                if mode == ForkMode::Branch {
                    if let Some(outcome) =
                        self.speculation_hook(state, &condition, &core, is_seeding, true)?
                    {
                        return Ok(outcome);
                    }
                }
                self.mark_core(state, &core);
                state.branch_history.push(false);
                Ok(ForkOutcome::TakeFalse)
            }
            Validity::Unknown => self.split_state(state, condition),
        }
    }

    /// The speculation controller's hook at a one-sided branch.
    ///
    /// `infeasible_is_true` names the side the solver proved infeasible.
    /// Returns an outcome when speculation decided the branch; [`None`]
    /// falls through to the ordinary one-sided handling.
    fn speculation_hook(
        &mut self,
        state: &mut ExecutionState,
        condition: &ExprRef,
        core: &[ExprRef],
        is_seeding: bool,
        infeasible_is_true: bool,
    ) -> Result<Option<ForkOutcome>> {
        // A constant condition is not a solver decision; there is nothing
        // to wager on.
        let enabled = self.config.interpolation_enabled()
            && self.config.spec_type != SpecType::None
            && !condition.is_constant()
            && !is_seeding
            && self.replay_path.is_none()
            && !state.fork_disabled
            && state.itree_node.is_some();
        if !enabled {
            return Ok(None);
        }

        let inst = state.prev_pc;
        let independent = self.speculation.is_independent(condition);
        if self.config.spec_type == SpecType::Coverage {
            if independent {
                self.stats.independence_yes += 1;
            } else {
                self.stats.independence_no += 1;
            }
        }

        let decision = self.speculation.decide(
            self.config.spec_type,
            self.config.spec_strategy,
            independent,
            inst,
        );

        match decision {
            SpecDecision::Proceed => Ok(None),
            SpecDecision::AssumeIndependent => {
                // The wager: skip both the fork and the interpolant mark.
                state.branch_history.push(!infeasible_is_true);
                Ok(Some(if infeasible_is_true {
                    ForkOutcome::TakeFalse
                } else {
                    ForkOutcome::TakeTrue
                }))
            }
            SpecDecision::Open => {
                if self.config.spec_strategy == SpecStrategy::Custom {
                    self.stats.dynamic_yes += 1;
                }
                if let (Some(node), Some(itree)) = (state.itree_node, self.itree.as_mut()) {
                    itree.store_speculation_core(node, core.to_vec(), inst);
                }
                let other = self.add_speculation_node(state, condition, infeasible_is_true)?;
                Ok(Some(ForkOutcome::Fork {
                    other,
                    current_is_true: infeasible_is_true,
                }))
            }
            SpecDecision::CloseAndMark => {
                if self.config.spec_strategy == SpecStrategy::Custom {
                    self.stats.dynamic_no += 1;
                }
                self.mark_core(state, core);
                state.branch_history.push(!infeasible_is_true);
                Ok(Some(if infeasible_is_true {
                    ForkOutcome::TakeFalse
                } else {
                    ForkOutcome::TakeTrue
                }))
            }
        }
    }

    /// Opens a speculation subtree: the current state provisionally
    /// explores the infeasible side (without its contradictory
    /// constraint), while a sibling continues down the feasible side.
    ///
    /// Returns the sibling's identity.
    fn add_speculation_node(
        &mut self,
        state: &mut ExecutionState,
        condition: &ExprRef,
        infeasible_is_true: bool,
    ) -> Result<StateId> {
        self.stats.forks += 1;
        *self.fork_counts.entry(state.prev_pc).or_insert(0) += 1;

        let other_id = self.fresh_state_id();
        let mut other = state.branch(other_id);

        let ptree = self.ptree.as_mut().expect("Forks require the tree");
        let (left, right) = ptree.split(state.ptree_node, state.id, other_id);
        state.ptree_node = left;
        other.ptree_node = right;

        if let (Some(node), Some(itree)) = (state.itree_node, self.itree.as_mut()) {
            let was_speculative = itree.is_speculation_node(node);
            let current_block = self.module.point_of(state.prev_pc);
            let (spec_side, other_side) = itree.split(node, current_block);
            state.itree_node = Some(spec_side);
            other.itree_node = Some(other_side);

            let spec_node = itree.get_mut(spec_side).expect("Just created");
            spec_node.spec_flag = true;
            if !was_speculative {
                // A fresh speculation root materialises its own shared
                // accumulators.
                spec_node.visited_points = Some(Rc::new(std::cell::RefCell::new(
                    std::collections::HashSet::new(),
                )));
                spec_node.spec_time =
                    Some(Rc::new(std::cell::RefCell::new(std::time::Duration::ZERO)));
            }
        }

        // Only the feasible side receives the branch constraint; the
        // speculative side assumes its direction without one.
        if !condition.is_constant() {
            let installed = if infeasible_is_true {
                self.builder.is_zero(condition.clone())
            } else {
                condition.clone()
            };
            self.add_constraint_of(&mut other, installed)?;
        }
        other.depth += 1;

        state.branch_history.push(infeasible_is_true);
        other.branch_history.push(!infeasible_is_true);

        self.register_sibling(other);
        Ok(other_id)
    }

    /// Performs the actual two-way split for an undetermined branch.
    fn split_state(
        &mut self,
        state: &mut ExecutionState,
        condition: ExprRef,
    ) -> Result<ForkOutcome> {
        self.stats.forks += 1;
        *self.fork_counts.entry(state.prev_pc).or_insert(0) += 1;
        *self
            .caller_fork_counts
            .entry(state.prev_pc.function)
            .or_insert(0) += 1;

        let false_id = self.fresh_state_id();
        let mut false_state = state.branch(false_id);

        // Seeds follow the side they satisfy.
        if let Some(seeds) = self.seed_map.remove(&state.id) {
            let (true_seeds, false_seeds): (Vec<_>, Vec<_>) = seeds
                .into_iter()
                .partition(|seed| seed.evaluate_bool(&condition));
            if !true_seeds.is_empty() {
                self.seed_map.insert(state.id, true_seeds);
            }
            if !false_seeds.is_empty() {
                self.seed_map.insert(false_id, false_seeds);
            }
        }

        let ptree = self.ptree.as_mut().expect("Forks require the tree");
        let (left, right) = ptree.split(state.ptree_node, false_id, state.id);
        false_state.ptree_node = left;
        state.ptree_node = right;

        if let (Some(node), Some(itree)) = (state.itree_node, self.itree.as_mut()) {
            let current_block = self.module.point_of(state.prev_pc);
            let (left, right) = itree.split(node, current_block);
            false_state.itree_node = Some(left);
            state.itree_node = Some(right);
        }

        self.add_constraint(state, condition.clone())?;
        let negated = self.builder.is_zero(condition);
        self.add_constraint_of(&mut false_state, negated)?;

        state.depth += 1;
        false_state.depth += 1;
        state.branch_history.push(true);
        false_state.branch_history.push(false);

        self.register_sibling(false_state);

        if self.config.max_depth > 0 && state.depth > self.config.max_depth {
            self.terminate_by_id(false_id, Termination::Early("max-depth exceeded".into()));
            return Ok(ForkOutcome::Terminated(Termination::Early(
                "max-depth exceeded".into(),
            )));
        }

        Ok(ForkOutcome::Fork {
            other: false_id,
            current_is_true: true,
        })
    }

    /// Adds `condition` to the path condition of the state the executor is
    /// currently stepping, recording it on the interpolation tree and
    /// patching any seeds it contradicts.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the constraint is constant-false, which callers
    /// rule out by construction.
    pub(crate) fn add_constraint(
        &mut self,
        state: &mut ExecutionState,
        condition: ExprRef,
    ) -> Result<()> {
        self.patch_seeds(state, &condition);
        self.add_constraint_of(state, condition)
    }

    /// As [`Self::add_constraint`], without seed interaction; used for
    /// fork siblings whose seeds were already redistributed.
    pub(crate) fn add_constraint_of(
        &mut self,
        state: &mut ExecutionState,
        condition: ExprRef,
    ) -> Result<()> {
        let appended = state
            .constraints
            .add(&self.builder, condition)
            .map_err(|e| e.locate(state.prev_pc))?;

        if let (Some(node), Some(itree)) = (state.itree_node, self.itree.as_mut()) {
            for constraint in appended {
                itree.add_constraint(node, constraint);
            }
        }

        Ok(())
    }

    /// Re-solves the bindings of seeds that a newly added constraint
    /// contradicts, dropping seeds that cannot be patched.
    fn patch_seeds(&mut self, state: &mut ExecutionState, condition: &ExprRef) {
        let Some(seeds) = self.seed_map.get(&state.id) else {
            return;
        };
        if seeds.iter().all(|s| s.evaluate_bool(condition)) {
            return;
        }

        let mut constraints: Vec<ExprRef> = state.constraints.constraints().to_vec();
        constraints.push(condition.clone());
        let arrays: Vec<_> = state.symbolics.iter().map(|(_, a)| a.clone()).collect();
        let patched = self.solver.get_initial_values(&constraints, &arrays).ok();

        let seeds = self.seed_map.get_mut(&state.id).expect("Present above");
        match patched {
            Some(assignment) => {
                for seed in seeds.iter_mut() {
                    if !seed.assignment.evaluate_bool(condition) {
                        seed.assignment = assignment.clone();
                    }
                }
            }
            None => {
                seeds.retain(|s| s.assignment.evaluate_bool(condition));
                if seeds.is_empty() {
                    self.seed_map.remove(&state.id);
                }
            }
        }
    }

    /// Records the unsat core of a one-sided branch as interpolant marks.
    fn mark_core(&mut self, state: &ExecutionState, core: &[ExprRef]) {
        if core.is_empty() {
            return;
        }
        if let (Some(node), Some(itree)) = (state.itree_node, self.itree.as_mut()) {
            itree.mark_path_condition(node, core);
        }
    }

    /// Checks whether static throttling applies to the branch the state is
    /// at.
    fn throttle_applies(&self, state: &ExecutionState) -> bool {
        let configured = self.config.max_static_fork_pct < 1.0
            || self.config.max_static_solve_pct < 1.0
            || self.config.max_static_cp_fork_pct < 1.0
            || self.config.max_static_cp_solve_pct < 1.0;
        if !configured {
            return false;
        }
        if self.governor.elapsed().as_secs() < STATIC_THROTTLE_GRACE_SECONDS {
            return false;
        }
        if self.stats.forks == 0 {
            return false;
        }

        let total = self.stats.forks as f64;
        let at_point = self
            .fork_counts
            .get(&state.prev_pc)
            .copied()
            .unwrap_or(0) as f64;
        let at_caller = self
            .caller_fork_counts
            .get(&state.prev_pc.function)
            .copied()
            .unwrap_or(0) as f64;

        let total_solve = self.total_solve_time.as_secs_f64();
        let solve_at_point = self
            .solve_time_at
            .get(&state.prev_pc)
            .map_or(0.0, |d| d.as_secs_f64());
        let solve_at_caller = self
            .caller_solve_time
            .get(&state.prev_pc.function)
            .map_or(0.0, |d| d.as_secs_f64());

        (self.config.max_static_fork_pct < 1.0
            && at_point > total * self.config.max_static_fork_pct)
            || (self.config.max_static_cp_fork_pct < 1.0
                && at_caller > total * self.config.max_static_cp_fork_pct)
            || (self.config.max_static_solve_pct < 1.0
                && total_solve > 0.0
                && solve_at_point > total_solve * self.config.max_static_solve_pct)
            || (self.config.max_static_cp_solve_pct < 1.0
                && total_solve > 0.0
                && solve_at_caller > total_solve * self.config.max_static_cp_solve_pct)
    }

    /// Terminates the state identified by `id`, if it is live.
    pub(crate) fn terminate_by_id(&mut self, id: StateId, termination: Termination) {
        if let Some(state) = self.states.remove(&id) {
            self.terminate_state(state, termination);
        }
    }
}
