//! This module contains the executor: the instruction dispatcher and
//! search loop that drive symbolic exploration, orchestrating the
//! expression algebra, the memory model, the solver chain, both trees, and
//! the speculation controller.

pub mod config;
pub mod fork;
pub mod memory_ops;
pub mod step;

pub use config::Config;
pub use fork::ForkOutcome;

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt::Debug,
    rc::Rc,
    time::Instant,
};

use ethnum::U256;
use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};

use crate::{
    error::{execution, ErrorKind, Errors},
    expr::ExprBuilder,
    governor::{MemoryAction, ResourceGovernor},
    handler::{CollectingHandler, RunHandler, TestCase, TestInput},
    interpolation::InterpolationTree,
    ir::{FunctionId, GlobalId, InstId, Module},
    memory::{Allocator, MemoryObject, MemoryObjectRef, ObjectState},
    ptree::ProcessTree,
    searcher::{construct_searcher, DynSearcher},
    seed::{Seed, SeedInfo},
    solver::{build_chain, CoreSolver, Solver},
    speculation::{SpecType, SpeculationState},
    state::{CallFrame, ExecutionState, StateId},
    stats::Statistics,
    watchdog::DynWatchdog,
};

/// The reasons a state stops being explored.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Termination {
    /// The program returned from its entry function.
    Exit,

    /// Exploration of the path was abandoned for the given reason.
    Early(String),

    /// The path condition entailed a stored interpolant.
    Subsumed,

    /// A program-level failure terminated the path.
    Error {
        /// The kind of failure.
        kind: ErrorKind,

        /// The failure description.
        message: String,
    },
}

/// The interface to the host's native function dispatcher.
///
/// External calls are concretised before dispatch: the engine resolves
/// every argument to a constant and binds the returned constant, so the
/// dispatcher never sees symbolic values.
pub trait ExternalDispatcher
where
    Self: Debug,
{
    /// Calls the external function `name` with concretised `args`,
    /// returning its value if it has one.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the call fails; the engine reports this as an
    /// external-call error on the calling path.
    fn call(&mut self, name: &str, args: &[U256]) -> anyhow::Result<Option<U256>>;
}

/// The symbolic execution engine.
pub struct Executor {
    pub(crate) module: Rc<Module>,
    pub(crate) config: Config,
    pub(crate) builder: Rc<ExprBuilder>,
    pub(crate) solver: CoreSolver,

    pub(crate) states: HashMap<StateId, ExecutionState>,
    pub(crate) added_states: Vec<StateId>,
    pub(crate) removed_states: Vec<StateId>,
    pub(crate) searcher: Option<DynSearcher>,

    pub(crate) ptree: Option<ProcessTree>,
    pub(crate) itree: Option<InterpolationTree>,
    pub(crate) speculation: SpeculationState,

    pub(crate) stats: Statistics,
    pub(crate) governor: ResourceGovernor,
    pub(crate) watchdog: DynWatchdog,
    pub(crate) allocator: Allocator,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) halt: bool,

    pub(crate) handler: Box<dyn RunHandler>,
    pub(crate) external: Option<Box<dyn ExternalDispatcher>>,
    pub(crate) errors: Errors,

    pub(crate) globals: HashMap<GlobalId, MemoryObjectRef>,
    pub(crate) seed_map: BTreeMap<StateId, Vec<SeedInfo>>,
    pub(crate) replay_path: Option<Vec<bool>>,
    pub(crate) replay_position: usize,
    pub(crate) reported_errors: HashSet<InstId>,

    pub(crate) fork_counts: HashMap<InstId, u64>,
    pub(crate) caller_fork_counts: HashMap<FunctionId, u64>,
    pub(crate) solve_time_at: HashMap<InstId, std::time::Duration>,
    pub(crate) caller_solve_time: HashMap<FunctionId, std::time::Duration>,
    pub(crate) total_solve_time: std::time::Duration,

    pub(crate) next_state_id: u64,
    pub(crate) next_symbolic: u64,
    pub(crate) debug_trace: Vec<String>,
}

impl Executor {
    /// Constructs an engine over `module` with the provided configuration
    /// and watchdog.
    #[must_use]
    pub fn new(module: Module, config: Config, watchdog: DynWatchdog) -> Self {
        let builder = Rc::new(ExprBuilder::new());
        let mut solver = build_chain(builder.clone(), &config.chain);
        solver.set_timeout(config.max_core_solver_time);

        let speculation = match (&config.dependency_folder, config.spec_type) {
            (Some(folder), t) if t != SpecType::None => SpeculationState::load(folder),
            _ => SpeculationState::new(),
        };

        let governor = ResourceGovernor::new(config.max_memory_mb, config.max_memory_inhibit);
        let itree = config.interpolation_enabled().then(InterpolationTree::new);

        Self {
            module: Rc::new(module),
            builder,
            solver,
            states: HashMap::new(),
            added_states: Vec::new(),
            removed_states: Vec::new(),
            searcher: None,
            ptree: None,
            itree,
            speculation,
            stats: Statistics::default(),
            governor,
            watchdog,
            allocator: Allocator::new(config.rng_seed),
            rng: ChaCha8Rng::seed_from_u64(config.rng_seed),
            halt: false,
            handler: Box::new(CollectingHandler::new()),
            external: None,
            errors: Errors::new(),
            globals: HashMap::new(),
            seed_map: BTreeMap::new(),
            replay_path: None,
            replay_position: 0,
            reported_errors: HashSet::new(),
            fork_counts: HashMap::new(),
            caller_fork_counts: HashMap::new(),
            solve_time_at: HashMap::new(),
            caller_solve_time: HashMap::new(),
            total_solve_time: std::time::Duration::ZERO,
            next_state_id: 0,
            next_symbolic: 0,
            debug_trace: Vec::new(),
            config,
        }
    }

    /// Gets the exploration trace recorded under the debug configuration
    /// options.
    #[must_use]
    pub fn debug_trace(&self) -> &[String] {
        self.debug_trace.as_slice()
    }

    /// Installs a handler receiving run artefacts, replacing the default
    /// collecting handler.
    #[must_use]
    pub fn with_handler(mut self, handler: Box<dyn RunHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Installs the native dispatcher used for non-intrinsic external
    /// calls.
    #[must_use]
    pub fn with_external_dispatcher(mut self, dispatcher: Box<dyn ExternalDispatcher>) -> Self {
        self.external = Some(dispatcher);
        self
    }

    /// Installs a recorded branch-bit path to replay.
    #[must_use]
    pub fn with_replay_path(mut self, path: Vec<bool>) -> Self {
        self.replay_path = Some(path);
        self
    }

    /// Gets the run statistics, including the counters harvested from the
    /// solver chain and subsumption table.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        let mut stats = self.stats;
        stats.solver = self.solver.chain_stats();
        if let Some(itree) = &self.itree {
            stats.subsumption = itree.table.stats();
        }
        stats
    }

    /// Gets the collected artefacts, when the default handler is in use.
    #[must_use]
    pub fn collected(&self) -> Option<&CollectingHandler> {
        self.handler.downcast_ref::<CollectingHandler>()
    }

    /// Gets the interpolation tree, when interpolation is enabled.
    #[must_use]
    pub fn interpolation_tree(&self) -> Option<&InterpolationTree> {
        self.itree.as_ref()
    }

    /// Gets the engine's non-fatal internal errors.
    #[must_use]
    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    /// Explores `entry` exhaustively, guided first by `seeds` if any are
    /// provided.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the entry function does not exist or the engine
    /// fails before exploration can start. Per-path failures never surface
    /// here; they terminate their path and are reported through the
    /// handler.
    pub fn run(&mut self, entry: &str, seeds: Vec<Seed>) -> crate::error::Result<()> {
        let seeding = !seeds.is_empty();
        self.prepare(entry, seeds)?;

        if seeding {
            self.run_seed_phase();
        }

        let mut searcher = construct_searcher(self.config.search_policy, self.config.rng_seed);
        let mut live: Vec<StateId> = self.states.keys().copied().collect();
        live.sort_unstable();
        searcher.update(&live, &[]);
        self.searcher = Some(searcher);
        self.added_states.clear();
        self.removed_states.clear();

        let poll_every = self.watchdog.poll_every().max(1);
        let mut iterations = 0usize;

        while !self.states.is_empty() && !self.halt {
            iterations += 1;
            if iterations % poll_every == 0 && self.watchdog.should_stop() {
                self.halt = true;
                break;
            }

            let Some(id) = self.searcher.as_mut().and_then(|s| s.select_state()) else {
                break;
            };
            let Some(state) = self.states.remove(&id) else {
                // The searcher is stale; reconcile and retry.
                self.removed_states.push(id);
                self.update_states();
                continue;
            };

            if self.config.debug_state > 0 {
                self.debug_trace
                    .push(format!("select state {} at {}", state.id.0, state.pc));
            }

            let Some(mut state) = self.enter_block(state) else {
                // The state was consumed by rollback or subsumption.
                self.update_states();
                continue;
            };

            let started = Instant::now();
            match self.step_state(&mut state) {
                Ok(None) => {
                    if let Some(budget) = self.config.max_instruction_time {
                        if started.elapsed() > budget {
                            self.terminate_state(
                                state,
                                Termination::Early("max-instruction-time exceeded".into()),
                            );
                        } else {
                            self.put_state(state);
                        }
                    } else {
                        self.put_state(state);
                    }
                }
                Ok(Some(termination)) => {
                    self.finish_with(state, termination);
                }
                Err(error) => {
                    self.errors.add(error.into());
                    self.terminate_state(
                        state,
                        Termination::Early("internal execution error".into()),
                    );
                }
            }

            if let Some(quota) = self.config.stop_after_n_instructions {
                if self.stats.instructions >= quota {
                    self.halt = true;
                }
            }

            self.check_memory_usage();
            self.update_states();
        }

        if self.halt && self.config.dump_states_on_halt {
            let remaining: Vec<StateId> = self.states.keys().copied().collect();
            for id in remaining {
                if let Some(state) = self.states.remove(&id) {
                    self.terminate_state(state, Termination::Early("run halted".into()));
                }
            }
            self.update_states();
        }

        if self.config.output_tree {
            if let Some(itree) = &self.itree {
                self.debug_trace.push(itree.to_string());
            }
        }

        Ok(())
    }

    /// Prepares globals and the initial state, returning its identity.
    ///
    /// Seeds are attached before parameters are bound, so parameter inputs
    /// consume seed values like any other symbolic input.
    fn prepare(&mut self, entry: &str, seeds: Vec<Seed>) -> crate::error::Result<StateId> {
        let entry_fn = self.module.function_named(entry).ok_or_else(|| {
            crate::error::LocatedError {
                location: InstId {
                    function: FunctionId(u32::MAX),
                    index: 0,
                },
                payload: execution::Error::NoSuchFunction {
                    function: FunctionId(u32::MAX),
                }
                .into(),
            }
        })?;
        let module = self.module.clone();
        let function = module.function(entry_fn).expect("Looked up by name above");

        let entry_index = function.blocks[0].entry;
        let entry_pc = InstId {
            function: entry_fn,
            index: entry_index,
        };

        let id = self.fresh_state_id();
        let ptree = ProcessTree::new(id);
        let ptree_node = ptree.root();
        self.ptree = Some(ptree);

        if !seeds.is_empty() {
            self.seed_map
                .insert(id, seeds.into_iter().map(SeedInfo::new).collect());
        }

        let mut state = ExecutionState::new(id, entry_pc, ptree_node);
        state.itree_node = self.itree.as_ref().map(InterpolationTree::root);

        // Globals are shared by every path at the same addresses; their
        // contents are per-path through the copy-on-write address space.
        for (index, global) in module.globals.iter().enumerate() {
            let (object_id, address) = self.allocator.allocate(global.size);
            let object = Rc::new(MemoryObject {
                id: object_id,
                address,
                size: global.size,
                name: global.name.clone(),
                is_local: false,
                is_global: true,
                read_only: global.read_only,
            });
            let contents = match &global.initializer {
                Some(bytes) => {
                    ObjectState::new_concrete(&global.name, bytes.clone(), global.read_only)
                }
                None => ObjectState::new_zeroed(
                    &global.name,
                    global.size,
                    global.read_only,
                ),
            };
            state.address_space.bind(object.clone(), contents);
            self.globals
                .insert(GlobalId(u32::try_from(index).unwrap_or(u32::MAX)), object);
        }

        // The entry frame, with parameters bound to fresh symbolic inputs.
        let mut frame = CallFrame::new(entry_fn, function.register_count, None);
        let param_widths = function.param_widths.clone();
        for (index, width) in param_widths.iter().enumerate() {
            let name = format!("arg{index}");
            let value = self.make_symbolic_input(&mut state, &name, *width);
            frame
                .bind(
                    crate::ir::RegisterId(u32::try_from(index).unwrap_or(u32::MAX)),
                    value,
                )
                .expect("Parameter registers exist by construction");
        }

        state
            .stack
            .push(frame)
            .map_err(|e| crate::error::LocatedError {
                location: entry_pc,
                payload: e.into(),
            })?;
        self.states.insert(id, state);

        self.stats.max_live_states = self.stats.max_live_states.max(1);
        Ok(id)
    }

    /// Steps seeded states round-robin until every seed has been consumed
    /// or the seed budget expires.
    fn run_seed_phase(&mut self) {
        let started = Instant::now();
        let mut last: Option<StateId> = None;
        let poll_every = self.watchdog.poll_every().max(1);
        let mut iterations = 0usize;

        while !self.seed_map.is_empty() && !self.halt {
            iterations += 1;
            if iterations % poll_every == 0 && self.watchdog.should_stop() {
                self.halt = true;
                break;
            }
            if let Some(budget) = self.config.seed_time {
                if started.elapsed() > budget {
                    break;
                }
            }

            // Round-robin over the seeded states, continuing after the
            // previously stepped one.
            let id = match last {
                Some(last_id) => self
                    .seed_map
                    .range((
                        std::ops::Bound::Excluded(last_id),
                        std::ops::Bound::Unbounded,
                    ))
                    .next()
                    .map(|(k, _)| *k),
                None => None,
            }
            .or_else(|| self.seed_map.keys().next().copied());
            let Some(id) = id else { break };
            last = Some(id);

            let Some(state) = self.states.remove(&id) else {
                self.seed_map.remove(&id);
                continue;
            };

            let Some(mut state) = self.enter_block(state) else {
                continue;
            };

            match self.step_state(&mut state) {
                Ok(None) => self.put_state(state),
                Ok(Some(termination)) => self.finish_with(state, termination),
                Err(error) => {
                    self.errors.add(error.into());
                    self.terminate_state(
                        state,
                        Termination::Early("internal execution error".into()),
                    );
                }
            }
        }
    }

    /// Handles block entry for a state about to step: interpolation-tree
    /// synchronisation, coverage recording, speculation failure detection,
    /// and the subsumption check.
    ///
    /// Returns the state when it survives; a consumed state was rolled
    /// back, subsumed, or terminated.
    fn enter_block(&mut self, mut state: ExecutionState) -> Option<ExecutionState> {
        let module = self.module.clone();
        let Some(function) = module.function(state.pc.function) else {
            return Some(state);
        };
        if !function.is_block_entry(state.pc.index) {
            return Some(state);
        }
        let Some(point) = module.point_of(state.pc) else {
            return Some(state);
        };

        let newly_covered = self.speculation.record_visit(point);
        if newly_covered {
            state.covered_new = true;
        }
        state.covered_points.insert(point);

        let Some(node) = state.itree_node else {
            return Some(state);
        };
        if self.itree.is_none() {
            return Some(state);
        }

        let (revisit, speculative) = {
            let itree = self.itree.as_mut().expect("Checked above");
            let revisit = itree.set_current(node, point);
            (revisit, itree.is_speculation_node(node))
        };

        if speculative && self.config.spec_type != SpecType::None {
            // Failure inside a speculation subtree: non-progress, or a new
            // block that must be covered non-speculatively.
            let coverage_failure =
                self.config.spec_type == SpecType::Coverage && newly_covered;
            if revisit || coverage_failure {
                self.speculative_back_jump(state);
                return None;
            }
        }

        // Subsumption is only sound for non-speculative states: a
        // speculative path condition is missing its provisional branch
        // constraint.
        if !speculative {
            self.solver.set_timeout(self.config.max_core_solver_time);
            let constraints: Vec<_> = state.constraints.constraints().to_vec();
            let max_fail = self.config.max_fail_subsumption;
            let builder = self.builder.clone();
            let result = {
                let itree = self.itree.as_mut().expect("Checked above");
                itree
                    .table
                    .check(&mut self.solver, &builder, point, &constraints, max_fail)
            };
            if self.config.debug_subsumption > 0 {
                let hit = matches!(result, Ok(true));
                self.debug_trace
                    .push(format!("subsumption at {point}: {}", if hit { "hit" } else { "miss" }));
            }
            match result {
                Ok(true) => {
                    self.terminate_state(state, Termination::Subsumed);
                    return None;
                }
                Ok(false) => {}
                Err(_) => {
                    self.terminate_state(
                        state,
                        Termination::Early("query timed out (subsumption)".into()),
                    );
                    return None;
                }
            }
        }

        Some(state)
    }

    /// Routes a termination through speculation rollback when it is an
    /// error inside a speculation subtree, and to normal termination
    /// otherwise.
    pub(crate) fn finish_with(&mut self, state: ExecutionState, termination: Termination) {
        let speculative = matches!(&termination, Termination::Error { .. })
            && self.config.spec_type != SpecType::None
            && state
                .itree_node
                .zip(self.itree.as_ref())
                .is_some_and(|(node, itree)| itree.is_speculation_node(node));

        if speculative {
            self.speculative_back_jump(state);
        } else {
            self.terminate_state(state, termination);
        }
    }

    /// Terminates `state`, emitting its artefacts and detaching it from
    /// both trees.
    pub(crate) fn terminate_state(&mut self, state: ExecutionState, termination: Termination) {
        self.stats.paths_explored += 1;
        match &termination {
            Termination::Exit => self.stats.terminated_exit += 1,
            Termination::Early(_) => self.stats.terminated_early += 1,
            Termination::Subsumed => self.stats.terminated_subsumed += 1,
            Termination::Error { .. } => self.stats.terminated_error += 1,
        }

        let emit = match &termination {
            Termination::Exit | Termination::Early(_) => true,
            Termination::Subsumed => self.config.subsumed_test,
            Termination::Error { .. } => {
                self.config.emit_all_errors || self.reported_errors.insert(state.prev_pc)
            }
        };
        let emit = emit
            && (matches!(termination, Termination::Error { .. })
                || !self.config.only_output_states_covering_new
                || state.covered_new);

        if emit {
            let test = self.build_test_case(&state, &termination);
            self.handler.on_test_case(test);
        }

        if let Termination::Error { kind, message } = &termination {
            self.handler.on_error(state.prev_pc, *kind, message);
            if self.config.exit_on_error_type.contains(kind) {
                self.halt = true;
            }
        }

        if let Some(ptree) = self.ptree.as_mut() {
            if let Some(node) = ptree.get_mut(state.ptree_node) {
                node.data = None;
            }
            ptree.remove(state.ptree_node);
        }

        if let (Some(node), Some(itree)) = (state.itree_node, self.itree.as_mut()) {
            // Early terminations prove nothing about the subtree; every
            // other termination is a completed outcome.
            let store = !matches!(termination, Termination::Early(_));
            itree.finish_leaf(
                &self.builder,
                node,
                store,
                self.config.wp_interpolant,
                self.config.no_existential,
            );
        }

        self.forget_state(state.id);
    }

    /// Rolls back the speculation subtree containing `state`.
    pub(crate) fn speculative_back_jump(&mut self, state: ExecutionState) {
        let Some(node) = state.itree_node else {
            self.terminate_state(state, Termination::Early("speculation rollback".into()));
            return;
        };

        let (root, spec_elapsed) = {
            let itree = self.itree.as_ref().expect("Speculation requires the tree");
            let root = itree.speculation_root(node);
            let elapsed = itree
                .get(node)
                .and_then(|n| n.spec_time.as_ref())
                .map(|t| *t.borrow())
                .unwrap_or_default();
            (root, elapsed)
        };

        // Convert the sibling's saved unsat core into marks, and snapshot
        // the visited-block count so the custom strategy refuses this
        // branch until new blocks appear.
        let parent = self.itree.as_ref().and_then(|t| t.get(root)).and_then(|n| n.parent);
        if let Some(parent) = parent {
            let (core, inst) = {
                let itree = self.itree.as_ref().expect("Present above");
                let n = itree.get(parent);
                (
                    n.map(|n| n.speculation_core.clone()).unwrap_or_default(),
                    n.and_then(|n| n.second_check_inst),
                )
            };
            if !core.is_empty() {
                self.itree
                    .as_mut()
                    .expect("Present above")
                    .mark_path_condition(parent, &core);
            }
            if let Some(inst) = inst {
                self.speculation.snapshot(inst);
            }
        }

        // Mark the subtree failed, then drop every state inside it.
        let _failed = self
            .itree
            .as_mut()
            .expect("Present above")
            .collect_speculation_nodes(root);

        let victims: Vec<StateId> = self
            .states
            .iter()
            .filter(|(_, s)| {
                s.itree_node.is_some_and(|n| {
                    self.itree
                        .as_ref()
                        .and_then(|t| t.get(n))
                        .is_some_and(|x| x.spec_failed)
                })
            })
            .map(|(id, _)| *id)
            .collect();

        for id in victims {
            if let Some(victim) = self.states.remove(&id) {
                if let Some(ptree) = self.ptree.as_mut() {
                    ptree.remove(victim.ptree_node);
                }
                self.forget_state(id);
            }
        }

        if let Some(ptree) = self.ptree.as_mut() {
            ptree.remove(state.ptree_node);
        }
        self.forget_state(state.id);

        self.itree
            .as_mut()
            .expect("Present above")
            .remove_failed_subtree(root);

        // If the sibling side had already finished, the parent subtree is
        // now complete and condenses like any other.
        if let Some(parent) = parent {
            let complete = self
                .itree
                .as_ref()
                .and_then(|t| t.get(parent))
                .is_some_and(|n| n.children_live == 0);
            if complete {
                let itree = self.itree.as_mut().expect("Present above");
                itree.finish_leaf(
                    &self.builder,
                    parent,
                    true,
                    self.config.wp_interpolant,
                    self.config.no_existential,
                );
            }
        }

        self.stats.spec_fail += 1;
        self.stats.total_spec_fail_time += spec_elapsed;
    }

    /// Removes a state's identity from the seed map and the searcher's
    /// pending views.
    fn forget_state(&mut self, id: StateId) {
        self.seed_map.remove(&id);
        if let Some(position) = self.added_states.iter().position(|a| *a == id) {
            // The state never reached the searcher.
            self.added_states.remove(position);
        } else {
            self.removed_states.push(id);
        }
    }

    /// Builds the test-case record for a terminated state.
    fn build_test_case(&mut self, state: &ExecutionState, termination: &Termination) -> TestCase {
        let suffix = match termination {
            Termination::Exit => String::new(),
            Termination::Early(_) => "early".into(),
            Termination::Subsumed => "subsumed".into(),
            Termination::Error { kind, .. } => kind.suffix().into(),
        };
        let error = match termination {
            Termination::Error { message, .. } => Some(message.clone()),
            Termination::Early(reason) => Some(reason.clone()),
            _ => None,
        };

        let arrays: Vec<_> = state.symbolics.iter().map(|(_, a)| a.clone()).collect();
        let constraints: Vec<_> = state.constraints.constraints().to_vec();
        let inputs = match self.solver.get_initial_values(&constraints, &arrays) {
            Ok(assignment) => state
                .symbolics
                .iter()
                .map(|(object, array)| TestInput {
                    name: array.name.clone(),
                    bytes: assignment
                        .bindings
                        .get(&array.id)
                        .cloned()
                        .unwrap_or_else(|| vec![0; object.size as usize]),
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        TestCase {
            state: state.id.0,
            inputs,
            suffix,
            error,
            path: state.branch_history.clone(),
            steps: state.steps,
        }
    }

    /// Samples memory at the governor's interval, inhibiting forks or
    /// culling states as the sample dictates.
    fn check_memory_usage(&mut self) {
        if !self.governor.should_sample(self.stats.instructions) {
            return;
        }

        self.builder.sweep();

        let footprint: u64 = self
            .states
            .values()
            .map(|s| s.address_space.footprint_bytes())
            .sum();
        let action = self.governor.memory_action(footprint, self.states.len());

        if let MemoryAction::Cull(count) = action {
            // Prefer to cull paths that have not recently contributed new
            // coverage.
            let mut candidates: Vec<StateId> = self.states.keys().copied().collect();
            candidates.sort_unstable_by_key(|id| {
                let state = &self.states[id];
                (state.covered_new, std::cmp::Reverse(state.depth))
            });

            for id in candidates.into_iter().take(count) {
                if let Some(state) = self.states.remove(&id) {
                    self.stats.states_culled += 1;
                    self.terminate_state(
                        state,
                        Termination::Early("memory limit exceeded".into()),
                    );
                }
            }
        }
    }

    /// Reconciles the searcher's view with the states added and removed
    /// this iteration. This is the only place the searcher is mutated
    /// after construction.
    pub(crate) fn update_states(&mut self) {
        if let Some(searcher) = self.searcher.as_mut() {
            searcher.update(&self.added_states, &self.removed_states);
        }
        for id in &self.removed_states {
            self.seed_map.remove(id);
        }
        self.added_states.clear();
        self.removed_states.clear();
        self.stats.max_live_states = self.stats.max_live_states.max(self.states.len());
    }

    /// Returns `state` to the live set.
    pub(crate) fn put_state(&mut self, state: ExecutionState) {
        self.states.insert(state.id, state);
    }

    /// Registers a freshly forked sibling with the live set and the
    /// pending searcher view.
    pub(crate) fn register_sibling(&mut self, sibling: ExecutionState) {
        self.added_states.push(sibling.id);
        self.states.insert(sibling.id, sibling);
    }

    /// Allocates a fresh state identity.
    pub(crate) fn fresh_state_id(&mut self) -> StateId {
        let id = StateId(self.next_state_id);
        self.next_state_id += 1;
        id
    }
}

/// Constructs an engine over `module`, mirroring the shape of the crate's
/// top-level entry point.
#[must_use]
pub fn new(module: Module, config: Config, watchdog: DynWatchdog) -> Executor {
    Executor::new(module, config, watchdog)
}
