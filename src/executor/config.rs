//! This module contains the engine configuration: every knob the command
//! surface exposes, grouped the way the subsystems consume them.

use std::{collections::BTreeSet, path::PathBuf, time::Duration};

use crate::{
    constant::{
        DEFAULT_MAX_DEPTH,
        DEFAULT_MAX_FAIL_SUBSUMPTION,
        DEFAULT_MAX_FORKS,
        DEFAULT_MAX_MEMORY_MB,
        DEFAULT_MAX_RESOLUTIONS,
        DEFAULT_RNG_SEED,
    },
    error::ErrorKind,
    searcher::SearchPolicy,
    solver::ChainConfig,
    speculation::{SpecStrategy, SpecType},
};

/// The configuration of one engine instance.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// The solver-chain composition.
    pub chain: ChainConfig,

    /// The per-query solver time budget; [`None`] disables it.
    pub max_core_solver_time: Option<Duration>,

    /// The per-instruction wall-clock budget; [`None`] disables it.
    pub max_instruction_time: Option<Duration>,

    /// The cap on forks performed in one run.
    pub max_forks: u64,

    /// The cap on per-path branch depth; zero disables it.
    pub max_depth: u64,

    /// The memory cap, in megabytes.
    pub max_memory_mb: usize,

    /// Whether reaching the memory cap inhibits forking.
    pub max_memory_inhibit: bool,

    /// The fraction of all forks one program point may claim before its
    /// branches are concretised; `1.0` disables the throttle.
    pub max_static_fork_pct: f64,

    /// The fraction of solver time one program point may claim before its
    /// branches are concretised; `1.0` disables the throttle.
    pub max_static_solve_pct: f64,

    /// As [`Self::max_static_fork_pct`], measured per calling function.
    pub max_static_cp_fork_pct: f64,

    /// As [`Self::max_static_solve_pct`], measured per calling function.
    pub max_static_cp_solve_pct: f64,

    /// Whether exploration is restricted to paths the seeds exercise.
    pub only_replay_seeds: bool,

    /// Whether seeds shorter than the inputs they feed may be extended.
    pub allow_seed_extension: bool,

    /// Whether seed extension fills with zeroes.
    pub zero_seed_extension: bool,

    /// Whether seeds longer than the inputs they feed may be truncated.
    pub allow_seed_truncation: bool,

    /// Whether seed values are matched to inputs by name instead of
    /// position.
    pub named_seed_matching: bool,

    /// The wall-clock budget of the seed phase; [`None`] disables it.
    pub seed_time: Option<Duration>,

    /// Whether live states are dumped as test cases when the run halts.
    pub dump_states_on_halt: bool,

    /// Whether every error occurrence emits a test case, rather than one
    /// per location.
    pub emit_all_errors: bool,

    /// Whether only states that covered new blocks emit test cases.
    pub only_output_states_covering_new: bool,

    /// The error kinds that halt the run after being reported.
    pub exit_on_error_type: BTreeSet<ErrorKind>,

    /// Whether interpolation (and with it subsumption) is disabled.
    pub no_interpolation: bool,

    /// Whether the interpolation tree is rendered when the run finishes.
    pub output_tree: bool,

    /// Whether subsumed states emit test cases.
    pub subsumed_test: bool,

    /// Whether interpolants are stored without existential shadow
    /// renaming.
    pub no_existential: bool,

    /// The failed-check budget per program point before stored entries are
    /// dropped.
    pub max_fail_subsumption: usize,

    /// The debug level of state exploration reporting.
    pub debug_state: u64,

    /// The debug level of subsumption reporting.
    pub debug_subsumption: u64,

    /// Whether fully completed subtrees store their weakest (possibly
    /// empty) condition, in addition to the entries deduced from unsat
    /// cores and memory-bound violations.
    pub wp_interpolant: bool,

    /// Whether memory-bound interpolation also records global objects.
    pub mark_global: bool,

    /// The property class speculation wagers against.
    pub spec_type: SpecType,

    /// The speculation strategy.
    pub spec_strategy: SpecStrategy,

    /// The folder holding `SpecAvoid_*` files and the initial
    /// visited-block file.
    pub dependency_folder: Option<PathBuf>,

    /// The state-selection policy.
    pub search_policy: SearchPolicy,

    /// Whether addresses and stored values are pre-simplified through the
    /// path condition before memory operations.
    pub simplify_sym_indices: bool,

    /// The cap on candidate objects for one symbolic address resolution.
    pub max_resolutions: usize,

    /// The instruction-count quota; the halt flag is set once it is
    /// crossed. [`None`] disables it.
    pub stop_after_n_instructions: Option<u64>,

    /// The seed of the engine's deterministic random number generator.
    pub rng_seed: u64,
}

impl Config {
    /// Sets the speculation type and strategy.
    #[must_use]
    pub fn with_speculation(mut self, spec_type: SpecType, strategy: SpecStrategy) -> Self {
        self.spec_type = spec_type;
        self.spec_strategy = strategy;
        self
    }

    /// Disables interpolation entirely.
    #[must_use]
    pub fn without_interpolation(mut self) -> Self {
        self.no_interpolation = true;
        self
    }

    /// Sets the fork cap.
    #[must_use]
    pub fn with_max_forks(mut self, value: u64) -> Self {
        self.max_forks = value;
        self
    }

    /// Sets the branch-depth cap.
    #[must_use]
    pub fn with_max_depth(mut self, value: u64) -> Self {
        self.max_depth = value;
        self
    }

    /// Sets the memory cap in megabytes.
    #[must_use]
    pub fn with_max_memory_mb(mut self, value: usize) -> Self {
        self.max_memory_mb = value;
        self
    }

    /// Sets the state-selection policy.
    #[must_use]
    pub fn with_search_policy(mut self, value: SearchPolicy) -> Self {
        self.search_policy = value;
        self
    }

    /// Sets the per-query solver time budget.
    #[must_use]
    pub fn with_max_core_solver_time(mut self, value: Option<Duration>) -> Self {
        self.max_core_solver_time = value;
        self
    }

    /// Sets the RNG seed.
    #[must_use]
    pub fn with_rng_seed(mut self, value: u64) -> Self {
        self.rng_seed = value;
        self
    }

    /// Sets the dependency folder read at engine construction.
    #[must_use]
    pub fn with_dependency_folder(mut self, value: PathBuf) -> Self {
        self.dependency_folder = Some(value);
        self
    }

    /// Adds an error kind that halts the run when reported.
    #[must_use]
    pub fn with_exit_on_error(mut self, kind: ErrorKind) -> Self {
        self.exit_on_error_type.insert(kind);
        self
    }

    /// Sets whether subsumed states emit test cases.
    #[must_use]
    pub fn with_subsumed_test(mut self, value: bool) -> Self {
        self.subsumed_test = value;
        self
    }

    /// Checks whether interpolation is active.
    #[must_use]
    pub fn interpolation_enabled(&self) -> bool {
        !self.no_interpolation
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            max_core_solver_time: None,
            max_instruction_time: None,
            max_forks: DEFAULT_MAX_FORKS,
            max_depth: DEFAULT_MAX_DEPTH,
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            max_memory_inhibit: true,
            max_static_fork_pct: 1.0,
            max_static_solve_pct: 1.0,
            max_static_cp_fork_pct: 1.0,
            max_static_cp_solve_pct: 1.0,
            only_replay_seeds: false,
            allow_seed_extension: false,
            zero_seed_extension: false,
            allow_seed_truncation: false,
            named_seed_matching: false,
            seed_time: None,
            dump_states_on_halt: true,
            emit_all_errors: false,
            only_output_states_covering_new: false,
            exit_on_error_type: BTreeSet::new(),
            no_interpolation: false,
            output_tree: false,
            subsumed_test: false,
            no_existential: false,
            max_fail_subsumption: DEFAULT_MAX_FAIL_SUBSUMPTION,
            debug_state: 0,
            debug_subsumption: 0,
            wp_interpolant: true,
            mark_global: false,
            spec_type: SpecType::None,
            spec_strategy: SpecStrategy::Timid,
            dependency_folder: None,
            search_policy: SearchPolicy::DepthFirst,
            simplify_sym_indices: true,
            max_resolutions: DEFAULT_MAX_RESOLUTIONS,
            stop_after_n_instructions: None,
            rng_seed: DEFAULT_RNG_SEED,
        }
    }
}
