//! This module contains the run statistics the engine accumulates, most of
//! which exist so that external writers can produce their report files
//! without reaching into engine internals.

use std::{
    fmt::{Display, Formatter},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{interpolation::SubsumptionStats, solver::ChainStats};

/// The counters accumulated over one engine run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Statistics {
    /// Instructions executed across all states.
    pub instructions: u64,

    /// Forks performed.
    pub forks: u64,

    /// Paths fully explored (states terminated for any reason).
    pub paths_explored: u64,

    /// States terminated by normal exit.
    pub terminated_exit: u64,

    /// States terminated early (timeouts, depth, memory, halt).
    pub terminated_early: u64,

    /// States terminated by subsumption.
    pub terminated_subsumed: u64,

    /// States terminated with a program-level error.
    pub terminated_error: u64,

    /// States culled by the memory governor.
    pub states_culled: u64,

    /// The largest number of simultaneously live states.
    pub max_live_states: usize,

    /// Branches assumed because their variables were independent of every
    /// avoid set.
    pub independence_yes: u64,

    /// Branches whose independence check failed.
    pub independence_no: u64,

    /// Speculations permitted by the custom strategy's snapshot check.
    pub dynamic_yes: u64,

    /// Speculations refused by the custom strategy's snapshot check.
    pub dynamic_no: u64,

    /// Speculation subtrees rolled back.
    pub spec_fail: u64,

    /// Wall-clock spent in speculation subtrees that were rolled back.
    pub total_spec_fail_time: Duration,

    /// Subsumption-table counters.
    pub subsumption: SubsumptionStats,

    /// Solver-chain cache counters.
    pub solver: ChainStats,
}

/// The speculation statistics in the shape external writers emit.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SpeculationReport {
    /// See [`Statistics::independence_yes`].
    pub independence_yes: u64,

    /// See [`Statistics::independence_no`].
    pub independence_no: u64,

    /// See [`Statistics::dynamic_yes`].
    pub dynamic_yes: u64,

    /// See [`Statistics::dynamic_no`].
    pub dynamic_no: u64,

    /// See [`Statistics::spec_fail`].
    pub spec_fail: u64,

    /// See [`Statistics::total_spec_fail_time`], in milliseconds.
    pub total_spec_fail_time_ms: u64,
}

impl Statistics {
    /// Gets the speculation counters as a serialisable report.
    #[must_use]
    pub fn speculation_report(&self) -> SpeculationReport {
        SpeculationReport {
            independence_yes: self.independence_yes,
            independence_no: self.independence_no,
            dynamic_yes: self.dynamic_yes,
            dynamic_no: self.dynamic_no,
            spec_fail: self.spec_fail,
            total_spec_fail_time_ms: u64::try_from(self.total_spec_fail_time.as_millis())
                .unwrap_or(u64::MAX),
        }
    }
}

impl Display for Statistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "instructions          : {}", self.instructions)?;
        writeln!(f, "forks                 : {}", self.forks)?;
        writeln!(f, "paths explored        : {}", self.paths_explored)?;
        writeln!(f, "  exited              : {}", self.terminated_exit)?;
        writeln!(f, "  early               : {}", self.terminated_early)?;
        writeln!(f, "  subsumed            : {}", self.terminated_subsumed)?;
        writeln!(f, "  errored             : {}", self.terminated_error)?;
        writeln!(f, "states culled         : {}", self.states_culled)?;
        writeln!(f, "subsumption checks    : {}", self.subsumption.checks)?;
        writeln!(f, "subsumption hits      : {}", self.subsumption.hits)?;
        writeln!(f, "interpolants stored   : {}", self.subsumption.stored)?;
        writeln!(f, "independence yes / no : {} / {}", self.independence_yes, self.independence_no)?;
        writeln!(f, "dynamic yes / no      : {} / {}", self.dynamic_yes, self.dynamic_no)?;
        writeln!(f, "speculation failures  : {}", self.spec_fail)?;
        writeln!(
            f,
            "speculation fail time : {:?}",
            self.total_spec_fail_time
        )?;
        write!(
            f,
            "solver cache hits     : cex {} / validity {} / fast {}",
            self.solver.cex_cache_hits, self.solver.validity_cache_hits, self.solver.fast_cex_hits
        )
    }
}
