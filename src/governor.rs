//! This module contains the resource governor: wall-clock tracking, the
//! instruction quota, and the periodic memory sampling that drives state
//! culling.

use std::time::{Duration, Instant};

use crate::constant::{MEMORY_CHECK_INTERVAL_INSTRUCTIONS, MEMORY_CULL_FRACTION};

/// What the governor asks the engine to do after a memory sample.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemoryAction {
    /// Nothing to do.
    Proceed,

    /// The soft limit is reached: stop forking, keep stepping.
    InhibitForks,

    /// The hard limit is exceeded: terminate this many states.
    Cull(usize),
}

/// The per-run resource governor.
#[derive(Clone, Debug)]
pub struct ResourceGovernor {
    started: Instant,
    max_memory_mb: usize,
    max_memory_inhibit: bool,

    /// Whether the most recent sample was above the soft limit; forks are
    /// inhibited while this holds.
    pub at_memory_limit: bool,
}

impl ResourceGovernor {
    /// Constructs a governor for a run starting now.
    #[must_use]
    pub fn new(max_memory_mb: usize, max_memory_inhibit: bool) -> Self {
        Self {
            started: Instant::now(),
            max_memory_mb,
            max_memory_inhibit,
            at_memory_limit: false,
        }
    }

    /// Gets the wall-clock elapsed since the run started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Checks whether the instruction counter has reached a sampling
    /// point.
    #[must_use]
    pub fn should_sample(&self, instructions: u64) -> bool {
        instructions > 0 && instructions % MEMORY_CHECK_INTERVAL_INSTRUCTIONS == 0
    }

    /// Judges a memory sample of `footprint_bytes` across `live_states`.
    ///
    /// Above the cap the governor asks for forks to stop (when inhibition
    /// is enabled); more than ten percent beyond it, states are culled
    /// until the projection falls back under.
    pub fn memory_action(&mut self, footprint_bytes: u64, live_states: usize) -> MemoryAction {
        let cap_bytes = (self.max_memory_mb as u64) * 1024 * 1024;
        let over_soft = footprint_bytes > cap_bytes;
        let over_hard = footprint_bytes > cap_bytes + cap_bytes / 10;

        self.at_memory_limit = over_soft && self.max_memory_inhibit;

        if over_hard && live_states > 1 {
            let cull = ((live_states as f64) * MEMORY_CULL_FRACTION).ceil() as usize;
            MemoryAction::Cull(cull.clamp(1, live_states - 1))
        } else if over_soft && self.max_memory_inhibit {
            MemoryAction::InhibitForks
        } else {
            MemoryAction::Proceed
        }
    }
}

#[cfg(test)]
mod test {
    use super::{MemoryAction, ResourceGovernor};

    #[test]
    fn below_cap_proceeds() {
        let mut governor = ResourceGovernor::new(10, true);
        assert_eq!(governor.memory_action(1024, 4), MemoryAction::Proceed);
        assert!(!governor.at_memory_limit);
    }

    #[test]
    fn above_cap_inhibits_forks() {
        let mut governor = ResourceGovernor::new(1, true);
        let just_over = 1024 * 1024 + 1;
        assert_eq!(
            governor.memory_action(just_over, 4),
            MemoryAction::InhibitForks
        );
        assert!(governor.at_memory_limit);
    }

    #[test]
    fn far_above_cap_culls_states() {
        let mut governor = ResourceGovernor::new(1, true);
        let far_over = 2 * 1024 * 1024;
        match governor.memory_action(far_over, 8) {
            MemoryAction::Cull(n) => assert!(n >= 1 && n < 8),
            other => panic!("Expected culling, got {other:?}"),
        }
    }

    #[test]
    fn sampling_follows_the_instruction_interval() {
        let governor = ResourceGovernor::new(1, true);
        assert!(!governor.should_sample(0));
        assert!(!governor.should_sample(1));
        assert!(governor.should_sample(65536));
        assert!(governor.should_sample(131072));
    }
}
