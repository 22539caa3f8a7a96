//! This module contains the searcher: the pluggable policy that picks
//! which live state steps next.
//!
//! The searcher is the single component that decides exploration order;
//! the executor mutates it in exactly one place, the end-of-iteration
//! state reconciliation.

use std::{collections::VecDeque, fmt::Debug};

use rand::Rng;
use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};

use crate::state::StateId;

/// The selection policies the engine can be configured with.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SearchPolicy {
    /// Always step the most recently created state.
    #[default]
    DepthFirst,

    /// Step states in round-robin creation order.
    BreadthFirst,

    /// Step a uniformly random live state.
    RandomState,
}

/// The interface of a state-selection policy.
pub trait Searcher
where
    Self: Debug,
{
    /// Picks the state to step next, without removing it.
    fn select_state(&mut self) -> Option<StateId>;

    /// Reconciles the searcher's view with the engine's: `added` states
    /// enter the frontier, `removed` states leave it.
    fn update(&mut self, added: &[StateId], removed: &[StateId]);

    /// Checks whether the frontier is empty.
    fn is_empty(&self) -> bool;
}

/// The type of a boxed searcher.
pub type DynSearcher = Box<dyn Searcher>;

/// Constructs the searcher implementing `policy`.
#[must_use]
pub fn construct_searcher(policy: SearchPolicy, rng_seed: u64) -> DynSearcher {
    match policy {
        SearchPolicy::DepthFirst => Box::new(DepthFirstSearcher::new()),
        SearchPolicy::BreadthFirst => Box::new(BreadthFirstSearcher::new()),
        SearchPolicy::RandomState => Box::new(RandomStateSearcher::new(rng_seed)),
    }
}

/// A searcher that always steps the most recently created state.
#[derive(Clone, Debug, Default)]
pub struct DepthFirstSearcher {
    states: Vec<StateId>,
}

impl DepthFirstSearcher {
    /// Constructs an empty depth-first searcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Searcher for DepthFirstSearcher {
    fn select_state(&mut self) -> Option<StateId> {
        self.states.last().copied()
    }

    fn update(&mut self, added: &[StateId], removed: &[StateId]) {
        self.states.extend_from_slice(added);
        self.states.retain(|id| !removed.contains(id));
    }

    fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// A searcher that steps states in round-robin order.
#[derive(Clone, Debug, Default)]
pub struct BreadthFirstSearcher {
    states: VecDeque<StateId>,
}

impl BreadthFirstSearcher {
    /// Constructs an empty breadth-first searcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Searcher for BreadthFirstSearcher {
    fn select_state(&mut self) -> Option<StateId> {
        // Rotate so that repeated selections cycle through the frontier.
        let front = self.states.pop_front()?;
        self.states.push_back(front);
        Some(front)
    }

    fn update(&mut self, added: &[StateId], removed: &[StateId]) {
        self.states.extend(added.iter().copied());
        self.states.retain(|id| !removed.contains(id));
    }

    fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// A searcher that steps a uniformly random live state, deterministically
/// under a fixed seed.
#[derive(Clone, Debug)]
pub struct RandomStateSearcher {
    states: Vec<StateId>,
    rng: ChaCha8Rng,
}

impl RandomStateSearcher {
    /// Constructs an empty random-state searcher seeded with `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            states: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Searcher for RandomStateSearcher {
    fn select_state(&mut self) -> Option<StateId> {
        if self.states.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..self.states.len());
        self.states.get(index).copied()
    }

    fn update(&mut self, added: &[StateId], removed: &[StateId]) {
        self.states.extend_from_slice(added);
        self.states.retain(|id| !removed.contains(id));
    }

    fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::{
        BreadthFirstSearcher,
        DepthFirstSearcher,
        RandomStateSearcher,
        Searcher,
    };
    use crate::state::StateId;

    #[test]
    fn depth_first_prefers_newest() {
        let mut searcher = DepthFirstSearcher::new();
        searcher.update(&[StateId(0), StateId(1), StateId(2)], &[]);

        assert_eq!(searcher.select_state(), Some(StateId(2)));
        searcher.update(&[], &[StateId(2)]);
        assert_eq!(searcher.select_state(), Some(StateId(1)));
    }

    #[test]
    fn breadth_first_cycles() {
        let mut searcher = BreadthFirstSearcher::new();
        searcher.update(&[StateId(0), StateId(1)], &[]);

        assert_eq!(searcher.select_state(), Some(StateId(0)));
        assert_eq!(searcher.select_state(), Some(StateId(1)));
        assert_eq!(searcher.select_state(), Some(StateId(0)));
    }

    #[test]
    fn random_state_is_deterministic_under_a_seed() {
        let mut left = RandomStateSearcher::new(11);
        let mut right = RandomStateSearcher::new(11);
        let ids: Vec<_> = (0..10).map(StateId).collect();
        left.update(&ids, &[]);
        right.update(&ids, &[]);

        for _ in 0..20 {
            assert_eq!(left.select_state(), right.select_state());
        }
    }

    #[test]
    fn removal_empties_the_frontier() {
        let mut searcher = DepthFirstSearcher::new();
        searcher.update(&[StateId(7)], &[]);
        searcher.update(&[], &[StateId(7)]);
        assert!(searcher.is_empty());
        assert_eq!(searcher.select_state(), None);
    }
}
