//! This module contains the per-path execution state: everything one
//! explored path owns, and the copy-on-write fork operation that makes
//! path explosion affordable.

pub mod frame;

pub use frame::{CallFrame, CallStack};

use std::collections::HashSet;

use crate::{
    constraints::ConstraintSet,
    expr::ArrayRef,
    interpolation::INodeId,
    ir::{InstId, ProgramPoint},
    memory::{AddressSpace, MemoryObjectRef},
    ptree::PNodeId,
};

/// The identity of one execution state, stable for the engine's lifetime.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StateId(pub u64);

/// One explored path: program position, call stack, memory, and the path
/// condition, together with the bookkeeping the engine keeps per path.
#[derive(Clone, Debug)]
pub struct ExecutionState {
    /// The identity of the state.
    pub id: StateId,

    /// The instruction about to execute.
    pub pc: InstId,

    /// The most recently executed instruction.
    pub prev_pc: InstId,

    /// The call stack.
    pub stack: CallStack,

    /// The memory of this path.
    pub address_space: AddressSpace,

    /// The path condition.
    pub constraints: ConstraintSet,

    /// The symbolic inputs created along this path, in creation order; each
    /// pairs the object made symbolic with its backing array. Test cases
    /// are assignments to exactly these arrays.
    pub symbolics: Vec<(MemoryObjectRef, ArrayRef)>,

    /// Whether this path covered a block no other path had covered at the
    /// time.
    pub covered_new: bool,

    /// The program points this path has entered.
    pub covered_points: HashSet<ProgramPoint>,

    /// Whether forking is disabled on this path.
    pub fork_disabled: bool,

    /// The number of branch constraints added along this path.
    pub depth: u64,

    /// The branch directions taken at forks, recorded for replay output.
    pub branch_history: Vec<bool>,

    /// The number of instructions this state has executed.
    pub steps: u64,

    /// The process-tree leaf owning this state.
    pub ptree_node: PNodeId,

    /// The interpolation-tree node of this state; absent when interpolation
    /// is disabled.
    pub itree_node: Option<INodeId>,
}

impl ExecutionState {
    /// Constructs the initial state of a run, positioned at `entry`.
    #[must_use]
    pub fn new(id: StateId, entry: InstId, ptree_node: PNodeId) -> Self {
        Self {
            id,
            pc: entry,
            prev_pc: entry,
            stack: CallStack::new(),
            address_space: AddressSpace::new(),
            constraints: ConstraintSet::new(),
            symbolics: Vec::new(),
            covered_new: false,
            covered_points: HashSet::new(),
            fork_disabled: false,
            depth: 0,
            branch_history: Vec::new(),
            steps: 0,
            ptree_node,
            itree_node: None,
        }
    }

    /// Produces the fork sibling of this state under the identity `id`.
    ///
    /// The sibling is a deep-equal copy: the address space shares object
    /// states copy-on-write, constraints share their interned expressions,
    /// and the stack is cloned. Tree handles are _not_ copied; the caller
    /// attaches the sibling to both trees.
    #[must_use]
    pub fn branch(&self, id: StateId) -> Self {
        let mut sibling = self.clone();
        sibling.id = id;
        sibling.covered_new = false;
        sibling
    }

    /// Gets the program point of the block containing the current pc, as
    /// recorded by `module`.
    #[must_use]
    pub fn current_point(&self, module: &crate::ir::Module) -> Option<ProgramPoint> {
        module.point_of(self.pc)
    }
}

#[cfg(test)]
mod test {
    use super::{ExecutionState, StateId};
    use crate::{
        ir::{FunctionId, InstId},
        ptree::PNodeId,
    };

    fn entry() -> InstId {
        InstId {
            function: FunctionId(0),
            index: 0,
        }
    }

    #[test]
    fn forked_siblings_have_independent_identity() {
        let state = ExecutionState::new(StateId(0), entry(), PNodeId(0));
        let sibling = state.branch(StateId(1));

        assert_eq!(sibling.pc, state.pc);
        assert_ne!(sibling.id, state.id);
        assert!(!sibling.covered_new);
    }

    #[test]
    fn fork_copies_constraints_by_value() {
        let state = ExecutionState::new(StateId(0), entry(), PNodeId(0));
        let sibling = state.branch(StateId(1));
        assert_eq!(sibling.constraints.len(), state.constraints.len());
    }
}
