//! This module contains the interpolation tree: a binary tree aligned
//! node-for-node with the process tree, recording per-node branch
//! constraints, unsat-core marks, and speculation bookkeeping.
//!
//! When a subtree finishes, meaning no live state remains under it, the marks
//! accumulated below its root condense into an interpolant that is stored
//! in the [`subsumption::SubsumptionTable`] under the root's program
//! point. A later state reaching that point whose path condition entails
//! the stored interpolant is pruned without re-exploration.

pub mod dependency;
pub mod subsumption;

pub use subsumption::{SubsumptionEntry, SubsumptionStats, SubsumptionTable};

use std::{
    cell::RefCell,
    collections::HashSet,
    fmt::{Display, Formatter},
    rc::Rc,
    time::Duration,
};

use crate::{
    expr::{ExprBuilder, ExprRef},
    ir::{InstId, ProgramPoint},
};

/// The handle of one interpolation-tree node.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct INodeId(pub u32);

/// The program points visited inside one speculation subtree, shared by
/// every node of the subtree.
pub type VisitedPoints = Rc<RefCell<HashSet<ProgramPoint>>>;

/// The wall-clock accumulator of one speculation subtree, shared by every
/// node of the subtree.
pub type SpecTime = Rc<RefCell<Duration>>;

/// One node of the interpolation tree.
#[derive(Clone, Debug, Default)]
pub struct INode {
    /// The parent node, absent for the root.
    pub parent: Option<INodeId>,

    /// The left child, present on split nodes.
    pub left: Option<INodeId>,

    /// The right child, present on split nodes.
    pub right: Option<INodeId>,

    /// The entry of the first block this node executed; the subsumption
    /// key for interpolants condensed at this node.
    pub program_point: Option<ProgramPoint>,

    /// The block the owning state was in when the node was created.
    pub basic_block: Option<ProgramPoint>,

    /// The constraints added while this node was current, with their
    /// unsat-core marks.
    pub added_constraints: Vec<(ExprRef, bool)>,

    /// Memory-bound violation literals recorded at this node.
    pub bound_records: Vec<ExprRef>,

    /// Interpolant literals condensed from finished children.
    pub collected: Vec<ExprRef>,

    /// The number of children that have not yet finished.
    pub children_live: u8,

    /// Whether this node is inside a speculation subtree.
    pub spec_flag: bool,

    /// Whether this node belongs to a rolled-back speculation subtree.
    pub spec_failed: bool,

    /// The branch instruction that opened speculation at this node, used
    /// by the custom strategy's re-speculation guard.
    pub second_check_inst: Option<InstId>,

    /// The unsat core saved when speculation was opened on the sibling
    /// side, converted into marks if the speculation fails.
    pub speculation_core: Vec<ExprRef>,

    /// The number of instructions executed while this node was current.
    pub instructions_depth: u64,

    /// The program points visited in the enclosing speculation subtree;
    /// shared by reference with the speculation root.
    pub visited_points: Option<VisitedPoints>,

    /// The wall-clock spent in the enclosing speculation subtree; shared
    /// by reference with the speculation root.
    pub spec_time: Option<SpecTime>,
}

/// The tree of explored program states.
#[derive(Clone, Debug)]
pub struct InterpolationTree {
    nodes: Vec<Option<INode>>,
    free: Vec<INodeId>,
    root: INodeId,

    /// The subsumption table fed by finished subtrees.
    pub table: SubsumptionTable,
}

impl InterpolationTree {
    /// Constructs a tree with a root node and an empty subsumption table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(INode::default())],
            free: vec![],
            root: INodeId(0),
            table: SubsumptionTable::new(),
        }
    }

    /// Gets the root node handle.
    #[must_use]
    pub fn root(&self) -> INodeId {
        self.root
    }

    /// Gets the node behind `id`, if it is live.
    #[must_use]
    pub fn get(&self, id: INodeId) -> Option<&INode> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Gets the node behind `id` for modification, if it is live.
    pub fn get_mut(&mut self, id: INodeId) -> Option<&mut INode> {
        self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Counts the live nodes of the tree.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    fn allocate(&mut self, node: INode) -> INodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id.0 as usize] = Some(node);
            id
        } else {
            let id = INodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
            self.nodes.push(Some(node));
            id
        }
    }

    /// Splits `node` into two children, returning their handles.
    ///
    /// Children created inside a speculation subtree inherit the subtree's
    /// flag and shared accumulators.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not live. This is a programmer bug.
    pub fn split(&mut self, node: INodeId, current_block: Option<ProgramPoint>) -> (INodeId, INodeId) {
        let (spec_flag, visited, spec_time) = {
            let n = self.get(node).expect("Cannot split a dead node");
            (n.spec_flag, n.visited_points.clone(), n.spec_time.clone())
        };

        let child = |parent| INode {
            parent: Some(parent),
            basic_block: current_block,
            spec_flag,
            visited_points: visited.clone(),
            spec_time: spec_time.clone(),
            ..INode::default()
        };

        let left = self.allocate(child(node));
        let right = self.allocate(child(node));

        let n = self.get_mut(node).expect("Liveness checked above");
        n.left = Some(left);
        n.right = Some(right);
        n.children_live = 2;

        (left, right)
    }

    /// Synchronises `node` with the state that is about to step: the first
    /// block a node executes becomes its program point, and the visit is
    /// recorded in the enclosing speculation subtree, if any.
    ///
    /// Returns `true` when the point had already been visited inside the
    /// speculation subtree, which the controller treats as non-progress.
    pub fn set_current(&mut self, node: INodeId, point: ProgramPoint) -> bool {
        let Some(n) = self.get_mut(node) else {
            return false;
        };

        if n.program_point.is_none() {
            n.program_point = Some(point);
        }

        if let Some(visited) = &n.visited_points {
            if n.spec_flag {
                return !visited.borrow_mut().insert(point);
            }
        }

        false
    }

    /// Records a constraint added while `node` was current.
    pub fn add_constraint(&mut self, node: INodeId, constraint: ExprRef) {
        if let Some(n) = self.get_mut(node) {
            n.added_constraints.push((constraint, false));
        }
    }

    /// Increments the instruction depth of `node`.
    pub fn step(&mut self, node: INodeId) {
        if let Some(n) = self.get_mut(node) {
            n.instructions_depth += 1;
        }
    }

    /// Marks, along the ancestor chain of `node`, every added constraint
    /// named by the unsat `core`, so that only those literals reach the
    /// interpolant condensed for the enclosing subtree.
    pub fn mark_path_condition(&mut self, node: INodeId, core: &[ExprRef]) {
        let core_ptrs: HashSet<usize> =
            core.iter().map(|e| Rc::as_ptr(e) as usize).collect();

        let mut current = Some(node);
        while let Some(id) = current {
            let Some(n) = self.get_mut(id) else { break };
            for (constraint, marked) in &mut n.added_constraints {
                // Pointer identity is the common case under hash-consing;
                // structural equality catches literals the equality
                // substitution has since rewritten.
                if core_ptrs.contains(&(Rc::as_ptr(constraint) as usize))
                    || core.iter().any(|c| c == constraint)
                {
                    *marked = true;
                }
            }
            current = n.parent;
        }
    }

    /// Records a memory-bound violation literal at `node`, so that later
    /// states reaching the node's point with a narrower address range can
    /// be subsumed.
    pub fn record_memory_bound(&mut self, node: INodeId, violation: ExprRef) {
        if let Some(n) = self.get_mut(node) {
            n.bound_records.push(violation);
        }
    }

    /// Saves the unsat core observed when speculation was opened at
    /// `node`, together with the branch instruction, for conversion into
    /// marks if the speculation later fails.
    pub fn store_speculation_core(&mut self, node: INodeId, core: Vec<ExprRef>, inst: InstId) {
        if let Some(n) = self.get_mut(node) {
            n.speculation_core = core;
            n.second_check_inst = Some(inst);
        }
    }

    /// Checks whether `node` is inside a speculation subtree.
    #[must_use]
    pub fn is_speculation_node(&self, node: INodeId) -> bool {
        self.get(node).is_some_and(|n| n.spec_flag)
    }

    /// Finishes the leaf `node` after its state terminated, condensing
    /// marks into interpolants and storing them under each finished node's
    /// program point.
    ///
    /// `store` is false for terminations whose subtree proves nothing
    /// (internal errors, replay divergence), in which case the subtree
    /// completes without feeding the table. `store_weakest` additionally
    /// permits entries with no marked literals: the weakest condition a
    /// fully completed subtree justifies. Without it, only entries deduced
    /// from unsat cores or memory-bound violations are stored.
    pub fn finish_leaf(
        &mut self,
        builder: &ExprBuilder,
        node: INodeId,
        store: bool,
        store_weakest: bool,
        no_existential: bool,
    ) {
        let mut current = Some(node);

        while let Some(id) = current {
            let Some(n) = self.get_mut(id) else { break };

            // The interpolant at this node: finished children's literals,
            // the locally added constraints that were marked, and any
            // memory-bound records.
            let mut literals = std::mem::take(&mut n.collected);
            for (constraint, marked) in &n.added_constraints {
                if *marked {
                    literals.push(constraint.clone());
                }
            }
            literals.extend(n.bound_records.iter().cloned());

            let point = n.program_point;
            let failed = n.spec_failed;
            let speculative = n.spec_flag;
            let parent = n.parent;

            if store && !failed && !speculative && (store_weakest || !literals.is_empty()) {
                if let Some(point) = point {
                    self.table.store(builder, point, literals.clone(), no_existential);
                }
            }

            // Free the node and hand its literals to the parent.
            self.nodes[id.0 as usize] = None;
            self.free.push(id);

            let Some(parent_id) = parent else { break };
            let Some(p) = self.get_mut(parent_id) else { break };
            if p.left == Some(id) {
                p.left = None;
            }
            if p.right == Some(id) {
                p.right = None;
            }
            p.children_live = p.children_live.saturating_sub(1);

            if store {
                p.collected.extend(literals.iter().cloned());
            }

            if p.children_live > 0 {
                break;
            }

            current = Some(parent_id);
        }
    }

    /// Collects every node of the subtree rooted at `root`, marking each
    /// as a failed speculation node.
    pub fn collect_speculation_nodes(&mut self, root: INodeId) -> Vec<INodeId> {
        let mut result = Vec::new();
        let mut stack = vec![root];

        while let Some(id) = stack.pop() {
            let Some(n) = self.get_mut(id) else { continue };
            n.spec_failed = true;
            if let Some(left) = n.left {
                stack.push(left);
            }
            if let Some(right) = n.right {
                stack.push(right);
            }
            result.push(id);
        }

        result
    }

    /// Removes a failed speculation subtree without storing interpolants,
    /// detaching it from its parent.
    pub fn remove_failed_subtree(&mut self, root: INodeId) {
        let parent = self.get(root).and_then(|n| n.parent);

        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(n) = self.get(id) else { continue };
            if let Some(left) = n.left {
                stack.push(left);
            }
            if let Some(right) = n.right {
                stack.push(right);
            }
            self.nodes[id.0 as usize] = None;
            self.free.push(id);
        }

        if let Some(parent_id) = parent {
            if let Some(p) = self.get_mut(parent_id) {
                if p.left == Some(root) {
                    p.left = None;
                }
                if p.right == Some(root) {
                    p.right = None;
                }
                p.children_live = p.children_live.saturating_sub(1);
            }
        }
    }

    /// Walks upward from `node` to the topmost node carrying the
    /// speculation flag: the root of the enclosing speculation subtree.
    #[must_use]
    pub fn speculation_root(&self, node: INodeId) -> INodeId {
        let mut current = node;
        loop {
            let Some(n) = self.get(current) else {
                return current;
            };
            let Some(parent) = n.parent else {
                return current;
            };
            if self.get(parent).is_some_and(|p| p.spec_flag) {
                current = parent;
            } else {
                return current;
            }
        }
    }
}

impl Default for InterpolationTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders the live tree in DOT format for offline inspection.
impl Display for InterpolationTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "digraph interpolation_tree {{")?;
        for (index, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            let label = match node.program_point {
                Some(point) => format!("{point}"),
                None => "?".into(),
            };
            let shape = if node.spec_flag { "diamond" } else { "box" };
            writeln!(f, "  n{index} [label=\"{label}\", shape={shape}];")?;
            if let Some(left) = node.left {
                writeln!(f, "  n{index} -> n{};", left.0)?;
            }
            if let Some(right) = node.right {
                writeln!(f, "  n{index} -> n{};", right.0)?;
            }
        }
        writeln!(f, "}}")
    }
}
