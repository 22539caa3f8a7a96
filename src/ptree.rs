//! This module contains the process tree: the binary tree of forks whose
//! leaves are the live execution states.
//!
//! The tree owns its nodes in an arena; states refer to their leaf by
//! handle, and the handle's payload points back at the state. Splitting a
//! leaf turns it into an internal node with two fresh leaves; removing a
//! leaf prunes upward through childless ancestors.

use crate::state::StateId;

/// The handle of one process-tree node.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PNodeId(pub u32);

/// One node of the process tree.
#[derive(Clone, Debug, Default)]
pub struct PNode {
    /// The parent node, absent for the root.
    pub parent: Option<PNodeId>,

    /// The left child, present on internal nodes.
    pub left: Option<PNodeId>,

    /// The right child, present on internal nodes.
    pub right: Option<PNodeId>,

    /// The live state at this node; present exactly on live leaves.
    pub data: Option<StateId>,
}

/// The binary tree of forks performed during one run.
#[derive(Clone, Debug)]
pub struct ProcessTree {
    nodes: Vec<Option<PNode>>,
    free: Vec<PNodeId>,
    root: PNodeId,
}

impl ProcessTree {
    /// Constructs a tree whose root leaf holds `initial`.
    #[must_use]
    pub fn new(initial: StateId) -> Self {
        let root = PNode {
            data: Some(initial),
            ..PNode::default()
        };
        Self {
            nodes: vec![Some(root)],
            free: vec![],
            root: PNodeId(0),
        }
    }

    /// Gets the root node handle.
    #[must_use]
    pub fn root(&self) -> PNodeId {
        self.root
    }

    /// Gets the node behind `id`, if it is live.
    #[must_use]
    pub fn get(&self, id: PNodeId) -> Option<&PNode> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Gets the node behind `id` for modification, if it is live.
    pub fn get_mut(&mut self, id: PNodeId) -> Option<&mut PNode> {
        self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Checks whether `id` is a live leaf.
    #[must_use]
    pub fn is_leaf(&self, id: PNodeId) -> bool {
        self.get(id)
            .is_some_and(|n| n.left.is_none() && n.right.is_none())
    }

    /// Counts the live nodes of the tree.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Allocates a fresh node.
    fn allocate(&mut self, node: PNode) -> PNodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id.0 as usize] = Some(node);
            id
        } else {
            let id = PNodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
            self.nodes.push(Some(node));
            id
        }
    }

    /// Splits the leaf `node` into two fresh leaves holding `left_state`
    /// and `right_state`, returning their handles in that order.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not a live leaf. This is a programmer bug.
    pub fn split(
        &mut self,
        node: PNodeId,
        left_state: StateId,
        right_state: StateId,
    ) -> (PNodeId, PNodeId) {
        assert!(self.is_leaf(node), "Cannot split a non-leaf node");

        let left = self.allocate(PNode {
            parent: Some(node),
            data: Some(left_state),
            ..PNode::default()
        });
        let right = self.allocate(PNode {
            parent: Some(node),
            data: Some(right_state),
            ..PNode::default()
        });

        let parent = self.get_mut(node).expect("Leaf existence checked above");
        parent.data = None;
        parent.left = Some(left);
        parent.right = Some(right);

        (left, right)
    }

    /// Removes the leaf `node`, pruning upward through ancestors left
    /// childless by the removal.
    pub fn remove(&mut self, node: PNodeId) {
        let mut current = Some(node);

        while let Some(id) = current {
            let Some(n) = self.get(id) else { break };
            if n.left.is_some() || n.right.is_some() {
                break;
            }
            let parent = n.parent;

            self.nodes[id.0 as usize] = None;
            self.free.push(id);

            if let Some(parent_id) = parent {
                if let Some(p) = self.get_mut(parent_id) {
                    if p.left == Some(id) {
                        p.left = None;
                    }
                    if p.right == Some(id) {
                        p.right = None;
                    }
                }
            }

            current = parent;
        }
    }
}

#[cfg(test)]
mod test {
    use super::ProcessTree;
    use crate::state::StateId;

    #[test]
    fn split_replaces_leaf_payload_with_children() {
        let mut tree = ProcessTree::new(StateId(0));
        let root = tree.root();
        assert!(tree.is_leaf(root));

        let (left, right) = tree.split(root, StateId(1), StateId(2));
        assert!(!tree.is_leaf(root));
        assert_eq!(tree.get(root).unwrap().data, None);
        assert_eq!(tree.get(left).unwrap().data, Some(StateId(1)));
        assert_eq!(tree.get(right).unwrap().data, Some(StateId(2)));
    }

    #[test]
    fn removal_prunes_childless_chains() {
        let mut tree = ProcessTree::new(StateId(0));
        let root = tree.root();
        let (left, right) = tree.split(root, StateId(1), StateId(2));

        tree.remove(left);
        assert!(tree.get(left).is_none());
        assert!(tree.get(root).is_some());

        // Removing the last leaf collapses the whole chain.
        tree.remove(right);
        assert!(tree.get(right).is_none());
        assert!(tree.get(root).is_none());
        assert_eq!(tree.node_count(), 0);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut tree = ProcessTree::new(StateId(0));
        let root = tree.root();
        let (left, right) = tree.split(root, StateId(1), StateId(2));

        tree.remove(left);
        let before = tree.node_count();
        let (_, _) = tree.split(right, StateId(3), StateId(4));
        assert_eq!(tree.node_count(), before + 2);
    }
}
