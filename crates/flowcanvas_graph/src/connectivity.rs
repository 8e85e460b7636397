// SPDX-License-Identifier: MIT OR Apache-2.0
//! Loop detection for dataflow branches and control-flow links.
//!
//! All walks are iterative with a visited set, so they terminate on
//! malformed graphs and are not limited by stack depth.

use crate::graph::{ConnectionRejected, Graph};
use crate::id::{NodeId, SlotId};
use std::collections::HashSet;

impl Graph {
    /// Check whether a branch from `output` into `input` would close a
    /// dataflow loop.
    ///
    /// Data leaves a node synchronously only through calculators (every
    /// input drives every output) and reroutes (input mirrors output), so
    /// the walk continues through those and stops at host nodes.
    pub fn check_loop_data(&self, input: SlotId, output: SlotId) -> bool {
        let (Some(input), Some(output)) = (self.slots.get(&input), self.slots.get(&output)) else {
            return false;
        };
        input.owner == output.owner || self.drives(input.owner, output.owner)
    }

    /// Whether data leaving `from` reaches `target` through existing branches
    fn drives(&self, from: NodeId, target: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];

        while let Some(node_id) = stack.pop() {
            if node_id == target {
                return true;
            }
            if !visited.insert(node_id) {
                continue;
            }
            for next in self.driven_by(node_id) {
                if !visited.contains(&next) {
                    stack.push(next);
                }
            }
        }
        false
    }

    /// Nodes fed synchronously by `node_id`
    fn driven_by(&self, node_id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(&node_id).filter(|n| n.propagates()) else {
            return Vec::new();
        };
        node.outputs()
            .iter()
            .filter_map(|id| self.slots.get(id))
            .flat_map(|slot| slot.branch_ids())
            .filter_map(|id| self.branches.get(&id))
            .map(|branch| branch.dest_node)
            .collect()
    }

    /// Nodes in dataflow order: every node comes after the nodes driving it.
    ///
    /// Fails if branches form a loop, which `connect` never allows but a
    /// hand-edited document can contain.
    pub fn data_order(&self) -> Result<Vec<NodeId>, CycleError> {
        let mut done = HashSet::new();
        let mut in_progress = HashSet::new();
        let mut order = Vec::new();

        for &root in self.nodes.keys() {
            if done.contains(&root) {
                continue;
            }
            // (node, children pushed)
            let mut stack = vec![(root, false)];
            while let Some((node_id, expanded)) = stack.pop() {
                if expanded {
                    in_progress.remove(&node_id);
                    if done.insert(node_id) {
                        order.push(node_id);
                    }
                    continue;
                }
                if done.contains(&node_id) {
                    continue;
                }
                if !in_progress.insert(node_id) {
                    return Err(CycleError { node: node_id });
                }
                stack.push((node_id, true));
                for next in self.driven_by(node_id) {
                    if in_progress.contains(&next) {
                        return Err(CycleError { node: next });
                    }
                    if !done.contains(&next) {
                        stack.push((next, false));
                    }
                }
            }
        }

        order.reverse();
        Ok(order)
    }

    /// Check the whole graph for a dataflow loop
    pub fn has_data_cycle(&self) -> bool {
        self.data_order().is_err()
    }

    // ------------------------------------------------------------------
    // Control-flow tree
    // ------------------------------------------------------------------

    /// Check whether making `child` a child of `parent` would close a loop
    pub fn check_loop_tree(&self, parent: NodeId, child: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut current = Some(parent);
        while let Some(node) = current {
            if node == child {
                return true;
            }
            if !visited.insert(node) {
                // Already looping above `parent`
                return true;
            }
            current = self.parents.get(&node).copied();
        }
        false
    }

    /// Attach `child` under `parent` in the control-flow tree
    pub fn link_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ConnectionRejected> {
        for id in [parent, child] {
            if !self.nodes.contains_key(&id) {
                return Err(ConnectionRejected::NodeNotFound(id));
            }
        }
        if parent == child {
            return Err(ConnectionRejected::SelfLoop(parent));
        }
        if let Some(&existing) = self.parents.get(&child) {
            return Err(ConnectionRejected::AlreadyHasParent {
                child,
                parent: existing,
            });
        }
        if self.check_loop_tree(parent, child) {
            return Err(ConnectionRejected::WouldCreateCycle);
        }

        self.parents.insert(child, parent);
        tracing::debug!(%parent, %child, "linked child");
        Ok(())
    }

    /// Detach `child` from its parent, returning the old parent
    pub fn unlink_child(&mut self, child: NodeId) -> Option<NodeId> {
        let parent = self.parents.shift_remove(&child)?;
        tracing::debug!(%parent, %child, "unlinked child");
        Some(parent)
    }

    /// Control-flow parent of a node
    pub fn parent_of(&self, child: NodeId) -> Option<NodeId> {
        self.parents.get(&child).copied()
    }

    /// Control-flow children of a node, in link order
    pub fn children_of(&self, parent: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.parents
            .iter()
            .filter(move |(_, p)| **p == parent)
            .map(|(child, _)| *child)
    }

    /// All control-flow links as `(parent, child)` pairs
    pub fn control_links(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.parents.iter().map(|(child, parent)| (*parent, *child))
    }
}

/// Error when the graph contains a dataflow loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Graph contains a cycle through {node}")]
pub struct CycleError {
    /// A node on the loop
    pub node: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::gameplay::{create_gameplay_registry, create_type_registry};
    use crate::node::NodeRegistry;
    use std::rc::Rc;

    fn setup() -> (Graph, NodeRegistry) {
        (
            Graph::new("Connectivity", Rc::new(create_type_registry())),
            create_gameplay_registry(),
        )
    }

    fn chain(graph: &mut Graph, registry: &NodeRegistry, len: usize) -> Vec<NodeId> {
        let def = registry.get("double").unwrap();
        let nodes: Vec<NodeId> = (0..len).map(|_| graph.add_node(def)).collect();
        for pair in nodes.windows(2) {
            let output = graph.output_named(pair[0], "Result").unwrap();
            let input = graph.input_named(pair[1], "Value").unwrap();
            graph.connect(input, output).unwrap();
        }
        nodes
    }

    #[test]
    fn test_closing_a_calculator_loop_is_rejected() {
        let (mut graph, registry) = setup();
        let nodes = chain(&mut graph, &registry, 3);
        let last_out = graph.output_named(nodes[2], "Result").unwrap();
        let first_in = graph.input_named(nodes[0], "Value").unwrap();

        assert!(graph.check_loop_data(first_in, last_out));
        assert_eq!(
            graph.connect(first_in, last_out).unwrap_err(),
            ConnectionRejected::WouldCreateCycle
        );
        assert!(!graph.has_data_cycle());
    }

    #[test]
    fn test_loop_through_reroute_is_rejected() {
        let (mut graph, registry) = setup();
        let nodes = chain(&mut graph, &registry, 2);
        let branch = graph.branches().next().unwrap().id;
        let reroute = graph.insert_reroute(branch).unwrap();
        assert!(graph.node(reroute).unwrap().is_reroute());

        let last_out = graph.output_named(nodes[1], "Result").unwrap();
        let first_in = graph.input_named(nodes[0], "Value").unwrap();
        assert!(graph.check_loop_data(first_in, last_out));
    }

    #[test]
    fn test_host_node_breaks_the_loop() {
        let (mut graph, registry) = setup();
        let relay = graph.add_node(registry.get("int_relay").unwrap());
        let double = graph.add_node(registry.get("double").unwrap());

        graph
            .connect(
                graph.input_named(double, "Value").unwrap(),
                graph.output_named(relay, "Out").unwrap(),
            )
            .unwrap();
        // The host decides when its output changes, so this is not a data loop
        graph
            .connect(
                graph.input_named(relay, "In").unwrap(),
                graph.output_named(double, "Result").unwrap(),
            )
            .unwrap();
        assert!(!graph.has_data_cycle());
    }

    #[test]
    fn test_data_order_follows_branches() {
        let (mut graph, registry) = setup();
        let nodes = chain(&mut graph, &registry, 4);
        let order = graph.data_order().unwrap();
        let position = |id: NodeId| order.iter().position(|n| *n == id).unwrap();
        for pair in nodes.windows(2) {
            assert!(position(pair[0]) < position(pair[1]));
        }
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let (mut graph, registry) = setup();
        let nodes = chain(&mut graph, &registry, 3000);
        let last_out = graph.output_named(nodes[2999], "Result").unwrap();
        let first_in = graph.input_named(nodes[0], "Value").unwrap();
        assert!(graph.check_loop_data(first_in, last_out));
        assert_eq!(graph.data_order().unwrap().len(), 3000);
    }

    #[test]
    fn test_control_tree_links() {
        let (mut graph, registry) = setup();
        let def = registry.get("sequence").unwrap();
        let root = graph.add_node(def);
        let a = graph.add_node(def);
        let b = graph.add_node(def);

        graph.link_child(root, a).unwrap();
        graph.link_child(a, b).unwrap();
        assert_eq!(graph.parent_of(b), Some(a));
        assert_eq!(graph.children_of(root).collect::<Vec<_>>(), vec![a]);

        assert!(graph.check_loop_tree(b, root));
        assert_eq!(graph.link_child(b, root).unwrap_err(), ConnectionRejected::WouldCreateCycle);
        assert_eq!(graph.link_child(a, a).unwrap_err(), ConnectionRejected::SelfLoop(a));
        assert_eq!(
            graph.link_child(root, b).unwrap_err(),
            ConnectionRejected::AlreadyHasParent { child: b, parent: a }
        );

        assert_eq!(graph.unlink_child(b), Some(a));
        graph.link_child(root, b).unwrap();
        assert_eq!(graph.children_of(root).count(), 2);

        graph.remove_node(root);
        assert_eq!(graph.parent_of(a), None);
        assert_eq!(graph.parent_of(b), None);
    }
}
