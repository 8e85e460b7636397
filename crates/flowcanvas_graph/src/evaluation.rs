// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph evaluation.
//!
//! Writes push values onto every branch of an output, relaying through
//! reroutes and dirtying calculators downstream. Reads pull: the branch
//! feeding an input is resolved, a dirty calculator upstream is recomputed
//! first, and reroutes are followed to the branch that actually carries the
//! value. Calculators only recompute after something upstream changed.

use crate::branch::{Route, Timestamp};
use crate::diagnostics::{Diagnostic, GraphEvent};
use crate::graph::Graph;
use crate::id::{BranchId, NodeId, SlotId};
use crate::node::NodeKind;
use crate::slot::Slot;
use crate::types::TypeId;
use crate::value::{DynValue, FromValue};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// State of the outermost `pull` in progress.
///
/// Every calculator planned by any walk during the pass is claimed. A claimed
/// calculator is recomputed at most once per pass and is not dirtied again
/// until the pass ends, so loops in a loaded graph settle after one round.
#[derive(Debug, Default)]
pub(crate) struct EvaluationPass {
    depth: usize,
    claimed: HashSet<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl Graph {
    /// Advance the frame clock. Call once per frame.
    pub fn tick(&mut self) -> Timestamp {
        self.clock.frame += 1;
        self.clock
    }

    /// Current logical time
    pub fn now(&self) -> Timestamp {
        self.clock
    }

    fn stamp(&mut self) -> Timestamp {
        self.clock.sequence += 1;
        self.clock
    }

    /// Write a value to every branch leaving `output`.
    ///
    /// Returns the number of branches on `output` that were updated.
    pub fn write(&mut self, output: SlotId, value: DynValue) -> usize {
        self.broadcast(output, Some(value))
    }

    /// Clear the value on every branch leaving `output`
    pub fn clear(&mut self, output: SlotId) -> usize {
        self.broadcast(output, None)
    }

    fn broadcast(&mut self, output: SlotId, value: Option<DynValue>) -> usize {
        if !self.slots.get(&output).is_some_and(Slot::is_output) {
            tracing::trace!(%output, "write ignored: not an output");
            return 0;
        }

        let at = self.stamp();
        let mut written = 0;
        let mut visited = HashSet::new();
        let mut pending = vec![output];

        while let Some(slot_id) = pending.pop() {
            if !visited.insert(slot_id) {
                continue;
            }
            let ids = self
                .slots
                .get(&slot_id)
                .map(Slot::branch_ids)
                .unwrap_or_default();

            for id in ids {
                let Some((_, dest)) = self.endpoints(id) else {
                    continue;
                };
                if let Some(branch) = self.branches.get_mut(&id) {
                    branch.mirror(value.clone(), at);
                }
                if slot_id == output {
                    written += 1;
                }

                let Some(dest_node) = self.slots.get(&dest).map(|s| s.owner) else {
                    continue;
                };
                match self.node_route(dest_node) {
                    Route::ThroughReroute(node) => {
                        if let Some(reroute) = self.reroute(node) {
                            pending.push(reroute.output);
                        }
                    }
                    Route::ThroughCalculator(node) => self.invalidate_from(node),
                    Route::Direct => {}
                }
            }
            self.emit(GraphEvent::StateChanged { slot: slot_id, at });
        }

        tracing::trace!(%output, branches = written, "wrote output");
        written
    }

    /// Read the value arriving at `input`.
    ///
    /// Returns `None` if the input is unconnected or nothing upstream has a
    /// value.
    pub fn read(&mut self, input: SlotId) -> Option<DynValue> {
        let branch = self.slots.get(&input).filter(|s| s.is_input())?.branch()?;
        self.read_branch(branch)
    }

    /// Read `input`, falling back to the slot's default value
    pub fn read_or_default(&mut self, input: SlotId) -> Option<DynValue> {
        self.read(input).or_else(|| {
            self.slots
                .get(&input)
                .and_then(|s| s.default_value.clone())
        })
    }

    /// Read `input` converted to `target`. An impossible conversion yields
    /// `None`.
    pub fn read_as(&mut self, input: SlotId, target: &TypeId) -> Option<DynValue> {
        let value = self.read(input)?;
        let cast = value.cast(target, &self.types);
        if cast.is_none() {
            tracing::trace!(%input, from = %value.type_id(), to = %target, "invalid cast on read");
        }
        cast
    }

    /// Read `input` as a Rust value
    pub fn read_typed<T: FromValue>(&mut self, input: SlotId) -> Option<T> {
        let value = self.read_as(input, &TypeId::new(T::TYPE_NAME))?;
        T::from_value(&value)
    }

    /// Follow `first` upstream through reroutes to the branch carrying the
    /// value, recomputing a calculator source if needed.
    fn read_branch(&mut self, first: BranchId) -> Option<DynValue> {
        let mut hops: Vec<BranchId> = Vec::new();
        let mut visited = HashSet::new();
        let mut current = first;

        let carried = loop {
            if !visited.insert(current) {
                let node = self.branches.get(&current).map(|b| b.source_node);
                if let Some(node) = node {
                    self.report(Diagnostic::CyclicEvaluation { node });
                }
                break None;
            }
            let (source, _) = self.endpoints(current)?;

            match self.route_of(source) {
                Route::Direct => break Some(current),
                Route::ThroughCalculator(node) => {
                    self.pull(node);
                    break Some(current);
                }
                Route::ThroughReroute(node) => {
                    hops.push(current);
                    let upstream = self
                        .reroute(node)
                        .and_then(|r| self.slots.get(&r.input))
                        .and_then(Slot::branch);
                    match upstream {
                        Some(next) => current = next,
                        None => break None,
                    }
                }
            }
        };

        let (value, at) = match carried.and_then(|id| self.branches.get(&id)) {
            Some(branch) => (branch.cached_value.clone(), branch.updated_at),
            None => (None, self.clock),
        };
        for id in hops {
            if let Some(branch) = self.branches.get_mut(&id) {
                branch.mirror(value.clone(), at);
            }
        }
        value
    }

    /// Bring a calculator and every dirty calculator it depends on up to date
    pub(crate) fn pull(&mut self, target: NodeId) {
        self.pass.depth += 1;
        for node in self.evaluation_order(target) {
            self.recompute(node);
        }
        self.pass.depth -= 1;
        if self.pass.depth == 0 {
            self.pass.claimed.clear();
        }
    }

    fn is_dirty(&self, node_id: NodeId) -> bool {
        matches!(
            self.nodes.get(&node_id).map(|n| &n.kind),
            Some(NodeKind::Calculator(calc)) if calc.dirty
        )
    }

    /// Dirty calculators `target` needs, dependencies first.
    ///
    /// Iterative post-order walk; a dependency reached again while still on
    /// the walk, or claimed earlier in the pass and still dirty, closes a loop
    /// and is recorded instead of followed.
    fn evaluation_order(&mut self, target: NodeId) -> Vec<NodeId> {
        if !self.is_dirty(target) {
            return Vec::new();
        }
        if self.pass.claimed.contains(&target) {
            self.report(Diagnostic::CyclicEvaluation { node: target });
            return Vec::new();
        }

        let mut marks: HashMap<NodeId, Mark> = HashMap::new();
        let mut order = Vec::new();
        let mut stack = vec![(target, false)];

        while let Some((node_id, expanded)) = stack.pop() {
            if expanded {
                marks.insert(node_id, Mark::Done);
                order.push(node_id);
                continue;
            }
            if marks.contains_key(&node_id) {
                continue;
            }
            marks.insert(node_id, Mark::Visiting);
            self.pass.claimed.insert(node_id);
            stack.push((node_id, true));

            for dependency in self.upstream_calculators(node_id) {
                let closes_loop = match marks.get(&dependency) {
                    Some(Mark::Visiting) => true,
                    Some(Mark::Done) => false,
                    None if self.pass.claimed.contains(&dependency) => self.is_dirty(dependency),
                    None => {
                        if self.is_dirty(dependency) {
                            stack.push((dependency, false));
                        }
                        false
                    }
                };
                if closes_loop {
                    tracing::warn!(node = %dependency, "cyclic dependency during evaluation");
                    self.report(Diagnostic::CyclicEvaluation { node: dependency });
                }
            }
        }
        order
    }

    /// Calculators feeding `node_id`'s inputs, seen through reroutes
    fn upstream_calculators(&mut self, node_id: NodeId) -> Vec<NodeId> {
        let inputs = self
            .nodes
            .get(&node_id)
            .map(|n| n.inputs().to_vec())
            .unwrap_or_default();

        let mut found = Vec::new();
        for input in inputs {
            let mut current = self.slots.get(&input).and_then(Slot::branch);
            let mut hops = HashSet::new();
            while let Some(branch) = current {
                if !hops.insert(branch) {
                    break;
                }
                let Some((source, _)) = self.endpoints(branch) else {
                    break;
                };
                current = match self.route_of(source) {
                    Route::ThroughCalculator(node) => {
                        found.push(node);
                        None
                    }
                    Route::ThroughReroute(node) => self
                        .reroute(node)
                        .and_then(|r| self.slots.get(&r.input))
                        .and_then(Slot::branch),
                    Route::Direct => None,
                };
            }
        }
        found
    }

    fn recompute(&mut self, node_id: NodeId) {
        let Some(NodeKind::Calculator(calc)) = self.nodes.get_mut(&node_id).map(|n| &mut n.kind) else {
            return;
        };
        if !calc.dirty {
            return;
        }
        // Clean before reading so a loop back into this node stops here
        calc.dirty = false;
        let inputs = calc.inputs.clone();
        let outputs = calc.outputs.clone();
        let calculation = Rc::clone(&calc.calculation);

        let values: Vec<Option<DynValue>> = inputs
            .iter()
            .map(|&input| self.calculator_input(input))
            .collect();
        let mut results = calculation.compute(&values).into_iter();
        tracing::trace!(node = %node_id, "recomputed calculator");

        for output in outputs {
            match results.next().flatten() {
                Some(value) => self.write(output, value),
                None => self.clear(output),
            };
        }
    }

    /// Input value as the calculator expects it: the slot default when
    /// unconnected, converted to the declared type
    fn calculator_input(&mut self, input: SlotId) -> Option<DynValue> {
        let value = self.read_or_default(input)?;
        match self.slots.get(&input).and_then(|s| s.declared_type.clone()) {
            Some(declared) => value.cast(&declared, &self.types),
            None => Some(value),
        }
    }

    /// Mark `start` and every calculator downstream of it dirty.
    ///
    /// Calculators claimed by the evaluation pass in progress are left alone.
    pub(crate) fn invalidate_from(&mut self, start: NodeId) {
        let mut visited = HashSet::new();
        let mut pending = vec![start];

        while let Some(node_id) = pending.pop() {
            if !visited.insert(node_id) || self.pass.claimed.contains(&node_id) {
                continue;
            }
            let Some(node) = self.nodes.get_mut(&node_id) else {
                continue;
            };
            match &mut node.kind {
                NodeKind::Calculator(calc) => {
                    // Everything below an already dirty calculator is dirty too
                    if calc.dirty && node_id != start {
                        continue;
                    }
                    calc.dirty = true;
                }
                NodeKind::Reroute(_) => {}
                NodeKind::Host(_) => continue,
            }

            for output in node.outputs() {
                let Some(slot) = self.slots.get(output) else {
                    continue;
                };
                for id in slot.branch_ids() {
                    if let Some(branch) = self.branches.get(&id) {
                        pending.push(branch.dest_node);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::gameplay::{create_gameplay_registry, create_type_registry};
    use crate::node::NodeRegistry;

    fn setup() -> (Graph, NodeRegistry) {
        (
            Graph::new("Evaluation", Rc::new(create_type_registry())),
            create_gameplay_registry(),
        )
    }

    fn add(graph: &mut Graph, registry: &NodeRegistry, type_id: &str) -> NodeId {
        graph.add_node(registry.get(type_id).unwrap())
    }

    fn link(graph: &mut Graph, from: (NodeId, &str), to: (NodeId, &str)) -> BranchId {
        let output = graph.output_named(from.0, from.1).unwrap();
        let input = graph.input_named(to.0, to.1).unwrap();
        graph.connect(input, output).unwrap()
    }

    #[test]
    fn test_write_updates_every_branch() {
        let (mut graph, registry) = setup();
        let source = add(&mut graph, &registry, "int_variable");
        let sinks: Vec<NodeId> = (0..4).map(|_| add(&mut graph, &registry, "set_health")).collect();
        let branches: Vec<BranchId> = sinks
            .iter()
            .map(|&sink| link(&mut graph, (source, "Value"), (sink, "Amount")))
            .collect();

        graph.tick();
        let output = graph.output_named(source, "Value").unwrap();
        assert_eq!(graph.write(output, DynValue::Int(7)), 4);

        let now = graph.now();
        for id in branches {
            let branch = graph.branch(id).unwrap();
            assert!(branch.is_used());
            assert_eq!(branch.cached_value(), Some(&DynValue::Int(7)));
            assert_eq!(branch.updated_at(), now);
        }
    }

    #[test]
    fn test_calculator_is_memoized() {
        let (mut graph, registry) = setup();
        let source = add(&mut graph, &registry, "int_variable");
        let double = add(&mut graph, &registry, "double");
        let sink = add(&mut graph, &registry, "set_health");
        link(&mut graph, (source, "Value"), (double, "Value"));
        link(&mut graph, (double, "Result"), (sink, "Amount"));

        let output = graph.output_named(source, "Value").unwrap();
        let input = graph.input_named(sink, "Amount").unwrap();
        graph.write(output, DynValue::Int(5));
        assert_eq!(graph.read(input), Some(DynValue::Int(10)));

        let before = graph.now();
        assert_eq!(graph.read(input), Some(DynValue::Int(10)));
        // No recompute: nothing was written
        assert_eq!(graph.now(), before);

        graph.write(output, DynValue::Int(-2));
        assert_eq!(graph.read_typed::<i64>(input), Some(-4));
    }

    #[test]
    fn test_unconnected_calculator_input_uses_default() {
        let (mut graph, registry) = setup();
        let add_node = add(&mut graph, &registry, "add");
        let source = add(&mut graph, &registry, "float_variable");
        let sink = add(&mut graph, &registry, "log_value");
        link(&mut graph, (source, "Value"), (add_node, "A"));
        link(&mut graph, (add_node, "Sum"), (sink, "Value"));

        graph.write(graph.output_named(source, "Value").unwrap(), DynValue::Float(1.5));
        let input = graph.input_named(sink, "Value").unwrap();
        assert_eq!(graph.read(input), Some(DynValue::Float(1.5)));
    }

    #[test]
    fn test_read_as_converts_or_yields_none() {
        let (mut graph, registry) = setup();
        let source = add(&mut graph, &registry, "int_variable");
        let sink = add(&mut graph, &registry, "log_value");
        link(&mut graph, (source, "Value"), (sink, "Value"));
        graph.write(graph.output_named(source, "Value").unwrap(), DynValue::Int(3));

        let input = graph.input_named(sink, "Value").unwrap();
        assert_eq!(graph.read_as(input, &"float".into()), Some(DynValue::Float(3.0)));
        assert_eq!(graph.read_as(input, &"string".into()), None);
        assert_eq!(graph.read_typed::<String>(input), None);
    }

    #[test]
    fn test_reroute_is_transparent() {
        let (mut graph, registry) = setup();
        let source = add(&mut graph, &registry, "int_variable");
        let sink = add(&mut graph, &registry, "set_health");
        let branch = link(&mut graph, (source, "Value"), (sink, "Amount"));
        let input = graph.input_named(sink, "Amount").unwrap();
        let output = graph.output_named(source, "Value").unwrap();

        graph.write(output, DynValue::Int(9));
        graph.insert_reroute(branch).unwrap();
        assert_eq!(graph.read(input), Some(DynValue::Int(9)));

        graph.write(output, DynValue::Int(4));
        assert_eq!(graph.read(input), Some(DynValue::Int(4)));

        graph.clear(output);
        assert_eq!(graph.read(input), None);
    }

    #[test]
    fn test_new_branch_sees_latest_value() {
        let (mut graph, registry) = setup();
        let source = add(&mut graph, &registry, "int_variable");
        let first = add(&mut graph, &registry, "set_health");
        let second = add(&mut graph, &registry, "set_health");
        link(&mut graph, (source, "Value"), (first, "Amount"));
        graph.write(graph.output_named(source, "Value").unwrap(), DynValue::Int(12));

        link(&mut graph, (source, "Value"), (second, "Amount"));
        let input = graph.input_named(second, "Amount").unwrap();
        assert_eq!(graph.read(input), Some(DynValue::Int(12)));
    }

    #[test]
    fn test_write_emits_state_changed() {
        let (mut graph, registry) = setup();
        let source = add(&mut graph, &registry, "int_variable");
        let output = graph.output_named(source, "Value").unwrap();
        graph.drain_events();

        graph.write(output, DynValue::Int(1));
        let events = graph.drain_events();
        assert!(matches!(
            events.as_slice(),
            [GraphEvent::StateChanged { slot, .. }] if *slot == output
        ));
    }

    #[test]
    fn test_tick_advances_frames() {
        let (mut graph, _) = setup();
        let start = graph.now();
        let next = graph.tick();
        assert_eq!(next.frame, start.frame + 1);
        assert!(next > start);
    }
}
