// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end behavior of connections, evaluation and reroutes.

use flowcanvas_graph::graphs::gameplay::{create_gameplay_registry, create_type_registry};
use flowcanvas_graph::{
    BranchId, ConnectionRejected, DynValue, Graph, NodeId, NodeRegistry, ObjectRef, SlotId, TypeId,
};
use std::rc::Rc;

struct Fixture {
    graph: Graph,
    registry: NodeRegistry,
}

impl Fixture {
    fn new() -> Self {
        Self {
            graph: Graph::new("Dataflow", Rc::new(create_type_registry())),
            registry: create_gameplay_registry(),
        }
    }

    fn add(&mut self, type_id: &str) -> NodeId {
        let def = self.registry.get(type_id).unwrap();
        self.graph.add_node(def)
    }

    fn output(&self, node: NodeId, name: &str) -> SlotId {
        self.graph.output_named(node, name).unwrap()
    }

    fn input(&self, node: NodeId, name: &str) -> SlotId {
        self.graph.input_named(node, name).unwrap()
    }

    fn link(&mut self, from: (NodeId, &str), to: (NodeId, &str)) -> BranchId {
        let output = self.output(from.0, from.1);
        let input = self.input(to.0, to.1);
        self.graph.connect(input, output).unwrap()
    }
}

#[test]
fn connect_succeeds_only_when_connectable_and_loop_free() {
    let mut f = Fixture::new();
    let nodes = [
        f.add("int_variable"),
        f.add("float_variable"),
        f.add("string_variable"),
        f.add("double"),
        f.add("add"),
        f.add("set_health"),
        f.add("log_value"),
    ];

    let outputs: Vec<SlotId> = nodes
        .iter()
        .flat_map(|n| f.graph.node(*n).unwrap().outputs().to_vec())
        .collect();
    let inputs: Vec<SlotId> = nodes
        .iter()
        .flat_map(|n| f.graph.node(*n).unwrap().inputs().to_vec())
        .collect();

    for &input in &inputs {
        for &output in &outputs {
            let same_owner = f.graph.slot(input).unwrap().owner == f.graph.slot(output).unwrap().owner;
            let occupied = f.graph.slot(input).unwrap().is_connected();
            let expected = f.graph.is_connectable(input, output)
                && !same_owner
                && !occupied
                && !f.graph.check_loop_data(input, output);
            let before = f.graph.branch_count();

            let result = f.graph.connect(input, output);
            assert_eq!(result.is_ok(), expected, "{input} <- {output}: {result:?}");
            if result.is_err() {
                assert_eq!(f.graph.branch_count(), before);
            }
        }
    }
    assert!(!f.graph.has_data_cycle());
}

#[test]
fn disconnect_restores_adjacency() {
    let mut f = Fixture::new();
    let source = f.add("float_variable");
    let add = f.add("add");
    let other = f.add("log_value");
    f.link((source, "Value"), (other, "Value"));

    let output = f.output(source, "Value");
    let input = f.input(add, "A");
    let before: Vec<_> = f.graph.slot(output).unwrap().branch_ids();

    let branch = f.graph.connect(input, output).unwrap();
    f.graph.disconnect(branch).unwrap();

    assert_eq!(f.graph.slot(output).unwrap().branch_ids(), before);
    assert!(!f.graph.slot(input).unwrap().is_connected());
    assert!(f.graph.is_active(output));
}

#[test]
fn write_to_many_branches() {
    let mut f = Fixture::new();
    let source = f.add("float_variable");
    let branches: Vec<BranchId> = (0..8)
        .map(|_| {
            let sink = f.add("log_value");
            f.link((source, "Value"), (sink, "Value"))
        })
        .collect();

    let output = f.output(source, "Value");
    let mut last = f.graph.now();
    for frame in 0..3 {
        f.graph.tick();
        assert_eq!(f.graph.write(output, DynValue::Float(f64::from(frame))), 8);
        for id in &branches {
            let branch = f.graph.branch(*id).unwrap();
            assert!(branch.is_used());
            assert_eq!(branch.cached_value(), Some(&DynValue::Float(f64::from(frame))));
            assert!(branch.updated_at() >= last);
        }
        last = f.graph.now();
    }
}

#[test]
fn doubling_scenario() {
    let mut f = Fixture::new();
    let source = f.add("int_variable");
    let double = f.add("double");
    let sink = f.add("set_health");
    f.link((source, "Value"), (double, "Value"));
    let downstream = f.link((double, "Result"), (sink, "Amount"));

    let output = f.output(source, "Value");
    let input = f.input(sink, "Amount");
    f.graph.write(output, DynValue::Int(5));
    assert_eq!(f.graph.read(input), Some(DynValue::Int(10)));

    f.graph.disconnect(downstream).unwrap();
    assert_eq!(f.graph.read(input), None);
}

#[test]
fn disconnecting_upstream_clears_the_calculated_value() {
    let mut f = Fixture::new();
    let source = f.add("int_variable");
    let double = f.add("double");
    let sink = f.add("set_health");
    let upstream = f.link((source, "Value"), (double, "Value"));
    let downstream = f.link((double, "Result"), (sink, "Amount"));

    let input = f.input(sink, "Amount");
    f.graph.write(f.output(source, "Value"), DynValue::Int(5));
    assert_eq!(f.graph.read(input), Some(DynValue::Int(10)));
    assert!(f.graph.branch(downstream).unwrap().is_used());

    f.graph.disconnect(upstream).unwrap();
    assert_eq!(f.graph.read(input), None);

    let branch = f.graph.branch(downstream).unwrap();
    assert!(!branch.is_used());
    assert_eq!(branch.cached_value(), None);
}

#[test]
fn calculator_chain_evaluates_iteratively() {
    let mut f = Fixture::new();
    let source = f.add("int_variable");
    let mut previous = (source, "Value");
    for _ in 0..40 {
        let double = f.add("double");
        f.link(previous, (double, "Value"));
        previous = (double, "Result");
    }
    let sink = f.add("set_health");
    f.link(previous, (sink, "Amount"));

    f.graph.write(f.output(source, "Value"), DynValue::Int(1));
    let input = f.input(sink, "Amount");
    assert_eq!(f.graph.read(input), Some(DynValue::Int(1 << 40)));

    // Overflow on the way yields no value instead of a panic
    f.graph.write(f.output(source, "Value"), DynValue::Int(i64::MAX / 2));
    assert_eq!(f.graph.read(input), None);
}

#[test]
fn long_calculator_chain_does_not_overflow_the_stack() {
    let mut f = Fixture::new();
    let source = f.add("float_variable");
    let mut previous = (source, "Value");
    for _ in 0..5000 {
        let add = f.add("add");
        f.link(previous, (add, "A"));
        previous = (add, "Sum");
    }
    let sink = f.add("log_value");
    f.link(previous, (sink, "Value"));

    f.graph.write(f.output(source, "Value"), DynValue::Float(2.5));
    assert_eq!(f.graph.read(f.input(sink, "Value")), Some(DynValue::Float(2.5)));
}

#[test]
fn deep_reroute_chain_is_transparent() {
    let mut f = Fixture::new();
    let source = f.add("int_variable");
    let sink = f.add("set_health");
    let mut branch = f.link((source, "Value"), (sink, "Amount"));
    let output = f.output(source, "Value");
    let input = f.input(sink, "Amount");

    // Keep splitting the branch closest to the sink
    for _ in 0..5000 {
        let reroute = f.graph.insert_reroute(branch).unwrap();
        let pair = f.graph.node(reroute).unwrap().as_reroute().unwrap();
        branch = f.graph.slot(input).unwrap().branch().unwrap();
        assert_eq!(f.graph.branch(branch).unwrap().source_node, reroute);
        assert!(f.graph.slot(pair.output).unwrap().connections().contains(branch));
    }

    f.graph.write(output, DynValue::Int(33));
    assert_eq!(f.graph.read(input), Some(DynValue::Int(33)));
    f.graph.clear(output);
    assert_eq!(f.graph.read(input), None);
}

#[test]
fn reroute_participates_in_type_checks() {
    let mut f = Fixture::new();
    let text = f.add("string_variable");
    let sink = f.add("set_health");
    let reroute = f.graph.add_reroute(Some(TypeId::new("string")));
    let pair = f.graph.node(reroute).unwrap().as_reroute().unwrap();

    f.graph.connect(pair.input, f.output(text, "Value")).unwrap();
    let err = f.graph.connect(f.input(sink, "Amount"), pair.output).unwrap_err();
    assert!(matches!(err, ConnectionRejected::IncompatibleTypes { .. }));
}

#[test]
fn retyping_a_reroute_prunes_downstream() {
    let mut f = Fixture::new();
    let source = f.add("int_variable");
    let sink = f.add("set_health");
    let branch = f.link((source, "Value"), (sink, "Amount"));
    let reroute = f.graph.insert_reroute(branch).unwrap();
    let pair = f.graph.node(reroute).unwrap().as_reroute().unwrap();

    let pruned = f.graph.set_declared_type(pair.output, Some(TypeId::new("Transform")));
    // Upstream int no longer fits the input half, and Transform no longer
    // fits the health amount
    assert_eq!(pruned.len(), 2);
    assert_eq!(f.graph.branch_count(), 0);
    assert_eq!(
        f.graph.slot(pair.input).unwrap().declared_type,
        Some(TypeId::new("Transform"))
    );
}

#[test]
fn transform_constraint_rejects_game_object() {
    let mut f = Fixture::new();
    let look_at = f.add("look_at");
    let object = f.add("game_object_variable");
    let transform = f.add("transform_variable");
    let target = f.input(look_at, "Target");

    let err = f
        .graph
        .connect(target, f.output(object, "Value"))
        .unwrap_err();
    assert!(matches!(err, ConnectionRejected::IncompatibleTypes { .. }));
    assert!(!f.graph.slot(target).unwrap().is_connected());

    f.graph.connect(target, f.output(transform, "Value")).unwrap();
}

#[test]
fn interface_constraint_accepts_implementors() {
    let mut f = Fixture::new();
    let damage = f.add("apply_damage");
    let health = f.add("health_variable");
    let transform = f.add("transform_variable");
    let target = f.input(damage, "Target");

    assert!(!f.graph.is_connectable(target, f.output(transform, "Value")));
    f.graph.connect(target, f.output(health, "Value")).unwrap();

    let handle = ObjectRef {
        type_id: TypeId::new("Health"),
        handle: 7,
    };
    f.graph.write(f.output(health, "Value"), DynValue::Object(handle.clone()));
    assert_eq!(f.graph.read(target), Some(DynValue::Object(handle)));
}

#[test]
fn override_lets_an_untyped_output_connect() {
    let mut f = Fixture::new();
    let select = f.add("select");
    let sink = f.add("set_health");
    let input = f.input(sink, "Amount");
    let output = f.output(select, "Result");

    assert!(!f.graph.is_connectable(input, output));
    assert!(f.graph.is_connectable_with(input, output, Some(&TypeId::new("int"))));

    assert!(f.graph.set_type_override(output, Some(TypeId::new("int"))).is_empty());
    f.graph.connect(input, output).unwrap();

    // Dropping the override invalidates the branch
    let pruned = f.graph.set_type_override(output, None);
    assert_eq!(pruned.len(), 1);
    assert!(!f.graph.slot(input).unwrap().is_connected());
}
