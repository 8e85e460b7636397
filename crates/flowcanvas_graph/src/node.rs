// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.

use crate::id::{NodeId, SlotId};
use crate::migration::Migration;
use crate::slot::SlotDescriptor;
use crate::value::DynValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Type name under which reroute nodes are saved
pub const REROUTE_TYPE: &str = "reroute";

/// Node type category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Behavior tree actions
    Action,
    /// Behavior tree conditions
    Condition,
    /// Variable and blackboard access
    Variable,
    /// Math operations
    Math,
    /// Logic operations
    Logic,
    /// Utility nodes
    Utility,
    /// Custom/user-defined
    Custom,
}

/// A node field that is either a literal or bound to a blackboard variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Parameter {
    /// Literal value
    Constant(DynValue),
    /// Name of a blackboard variable
    Variable(String),
}

impl Parameter {
    /// Get the literal value, if this is a constant
    pub fn constant(&self) -> Option<&DynValue> {
        match self {
            Self::Constant(value) => Some(value),
            Self::Variable(_) => None,
        }
    }

    /// Resolve against a set of blackboard variables
    pub fn resolve(&self, variables: &IndexMap<String, DynValue>) -> Option<DynValue> {
        match self {
            Self::Constant(value) => Some(value.clone()),
            Self::Variable(name) => variables.get(name).cloned(),
        }
    }
}

/// Pure derivation of a calculator's outputs from its inputs.
///
/// `inputs` is in slot order; missing values are `None`. The returned vector
/// is matched to output slots by position, and a short vector leaves the
/// remaining outputs without a value.
pub trait Calculation {
    /// Compute the outputs
    fn compute(&self, inputs: &[Option<DynValue>]) -> Vec<Option<DynValue>>;
}

impl<F> Calculation for F
where
    F: Fn(&[Option<DynValue>]) -> Vec<Option<DynValue>>,
{
    fn compute(&self, inputs: &[Option<DynValue>]) -> Vec<Option<DynValue>> {
        self(inputs)
    }
}

/// What instances of a node type do
#[derive(Clone)]
pub enum NodeBehavior {
    /// Slots are written and read by the host
    Host,
    /// Outputs are derived from inputs on demand
    Calculator(Rc<dyn Calculation>),
}

impl fmt::Debug for NodeBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("Host"),
            Self::Calculator(_) => f.write_str("Calculator"),
        }
    }
}

/// Node type definition
#[derive(Debug, Clone)]
pub struct NodeTypeDef {
    /// Unique type identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Category
    pub category: NodeCategory,
    /// Description
    pub description: String,
    /// Input slot descriptors
    pub inputs: Vec<SlotDescriptor>,
    /// Output slot descriptors
    pub outputs: Vec<SlotDescriptor>,
    /// Default parameters of new instances
    pub parameters: IndexMap<String, Parameter>,
    /// Host or calculator
    pub behavior: NodeBehavior,
    /// Upgrade steps; the current version is their count
    pub migrations: Vec<Migration>,
}

impl NodeTypeDef {
    fn with_behavior(id: impl Into<String>, name: impl Into<String>, behavior: NodeBehavior) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: NodeCategory::Custom,
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: IndexMap::new(),
            behavior,
            migrations: Vec::new(),
        }
    }

    /// Create a host node type
    pub fn host(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_behavior(id, name, NodeBehavior::Host)
    }

    /// Create a calculator node type
    pub fn calculator(
        id: impl Into<String>,
        name: impl Into<String>,
        calculation: impl Calculation + 'static,
    ) -> Self {
        Self::with_behavior(id, name, NodeBehavior::Calculator(Rc::new(calculation)))
    }

    /// Set the category
    pub fn with_category(mut self, category: NodeCategory) -> Self {
        self.category = category;
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add an input slot
    pub fn with_input(mut self, descriptor: SlotDescriptor) -> Self {
        self.inputs.push(descriptor);
        self
    }

    /// Add an output slot
    pub fn with_output(mut self, descriptor: SlotDescriptor) -> Self {
        self.outputs.push(descriptor);
        self
    }

    /// Add a default parameter
    pub fn with_parameter(mut self, name: impl Into<String>, parameter: Parameter) -> Self {
        self.parameters.insert(name.into(), parameter);
        self
    }

    /// Append an upgrade step
    pub fn with_migration(mut self, step: Migration) -> Self {
        self.migrations.push(step);
        self
    }

    /// Current serialized version of this node type
    pub fn current_version(&self) -> u32 {
        self.migrations.len() as u32
    }

    /// Check if instances are calculators
    pub fn is_calculator(&self) -> bool {
        matches!(self.behavior, NodeBehavior::Calculator(_))
    }
}

/// Node whose slots the host drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostNode {
    /// Input slots, in declaration order
    pub inputs: Vec<SlotId>,
    /// Output slots, in declaration order
    pub outputs: Vec<SlotId>,
}

/// Node deriving outputs from inputs on demand
#[derive(Clone)]
pub struct CalculatorNode {
    /// Input slots, in declaration order
    pub inputs: Vec<SlotId>,
    /// Output slots, in declaration order
    pub outputs: Vec<SlotId>,
    pub(crate) dirty: bool,
    pub(crate) calculation: Rc<dyn Calculation>,
}

impl CalculatorNode {
    /// Whether an upstream change is pending recomputation
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl fmt::Debug for CalculatorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalculatorNode")
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

/// Pass-through node with one mirrored input/output pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RerouteNode {
    /// Input half
    pub input: SlotId,
    /// Output half
    pub output: SlotId,
}

/// Node variants
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Host-driven node
    Host(HostNode),
    /// Calculator
    Calculator(CalculatorNode),
    /// Reroute
    Reroute(RerouteNode),
}

/// A node instance in the graph
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique instance ID
    pub id: NodeId,
    /// Node type ID
    pub node_type: String,
    /// Display name (can be customized)
    pub name: String,
    /// Serialized version of the node's fields
    pub version: u32,
    /// Named parameters
    pub parameters: IndexMap<String, Parameter>,
    /// Variant data
    pub kind: NodeKind,
}

impl Node {
    /// Input slot ids, in order
    pub fn inputs(&self) -> &[SlotId] {
        match &self.kind {
            NodeKind::Host(host) => &host.inputs,
            NodeKind::Calculator(calc) => &calc.inputs,
            NodeKind::Reroute(reroute) => std::slice::from_ref(&reroute.input),
        }
    }

    /// Output slot ids, in order
    pub fn outputs(&self) -> &[SlotId] {
        match &self.kind {
            NodeKind::Host(host) => &host.outputs,
            NodeKind::Calculator(calc) => &calc.outputs,
            NodeKind::Reroute(reroute) => std::slice::from_ref(&reroute.output),
        }
    }

    /// Get an input slot id by index
    pub fn input(&self, index: usize) -> Option<SlotId> {
        self.inputs().get(index).copied()
    }

    /// Get an output slot id by index
    pub fn output(&self, index: usize) -> Option<SlotId> {
        self.outputs().get(index).copied()
    }

    /// All slot ids
    pub fn slot_ids(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.inputs().iter().chain(self.outputs().iter()).copied()
    }

    /// Check if this is a calculator
    pub fn is_calculator(&self) -> bool {
        matches!(self.kind, NodeKind::Calculator(_))
    }

    /// Check if this is a reroute
    pub fn is_reroute(&self) -> bool {
        matches!(self.kind, NodeKind::Reroute(_))
    }

    /// Whether data arriving at this node's inputs feeds its outputs
    /// synchronously, so that a path through it can close a loop
    pub fn propagates(&self) -> bool {
        self.is_calculator() || self.is_reroute()
    }

    /// Get the reroute pair, if this is a reroute
    pub fn as_reroute(&self) -> Option<RerouteNode> {
        match self.kind {
            NodeKind::Reroute(reroute) => Some(reroute),
            _ => None,
        }
    }

    /// Get a parameter
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }
}

/// Registry of available node types
pub struct NodeRegistry {
    /// Registered node types by ID
    types: IndexMap<String, NodeTypeDef>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            types: IndexMap::new(),
        }
    }

    /// Register a node type
    pub fn register(&mut self, node_type: NodeTypeDef) {
        self.types.insert(node_type.id.clone(), node_type);
    }

    /// Get a node type by ID
    pub fn get(&self, id: &str) -> Option<&NodeTypeDef> {
        self.types.get(id)
    }

    /// Get all registered types
    pub fn types(&self) -> impl Iterator<Item = &NodeTypeDef> {
        self.types.values()
    }

    /// Get types by category
    pub fn types_in_category(&self, category: NodeCategory) -> impl Iterator<Item = &NodeTypeDef> {
        self.types.values().filter(move |t| t.category == category)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::SlotDescriptor;

    #[test]
    fn test_calculator_from_closure() {
        let def = NodeTypeDef::calculator("negate", "Negate", |inputs: &[Option<DynValue>]| {
            let out = match inputs.first() {
                Some(Some(DynValue::Int(v))) => Some(DynValue::Int(-v)),
                _ => None,
            };
            vec![out]
        })
        .with_input(SlotDescriptor::typed("In", "int"))
        .with_output(SlotDescriptor::typed("Out", "int"));

        assert!(def.is_calculator());
        let NodeBehavior::Calculator(calc) = &def.behavior else {
            panic!("expected a calculator");
        };
        assert_eq!(calc.compute(&[Some(DynValue::Int(4))]), vec![Some(DynValue::Int(-4))]);
        assert_eq!(calc.compute(&[None]), vec![None]);
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = NodeRegistry::new();
        registry.register(NodeTypeDef::host("wait", "Wait").with_category(NodeCategory::Action));
        registry.register(NodeTypeDef::host("is_alive", "Is Alive").with_category(NodeCategory::Condition));

        assert_eq!(registry.len(), 2);
        assert!(registry.get("wait").is_some());
        assert_eq!(registry.types_in_category(NodeCategory::Condition).count(), 1);
    }

    #[test]
    fn test_parameter_resolution() {
        let mut vars = IndexMap::new();
        vars.insert("speed".to_string(), DynValue::Float(2.0));

        assert_eq!(Parameter::Variable("speed".into()).resolve(&vars), Some(DynValue::Float(2.0)));
        assert_eq!(Parameter::Variable("other".into()).resolve(&vars), None);
        assert_eq!(Parameter::Constant(DynValue::Int(1)).constant(), Some(&DynValue::Int(1)));
    }
}
