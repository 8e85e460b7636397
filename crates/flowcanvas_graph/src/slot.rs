// SPDX-License-Identifier: MIT OR Apache-2.0
//! Slot definitions for node inputs/outputs.

use crate::id::{BranchId, NodeId, SlotId};
use crate::types::{Constraint, TypeId, TypeRegistry};
use crate::value::DynValue;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Slot direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotKind {
    /// Input slot, fed by at most one branch
    Input,
    /// Output slot, fans out to any number of branches
    Output,
}

/// Host-supplied description of a slot.
///
/// This is everything the engine knows about the field behind a slot; the
/// host derives it from its own metadata and the engine never inspects that
/// metadata itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDescriptor {
    /// Slot name, unique per direction on a node
    pub name: String,
    /// Declared type, `None` accepts anything
    pub declared_type: Option<TypeId>,
    /// Extra constraint on connectable producers
    pub constraint: Option<Constraint>,
    /// Value used by calculators when the slot is unconnected
    pub default_value: Option<DynValue>,
}

impl SlotDescriptor {
    /// Create a descriptor with an optional declared type
    pub fn new(name: impl Into<String>, declared_type: Option<TypeId>) -> Self {
        Self {
            name: name.into(),
            declared_type,
            constraint: None,
            default_value: None,
        }
    }

    /// Create a typed descriptor
    pub fn typed(name: impl Into<String>, declared_type: impl Into<TypeId>) -> Self {
        Self::new(name, Some(declared_type.into()))
    }

    /// Create an untyped descriptor
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    /// Set the constraint
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// Set the default value
    pub fn with_default(mut self, value: DynValue) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Branches attached to a slot
#[derive(Debug, Clone, PartialEq)]
pub enum SlotConnections {
    /// Input: single writer
    Single(Option<BranchId>),
    /// Output: multiple readers, in connection order
    Many(IndexSet<BranchId>),
}

impl SlotConnections {
    fn empty(kind: SlotKind) -> Self {
        match kind {
            SlotKind::Input => Self::Single(None),
            SlotKind::Output => Self::Many(IndexSet::new()),
        }
    }

    /// Check whether a branch is attached
    pub fn contains(&self, branch: BranchId) -> bool {
        match self {
            Self::Single(current) => *current == Some(branch),
            Self::Many(set) => set.contains(&branch),
        }
    }

    /// Number of attached branches
    pub fn len(&self) -> usize {
        match self {
            Self::Single(current) => usize::from(current.is_some()),
            Self::Many(set) => set.len(),
        }
    }

    /// Check whether no branch is attached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attached branch ids, in connection order
    pub fn ids(&self) -> Vec<BranchId> {
        match self {
            Self::Single(current) => current.iter().copied().collect(),
            Self::Many(set) => set.iter().copied().collect(),
        }
    }
}

/// A slot on a node
#[derive(Debug, Clone)]
pub struct Slot {
    /// Unique slot ID
    pub id: SlotId,
    /// Owning node
    pub owner: NodeId,
    /// Slot direction
    pub kind: SlotKind,
    /// Slot name
    pub name: String,
    /// Declared type, `None` accepts anything
    pub declared_type: Option<TypeId>,
    /// Extra constraint on connectable producers
    pub constraint: Option<Constraint>,
    /// Type advertised instead of `declared_type` when this slot produces
    pub type_override: Option<TypeId>,
    /// Value used by calculators when the slot is unconnected
    pub default_value: Option<DynValue>,
    /// The other half of a reroute pair
    pub mirror: Option<SlotId>,
    connections: SlotConnections,
}

impl Slot {
    /// Create a new slot from a host descriptor
    pub fn new(id: SlotId, owner: NodeId, kind: SlotKind, descriptor: SlotDescriptor) -> Self {
        Self {
            id,
            owner,
            kind,
            name: descriptor.name,
            declared_type: descriptor.declared_type,
            constraint: descriptor.constraint,
            type_override: None,
            default_value: descriptor.default_value,
            mirror: None,
            connections: SlotConnections::empty(kind),
        }
    }

    /// Check if this is an input slot
    pub fn is_input(&self) -> bool {
        self.kind == SlotKind::Input
    }

    /// Check if this is an output slot
    pub fn is_output(&self) -> bool {
        self.kind == SlotKind::Output
    }

    /// Check if this slot is half of a reroute pair
    pub fn is_reroute(&self) -> bool {
        self.mirror.is_some()
    }

    /// The type this slot advertises as a producer.
    ///
    /// An override always wins over the declared type.
    pub fn connectable_type(&self) -> Option<&TypeId> {
        self.type_override.as_ref().or(self.declared_type.as_ref())
    }

    /// Attached branches
    pub fn connections(&self) -> &SlotConnections {
        &self.connections
    }

    /// The branch occupying an input slot
    pub fn branch(&self) -> Option<BranchId> {
        match &self.connections {
            SlotConnections::Single(current) => *current,
            SlotConnections::Many(_) => None,
        }
    }

    /// All attached branch ids
    pub fn branch_ids(&self) -> Vec<BranchId> {
        self.connections.ids()
    }

    /// Check whether any branch is attached
    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Attach a branch. Returns `false` when an input is already occupied.
    pub(crate) fn attach(&mut self, branch: BranchId) -> bool {
        match &mut self.connections {
            SlotConnections::Single(current @ None) => {
                *current = Some(branch);
                true
            }
            SlotConnections::Single(Some(existing)) => *existing == branch,
            SlotConnections::Many(set) => {
                set.insert(branch);
                true
            }
        }
    }

    /// Detach a branch. Returns whether it was attached.
    pub(crate) fn detach(&mut self, branch: BranchId) -> bool {
        match &mut self.connections {
            SlotConnections::Single(current) if *current == Some(branch) => {
                *current = None;
                true
            }
            SlotConnections::Single(_) => false,
            SlotConnections::Many(set) => set.shift_remove(&branch),
        }
    }
}

/// Check whether `output` may feed `input`, using the output's own
/// connectable type.
pub fn is_connectable(input: &Slot, output: &Slot, types: &TypeRegistry) -> bool {
    is_connectable_with(input, output, None, types)
}

/// Check whether `output` may feed `input` when the caller advertises
/// `override_type` for the output.
///
/// The caller's override takes precedence over the slot's own override and
/// declared type. Nothing is cached: overrides can differ per call site.
pub fn is_connectable_with(
    input: &Slot,
    output: &Slot,
    override_type: Option<&TypeId>,
    types: &TypeRegistry,
) -> bool {
    if !input.is_input() || !output.is_output() {
        return false;
    }

    let produced = override_type.or_else(|| output.connectable_type());
    types.satisfies(produced, input.declared_type.as_ref(), input.constraint.as_ref())
}
