// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes, slots and branches.
//!
//! Everything lives in id-keyed arenas. Cross references are ids resolved
//! through the graph; a branch's link to its slot objects is a cache that can
//! be rebuilt from the ids at any time.

use crate::branch::{Branch, BranchLink, Route, Timestamp};
use crate::diagnostics::{Diagnostic, GraphEvent};
use crate::evaluation::EvaluationPass;
use crate::id::{BranchId, IdCounter, NodeId, SlotId};
use crate::node::{
    CalculatorNode, HostNode, Node, NodeBehavior, NodeKind, NodeTypeDef, Parameter, RerouteNode,
    REROUTE_TYPE,
};
use crate::settings::EngineSettings;
use crate::slot::{self, Slot, SlotDescriptor, SlotKind};
use crate::types::{Constraint, TypeId, TypeRegistry};
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;
use std::rc::Rc;
use uuid::Uuid;

/// Default bound of the pending event queue
pub const DEFAULT_MAX_PENDING_EVENTS: usize = 1024;

/// A node graph
#[derive(Debug)]
pub struct Graph {
    /// Durable identity of the graph asset
    pub guid: Uuid,
    /// Graph name
    pub name: String,
    pub(crate) types: Rc<TypeRegistry>,
    pub(crate) nodes: IndexMap<NodeId, Node>,
    pub(crate) slots: IndexMap<SlotId, Slot>,
    pub(crate) branches: IndexMap<BranchId, Branch>,
    /// Control-flow links, child -> parent
    pub(crate) parents: IndexMap<NodeId, NodeId>,
    pub(crate) ids: IdCounter,
    pub(crate) clock: Timestamp,
    /// Outputs with at least one branch
    pub(crate) active_outputs: IndexSet<SlotId>,
    pub(crate) pass: EvaluationPass,
    events: VecDeque<GraphEvent>,
    max_pending_events: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Graph {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>, types: Rc<TypeRegistry>) -> Self {
        Self {
            guid: Uuid::new_v4(),
            name: name.into(),
            types,
            nodes: IndexMap::new(),
            slots: IndexMap::new(),
            branches: IndexMap::new(),
            parents: IndexMap::new(),
            ids: IdCounter::new(),
            clock: Timestamp::default(),
            active_outputs: IndexSet::new(),
            pass: EvaluationPass::default(),
            events: VecDeque::new(),
            max_pending_events: DEFAULT_MAX_PENDING_EVENTS,
            diagnostics: Vec::new(),
        }
    }

    /// Create a new empty graph configured from engine settings
    pub fn with_settings(
        name: impl Into<String>,
        types: Rc<TypeRegistry>,
        settings: &EngineSettings,
    ) -> Self {
        let mut graph = Self::new(name, types);
        graph.max_pending_events = settings.max_pending_events.max(1);
        graph
    }

    /// The type registry this graph checks connections against
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Shared handle to the type registry
    pub fn types_handle(&self) -> Rc<TypeRegistry> {
        Rc::clone(&self.types)
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Add a node of the given type and create its slots
    pub fn add_node(&mut self, def: &NodeTypeDef) -> NodeId {
        let id = self.ids.node();
        let inputs = self.create_slots(id, SlotKind::Input, &def.inputs);
        let outputs = self.create_slots(id, SlotKind::Output, &def.outputs);

        let kind = match &def.behavior {
            NodeBehavior::Host => NodeKind::Host(HostNode { inputs, outputs }),
            NodeBehavior::Calculator(calculation) => NodeKind::Calculator(CalculatorNode {
                inputs,
                outputs,
                dirty: true,
                calculation: Rc::clone(calculation),
            }),
        };

        self.nodes.insert(
            id,
            Node {
                id,
                node_type: def.id.clone(),
                name: def.name.clone(),
                version: def.current_version(),
                parameters: def.parameters.clone(),
                kind,
            },
        );
        tracing::debug!(%id, node_type = %def.id, "added node");
        id
    }

    /// Add a reroute node whose two slots share `declared_type`
    pub fn add_reroute(&mut self, declared_type: Option<TypeId>) -> NodeId {
        let id = self.ids.node();
        let input = self.ids.slot();
        let output = self.ids.slot();

        let mut in_slot = Slot::new(
            input,
            id,
            SlotKind::Input,
            SlotDescriptor::new("In", declared_type.clone()),
        );
        in_slot.mirror = Some(output);
        let mut out_slot = Slot::new(
            output,
            id,
            SlotKind::Output,
            SlotDescriptor::new("Out", declared_type),
        );
        out_slot.mirror = Some(input);

        self.slots.insert(input, in_slot);
        self.slots.insert(output, out_slot);
        self.nodes.insert(
            id,
            Node {
                id,
                node_type: REROUTE_TYPE.to_string(),
                name: "Reroute".to_string(),
                version: 0,
                parameters: IndexMap::new(),
                kind: NodeKind::Reroute(RerouteNode { input, output }),
            },
        );
        tracing::debug!(%id, "added reroute");
        id
    }

    fn create_slots(
        &mut self,
        owner: NodeId,
        kind: SlotKind,
        descriptors: &[SlotDescriptor],
    ) -> Vec<SlotId> {
        descriptors
            .iter()
            .map(|descriptor| {
                let id = self.ids.slot();
                self.slots.insert(id, Slot::new(id, owner, kind, descriptor.clone()));
                id
            })
            .collect()
    }

    /// Insert a node with pre-built slots (used when loading). The caller
    /// has already reserved the ids.
    pub(crate) fn insert_loaded_node(&mut self, node: Node, slots: Vec<Slot>) {
        for slot in slots {
            self.slots.insert(slot.id, slot);
        }
        self.nodes.insert(node.id, node);
    }

    /// Insert a branch read from a document (used when loading)
    pub(crate) fn insert_loaded_branch(&mut self, branch: Branch) {
        self.branches.insert(branch.id, branch);
    }

    /// Remove a node, its slots and every branch touching it
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.get(&node_id)?;
        let slot_ids: Vec<SlotId> = node.slot_ids().collect();

        let mut doomed: IndexSet<BranchId> = slot_ids
            .iter()
            .filter_map(|id| self.slots.get(id))
            .flat_map(Slot::branch_ids)
            .collect();
        doomed.extend(
            self.branches
                .values()
                .filter(|b| b.involves_node(node_id))
                .map(|b| b.id),
        );
        for branch in doomed {
            self.disconnect(branch);
        }

        for id in slot_ids {
            self.slots.shift_remove(&id);
            self.active_outputs.shift_remove(&id);
        }
        self.parents.shift_remove(&node_id);
        self.parents.retain(|_, parent| *parent != node_id);

        let node = self.nodes.shift_remove(&node_id);
        tracing::debug!(%node_id, "removed node");
        node
    }

    /// Get a node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get all nodes
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get all node IDs
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Find the first node with the given display name
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes.values().find(|n| n.name == name).map(|n| n.id)
    }

    /// Rename a node
    pub fn rename_node(&mut self, node_id: NodeId, name: impl Into<String>) -> bool {
        match self.nodes.get_mut(&node_id) {
            Some(node) => {
                node.name = name.into();
                true
            }
            None => false,
        }
    }

    /// Set a node parameter. Returns `false` if the node does not exist.
    pub fn set_parameter(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
        parameter: Parameter,
    ) -> bool {
        match self.nodes.get_mut(&node_id) {
            Some(node) => {
                node.parameters.insert(name.into(), parameter);
                true
            }
            None => false,
        }
    }

    pub(crate) fn reroute(&self, node_id: NodeId) -> Option<RerouteNode> {
        self.nodes.get(&node_id).and_then(Node::as_reroute)
    }

    /// How values leave a node's outputs
    pub(crate) fn node_route(&self, node_id: NodeId) -> Route {
        match self.nodes.get(&node_id).map(|n| &n.kind) {
            Some(NodeKind::Calculator(_)) => Route::ThroughCalculator(node_id),
            Some(NodeKind::Reroute(_)) => Route::ThroughReroute(node_id),
            Some(NodeKind::Host(_)) | None => Route::Direct,
        }
    }

    /// How a branch fed by `source` obtains its value
    pub fn route_of(&self, source: SlotId) -> Route {
        match self.slots.get(&source) {
            Some(slot) => self.node_route(slot.owner),
            None => Route::Direct,
        }
    }

    // ------------------------------------------------------------------
    // Slots
    // ------------------------------------------------------------------

    /// Get a slot by ID
    pub fn slot(&self, slot_id: SlotId) -> Option<&Slot> {
        self.slots.get(&slot_id)
    }

    /// Get all slots
    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.values()
    }

    /// Find a node's input slot by name
    pub fn input_named(&self, node_id: NodeId, name: &str) -> Option<SlotId> {
        self.slot_named(node_id, SlotKind::Input, name)
    }

    /// Find a node's output slot by name
    pub fn output_named(&self, node_id: NodeId, name: &str) -> Option<SlotId> {
        self.slot_named(node_id, SlotKind::Output, name)
    }

    fn slot_named(&self, node_id: NodeId, kind: SlotKind, name: &str) -> Option<SlotId> {
        let node = self.nodes.get(&node_id)?;
        let ids = match kind {
            SlotKind::Input => node.inputs(),
            SlotKind::Output => node.outputs(),
        };
        ids.iter()
            .copied()
            .find(|id| self.slots.get(id).is_some_and(|s| s.name == name))
    }

    /// Outputs that currently feed at least one branch
    pub fn active_outputs(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.active_outputs.iter().copied()
    }

    /// Check whether an output currently feeds a branch
    pub fn is_active(&self, output: SlotId) -> bool {
        self.active_outputs.contains(&output)
    }

    /// Change a slot's declared type and drop branches that stop
    /// type-checking. Both halves of a reroute change together.
    pub fn set_declared_type(&mut self, slot_id: SlotId, declared_type: Option<TypeId>) -> Vec<BranchId> {
        let targets = self.with_mirror(slot_id);
        for id in &targets {
            if let Some(slot) = self.slots.get_mut(id) {
                slot.declared_type = declared_type.clone();
            }
        }
        self.revalidate(&targets)
    }

    /// Change a slot's constraint and drop branches that stop type-checking
    pub fn set_constraint(&mut self, slot_id: SlotId, constraint: Option<Constraint>) -> Vec<BranchId> {
        match self.slots.get_mut(&slot_id) {
            Some(slot) => slot.constraint = constraint,
            None => return Vec::new(),
        }
        self.revalidate(&[slot_id])
    }

    /// Change the type an output advertises and drop branches that stop
    /// type-checking
    pub fn set_type_override(&mut self, slot_id: SlotId, type_override: Option<TypeId>) -> Vec<BranchId> {
        match self.slots.get_mut(&slot_id) {
            Some(slot) => slot.type_override = type_override,
            None => return Vec::new(),
        }
        self.revalidate(&[slot_id])
    }

    fn with_mirror(&self, slot_id: SlotId) -> Vec<SlotId> {
        match self.slots.get(&slot_id) {
            Some(slot) => std::iter::once(slot_id).chain(slot.mirror).collect(),
            None => Vec::new(),
        }
    }

    fn revalidate(&mut self, changed: &[SlotId]) -> Vec<BranchId> {
        let ids: IndexSet<BranchId> = changed
            .iter()
            .filter_map(|id| self.slots.get(id))
            .flat_map(Slot::branch_ids)
            .collect();

        let mut pruned = Vec::new();
        for id in ids {
            let Some((source, dest)) = self.endpoints(id) else {
                pruned.push(id);
                continue;
            };
            if slot::is_connectable(&self.slots[&dest], &self.slots[&source], &self.types) {
                continue;
            }
            let slot = if changed.contains(&source) { source } else { dest };
            self.prune_branch(id, Diagnostic::TypeChanged { branch: id, slot });
            pruned.push(id);
        }
        pruned
    }

    // ------------------------------------------------------------------
    // Branches
    // ------------------------------------------------------------------

    /// Check whether `output` may feed `input`
    pub fn is_connectable(&self, input: SlotId, output: SlotId) -> bool {
        match (self.slots.get(&input), self.slots.get(&output)) {
            (Some(input), Some(output)) => slot::is_connectable(input, output, &self.types),
            _ => false,
        }
    }

    /// Check whether `output` may feed `input` when the caller advertises
    /// `override_type` for the output
    pub fn is_connectable_with(
        &self,
        input: SlotId,
        output: SlotId,
        override_type: Option<&TypeId>,
    ) -> bool {
        match (self.slots.get(&input), self.slots.get(&output)) {
            (Some(input), Some(output)) => {
                slot::is_connectable_with(input, output, override_type, &self.types)
            }
            _ => false,
        }
    }

    /// Connect an output to an input.
    ///
    /// Fails, leaving the graph unchanged, when the types do not fit, when
    /// the branch would close a dataflow loop, or when the input is already
    /// fed by another branch.
    pub fn connect(&mut self, input: SlotId, output: SlotId) -> Result<BranchId, ConnectionRejected> {
        let in_slot = self
            .slots
            .get(&input)
            .ok_or(ConnectionRejected::SlotNotFound(input))?;
        let out_slot = self
            .slots
            .get(&output)
            .ok_or(ConnectionRejected::SlotNotFound(output))?;

        if !in_slot.is_input() || !out_slot.is_output() {
            return Err(ConnectionRejected::WrongDirection { input, output });
        }
        if in_slot.owner == out_slot.owner {
            return Err(ConnectionRejected::SelfLoop(in_slot.owner));
        }
        if !slot::is_connectable(in_slot, out_slot, &self.types) {
            return Err(ConnectionRejected::IncompatibleTypes {
                input,
                output,
                expected: describe_requirement(in_slot),
                found: describe_type(out_slot.connectable_type()),
            });
        }

        let dest_node = in_slot.owner;
        let source_node = out_slot.owner;

        let leftover = match in_slot.branch() {
            Some(existing) if self.peek_endpoints(existing).is_some() => {
                return Err(ConnectionRejected::InputOccupied(input));
            }
            other => other,
        };

        if self.check_loop_data(input, output) {
            return Err(ConnectionRejected::WouldCreateCycle);
        }

        // The input still names a branch that no longer resolves
        if let Some(existing) = leftover {
            if self.endpoints(existing).is_none() {
                if let Some(slot) = self.slots.get_mut(&input) {
                    slot.detach(existing);
                }
            }
        }

        // A new reader of an output sees its latest value right away
        let seed = self
            .slots
            .get(&output)
            .map(Slot::branch_ids)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|other| self.branches.get(&other))
            .filter(|b| b.is_used)
            .max_by_key(|b| b.updated_at)
            .and_then(|b| b.cached_value.clone().map(|value| (value, b.updated_at)));

        let id = self.ids.branch();
        let mut branch = Branch::resolved(id, source_node, output, dest_node, input);
        let seeded = seed.is_some();
        if let Some((value, at)) = seed {
            branch.store(value, at);
        }
        self.branches.insert(id, branch);
        if !seeded {
            if let Route::ThroughCalculator(calculator) = self.node_route(source_node) {
                self.invalidate_from(calculator);
            }
        }
        if let Some(slot) = self.slots.get_mut(&input) {
            slot.attach(id);
        }
        if let Some(slot) = self.slots.get_mut(&output) {
            slot.attach(id);
        }
        self.active_outputs.insert(output);

        self.emit(GraphEvent::ConnectionChanged {
            branch: id,
            connected: true,
        });
        self.input_changed(dest_node, false);
        tracing::debug!(branch = %id, %input, %output, "connected");
        Ok(id)
    }

    /// Remove a branch from both of its endpoints
    pub fn disconnect(&mut self, branch_id: BranchId) -> Option<Branch> {
        let branch = self.branches.shift_remove(&branch_id)?;

        let source = self.holder_of(&branch, SlotKind::Output);
        let dest = self.holder_of(&branch, SlotKind::Input);
        if let Some(source) = source {
            if let Some(slot) = self.slots.get_mut(&source) {
                slot.detach(branch_id);
                if !slot.is_connected() {
                    self.active_outputs.shift_remove(&source);
                }
            }
        }
        if let Some(dest) = dest {
            if let Some(slot) = self.slots.get_mut(&dest) {
                slot.detach(branch_id);
            }
        }

        self.emit(GraphEvent::ConnectionChanged {
            branch: branch_id,
            connected: false,
        });
        if dest.is_some() {
            self.input_changed(branch.dest_node, true);
        }
        tracing::debug!(branch = %branch_id, "disconnected");
        Some(branch)
    }

    /// Remove every branch attached to a slot
    pub fn disconnect_slot(&mut self, slot_id: SlotId) -> Vec<BranchId> {
        let ids = self
            .slots
            .get(&slot_id)
            .map(Slot::branch_ids)
            .unwrap_or_default();
        ids.into_iter()
            .filter(|id| self.disconnect(*id).is_some())
            .collect()
    }

    /// Find the branch connecting `output` to `input`
    pub fn branch_between(&self, input: SlotId, output: SlotId) -> Option<BranchId> {
        let id = self.slots.get(&input)?.branch()?;
        self.slots
            .get(&output)?
            .connections()
            .contains(id)
            .then_some(id)
    }

    /// Get a branch by ID
    pub fn branch(&self, branch_id: BranchId) -> Option<&Branch> {
        self.branches.get(&branch_id)
    }

    /// Get all branches
    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    /// Get branches involving a node
    pub fn branches_for_node(&self, node_id: NodeId) -> impl Iterator<Item = &Branch> {
        self.branches.values().filter(move |b| b.involves_node(node_id))
    }

    /// Get the number of branches
    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    /// Slot of `branch`'s declared owner that holds it in its connections
    fn holder_of(&self, branch: &Branch, kind: SlotKind) -> Option<SlotId> {
        if let BranchLink::Resolved { source, dest } = branch.link {
            let slot = match kind {
                SlotKind::Input => dest,
                SlotKind::Output => source,
            };
            if self
                .slots
                .get(&slot)
                .is_some_and(|s| s.connections().contains(branch.id))
            {
                return Some(slot);
            }
        }

        let owner = match kind {
            SlotKind::Input => branch.dest_node,
            SlotKind::Output => branch.source_node,
        };
        let node = self.nodes.get(&owner)?;
        let candidates = match kind {
            SlotKind::Input => node.inputs(),
            SlotKind::Output => node.outputs(),
        };
        candidates.iter().copied().find(|id| {
            self.slots
                .get(id)
                .is_some_and(|s| s.connections().contains(branch.id))
        })
    }

    /// Locate a branch's slots without touching the graph
    fn lookup_link(&self, branch: &Branch) -> Result<(SlotId, SlotId), Diagnostic> {
        if let BranchLink::Resolved { source, dest } = branch.link {
            let holds = |slot: SlotId| {
                self.slots
                    .get(&slot)
                    .is_some_and(|s| s.connections().contains(branch.id))
            };
            if holds(source) && holds(dest) {
                return Ok((source, dest));
            }
            return Err(Diagnostic::StaleBranch {
                branch: branch.id,
                detail: "a connected slot was removed".to_string(),
            });
        }

        for node in [branch.source_node, branch.dest_node] {
            if !self.nodes.contains_key(&node) {
                return Err(Diagnostic::StaleBranch {
                    branch: branch.id,
                    detail: format!("{node} does not exist"),
                });
            }
        }

        let source = self.holder_of(branch, SlotKind::Output).ok_or_else(|| {
            Diagnostic::DeserializationMismatch {
                branch: branch.id,
                detail: format!("no output of {} holds it", branch.source_node),
            }
        })?;
        let dest = self.holder_of(branch, SlotKind::Input).ok_or_else(|| {
            Diagnostic::DeserializationMismatch {
                branch: branch.id,
                detail: format!("no input of {} holds it", branch.dest_node),
            }
        })?;

        let input = &self.slots[&dest];
        let output = &self.slots[&source];
        if !slot::is_connectable(input, output, &self.types) {
            return Err(Diagnostic::DeserializationMismatch {
                branch: branch.id,
                detail: format!(
                    "input '{}' requires {}, output '{}' provides {}",
                    input.name,
                    describe_requirement(input),
                    output.name,
                    describe_type(output.connectable_type()),
                ),
            });
        }
        Ok((source, dest))
    }

    /// Resolve a branch's `(source, dest)` slots, rebuilding a dirty link on
    /// first access. A branch that cannot be resolved is pruned.
    pub(crate) fn endpoints(&mut self, branch_id: BranchId) -> Option<(SlotId, SlotId)> {
        let branch = self.branches.get(&branch_id)?;
        match self.lookup_link(branch) {
            Ok((source, dest)) => {
                if let Some(branch) = self.branches.get_mut(&branch_id) {
                    branch.link = BranchLink::Resolved { source, dest };
                }
                Some((source, dest))
            }
            Err(diagnostic) => {
                self.prune_branch(branch_id, diagnostic);
                None
            }
        }
    }

    /// Resolve a branch's slots without caching or pruning
    pub(crate) fn peek_endpoints(&self, branch_id: BranchId) -> Option<(SlotId, SlotId)> {
        self.lookup_link(self.branches.get(&branch_id)?).ok()
    }

    /// Resolve every dirty link now. Returns how many branches were pruned.
    pub fn resolve_all(&mut self) -> usize {
        let ids: Vec<BranchId> = self.branches.keys().copied().collect();
        ids.into_iter()
            .filter(|id| self.endpoints(*id).is_none())
            .count()
    }

    /// Number of branches whose slot link has not been resolved yet
    pub fn dirty_link_count(&self) -> usize {
        self.branches
            .values()
            .filter(|b| b.link == BranchLink::Dirty)
            .count()
    }

    fn prune_branch(&mut self, branch_id: BranchId, diagnostic: Diagnostic) {
        self.report(diagnostic);
        self.disconnect(branch_id);
    }

    /// React to an input gaining or losing its branch
    fn input_changed(&mut self, dest_node: NodeId, disconnected: bool) {
        match self.node_route(dest_node) {
            Route::ThroughCalculator(_) => self.invalidate_from(dest_node),
            Route::ThroughReroute(_) => {
                if disconnected {
                    if let Some(reroute) = self.reroute(dest_node) {
                        self.clear(reroute.output);
                    }
                } else {
                    self.invalidate_from(dest_node);
                }
            }
            Route::Direct => {}
        }
    }

    // ------------------------------------------------------------------
    // Reroutes
    // ------------------------------------------------------------------

    /// Split a branch with a new reroute node.
    ///
    /// The reroute is typed as the source's connectable type, so both new
    /// branches type-check exactly like the original one.
    pub fn insert_reroute(&mut self, branch_id: BranchId) -> Result<NodeId, ConnectionRejected> {
        let (source, dest) = self
            .endpoints(branch_id)
            .ok_or(ConnectionRejected::BranchNotFound(branch_id))?;
        let declared_type = self
            .slots
            .get(&source)
            .and_then(|s| s.connectable_type().cloned());
        let carried = self
            .branches
            .get(&branch_id)
            .and_then(|b| b.cached_value.clone());

        let reroute_id = self.add_reroute(declared_type);
        let reroute = self
            .reroute(reroute_id)
            .ok_or(ConnectionRejected::NotAReroute(reroute_id))?;
        self.disconnect(branch_id);

        let connected = self
            .connect(reroute.input, source)
            .and_then(|upstream| self.connect(dest, reroute.output).map(|downstream| (upstream, downstream)));

        match connected {
            Ok((upstream, downstream)) => {
                if let Some(value) = carried {
                    let at = self.clock;
                    for id in [upstream, downstream] {
                        if let Some(branch) = self.branches.get_mut(&id) {
                            branch.store(value.clone(), at);
                        }
                    }
                }
                Ok(reroute_id)
            }
            Err(err) => {
                self.remove_node(reroute_id);
                if let Err(restore) = self.connect(dest, source) {
                    tracing::warn!(%restore, "could not restore branch after failed reroute insert");
                }
                Err(err)
            }
        }
    }

    /// Remove a reroute node, connecting its upstream output directly to
    /// every input it fed.
    ///
    /// Pairs that no longer type-check are dropped. Returns the new branches.
    pub fn dissolve_reroute(&mut self, node_id: NodeId) -> Result<Vec<BranchId>, ConnectionRejected> {
        if !self.nodes.contains_key(&node_id) {
            return Err(ConnectionRejected::NodeNotFound(node_id));
        }
        let reroute = self
            .reroute(node_id)
            .ok_or(ConnectionRejected::NotAReroute(node_id))?;

        let upstream_branch = self.slots.get(&reroute.input).and_then(Slot::branch);
        let upstream = upstream_branch
            .and_then(|id| self.endpoints(id))
            .map(|(source, _)| source);

        let downstream_ids = self
            .slots
            .get(&reroute.output)
            .map(Slot::branch_ids)
            .unwrap_or_default();
        let downstream: Vec<SlotId> = downstream_ids
            .into_iter()
            .filter_map(|id| self.endpoints(id).map(|(_, dest)| dest))
            .collect();

        self.remove_node(node_id);

        let Some(source) = upstream else {
            return Ok(Vec::new());
        };
        let mut created = Vec::new();
        for dest in downstream {
            match self.connect(dest, source) {
                Ok(id) => created.push(id),
                Err(err) => tracing::debug!(%dest, %err, "dropped branch while dissolving reroute"),
            }
        }
        Ok(created)
    }

    // ------------------------------------------------------------------
    // Events and diagnostics
    // ------------------------------------------------------------------

    pub(crate) fn emit(&mut self, event: GraphEvent) {
        if self.events.len() >= self.max_pending_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub(crate) fn report(&mut self, diagnostic: Diagnostic) {
        if self.diagnostics.contains(&diagnostic) {
            return;
        }
        match &diagnostic {
            Diagnostic::StaleBranch { .. } => tracing::debug!(%diagnostic, "pruned stale branch"),
            _ => tracing::warn!(%diagnostic, "graph diagnostic"),
        }
        self.diagnostics.push(diagnostic);
    }

    /// Take all pending notifications
    pub fn drain_events(&mut self) -> Vec<GraphEvent> {
        self.events.drain(..).collect()
    }

    /// Pending notifications, oldest first
    pub fn pending_events(&self) -> impl Iterator<Item = &GraphEvent> {
        self.events.iter()
    }

    /// Diagnostics recorded so far
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Take all recorded diagnostics
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

fn describe_type(ty: Option<&TypeId>) -> String {
    ty.map_or_else(|| "an untyped value".to_string(), |ty| format!("'{ty}'"))
}

fn describe_requirement(input: &Slot) -> String {
    let base = describe_type(input.declared_type.as_ref());
    match &input.constraint {
        Some(constraint) => format!("{base} that {constraint}"),
        None => base,
    }
}

/// Reason a connection request was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionRejected {
    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Slot not found
    #[error("Slot not found: {0}")]
    SlotNotFound(SlotId),

    /// Branch not found
    #[error("Branch not found: {0}")]
    BranchNotFound(BranchId),

    /// Endpoints have the wrong directions
    #[error("{input} must be an input and {output} an output")]
    WrongDirection {
        /// Requested input
        input: SlotId,
        /// Requested output
        output: SlotId,
    },

    /// Self-loop not allowed
    #[error("Self-loop not allowed on {0}")]
    SelfLoop(NodeId),

    /// The output's type does not satisfy the input
    #[error("Incompatible types: {input} requires {expected}, {output} provides {found}")]
    IncompatibleTypes {
        /// Requested input
        input: SlotId,
        /// Requested output
        output: SlotId,
        /// What the input requires
        expected: String,
        /// What the output provides
        found: String,
    },

    /// The branch would close a loop
    #[error("Connection would create a cycle")]
    WouldCreateCycle,

    /// Input is already fed by another branch
    #[error("Input already connected: {0}")]
    InputOccupied(SlotId),

    /// A control-flow child can only have one parent
    #[error("{child} already has parent {parent}")]
    AlreadyHasParent {
        /// Requested child
        child: NodeId,
        /// Its current parent
        parent: NodeId,
    },

    /// Operation requires a reroute node
    #[error("{0} is not a reroute")]
    NotAReroute(NodeId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::gameplay::{create_gameplay_registry, create_type_registry};
    use crate::node::NodeRegistry;

    fn setup() -> (Graph, NodeRegistry) {
        let graph = Graph::new("Test", Rc::new(create_type_registry()));
        (graph, create_gameplay_registry())
    }

    fn add(graph: &mut Graph, registry: &NodeRegistry, type_id: &str) -> NodeId {
        graph.add_node(registry.get(type_id).expect("registered node type"))
    }

    #[test]
    fn test_connect_and_disconnect_round_trip() {
        let (mut graph, registry) = setup();
        let source = add(&mut graph, &registry, "int_variable");
        let sink = add(&mut graph, &registry, "set_health");
        let output = graph.output_named(source, "Value").unwrap();
        let input = graph.input_named(sink, "Amount").unwrap();

        let before_in = graph.slot(input).unwrap().branch_ids();
        let before_out = graph.slot(output).unwrap().branch_ids();

        let branch = graph.connect(input, output).unwrap();
        assert_eq!(graph.branch_between(input, output), Some(branch));
        assert!(graph.is_active(output));

        graph.disconnect(branch).unwrap();
        assert_eq!(graph.slot(input).unwrap().branch_ids(), before_in);
        assert_eq!(graph.slot(output).unwrap().branch_ids(), before_out);
        assert!(!graph.is_active(output));
        assert_eq!(graph.branch_count(), 0);
    }

    #[test]
    fn test_input_accepts_a_single_branch() {
        let (mut graph, registry) = setup();
        let a = add(&mut graph, &registry, "int_variable");
        let b = add(&mut graph, &registry, "int_variable");
        let sink = add(&mut graph, &registry, "set_health");
        let input = graph.input_named(sink, "Amount").unwrap();

        graph.connect(input, graph.output_named(a, "Value").unwrap()).unwrap();
        let err = graph
            .connect(input, graph.output_named(b, "Value").unwrap())
            .unwrap_err();
        assert_eq!(err, ConnectionRejected::InputOccupied(input));
        assert_eq!(graph.branch_count(), 1);
    }

    #[test]
    fn test_output_fans_out() {
        let (mut graph, registry) = setup();
        let source = add(&mut graph, &registry, "int_variable");
        let output = graph.output_named(source, "Value").unwrap();
        for _ in 0..3 {
            let sink = add(&mut graph, &registry, "set_health");
            graph
                .connect(graph.input_named(sink, "Amount").unwrap(), output)
                .unwrap();
        }
        assert_eq!(graph.slot(output).unwrap().connections().len(), 3);
    }

    #[test]
    fn test_rejections_leave_graph_unchanged() {
        let (mut graph, registry) = setup();
        let text = add(&mut graph, &registry, "string_variable");
        let sink = add(&mut graph, &registry, "set_health");
        let input = graph.input_named(sink, "Amount").unwrap();
        let output = graph.output_named(text, "Value").unwrap();

        let err = graph.connect(input, output).unwrap_err();
        assert!(matches!(err, ConnectionRejected::IncompatibleTypes { .. }));

        let err = graph.connect(output, input).unwrap_err();
        assert!(matches!(err, ConnectionRejected::WrongDirection { .. }));

        assert_eq!(graph.branch_count(), 0);
        assert!(!graph.slot(input).unwrap().is_connected());
        assert!(graph.drain_events().is_empty());
    }

    #[test]
    fn test_rejected_cycle_keeps_stale_branch_id() {
        let (mut graph, registry) = setup();
        let first = add(&mut graph, &registry, "double");
        let second = add(&mut graph, &registry, "double");
        graph
            .connect(
                graph.input_named(second, "Value").unwrap(),
                graph.output_named(first, "Result").unwrap(),
            )
            .unwrap();

        // An input left naming a branch that no longer exists
        let input = graph.input_named(first, "Value").unwrap();
        assert!(graph.slots.get_mut(&input).unwrap().attach(BranchId(999)));
        graph.drain_events();

        let output = graph.output_named(second, "Result").unwrap();
        let err = graph.connect(input, output).unwrap_err();
        assert_eq!(err, ConnectionRejected::WouldCreateCycle);
        assert_eq!(graph.slot(input).unwrap().branch(), Some(BranchId(999)));
        assert_eq!(graph.branch_count(), 1);
        assert!(graph.pending_events().next().is_none());
        assert!(graph.diagnostics().is_empty());

        // A valid connection still replaces the stale id
        let source = add(&mut graph, &registry, "int_variable");
        let branch = graph
            .connect(input, graph.output_named(source, "Value").unwrap())
            .unwrap();
        assert_eq!(graph.slot(input).unwrap().branch(), Some(branch));
    }

    #[test]
    fn test_self_loop_is_rejected() {
        let (mut graph, registry) = setup();
        let double = add(&mut graph, &registry, "double");
        let input = graph.input_named(double, "Value").unwrap();
        let output = graph.output_named(double, "Result").unwrap();
        assert_eq!(
            graph.connect(input, output).unwrap_err(),
            ConnectionRejected::SelfLoop(double)
        );
    }

    #[test]
    fn test_remove_node_drops_its_branches() {
        let (mut graph, registry) = setup();
        let source = add(&mut graph, &registry, "int_variable");
        let double = add(&mut graph, &registry, "double");
        let sink = add(&mut graph, &registry, "set_health");
        graph
            .connect(
                graph.input_named(double, "Value").unwrap(),
                graph.output_named(source, "Value").unwrap(),
            )
            .unwrap();
        graph
            .connect(
                graph.input_named(sink, "Amount").unwrap(),
                graph.output_named(double, "Result").unwrap(),
            )
            .unwrap();

        graph.remove_node(double).unwrap();
        assert_eq!(graph.branch_count(), 0);
        assert!(!graph.is_active(graph.output_named(source, "Value").unwrap()));
        assert!(!graph.slot(graph.input_named(sink, "Amount").unwrap()).unwrap().is_connected());
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_type_change_prunes_invalid_branches() {
        let (mut graph, registry) = setup();
        let source = add(&mut graph, &registry, "int_variable");
        let sink = add(&mut graph, &registry, "log_value");
        let output = graph.output_named(source, "Value").unwrap();
        let input = graph.input_named(sink, "Value").unwrap();
        let branch = graph.connect(input, output).unwrap();

        // Still fine: int satisfies float through a conversion
        assert!(graph.set_declared_type(input, Some("float".into())).is_empty());

        let pruned = graph.set_declared_type(input, Some("Transform".into()));
        assert_eq!(pruned, vec![branch]);
        assert!(graph.branch(branch).is_none());
        assert!(matches!(
            graph.diagnostics(),
            [Diagnostic::TypeChanged { slot, .. }] if *slot == input
        ));
    }

    #[test]
    fn test_insert_and_dissolve_reroute() {
        let (mut graph, registry) = setup();
        let source = add(&mut graph, &registry, "int_variable");
        let sink = add(&mut graph, &registry, "set_health");
        let output = graph.output_named(source, "Value").unwrap();
        let input = graph.input_named(sink, "Amount").unwrap();
        let branch = graph.connect(input, output).unwrap();

        let reroute = graph.insert_reroute(branch).unwrap();
        assert!(graph.branch(branch).is_none());
        assert_eq!(graph.branch_count(), 2);
        let pair = graph.node(reroute).unwrap().as_reroute().unwrap();
        assert_eq!(
            graph.slot(pair.input).unwrap().declared_type,
            Some(TypeId::new("int"))
        );

        let created = graph.dissolve_reroute(reroute).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(graph.branch_between(input, output), Some(created[0]));
        assert!(graph.node(reroute).is_none());
    }

    #[test]
    fn test_dissolve_requires_reroute() {
        let (mut graph, registry) = setup();
        let source = add(&mut graph, &registry, "int_variable");
        assert_eq!(
            graph.dissolve_reroute(source).unwrap_err(),
            ConnectionRejected::NotAReroute(source)
        );
    }

    #[test]
    fn test_events_are_bounded() {
        let types = Rc::new(create_type_registry());
        let settings = EngineSettings {
            max_pending_events: 2,
            ..EngineSettings::default()
        };
        let mut graph = Graph::with_settings("Bounded", types, &settings);
        let registry = create_gameplay_registry();
        let source = add(&mut graph, &registry, "int_variable");
        let output = graph.output_named(source, "Value").unwrap();
        for _ in 0..3 {
            let sink = add(&mut graph, &registry, "set_health");
            graph
                .connect(graph.input_named(sink, "Amount").unwrap(), output)
                .unwrap();
        }

        let events = graph.drain_events();
        assert_eq!(events.len(), 2);
        assert!(graph.pending_events().next().is_none());
    }
}
