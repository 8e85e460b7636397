// SPDX-License-Identifier: MIT OR Apache-2.0
//! Saving and loading graphs.
//!
//! A [`GraphDocument`] stores ids only. On load, slots are rebuilt from the
//! current node registry and matched to the saved ones by name; branches start
//! with a dirty link and find their slots on first access, so the order in
//! which things are reconstructed does not matter. A branch that no longer
//! fits is pruned then and reported once.

use crate::branch::{Branch, Timestamp};
use crate::diagnostics::Diagnostic;
use crate::graph::Graph;
use crate::id::{BranchId, IdOutOfRange, NodeId, SlotId};
use crate::migration::{migrate_fields, FieldMap, MigrationError};
use crate::node::{
    CalculatorNode, HostNode, Node, NodeBehavior, NodeKind, NodeRegistry, Parameter, RerouteNode,
    REROUTE_TYPE,
};
use crate::settings::EngineSettings;
use crate::slot::{Slot, SlotDescriptor, SlotKind};
use crate::types::{TypeId, TypeRegistry};
use crate::value::DynValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;
use uuid::Uuid;

/// Current document format version
pub const DOCUMENT_FORMAT_VERSION: u32 = 1;

/// On-disk encoding of a document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    /// Rusty Object Notation, pretty printed
    #[default]
    Ron,
    /// JSON, pretty printed
    Json,
}

impl DocumentFormat {
    /// Format named by a file extension, if it names one
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("json") {
            Some(Self::Json)
        } else if ext.eq_ignore_ascii_case("ron") {
            Some(Self::Ron)
        } else {
            None
        }
    }

    /// Pick a format from a file extension; anything but `.json` is RON
    pub fn from_path(path: &Path) -> Self {
        Self::from_extension(path).unwrap_or_default()
    }

    /// Conventional file extension
    pub fn extension(self) -> &'static str {
        match self {
            Self::Ron => "ron",
            Self::Json => "json",
        }
    }
}

/// Saved slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRecord {
    /// Slot id
    pub id: SlotId,
    /// Slot name, used to match the slot on load
    pub name: String,
    /// Attached branch ids
    #[serde(default)]
    pub branches: Vec<BranchId>,
    /// Declared type; only saved for reroutes, other nodes take it from
    /// their node type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_type: Option<TypeId>,
    /// Advertised type override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_override: Option<TypeId>,
}

/// Saved node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node id
    pub id: NodeId,
    /// Node type name
    pub node_type: String,
    /// Display name
    pub name: String,
    /// Version the fields were written at
    #[serde(default)]
    pub version: u32,
    /// Serialized parameters, possibly in a legacy layout
    #[serde(default)]
    pub fields: FieldMap,
    /// Input slots
    #[serde(default)]
    pub inputs: Vec<SlotRecord>,
    /// Output slots
    #[serde(default)]
    pub outputs: Vec<SlotRecord>,
}

/// Saved branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRecord {
    /// Branch id
    pub id: BranchId,
    /// Node owning the source output
    pub source_node: NodeId,
    /// Node owning the destination input
    pub dest_node: NodeId,
    /// Last carried value
    #[serde(default)]
    pub cached_value: Option<DynValue>,
    /// Whether the cached value was valid
    #[serde(default)]
    pub is_used: bool,
    /// Time of the last write
    #[serde(default)]
    pub updated_at: Timestamp,
}

/// Saved control-flow link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlLinkRecord {
    /// Parent node
    pub parent: NodeId,
    /// Child node
    pub child: NodeId,
}

/// Serializable form of a [`Graph`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Document format version
    pub format_version: u32,
    /// Graph identity
    pub guid: Uuid,
    /// Graph name
    pub name: String,
    /// Next id the graph would allocate
    pub next_id: u64,
    /// Nodes
    pub nodes: Vec<NodeRecord>,
    /// Branches
    pub branches: Vec<BranchRecord>,
    /// Control-flow links
    #[serde(default)]
    pub control_links: Vec<ControlLinkRecord>,
}

impl GraphDocument {
    fn check_version(&self) -> Result<(), PersistenceError> {
        if self.format_version > DOCUMENT_FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: self.format_version,
                supported: DOCUMENT_FORMAT_VERSION,
            });
        }
        Ok(())
    }

    /// Bring every node's fields up to its type's current version.
    ///
    /// Returns the number of nodes that were upgraded. Nodes of unknown types
    /// are left alone.
    pub fn migrate(&mut self, registry: &NodeRegistry) -> Result<usize, PersistenceError> {
        self.check_version()?;

        let mut migrated = 0;
        for record in &mut self.nodes {
            let Some(def) = registry.get(&record.node_type) else {
                continue;
            };
            if record.version == def.current_version() {
                continue;
            }
            record.version = migrate_fields(def, record.version, &mut record.fields)
                .map_err(|source| PersistenceError::Migration {
                    node: record.id,
                    source,
                })?;
            migrated += 1;
        }
        Ok(migrated)
    }

    /// Serialize to pretty RON
    pub fn to_ron(&self) -> Result<String, PersistenceError> {
        Ok(ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?)
    }

    /// Parse from RON
    pub fn from_ron(content: &str) -> Result<Self, PersistenceError> {
        Ok(ron::from_str(content)?)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON
    pub fn from_json(content: &str) -> Result<Self, PersistenceError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Serialize in the given format
    pub fn encode(&self, format: DocumentFormat) -> Result<String, PersistenceError> {
        match format {
            DocumentFormat::Ron => self.to_ron(),
            DocumentFormat::Json => self.to_json(),
        }
    }

    /// Parse in the given format
    pub fn decode(content: &str, format: DocumentFormat) -> Result<Self, PersistenceError> {
        match format {
            DocumentFormat::Ron => Self::from_ron(content),
            DocumentFormat::Json => Self::from_json(content),
        }
    }

    /// Write to a file
    pub fn save(&self, path: &Path, format: DocumentFormat) -> Result<(), PersistenceError> {
        std::fs::write(path, self.encode(format)?)?;
        tracing::debug!(path = %path.display(), ?format, "saved graph document");
        Ok(())
    }

    /// Read from a file, choosing the format by extension
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        Self::load_as(path, DocumentFormat::from_path(path))
    }

    /// Read from a file in a known format
    pub fn load_as(path: &Path, format: DocumentFormat) -> Result<Self, PersistenceError> {
        let content = std::fs::read_to_string(path)?;
        Self::decode(&content, format)
    }
}

impl Graph {
    /// Capture the graph as a document
    pub fn to_document(&self) -> Result<GraphDocument, PersistenceError> {
        let nodes = self
            .nodes
            .values()
            .map(|node| self.node_record(node))
            .collect::<Result<Vec<_>, _>>()?;

        let branches = self
            .branches
            .values()
            .map(|branch| BranchRecord {
                id: branch.id,
                source_node: branch.source_node,
                dest_node: branch.dest_node,
                cached_value: branch.cached_value.clone(),
                is_used: branch.is_used,
                updated_at: branch.updated_at,
            })
            .collect();

        let control_links = self
            .control_links()
            .map(|(parent, child)| ControlLinkRecord { parent, child })
            .collect();

        Ok(GraphDocument {
            format_version: DOCUMENT_FORMAT_VERSION,
            guid: self.guid,
            name: self.name.clone(),
            next_id: self.ids.peek(),
            nodes,
            branches,
            control_links,
        })
    }

    fn node_record(&self, node: &Node) -> Result<NodeRecord, serde_json::Error> {
        let mut fields = FieldMap::new();
        for (name, parameter) in &node.parameters {
            fields.insert(name.clone(), serde_json::to_value(parameter)?);
        }

        let record = |id: &SlotId| {
            self.slots.get(id).map(|slot| SlotRecord {
                id: slot.id,
                name: slot.name.clone(),
                branches: slot.branch_ids(),
                declared_type: if node.is_reroute() {
                    slot.declared_type.clone()
                } else {
                    None
                },
                type_override: slot.type_override.clone(),
            })
        };

        Ok(NodeRecord {
            id: node.id,
            node_type: node.node_type.clone(),
            name: node.name.clone(),
            version: node.version,
            fields,
            inputs: node.inputs().iter().filter_map(|id| record(id)).collect(),
            outputs: node.outputs().iter().filter_map(|id| record(id)).collect(),
        })
    }

    /// Rebuild a graph from a document.
    ///
    /// Problems with individual nodes and branches are recorded as
    /// diagnostics and the offending parts dropped; only an unreadable
    /// document or a failing migration stops the load.
    pub fn from_document(
        document: GraphDocument,
        types: Rc<TypeRegistry>,
        registry: &NodeRegistry,
        settings: &EngineSettings,
    ) -> Result<Self, PersistenceError> {
        document.check_version()?;
        let GraphDocument {
            guid,
            name,
            next_id,
            nodes,
            branches,
            control_links,
            ..
        } = document;

        let mut graph = Graph::with_settings(name, types, settings);
        graph.guid = guid;

        // Reserve every saved id before handing out new ones
        graph.ids.observe(next_id.saturating_sub(1))?;
        for record in &nodes {
            graph.ids.observe(record.id.value())?;
            for slot in record.inputs.iter().chain(&record.outputs) {
                graph.ids.observe(slot.id.value())?;
            }
        }
        for record in &branches {
            graph.ids.observe(record.id.value())?;
        }

        for record in nodes {
            if let Some((node, slots)) = graph.restore_node(record, registry)? {
                graph.insert_loaded_node(node, slots);
            }
        }

        for record in branches {
            let mut branch = Branch::unresolved(record.id, record.source_node, record.dest_node);
            branch.is_used = record.is_used && record.cached_value.is_some();
            branch.cached_value = record.cached_value;
            branch.updated_at = record.updated_at;
            graph.clock = graph.clock.max(record.updated_at);
            graph.insert_loaded_branch(branch);
        }

        graph.scrub_dangling_ids();

        for link in control_links {
            if let Err(err) = graph.link_child(link.parent, link.child) {
                tracing::debug!(parent = %link.parent, child = %link.child, %err, "dropped control link");
            }
        }

        if settings.resolve_links_eagerly {
            graph.resolve_all();
        }

        tracing::info!(
            graph = %graph.name,
            nodes = graph.node_count(),
            branches = graph.branch_count(),
            diagnostics = graph.diagnostics().len(),
            "loaded graph"
        );
        Ok(graph)
    }

    /// Save to a file
    pub fn save_file(&self, path: &Path, format: DocumentFormat) -> Result<(), PersistenceError> {
        self.to_document()?.save(path, format)
    }

    /// Load from a file, choosing the format by extension or `settings.save_format`
    pub fn load_file(
        path: &Path,
        types: Rc<TypeRegistry>,
        registry: &NodeRegistry,
        settings: &EngineSettings,
    ) -> Result<Self, PersistenceError> {
        let document = GraphDocument::load_as(path, settings.format_for(path))?;
        Self::from_document(document, types, registry, settings)
    }

    fn restore_node(
        &mut self,
        record: NodeRecord,
        registry: &NodeRegistry,
    ) -> Result<Option<(Node, Vec<Slot>)>, PersistenceError> {
        if record.node_type == REROUTE_TYPE {
            return Ok(Some(self.restore_reroute(record)));
        }

        let Some(def) = registry.get(&record.node_type) else {
            self.report(Diagnostic::UnknownNodeType {
                node: record.id,
                node_type: record.node_type,
            });
            return Ok(None);
        };

        let mut fields = record.fields;
        let version = migrate_fields(def, record.version, &mut fields).map_err(|source| {
            PersistenceError::Migration {
                node: record.id,
                source,
            }
        })?;

        let mut parameters = def.parameters.clone();
        for (field, value) in fields {
            match serde_json::from_value::<Parameter>(value) {
                Ok(parameter) => {
                    parameters.insert(field, parameter);
                }
                Err(err) => self.report(Diagnostic::InvalidField {
                    node: record.id,
                    field,
                    detail: err.to_string(),
                }),
            }
        }

        let inputs: Vec<Slot> = def
            .inputs
            .iter()
            .map(|d| self.restore_slot(record.id, SlotKind::Input, d, &record.inputs))
            .collect();
        let outputs: Vec<Slot> = def
            .outputs
            .iter()
            .map(|d| self.restore_slot(record.id, SlotKind::Output, d, &record.outputs))
            .collect();

        let input_ids = inputs.iter().map(|s| s.id).collect();
        let output_ids = outputs.iter().map(|s| s.id).collect();
        let kind = match &def.behavior {
            NodeBehavior::Host => NodeKind::Host(HostNode {
                inputs: input_ids,
                outputs: output_ids,
            }),
            NodeBehavior::Calculator(calculation) => NodeKind::Calculator(CalculatorNode {
                inputs: input_ids,
                outputs: output_ids,
                dirty: true,
                calculation: Rc::clone(calculation),
            }),
        };

        let node = Node {
            id: record.id,
            node_type: record.node_type,
            name: record.name,
            version,
            parameters,
            kind,
        };
        Ok(Some((node, inputs.into_iter().chain(outputs).collect())))
    }

    fn restore_reroute(&mut self, record: NodeRecord) -> (Node, Vec<Slot>) {
        let declared_type = record
            .inputs
            .iter()
            .chain(&record.outputs)
            .find_map(|s| s.declared_type.clone());

        let mut input = self.restore_slot(
            record.id,
            SlotKind::Input,
            &SlotDescriptor::new("In", declared_type.clone()),
            &record.inputs,
        );
        let mut output = self.restore_slot(
            record.id,
            SlotKind::Output,
            &SlotDescriptor::new("Out", declared_type),
            &record.outputs,
        );
        input.mirror = Some(output.id);
        output.mirror = Some(input.id);

        let node = Node {
            id: record.id,
            node_type: REROUTE_TYPE.to_string(),
            name: record.name,
            version: 0,
            parameters: IndexMap::new(),
            kind: NodeKind::Reroute(RerouteNode {
                input: input.id,
                output: output.id,
            }),
        };
        (node, vec![input, output])
    }

    /// Build a slot from its current descriptor, taking id and branches from
    /// the saved slot of the same name
    fn restore_slot(
        &mut self,
        owner: NodeId,
        kind: SlotKind,
        descriptor: &SlotDescriptor,
        saved: &[SlotRecord],
    ) -> Slot {
        let saved = saved.iter().find(|s| s.name == descriptor.name);
        let id = saved.map_or_else(|| self.ids.slot(), |s| s.id);
        let mut slot = Slot::new(id, owner, kind, descriptor.clone());
        if let Some(saved) = saved {
            slot.type_override = saved.type_override.clone();
            for branch in &saved.branches {
                if !slot.attach(*branch) {
                    tracing::debug!(slot = %id, %branch, "ignored extra branch on input");
                }
            }
        }
        slot
    }

    /// Drop slot references to branches the document does not contain and
    /// rebuild the active output registry
    fn scrub_dangling_ids(&mut self) {
        let mut dangling = Vec::new();
        for slot in self.slots.values() {
            for id in slot.branch_ids() {
                if !self.branches.contains_key(&id) {
                    dangling.push((slot.id, id));
                }
            }
        }
        for (slot_id, branch) in dangling {
            tracing::debug!(slot = %slot_id, %branch, "dropped reference to missing branch");
            if let Some(slot) = self.slots.get_mut(&slot_id) {
                slot.detach(branch);
            }
        }

        self.active_outputs = self
            .slots
            .values()
            .filter(|s| s.is_output() && s.is_connected())
            .map(|s| s.id)
            .collect();
    }
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// RON serialization error
    #[error("RON error: {0}")]
    Ron(#[from] ron::Error),

    /// RON parse error
    #[error("RON parse error: {0}")]
    RonParse(#[from] ron::error::SpannedError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Document written by a newer build
    #[error("document version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version in the document
        found: u32,
        /// Newest supported version
        supported: u32,
    },

    /// The document uses an id the graph cannot reserve
    #[error("invalid document: {0}")]
    IdOutOfRange(#[from] IdOutOfRange),

    /// A node's fields could not be upgraded
    #[error("failed to migrate {node}: {source}")]
    Migration {
        /// Node whose fields failed
        node: NodeId,
        /// Underlying failure
        #[source]
        source: MigrationError,
    },
}
