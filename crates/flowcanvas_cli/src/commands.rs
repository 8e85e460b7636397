// SPDX-License-Identifier: MIT OR Apache-2.0
//! Subcommand implementations.

use flowcanvas_graph::graphs::gameplay::{create_gameplay_registry, create_type_registry};
use flowcanvas_graph::{
    Diagnostic, DynValue, EngineSettings, Graph, GraphDocument, NodeId, PersistenceError,
    SlotId,
};
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::str::FromStr;
use thiserror::Error;

/// Errors reported by the command line host
#[derive(Debug, Error)]
pub enum CliError {
    /// Loading or saving failed
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// No node with that name or id
    #[error("no node named '{0}'")]
    UnknownNode(String),

    /// The node has no such slot
    #[error("node '{node}' has no {direction} named '{slot}'")]
    UnknownSlot {
        /// Node as given on the command line
        node: String,
        /// Slot name
        slot: String,
        /// "input" or "output"
        direction: &'static str,
    },
}

/// `node.slot` reference given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPath {
    /// Node display name, or `node#N`
    pub node: String,
    /// Slot name
    pub slot: String,
}

impl FromStr for SlotPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (node, slot) = s
            .rsplit_once('.')
            .ok_or_else(|| format!("expected NODE.SLOT, got '{s}'"))?;
        if node.is_empty() || slot.is_empty() {
            return Err(format!("expected NODE.SLOT, got '{s}'"));
        }
        Ok(Self {
            node: node.to_string(),
            slot: slot.to_string(),
        })
    }
}

impl fmt::Display for SlotPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.slot)
    }
}

/// `node.slot=value` write given on the command line
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Output to write
    pub target: SlotPath,
    /// Value to write
    pub value: DynValue,
}

impl FromStr for Assignment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (target, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected NODE.SLOT=VALUE, got '{s}'"))?;
        Ok(Self {
            target: target.parse()?,
            value: DynValue::parse(value),
        })
    }
}

/// Outcome of `check`
#[derive(Debug)]
pub struct CheckReport {
    /// Graph name
    pub name: String,
    /// Node count after load
    pub nodes: usize,
    /// Branch count after pruning
    pub branches: usize,
    /// Problems found while loading and resolving
    pub diagnostics: Vec<Diagnostic>,
    /// Whether branches form a dataflow loop
    pub has_cycle: bool,
}

impl CheckReport {
    /// No diagnostics and no loop
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty() && !self.has_cycle
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} node(s), {} branch(es)",
            self.name, self.nodes, self.branches
        )?;
        for diagnostic in &self.diagnostics {
            writeln!(f, "  - {diagnostic}")?;
        }
        if self.has_cycle {
            writeln!(f, "  - dataflow loop detected")?;
        }
        if self.is_clean() {
            writeln!(f, "  ok")?;
        }
        Ok(())
    }
}

fn load(path: &Path, settings: &EngineSettings) -> Result<Graph, CliError> {
    let registry = create_gameplay_registry();
    Ok(Graph::load_file(
        path,
        Rc::new(create_type_registry()),
        &registry,
        settings,
    )?)
}

/// Load a graph with every branch resolved and report what was dropped
pub fn check(path: &Path, settings: &EngineSettings) -> Result<CheckReport, CliError> {
    let settings = EngineSettings {
        resolve_links_eagerly: true,
        ..settings.clone()
    };
    let mut graph = load(path, &settings)?;

    Ok(CheckReport {
        name: graph.name.clone(),
        nodes: graph.node_count(),
        branches: graph.branch_count(),
        has_cycle: graph.has_data_cycle(),
        diagnostics: graph.take_diagnostics(),
    })
}

/// Upgrade `input` and write it to `output`. Returns how many nodes changed.
pub fn migrate(input: &Path, output: &Path, settings: &EngineSettings) -> Result<usize, CliError> {
    let registry = create_gameplay_registry();
    let mut document = GraphDocument::load_as(input, settings.format_for(input))?;
    let migrated = document.migrate(&registry)?;

    let graph = Graph::from_document(
        document,
        Rc::new(create_type_registry()),
        &registry,
        settings,
    )?;
    graph.save_file(output, settings.format_for(output))?;
    tracing::info!(input = %input.display(), output = %output.display(), migrated, "migrated graph");
    Ok(migrated)
}

/// Apply `writes` in order, then read each of `reads`
pub fn eval(
    path: &Path,
    writes: &[Assignment],
    reads: &[SlotPath],
    settings: &EngineSettings,
) -> Result<Vec<(SlotPath, Option<DynValue>)>, CliError> {
    let mut graph = load(path, settings)?;
    graph.tick();

    for write in writes {
        let output = find_slot(&graph, &write.target, false)?;
        graph.write(output, write.value.clone());
    }

    reads
        .iter()
        .map(|path| {
            let input = find_slot(&graph, path, true)?;
            Ok((path.clone(), graph.read(input)))
        })
        .collect()
}

fn find_node(graph: &Graph, name: &str) -> Option<NodeId> {
    let by_id = name
        .strip_prefix("node#")
        .and_then(|raw| raw.parse().ok())
        .map(NodeId)
        .filter(|id| graph.node(*id).is_some());
    by_id.or_else(|| graph.find_node(name))
}

fn find_slot(graph: &Graph, path: &SlotPath, input: bool) -> Result<SlotId, CliError> {
    let node = find_node(graph, &path.node).ok_or_else(|| CliError::UnknownNode(path.node.clone()))?;
    let slot = if input {
        graph.input_named(node, &path.slot)
    } else {
        graph.output_named(node, &path.slot)
    };
    slot.ok_or_else(|| CliError::UnknownSlot {
        node: path.node.clone(),
        slot: path.slot.clone(),
        direction: if input { "input" } else { "output" },
    })
}
