// SPDX-License-Identifier: MIT OR Apache-2.0
//! Notifications and diagnostics emitted by a graph.

use crate::branch::Timestamp;
use crate::id::{BranchId, NodeId, SlotId};
use thiserror::Error;

/// Notification for the host, drained with `Graph::drain_events`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    /// A value was written to (or cleared from) an output
    StateChanged {
        /// Output that was written
        slot: SlotId,
        /// Time of the write
        at: Timestamp,
    },
    /// A branch was created or removed
    ConnectionChanged {
        /// Affected branch
        branch: BranchId,
        /// `true` when created, `false` when removed
        connected: bool,
    },
}

/// Self-healing problems found while editing or evaluating.
///
/// None of these stop the graph; each is recorded once and the offending
/// branch or node is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    /// A branch points at a node or slot that no longer exists
    #[error("{branch} references a missing endpoint: {detail}")]
    StaleBranch {
        /// Pruned branch
        branch: BranchId,
        /// What was missing
        detail: String,
    },

    /// A loaded branch does not fit the slots it was saved with
    #[error("{branch} no longer matches its slots after load: {detail}")]
    DeserializationMismatch {
        /// Pruned branch
        branch: BranchId,
        /// Why it was dropped
        detail: String,
    },

    /// A loaded node's type is not registered
    #[error("{node} has unknown type '{node_type}'")]
    UnknownNodeType {
        /// Dropped node
        node: NodeId,
        /// Missing type name
        node_type: String,
    },

    /// A loaded node field could not be read
    #[error("{node} field '{field}' was ignored: {detail}")]
    InvalidField {
        /// Node owning the field
        node: NodeId,
        /// Field name
        field: String,
        /// Parse error
        detail: String,
    },

    /// A branch stopped type-checking after an endpoint's type changed
    #[error("{branch} was dropped because {slot} changed type")]
    TypeChanged {
        /// Pruned branch
        branch: BranchId,
        /// Slot whose type changed
        slot: SlotId,
    },

    /// Evaluation reached a node that is already being evaluated
    #[error("cyclic dependency reached while evaluating {node}")]
    CyclicEvaluation {
        /// Node that closed the cycle
        node: NodeId,
    },
}

impl Diagnostic {
    /// Branch this diagnostic is about, if any
    pub fn branch(&self) -> Option<BranchId> {
        match self {
            Self::StaleBranch { branch, .. }
            | Self::DeserializationMismatch { branch, .. }
            | Self::TypeChanged { branch, .. } => Some(*branch),
            Self::UnknownNodeType { .. } | Self::InvalidField { .. } | Self::CyclicEvaluation { .. } => None,
        }
    }
}
