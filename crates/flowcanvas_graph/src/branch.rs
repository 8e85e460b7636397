// SPDX-License-Identifier: MIT OR Apache-2.0
//! Branch (edge) definitions for the graph.

use crate::id::{BranchId, NodeId, SlotId};
use crate::value::DynValue;
use serde::{Deserialize, Serialize};

/// Logical time of a write: the frame it happened in and a sequence number
/// that increases with every write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Frame counter, advanced by `Graph::tick`
    pub frame: u64,
    /// Write counter across the graph's lifetime
    pub sequence: u64,
}

/// Association between a branch and its slot objects.
///
/// Loaded branches start out `Dirty` and are resolved on first access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BranchLink {
    /// Not yet resolved
    #[default]
    Dirty,
    /// Resolved to concrete slots
    Resolved {
        /// Output slot feeding the branch
        source: SlotId,
        /// Input slot reading the branch
        dest: SlotId,
    },
}

/// How a branch obtains the value it carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The source output is written by the host
    Direct,
    /// The source output belongs to a calculator that may need recomputing
    ThroughCalculator(NodeId),
    /// The source output mirrors a reroute's input
    ThroughReroute(NodeId),
}

/// A directed edge from one output slot to one input slot
#[derive(Debug, Clone)]
pub struct Branch {
    /// Unique branch ID
    pub id: BranchId,
    /// Node owning the source slot
    pub source_node: NodeId,
    /// Node owning the destination slot
    pub dest_node: NodeId,
    pub(crate) link: BranchLink,
    pub(crate) cached_value: Option<DynValue>,
    pub(crate) is_used: bool,
    pub(crate) updated_at: Timestamp,
}

impl Branch {
    /// Create a branch whose slots are already known
    pub(crate) fn resolved(
        id: BranchId,
        source_node: NodeId,
        source: SlotId,
        dest_node: NodeId,
        dest: SlotId,
    ) -> Self {
        Self {
            id,
            source_node,
            dest_node,
            link: BranchLink::Resolved { source, dest },
            cached_value: None,
            is_used: false,
            updated_at: Timestamp::default(),
        }
    }

    /// Create a branch from saved ids; slots are found on first access
    pub(crate) fn unresolved(id: BranchId, source_node: NodeId, dest_node: NodeId) -> Self {
        Self {
            id,
            source_node,
            dest_node,
            link: BranchLink::Dirty,
            cached_value: None,
            is_used: false,
            updated_at: Timestamp::default(),
        }
    }

    /// Current link state
    pub fn link(&self) -> BranchLink {
        self.link
    }

    /// Resolved `(source, dest)` slots, if the link is resolved
    pub fn endpoints(&self) -> Option<(SlotId, SlotId)> {
        match self.link {
            BranchLink::Resolved { source, dest } => Some((source, dest)),
            BranchLink::Dirty => None,
        }
    }

    /// Last value carried by this branch
    pub fn cached_value(&self) -> Option<&DynValue> {
        self.cached_value.as_ref()
    }

    /// Whether the branch currently holds a valid value
    pub fn is_used(&self) -> bool {
        self.is_used
    }

    /// Time of the last write
    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    /// Check if this branch involves a specific node
    pub fn involves_node(&self, node_id: NodeId) -> bool {
        self.source_node == node_id || self.dest_node == node_id
    }

    pub(crate) fn store(&mut self, value: DynValue, at: Timestamp) {
        self.cached_value = Some(value);
        self.is_used = true;
        self.updated_at = self.updated_at.max(at);
    }

    pub(crate) fn reset(&mut self, at: Timestamp) {
        self.cached_value = None;
        self.is_used = false;
        self.updated_at = self.updated_at.max(at);
    }

    /// Copy the state of an upstream branch (reroute forwarding)
    pub(crate) fn mirror(&mut self, value: Option<DynValue>, at: Timestamp) {
        match value {
            Some(value) => self.store(value, at),
            None => self.reset(at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_reset() {
        let mut branch = Branch::resolved(BranchId(1), NodeId(2), SlotId(3), NodeId(4), SlotId(5));
        assert!(!branch.is_used());

        let at = Timestamp { frame: 1, sequence: 1 };
        branch.store(DynValue::Int(3), at);
        assert!(branch.is_used());
        assert_eq!(branch.cached_value(), Some(&DynValue::Int(3)));
        assert_eq!(branch.updated_at(), at);

        branch.reset(Timestamp { frame: 1, sequence: 2 });
        assert!(!branch.is_used());
        assert_eq!(branch.cached_value(), None);
    }

    #[test]
    fn test_updated_at_never_goes_back() {
        let mut branch = Branch::unresolved(BranchId(1), NodeId(2), NodeId(3));
        branch.store(DynValue::Bool(true), Timestamp { frame: 5, sequence: 9 });
        branch.store(DynValue::Bool(false), Timestamp { frame: 5, sequence: 4 });
        assert_eq!(branch.updated_at(), Timestamp { frame: 5, sequence: 9 });
    }

    #[test]
    fn test_unresolved_has_no_endpoints() {
        let branch = Branch::unresolved(BranchId(1), NodeId(2), NodeId(3));
        assert_eq!(branch.link(), BranchLink::Dirty);
        assert!(branch.endpoints().is_none());
        assert!(branch.involves_node(NodeId(3)));
    }
}
