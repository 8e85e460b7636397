// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable identifiers for graph elements.
//!
//! Ids are the only identity that survives a save/load cycle. Every cross
//! reference inside the graph is stored as one of these and resolved through
//! the graph's arenas.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Largest raw id a saved document may use. Anything above it could push the
/// counter past `u64::MAX`.
pub const MAX_ID: u64 = i64::MAX as u64;

/// A saved id the counter cannot reserve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("id {0} is larger than the largest supported id {max}", max = MAX_ID)]
pub struct IdOutOfRange(pub u64);

macro_rules! graph_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Get the raw ID value
            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

graph_id!(
    /// Unique identifier for a node
    NodeId,
    "node"
);

graph_id!(
    /// Unique identifier for a slot
    SlotId,
    "slot"
);

graph_id!(
    /// Unique identifier for a branch
    BranchId,
    "branch"
);

/// Monotonic id source shared by nodes, slots and branches of one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdCounter {
    next: u64,
}

impl IdCounter {
    /// Create a counter that starts at 1
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// The next raw value that will be handed out
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Make sure the counter never hands out `raw` again.
    ///
    /// Used when ids are read back from a saved document.
    pub fn observe(&mut self, raw: u64) -> Result<(), IdOutOfRange> {
        let after = raw
            .checked_add(1)
            .filter(|_| raw <= MAX_ID)
            .ok_or(IdOutOfRange(raw))?;
        self.next = self.next.max(after);
        Ok(())
    }

    fn bump(&mut self) -> u64 {
        let raw = self.next;
        self.next += 1;
        raw
    }

    /// Allocate a node id
    pub fn node(&mut self) -> NodeId {
        NodeId(self.bump())
    }

    /// Allocate a slot id
    pub fn slot(&mut self) -> SlotId {
        SlotId(self.bump())
    }

    /// Allocate a branch id
    pub fn branch(&mut self) -> BranchId {
        BranchId(self.bump())
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}
