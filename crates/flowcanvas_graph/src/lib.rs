// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed dataflow graph engine for `FlowCanvas`.
//!
//! Nodes expose typed input and output slots. Branches connect one output to
//! one input and cache the last value that crossed them. Calculator nodes
//! derive outputs from inputs on demand; reroute nodes are typed
//! pass-through points that behave exactly like the branch they split.
//!
//! ## Architecture
//!
//! - Nodes, slots and branches live in id-keyed arenas owned by [`Graph`]
//! - Connections are validated against a [`TypeRegistry`] and checked for loops
//! - Reads pull through reroutes and recompute dirty calculators; writes push
//! - Documents store ids only and rebuild slot links lazily after load

pub mod branch;
pub mod connectivity;
pub mod diagnostics;
pub mod evaluation;
pub mod graph;
pub mod graphs;
pub mod id;
pub mod migration;
pub mod node;
pub mod persistence;
pub mod settings;
pub mod slot;
pub mod types;
pub mod value;

pub use branch::{Branch, BranchLink, Route, Timestamp};
pub use connectivity::CycleError;
pub use diagnostics::{Diagnostic, GraphEvent};
pub use graph::{ConnectionRejected, Graph};
pub use id::{BranchId, NodeId, SlotId};
pub use migration::{FieldMap, Migration, MigrationError};
pub use node::{Calculation, Node, NodeCategory, NodeKind, NodeRegistry, NodeTypeDef, Parameter};
pub use persistence::{DocumentFormat, GraphDocument, PersistenceError};
pub use settings::EngineSettings;
pub use slot::{Slot, SlotDescriptor, SlotKind};
pub use types::{Constraint, TypeId, TypeRegistry};
pub use value::{DynValue, FromValue, ObjectRef};
