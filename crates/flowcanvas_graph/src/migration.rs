// SPDX-License-Identifier: MIT OR Apache-2.0
//! Linear version migrations for a node's serialized fields.
//!
//! Each node type carries an ordered list of steps; step `n` upgrades the
//! field map from version `n` to `n + 1`. A node saved at version `v` runs
//! steps `v..current` exactly once at load.

use crate::node::NodeTypeDef;
use thiserror::Error;

/// Raw serialized fields of a node
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// One upgrade step
pub type Migration = fn(&mut FieldMap) -> Result<(), MigrationError>;

/// Migration errors
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Saved by a newer build than this one
    #[error("node type '{node_type}' was saved at version {found}, newest supported is {supported}")]
    NewerThanSupported {
        /// Node type name
        node_type: String,
        /// Version in the document
        found: u32,
        /// Current version of the node type
        supported: u32,
    },

    /// A legacy field has an unexpected shape
    #[error("field '{field}': {reason}")]
    InvalidField {
        /// Field name
        field: String,
        /// What was wrong
        reason: String,
    },

    /// A step failed while upgrading
    #[error("step {from} -> {to} of '{node_type}' failed: {source}")]
    Step {
        /// Node type name
        node_type: String,
        /// Version before the step
        from: u32,
        /// Version after the step
        to: u32,
        /// Underlying failure
        #[source]
        source: Box<MigrationError>,
    },

    /// A value could not be converted
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MigrationError {
    /// Shorthand for [`MigrationError::InvalidField`]
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Upgrade `fields` from `from_version` to the node type's current version.
///
/// Returns the version the fields are at afterwards. Running this on fields
/// that are already current does nothing.
pub fn migrate_fields(
    def: &NodeTypeDef,
    from_version: u32,
    fields: &mut FieldMap,
) -> Result<u32, MigrationError> {
    let current = def.current_version();
    if from_version > current {
        return Err(MigrationError::NewerThanSupported {
            node_type: def.id.clone(),
            found: from_version,
            supported: current,
        });
    }

    for (index, step) in def.migrations.iter().enumerate().skip(from_version as usize) {
        let from = index as u32;
        step(fields).map_err(|source| MigrationError::Step {
            node_type: def.id.clone(),
            from,
            to: from + 1,
            source: Box::new(source),
        })?;
        tracing::debug!(node_type = %def.id, from, to = from + 1, "migrated node fields");
    }

    Ok(current)
}

/// Move a field to a new name, keeping its value. Missing fields are ignored.
pub fn rename_field(fields: &mut FieldMap, old: &str, new: &str) {
    if let Some(value) = fields.remove(old) {
        fields.insert(new.to_string(), value);
    }
}
