// SPDX-License-Identifier: MIT OR Apache-2.0
//! Engine settings, stored as RON.

use crate::persistence::DocumentFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current settings format version
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE_NAME: &str = "flowcanvas.ron";

/// Tunables for loading and running graphs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Settings format version
    pub version: u32,
    /// Resolve every branch right after load instead of on first access
    pub resolve_links_eagerly: bool,
    /// Bound of the pending event queue; the oldest events are dropped
    pub max_pending_events: usize,
    /// Format used when saving documents without an explicit choice
    pub save_format: DocumentFormat,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_FORMAT_VERSION,
            resolve_links_eagerly: false,
            max_pending_events: crate::graph::DEFAULT_MAX_PENDING_EVENTS,
            save_format: DocumentFormat::Ron,
        }
    }
}

impl EngineSettings {
    /// Load settings from a RON file
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron(&content)
    }

    /// Parse settings from a RON string
    pub fn from_ron(content: &str) -> std::io::Result<Self> {
        let settings: EngineSettings = ron::from_str(content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        if settings.version > SETTINGS_FORMAT_VERSION {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "Settings version {} is newer than supported version {}",
                    settings.version, SETTINGS_FORMAT_VERSION
                ),
            ));
        }

        tracing::debug!(version = settings.version, "loaded engine settings");
        Ok(settings)
    }

    /// Load settings from `path`, or the defaults if the file does not exist
    pub fn load_or_default(path: &Path) -> std::io::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Document format for `path`: its extension, else `save_format`
    pub fn format_for(&self, path: &Path) -> DocumentFormat {
        DocumentFormat::from_extension(path).unwrap_or(self.save_format)
    }

    /// Save settings to a RON file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);

        let content = ron::ser::to_string_pretty(self, config).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        std::fs::write(path, content)
    }
}
