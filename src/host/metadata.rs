//! Source metadata lookup.
//!
//! Resolves a friendly display name and grouping label (area) for a
//! watched source. Lookups are pure reads; a miss degrades to `None`.

use crate::monitor::SourceInfo;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Read-only lookup of display metadata for a source.
pub trait SourceMetadata: Send + Sync {
    fn lookup(&self, source_id: &str) -> SourceInfo;
}

#[derive(Debug, Clone, Default)]
struct Entry {
    name: Option<String>,
    original_name: Option<String>,
    area: Option<String>,
    state_friendly_name: Option<String>,
}

/// In-memory registry of source metadata.
///
/// The display name is resolved from the registry name, then the name the
/// integration originally gave the source, then the friendly name reported
/// with the source's state.
#[derive(Default)]
pub struct MetadataRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the user-assigned name of a source.
    pub fn set_name(&self, source_id: &str, name: Option<String>) {
        self.entries.write().entry(source_id.to_string()).or_default().name = name;
    }

    /// Set the name the source was created with.
    pub fn set_original_name(&self, source_id: &str, name: Option<String>) {
        self.entries
            .write()
            .entry(source_id.to_string())
            .or_default()
            .original_name = name;
    }

    /// Assign the source to an area.
    pub fn set_area(&self, source_id: &str, area: Option<String>) {
        self.entries.write().entry(source_id.to_string()).or_default().area = area;
    }

    /// Record the friendly name carried by the source's state.
    pub fn set_state_friendly_name(&self, source_id: &str, name: Option<String>) {
        self.entries
            .write()
            .entry(source_id.to_string())
            .or_default()
            .state_friendly_name = name;
    }
}

impl SourceMetadata for MetadataRegistry {
    fn lookup(&self, source_id: &str) -> SourceInfo {
        let entries = self.entries.read();
        let Some(entry) = entries.get(source_id) else {
            return SourceInfo::default();
        };

        let non_empty = |name: &Option<String>| name.clone().filter(|n| !n.is_empty());
        let display_name = non_empty(&entry.name)
            .or_else(|| non_empty(&entry.original_name))
            .or_else(|| entry.state_friendly_name.clone());

        SourceInfo {
            display_name,
            group: entry.area.clone(),
        }
    }
}
