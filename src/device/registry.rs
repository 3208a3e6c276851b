//! Name/id resolution for configured devices

use courier_shared::{defaults, Device, DispatchError};
use serde::Deserialize;
use std::collections::HashMap;

/// One configured device: user-facing name and bridge address
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    pub id: String,
}

impl DeviceEntry {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

/// Immutable registry of configured devices, in configuration order
///
/// Several names may share one id (two profiles on one physical unit).
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    entries: Vec<DeviceEntry>,
    /// Remote storage root keyed by device id
    remote_roots: HashMap<String, String>,
    default_remote_root: String,
}

impl DeviceRegistry {
    /// Create a registry; later duplicates of a name are ignored
    pub fn new(entries: Vec<DeviceEntry>, remote_roots: HashMap<String, String>) -> Self {
        let mut unique: Vec<DeviceEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            if !unique.iter().any(|e| e.name == entry.name) {
                unique.push(entry);
            }
        }

        Self {
            entries: unique,
            remote_roots,
            default_remote_root: defaults::REMOTE_ROOT.to_string(),
        }
    }

    /// Override the root used for ids without an explicit remote root
    pub fn with_default_remote_root(mut self, root: impl Into<String>) -> Self {
        self.default_remote_root = root.into();
        self
    }

    /// Resolve a device name to its bridge id
    pub fn resolve(&self, name: &str) -> Result<&str, DispatchError> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.id.as_str())
            .ok_or_else(|| DispatchError::UnknownDevice(name.to_string()))
    }

    /// First configured name for an id, for diagnostics only
    pub fn reverse_lookup(&self, id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.name.as_str())
    }

    /// Remote storage root for a device id
    pub fn remote_root(&self, id: &str) -> &str {
        self.remote_roots
            .get(id)
            .map(String::as_str)
            .unwrap_or(&self.default_remote_root)
    }

    pub fn entries(&self) -> &[DeviceEntry] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Fresh, never-checked device records in configuration order
    pub fn devices(&self) -> Vec<Device> {
        self.entries
            .iter()
            .map(|e| Device::new(&e.name, &e.id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
