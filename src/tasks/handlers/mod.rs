//! Task step handlers

mod cleanup;
mod notify;
mod push;

pub use cleanup::run_cleanup;
pub use notify::{broadcast_rescan, MEDIA_SCAN_ACTION};
pub use push::{push_files, PushReport};

use crate::device::DeviceRegistry;
use courier_shared::DispatchError;

/// Context passed to task step handlers
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub device_name: String,
    pub device_id: String,
    /// Remote storage root of the device id
    pub remote_root: String,
}

impl TaskContext {
    /// Resolve a device name into a handler context
    pub fn resolve(registry: &DeviceRegistry, device_name: &str) -> Result<Self, DispatchError> {
        let device_id = registry.resolve(device_name)?;
        Ok(Self {
            device_name: device_name.to_string(),
            device_id: device_id.to_string(),
            remote_root: registry.remote_root(device_id).to_string(),
        })
    }
}
