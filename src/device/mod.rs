//! Device registry
//!
//! Immutable name -> id mapping loaded from configuration, plus the remote
//! storage root of each device id.

mod registry;

pub use registry::{DeviceEntry, DeviceRegistry};
