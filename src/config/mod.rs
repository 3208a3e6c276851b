//! Configuration loading
//!
//! A TOML file overlays the defaults; every section is optional.

mod settings;

pub use settings::{BridgeConfig, CourierConfig, SchedulerSection, StorageConfig};
