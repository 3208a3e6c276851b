//! Device reachability management
//!
//! This module handles:
//! - Checking membership of a device in the bridge's connected set
//! - Reconnecting network devices on demand
//! - Fleet-wide connect with per-device failure isolation

mod manager;

pub use manager::ConnectionManager;
