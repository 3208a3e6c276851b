//! adb courier
//!
//! Delivers staged image uploads to Android devices over the adb bridge:
//! - Device registry mapping configured names to adb serials
//! - Command executor with retries and per-invocation timeouts
//! - Connection manager tracking device reachability
//! - Task orchestrator for immediate delivery and deferred cleanup
//! - In-process job scheduler with misfire grace and coalescing

pub mod bridge;
pub mod command;
pub mod config;
pub mod connection;
pub mod device;
pub mod scheduler;
pub mod tasks;

pub use config::CourierConfig;
pub use courier_shared::DispatchError;
