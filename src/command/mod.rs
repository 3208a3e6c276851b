//! Command execution against the device bridge
//!
//! This module handles:
//! - Addressing a command at one device (`-s <id>`)
//! - Bounded retry with a fixed, non-blocking delay
//! - Hard timeouts that kill the bridge process
//! - Parsing the connected-device listing

mod executor;

pub use executor::{CommandExecutor, ExecutorConfig};
