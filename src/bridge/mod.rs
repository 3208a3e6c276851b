//! Device bridge abstraction
//!
//! Every remote operation ends up as one invocation of the bridge binary.
//! The `BridgeRunner` seam lets the executor drive either the real process
//! or a scripted stand-in.

mod process;
#[cfg(test)]
pub(crate) mod scripted;
mod traits;

pub use process::AdbProcess;
pub use traits::{BridgeOutput, BridgeRunner};
