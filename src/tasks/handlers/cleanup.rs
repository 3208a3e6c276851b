//! Scheduled cleanup handler

use super::TaskContext;
use courier_shared::DispatchError;
use tracing::info;

/// Deferred cleanup for one upload
///
/// Nothing is removed yet: staged files and remote copies are kept.
pub async fn run_cleanup(ctx: &TaskContext, task_time: i64) -> Result<(), DispatchError> {
    info!(
        "[TASK] Cleanup for {} ({}) upload {}: nothing to remove",
        ctx.device_name, ctx.device_id, task_time
    );
    Ok(())
}
