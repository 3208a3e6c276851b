//! NOTIFY step handler

use super::TaskContext;
use crate::connection::ConnectionManager;
use courier_shared::codec;
use tracing::{debug, warn};

/// Broadcast that makes the media scanner pick up new files
pub const MEDIA_SCAN_ACTION: &str = "android.intent.action.MEDIA_SCANNER_SCAN_FILE";

/// Ask the device to rescan `remote_dir`; best effort
///
/// Skipped when the device is not connected. Failures are logged and
/// swallowed. Returns whether the broadcast was accepted.
pub async fn broadcast_rescan(
    conn: &ConnectionManager,
    ctx: &TaskContext,
    remote_dir: &str,
) -> bool {
    match conn.is_connected(&ctx.device_name).await {
        Ok(true) => {}
        Ok(false) => {
            warn!("[TASK] {} not connected, skipping media rescan", ctx.device_name);
            return false;
        }
        Err(e) => {
            warn!("[TASK] Media rescan skipped: {}", e);
            return false;
        }
    }

    let uri = format!("file://{}", remote_dir);
    let broadcast = format!(
        "am broadcast -a {} -d {}",
        MEDIA_SCAN_ACTION,
        codec::shell_quote(&uri)
    );

    match conn
        .execute_on(&ctx.device_name, &["shell", &broadcast], false)
        .await
    {
        Ok(output) => {
            debug!("[TASK] Rescan on {}: {}", ctx.device_name, output);
            true
        }
        Err(e) => {
            warn!("[TASK] Rescan on {} failed: {}", ctx.device_name, e);
            false
        }
    }
}
