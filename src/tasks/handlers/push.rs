//! PUSH_FILES step handler

use super::TaskContext;
use crate::connection::ConnectionManager;
use courier_shared::{codec, DispatchError};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outcome of one push step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub remote_dir: String,
    pub transferred: usize,
    /// File names that failed permanently
    pub failed: Vec<String>,
}

impl PushReport {
    pub fn any_transferred(&self) -> bool {
        self.transferred > 0
    }
}

/// Mirror a staged bucket folder onto the device
///
/// Creates `<remote_root>/<bucket>` and pushes every regular file in
/// `local_dir` on its own. A file that fails after its retries is recorded
/// and the remaining files are still pushed. Only an unreadable staging
/// folder or a failed `mkdir` abandons the step.
pub async fn push_files(
    conn: &ConnectionManager,
    ctx: &TaskContext,
    local_dir: &Path,
    bucket: &str,
) -> Result<PushReport, DispatchError> {
    let files = staged_files(local_dir).await?;
    let remote_dir = codec::remote_join(&ctx.remote_root, bucket);

    let mkdir = format!("mkdir -p {}", codec::shell_quote(&remote_dir));
    conn.execute_on(&ctx.device_name, &["shell", &mkdir], true)
        .await?;

    let mut report = PushReport {
        remote_dir,
        ..Default::default()
    };

    for file in files {
        let Some(file_name) = file.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let local = file.to_string_lossy();
        let remote = codec::remote_join(&report.remote_dir, &file_name);

        match conn
            .execute_on(&ctx.device_name, &["push", &local, &remote], true)
            .await
        {
            Ok(_) => report.transferred += 1,
            Err(e) => {
                warn!("[TASK] Push {} to {} failed: {}", file_name, ctx.device_name, e);
                report.failed.push(file_name);
            }
        }
    }

    info!(
        "[TASK] Pushed {}/{} file(s) to {}:{}",
        report.transferred,
        report.transferred + report.failed.len(),
        ctx.device_name,
        report.remote_dir
    );
    Ok(report)
}

/// Regular files directly inside `dir`, sorted by name
async fn staged_files(dir: &Path) -> Result<Vec<PathBuf>, DispatchError> {
    let staging_error =
        |e: std::io::Error| DispatchError::Staging(format!("{}: {}", dir.display(), e));

    let mut entries = tokio::fs::read_dir(dir).await.map_err(staging_error)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(staging_error)? {
        if entry.file_type().await.map_err(staging_error)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
