//! Text codec for the device bridge protocol
//!
//! The bridge speaks plain text. A `devices` listing looks like:
//! ```text
//! List of devices attached
//! emulator-5554\tdevice
//! 192.168.1.20:5555\toffline
//! R58M12ABCDE\tunauthorized
//! ```
//!
//! Staged uploads and their remote mirrors are grouped in time buckets
//! named after the upload instant (`YYYYMMDDHHMMSS`).

use chrono::{DateTime, FixedOffset};

/// State column value of a device that accepts commands
pub const READY_MARKER: &str = "device";

/// strftime pattern of a time bucket folder
pub const BUCKET_FORMAT: &str = "%Y%m%d%H%M%S";

/// Decode the output of `devices` into the ids of ready devices
///
/// Only `<id>\t<state>` lines whose state is the ready marker are kept, so
/// the header, blank lines and offline or unauthorized devices drop out.
pub fn decode_device_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (id, state) = line.split_once('\t')?;
            let state = state.split_whitespace().next()?;
            let id = id.trim();
            (state == READY_MARKER && !id.is_empty()).then(|| id.to_string())
        })
        .collect()
}

/// Time bucket name for a unix timestamp, rendered in the given offset
///
/// Returns `None` when the timestamp is outside chrono's representable range.
pub fn time_bucket(timestamp_secs: i64, offset: &FixedOffset) -> Option<String> {
    let instant = DateTime::from_timestamp(timestamp_secs, 0)?;
    Some(instant.with_timezone(offset).format(BUCKET_FORMAT).to_string())
}

/// Join a remote root and a relative component with exactly one `/`
pub fn remote_join(root: &str, child: &str) -> String {
    format!(
        "{}/{}",
        root.trim_end_matches('/'),
        child.trim_start_matches('/')
    )
}

/// Quote an argument for the remote POSIX shell
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}
