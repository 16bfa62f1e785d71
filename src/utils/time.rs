//! Time utilities

use chrono::{DateTime, Local};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Format used in settings backup filenames (local time, second resolution)
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Get current Unix timestamp (seconds since epoch)
///
/// Returns 0 if system time is before epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| {
            warn!("System time is before UNIX epoch, using 0 as timestamp");
            std::time::Duration::from_secs(0)
        })
        .as_secs()
}

/// Render a timestamp for a backup filename
pub fn backup_timestamp(at: DateTime<Local>) -> String {
    at.format(BACKUP_TIMESTAMP_FORMAT).to_string()
}

/// Current local time as a backup filename timestamp
pub fn backup_timestamp_now() -> String {
    backup_timestamp(Local::now())
}
