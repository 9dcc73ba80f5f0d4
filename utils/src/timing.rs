// Timekeeping helpers for the logging infrastructure

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the number of milliseconds since the unix epoch
///
/// This is what the log timestamps are printed with. Don't
/// use this for delta timing, it is not monotonic.
pub fn get_current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time is before the unix epoch")
        .as_millis() as u64
}
