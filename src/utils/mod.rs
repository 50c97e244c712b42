//! Small shared helpers: run ids and timestamps.

use chrono::Utc;
use uuid::Uuid;

/// Generates a fresh run id (UUID v4).
#[must_use]
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current wall-clock time in milliseconds since the epoch.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
