use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The unit of lifecycle tracking: binds a client-facing identifier to a
/// sandbox instance and its activity timestamps.
///
/// A session exists exactly while a capacity slot is held. All fields except
/// `last_active` are immutable once the session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque, unguessable identifier (32 lowercase hex chars).
    pub session_id: String,
    /// Deterministic runtime name derived from `session_id`.
    pub sandbox_name: String,
    /// Logical path exposed to the client inside the sandbox.
    pub workspace_path: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds. Advanced by user activity; read by the evictor.
    pub last_active: i64,
}

impl Session {
    /// Milliseconds this session has been idle as of `now_ms`.
    pub fn idle_millis(&self, now_ms: i64) -> i64 {
        now_ms - self.last_active
    }
}

/// Deterministic runtime name for a session's sandbox.
pub fn sandbox_name(session_id: &str) -> String {
    format!("sbx-{session_id}")
}

/// Current wall-clock time in epoch milliseconds.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}
