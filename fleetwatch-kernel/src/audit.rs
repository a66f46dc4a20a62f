//! Append-only audit trail under `audit_logs/{key}`.
//!
//! Recording is fire-and-forget: a failed write is logged and dropped. The new
//! entry shows up in the audit view once the store's live subscription
//! delivers it.

use crate::gateway::{join_path, SharedGateway};
use crate::models::{AuditEntry, AUDIT_LOGS};
use crate::state::now_millis;
use serde_json::Value;
use tracing::{debug, error};

/// Action tags written by this kernel.
pub mod action {
    pub const CREATE_JOB: &str = "CREATE_JOB";
    pub const UPDATE_JOB: &str = "UPDATE_JOB";
    pub const DELETE_JOB: &str = "DELETE_JOB";
    pub const UPDATE_NICKNAME: &str = "UPDATE_NICKNAME";
    pub const REFRESH_FLEET: &str = "REFRESH_FLEET";
}

#[derive(Clone)]
pub struct AuditRecorder {
    gateway: SharedGateway,
}

impl AuditRecorder {
    pub fn new(gateway: SharedGateway) -> Self {
        Self { gateway }
    }

    /// Appends one entry stamped with the current time.
    ///
    /// Returns the key the entry was written under, or `None` when the write
    /// failed. Callers are free to ignore the result.
    pub fn record(
        &self,
        user: &str,
        action: &str,
        target: &str,
        details: impl Into<Value>,
    ) -> Option<String> {
        let entry = AuditEntry {
            timestamp: now_millis(),
            user: user.to_string(),
            action: action.to_string(),
            target: target.to_string(),
            details: details.into(),
        };

        let value = match serde_json::to_value(&entry) {
            Ok(value) => value,
            Err(e) => {
                error!("failed to encode audit entry: {e}");
                return None;
            }
        };

        let key = self.gateway.generate_child_key(AUDIT_LOGS);
        let path = join_path(&[AUDIT_LOGS, key.as_str()]);
        match self.gateway.write(&path, value) {
            Ok(()) => {
                debug!("audit {action} by {user} on {target} -> {key}");
                Some(key)
            }
            Err(e) => {
                error!("failed to write audit log: {e}");
                None
            }
        }
    }
}
