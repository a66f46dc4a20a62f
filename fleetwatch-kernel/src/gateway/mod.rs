//! Remote data gateway seam.
//!
//! The fleet store only ever talks to the remote tree through [`RemoteGateway`]:
//! subscribe to a path, unsubscribe, write a value at a path, and mint a fresh
//! child key. Two adapters ship with the kernel:
//! - [`memory::MemoryGateway`]: in-process tree, used for tests and seeded demo runs
//! - [`mqtt::MqttGateway`]: tree mirrored over an MQTT broker

pub mod memory;
pub mod mqtt;

use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Called with the full value at the subscribed path on every change.
pub type DataCallback = Arc<dyn Fn(Value) + Send + Sync>;
/// Called when the gateway can no longer serve a subscription.
pub type ErrorCallback = Arc<dyn Fn(GatewayError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

pub trait RemoteGateway: Send + Sync {
    /// Starts delivering the value at `path` to `on_data` until unsubscribed.
    fn subscribe(
        &self,
        path: &str,
        on_data: DataCallback,
        on_error: ErrorCallback,
    ) -> Result<SubscriptionHandle, GatewayError>;

    /// Stops a subscription. Unknown handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);

    /// Sets the value at `path`. `Value::Null` removes it.
    fn write(&self, path: &str, value: Value) -> Result<(), GatewayError>;

    /// Mints a key that is unique among the children of `path`.
    fn generate_child_key(&self, path: &str) -> String {
        let _ = path;
        push_key()
    }
}

pub type SharedGateway = Arc<dyn RemoteGateway>;

/// Splits a slash-delimited path into its segments. Root is `/` or empty.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Joins segments into a canonical path without leading or trailing slashes.
pub fn join_path(segments: &[&str]) -> String {
    segments
        .iter()
        .flat_map(|s| path_segments(*s))
        .collect::<Vec<_>>()
        .join("/")
}

/// Returns the value at `path` inside `root`, if any.
pub fn value_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path_segments(path)
        .into_iter()
        .try_fold(root, |node, segment| node.get(segment))
}

/// Time-ordered unique key: 12 hex digits of the millisecond clock followed by
/// 12 random hex digits.
pub fn push_key() -> String {
    let millis = crate::state::now_millis().max(0) as u64;
    let random = Uuid::new_v4().simple().to_string();
    format!("{:012x}{}", millis & 0xffff_ffff_ffff, &random[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_segments() {
        assert!(path_segments("/").is_empty());
        assert!(path_segments("").is_empty());
        assert_eq!(path_segments("/systems/a/"), vec!["systems", "a"]);
        assert_eq!(path_segments("audit_logs//k"), vec!["audit_logs", "k"]);
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(&["systems", "a", "meta/nickname"]), "systems/a/meta/nickname");
        assert_eq!(join_path(&["/audit_logs/", "k"]), "audit_logs/k");
    }

    #[test]
    fn test_value_at() {
        let root = json!({ "systems": { "a": { "heartbeat": 5 } } });
        assert_eq!(value_at(&root, "/"), Some(&root));
        assert_eq!(value_at(&root, "systems/a/heartbeat"), Some(&json!(5)));
        assert_eq!(value_at(&root, "systems/b"), None);
    }

    #[test]
    fn push_keys_are_unique_and_ordered() {
        let first = push_key();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = push_key();
        assert_eq!(first.len(), 24);
        assert_ne!(first, second);
        assert!(first[..12] < second[..12]);
    }
}
