use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw subtree of the remote store, keyed by child name.
pub type Subtree = Map<String, Value>;

/// Names of the top-level subtrees mirrored from the remote root.
pub const SYSTEMS: &str = "systems";
pub const CONFIGURATIONS: &str = "configurations";
pub const RUNTIME_STATE: &str = "runtime_state";
pub const LOGS: &str = "logs";
pub const AUDIT_LOGS: &str = "audit_logs";

/// A device is online while its last heartbeat is younger than this.
pub const LIVENESS_THRESHOLD_SECS: i64 = 120;

/// Published state of the fleet store.
///
/// All five subtrees are always present; anything the remote side omits (or
/// holds in a non-object shape) is published as an empty mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetState {
    pub systems: Subtree,
    pub configurations: Subtree,
    pub runtime_state: Subtree,
    pub logs: Subtree,
    pub audit_logs: Subtree,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for FleetState {
    fn default() -> Self {
        Self {
            systems: Subtree::new(),
            configurations: Subtree::new(),
            runtime_state: Subtree::new(),
            logs: Subtree::new(),
            audit_logs: Subtree::new(),
            loading: true,
            error: None,
        }
    }
}

impl FleetState {
    /// Replaces every mirrored subtree with the matching child of `root`.
    ///
    /// Replace, never merge: a subtree missing from `root` empties the local copy.
    pub fn replace_from(&mut self, root: &Value) {
        self.systems = subtree(root, SYSTEMS);
        self.configurations = subtree(root, CONFIGURATIONS);
        self.runtime_state = subtree(root, RUNTIME_STATE);
        self.logs = subtree(root, LOGS);
        self.audit_logs = subtree(root, AUDIT_LOGS);
    }
}

fn subtree(root: &Value, key: &str) -> Subtree {
    match root.get(key) {
        Some(Value::Object(map)) => map.clone(),
        _ => Subtree::new(),
    }
}

/// `systems/{id}/meta` as written by the remote agents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMeta {
    pub hostname: Option<String>,
    pub ip: Option<String>,
    pub os: Option<String>,
    pub nickname: Option<String>,
}

impl SystemMeta {
    /// Lenient read of a meta record: non-string fields are treated as absent.
    pub fn from_value(value: Option<&Value>) -> Self {
        let field = |name: &str| {
            value
                .and_then(|v| v.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            hostname: field("hostname"),
            ip: field("ip"),
            os: field("os"),
            nickname: field("nickname"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// One row of the device list, recomputed on every projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceView {
    pub id: String,
    pub name: String,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub ip: Option<String>,
    pub status: DeviceStatus,
    pub job_count: usize,
    pub last_heartbeat: i64,
}

/// `audit_logs/{key}` record. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    pub user: String,
    pub action: String,
    pub target: String,
    pub details: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_defaults_missing_subtrees() {
        let mut state = FleetState::default();
        state.replace_from(&json!({
            "systems": { "a": { "heartbeat": 1 } },
            "logs": "not-an-object"
        }));

        assert_eq!(state.systems.len(), 1);
        assert!(state.configurations.is_empty());
        assert!(state.runtime_state.is_empty());
        assert!(state.logs.is_empty());
        assert!(state.audit_logs.is_empty());
    }

    #[test]
    fn replace_does_not_merge() {
        let mut state = FleetState::default();
        state.replace_from(&json!({ "systems": { "a": {}, "b": {} } }));
        state.replace_from(&json!({ "systems": { "c": {} } }));

        let ids: Vec<&String> = state.systems.keys().collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[test]
    fn replace_from_null_root_empties_everything() {
        let mut state = FleetState::default();
        state.replace_from(&json!({ "audit_logs": { "k": {} } }));
        state.replace_from(&Value::Null);
        assert!(state.audit_logs.is_empty());
    }

    #[test]
    fn published_shape_has_all_keys() {
        let value = serde_json::to_value(FleetState::default()).unwrap();
        for key in [SYSTEMS, CONFIGURATIONS, RUNTIME_STATE, LOGS, AUDIT_LOGS] {
            assert_eq!(value[key], json!({}), "missing {key}");
        }
        assert_eq!(value["loading"], json!(true));
        assert_eq!(value["error"], Value::Null);
    }

    #[test]
    fn meta_ignores_wrong_types() {
        let meta = SystemMeta::from_value(Some(&json!({ "hostname": 42, "os": "Linux" })));
        assert_eq!(meta.hostname, None);
        assert_eq!(meta.os.as_deref(), Some("Linux"));
        assert_eq!(SystemMeta::from_value(None), SystemMeta::default());
    }
}
