//! Pure views over a [`FleetState`].
//!
//! Nothing here is cached: callers re-run a projection on every store change
//! and on every monitor tick, so a silent device drops to Offline even when no
//! new snapshot arrives.

use crate::models::{
    AuditEntry, DeviceStatus, DeviceView, FleetState, SystemMeta, LIVENESS_THRESHOLD_SECS,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub fn status_for(heartbeat: i64, now_secs: i64) -> DeviceStatus {
    // Heartbeats come from remote records and may sit anywhere in i64.
    if now_secs.saturating_sub(heartbeat) < LIVENESS_THRESHOLD_SECS {
        DeviceStatus::Online
    } else {
        DeviceStatus::Offline
    }
}

/// Reads `systems[id].heartbeat`; anything unreadable counts as 0.
pub fn heartbeat_of(state: &FleetState, id: &str) -> i64 {
    state
        .systems
        .get(id)
        .and_then(|record| record.get("heartbeat"))
        .map(parse_heartbeat)
        .unwrap_or(0)
}

fn parse_heartbeat(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Value::String(s) => {
            // Leading integer digits only, e.g. "1700000000.5" -> 1700000000.
            let s = s.trim();
            let end = s
                .char_indices()
                .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && *c == '-')))
                .map(|(i, _)| i)
                .unwrap_or(s.len());
            s[..end].parse().unwrap_or(0)
        }
        _ => 0,
    }
}

/// Number of jobs configured for a device; non-object configs count as 0.
pub fn job_count(state: &FleetState, id: &str) -> usize {
    state
        .configurations
        .get(id)
        .and_then(Value::as_object)
        .map(|jobs| jobs.len())
        .unwrap_or(0)
}

/// Nickname, else hostname, else the id. Empty strings do not count.
pub fn display_name(meta: &SystemMeta, id: &str) -> String {
    [meta.nickname.as_deref(), meta.hostname.as_deref()]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .unwrap_or(id)
        .to_string()
}

pub fn project_device(state: &FleetState, id: &str, now_secs: i64) -> DeviceView {
    let meta = SystemMeta::from_value(state.systems.get(id).and_then(|r| r.get("meta")));
    let heartbeat = heartbeat_of(state, id);

    DeviceView {
        id: id.to_string(),
        name: display_name(&meta, id),
        hostname: meta.hostname,
        os: meta.os,
        ip: meta.ip,
        status: status_for(heartbeat, now_secs),
        job_count: job_count(state, id),
        last_heartbeat: heartbeat,
    }
}

/// One view per key of `systems`, in key order.
pub fn project_devices(state: &FleetState, now_secs: i64) -> Vec<DeviceView> {
    state
        .systems
        .keys()
        .map(|id| project_device(state, id, now_secs))
        .collect()
}

/// Device list against the current wall clock.
pub fn devices(state: &FleetState) -> Vec<DeviceView> {
    project_devices(state, crate::state::now_secs())
}

fn parse_audit_entry(key: &str, value: &Value) -> Option<AuditEntry> {
    let Value::Object(record) = value else {
        debug!("skipping malformed audit record {key}");
        return None;
    };
    let text = |name: &str| {
        record
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Some(AuditEntry {
        timestamp: record.get("timestamp").map(parse_heartbeat).unwrap_or(0),
        user: text("user"),
        action: text("action"),
        target: text("target"),
        details: record.get("details").cloned().unwrap_or(Value::Null),
    })
}

/// Audit entries, newest first. Equal timestamps keep storage order.
pub fn audit_log(state: &FleetState) -> Vec<AuditEntry> {
    let mut entries: Vec<AuditEntry> = state
        .audit_logs
        .iter()
        .filter_map(|(key, value)| parse_audit_entry(key, value))
        .collect();
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries
}

/// Filter and pagination over [`audit_log`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub action: Option<String>,
    pub user: Option<String>,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            limit: Some(100),
            offset: None,
            action: None,
            user: None,
        }
    }
}

pub fn query_audit_log(state: &FleetState, query: &AuditQuery) -> Vec<AuditEntry> {
    let matches = audit_log(state).into_iter().filter(|entry| {
        query.action.as_deref().map_or(true, |a| entry.action == a)
            && query.user.as_deref().map_or(true, |u| entry.user == u)
    });

    let skipped = matches.skip(query.offset.unwrap_or(0));
    match query.limit {
        Some(limit) => skipped.take(limit).collect(),
        None => skipped.collect(),
    }
}
