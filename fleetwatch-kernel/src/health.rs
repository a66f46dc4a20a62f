use crate::models::{DeviceStatus, FleetState};
use crate::projections::project_devices;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub devices_tracked: u32,
    pub devices_online: u32,
    pub audit_entries: u32,
    pub loading: bool,
    pub last_error: Option<String>,
    pub gateway_status: String,
    pub gateway_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    gateway_reconnects: Arc<AtomicU32>,
    gateway_status: Arc<parking_lot::Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            gateway_reconnects: Arc::new(AtomicU32::new(0)),
            gateway_status: Arc::new(parking_lot::Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_gateway_connected(&self) {
        *self.gateway_status.lock() = "connected".to_string();
    }

    pub fn mark_gateway_disconnected(&self) {
        *self.gateway_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.gateway_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.gateway_status.lock() = "reconnecting".to_string();
    }

    pub fn gateway_status(&self) -> String {
        self.gateway_status.lock().clone()
    }

    pub fn get_health(&self, state: &FleetState, now_secs: i64) -> KernelHealth {
        let devices = project_devices(state, now_secs);
        let online = devices
            .iter()
            .filter(|d| d.status == DeviceStatus::Online)
            .count();

        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            devices_tracked: devices.len() as u32,
            devices_online: online as u32,
            audit_entries: state.audit_logs.len() as u32,
            loading: state.loading,
            last_error: state.error.clone(),
            gateway_status: self.gateway_status(),
            gateway_reconnects: self.gateway_reconnects.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn health_counts_online_devices() {
        let mut state = FleetState::default();
        state.replace_from(&json!({
            "systems": {
                "a": { "heartbeat": 1_000 },
                "b": { "heartbeat": 100 }
            },
            "audit_logs": { "k1": {}, "k2": {} }
        }));
        state.loading = false;

        let tracker = HealthTracker::new();
        let health = tracker.get_health(&state, 1_030);
        assert_eq!(health.devices_tracked, 2);
        assert_eq!(health.devices_online, 1);
        assert_eq!(health.audit_entries, 2);
        assert!(!health.loading);
        assert_eq!(health.gateway_status, "connecting");
    }

    #[test]
    fn reconnects_are_counted() {
        let tracker = HealthTracker::new();
        tracker.mark_gateway_connected();
        assert_eq!(tracker.gateway_status(), "connected");

        tracker.increment_reconnects();
        tracker.increment_reconnects();
        let health = tracker.get_health(&FleetState::default(), 0);
        assert_eq!(health.gateway_reconnects, 2);
        assert_eq!(health.gateway_status, "reconnecting");

        tracker.mark_gateway_disconnected();
        assert_eq!(tracker.gateway_status(), "disconnected");
    }
}
