use crate::models::{DeviceStatus, DeviceView};
use crate::projections::project_devices;
use crate::store::FleetStore;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Re-projects the device list on every tick and every store change.
///
/// Liveness depends on the clock as much as on the data, so a device that
/// stops sending heartbeats flips to Offline on the next tick even though no
/// snapshot arrived. Stops once the store is gone.
///
/// `clock` returns the current time in epoch seconds; the kernel passes
/// [`crate::state::now_secs`].
pub fn spawn_projection_monitor<C>(
    store: &FleetStore,
    tick: Duration,
    clock: C,
) -> (watch::Receiver<Vec<DeviceView>>, JoinHandle<()>)
where
    C: Fn() -> i64 + Send + 'static,
{
    let mut state_rx = store.watch();
    let initial = project_devices(&state_rx.borrow_and_update(), clock());
    let (tx, rx) = watch::channel(initial);

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        let mut last_status: HashMap<String, DeviceStatus> = HashMap::new();
        info!("projection monitor started (tick: {tick:?})");

        loop {
            tokio::select! {
                _ = interval.tick() => {},
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        debug!("fleet store dropped, projection monitor stopping");
                        break;
                    }
                }
            }

            let devices = project_devices(&state_rx.borrow_and_update(), clock());
            log_transitions(&mut last_status, &devices);
            tx.send_replace(devices);
        }
    });

    (rx, handle)
}

fn log_transitions(last: &mut HashMap<String, DeviceStatus>, devices: &[DeviceView]) {
    for device in devices {
        match last.insert(device.id.clone(), device.status) {
            Some(DeviceStatus::Online) if device.status == DeviceStatus::Offline => {
                info!("device {} ({}) went offline", device.name, device.id);
            }
            Some(DeviceStatus::Offline) if device.status == DeviceStatus::Online => {
                info!("device {} ({}) is back online", device.name, device.id);
            }
            _ => {}
        }
    }
    last.retain(|id, _| devices.iter().any(|d| &d.id == id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryGateway;
    use crate::gateway::RemoteGateway;
    use crate::state::now_secs;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::time::Instant;

    const BASE: i64 = 1_700_000_000;

    #[tokio::test(start_paused = true)]
    async fn monitor_follows_store_changes() {
        let gateway = Arc::new(MemoryGateway::new());
        let store = FleetStore::new(gateway.clone());
        store.init().unwrap();

        let (mut rx, _handle) = spawn_projection_monitor(&store, Duration::from_secs(5), now_secs);
        assert!(rx.borrow().is_empty());

        gateway
            .write("systems/pc-1", json!({ "heartbeat": now_secs() }))
            .unwrap();
        rx.changed().await.unwrap();
        let devices = rx.borrow_and_update().clone();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].status, DeviceStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_alone_flips_silent_device_offline() {
        let gateway = Arc::new(MemoryGateway::with_tree(json!({
            "systems": { "pc-1": { "heartbeat": BASE } }
        })));
        let store = FleetStore::new(gateway.clone());
        store.init().unwrap();

        let start = Instant::now();
        let clock = move || BASE + start.elapsed().as_secs() as i64;
        let (rx, _handle) = spawn_projection_monitor(&store, Duration::from_secs(5), clock);
        assert_eq!(rx.borrow()[0].status, DeviceStatus::Online);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(rx.borrow()[0].status, DeviceStatus::Online);

        // no write in between: only the ticks move the projection
        tokio::time::sleep(Duration::from_secs(70)).await;
        assert_eq!(rx.borrow()[0].status, DeviceStatus::Offline);
        assert_eq!(gateway.writes().len(), 0);
    }

    #[test]
    fn transitions_track_latest_status() {
        let mut last = HashMap::new();
        let mut device = DeviceView {
            id: "a".into(),
            name: "a".into(),
            hostname: None,
            os: None,
            ip: None,
            status: DeviceStatus::Online,
            job_count: 0,
            last_heartbeat: 0,
        };
        log_transitions(&mut last, std::slice::from_ref(&device));
        device.status = DeviceStatus::Offline;
        log_transitions(&mut last, std::slice::from_ref(&device));
        assert_eq!(last.get("a"), Some(&DeviceStatus::Offline));

        log_transitions(&mut last, &[]);
        assert!(last.is_empty());
    }
}
