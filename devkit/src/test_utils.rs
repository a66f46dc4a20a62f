/*!
Test Harness pour le kernel FleetWatch

Câble un gateway mémoire, le store, l'audit et les commandes:
- Setup automatique de l'arbre initial
- Écritures distantes simulées (comme un agent de flotte)
- Assertions sur les projections Device et Audit
*/

use anyhow::{bail, Result};
use fleetwatch_kernel::audit::AuditRecorder;
use fleetwatch_kernel::commands::FleetCommands;
use fleetwatch_kernel::gateway::memory::MemoryGateway;
use fleetwatch_kernel::gateway::RemoteGateway;
use fleetwatch_kernel::models::{AuditEntry, DeviceStatus, DeviceView, FleetState};
use fleetwatch_kernel::projections::{audit_log, project_devices};
use fleetwatch_kernel::store::FleetStore;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Harness de test complet: gateway mémoire + store + commandes
pub struct TestHarness {
    pub gateway: Arc<MemoryGateway>,
    pub store: FleetStore,
    pub commands: FleetCommands,
}

impl TestHarness {
    /// Crée un harness sur l'arbre donné, store non encore abonné
    pub fn new(tree: Value) -> Self {
        Self::with_settle_delay(tree, fleetwatch_kernel::store::DEFAULT_SETTLE_DELAY)
    }

    pub fn with_settle_delay(tree: Value, settle_delay: Duration) -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        let gateway = Arc::new(MemoryGateway::with_tree(tree));
        let store = FleetStore::with_settle_delay(gateway.clone(), settle_delay);
        let commands = FleetCommands::new(store.clone(), AuditRecorder::new(gateway.clone()));
        Self {
            gateway,
            store,
            commands,
        }
    }

    /// Abonne le store à la racine
    pub fn start(self) -> Result<Self> {
        self.store.init()?;
        log::info!("🛰️  store attached ({} subscription)", self.gateway.active_subscriptions());
        Ok(self)
    }

    /// Simule une écriture distante (agent, autre opérateur...)
    pub fn push(&self, path: &str, value: Value) -> Result<()> {
        self.gateway.write(path, value)?;
        log::info!("📨 pushed {path}");
        Ok(())
    }

    pub fn state(&self) -> FleetState {
        self.store.snapshot()
    }

    pub fn devices_at(&self, now_secs: i64) -> Vec<DeviceView> {
        project_devices(&self.store.snapshot(), now_secs)
    }

    pub fn audit(&self) -> Vec<AuditEntry> {
        audit_log(&self.store.snapshot())
    }

    /// Attend que l'état publié satisfasse `pred`
    pub async fn wait_for_state<F>(&self, pred: F, timeout_ms: u64) -> Result<FleetState>
    where
        F: Fn(&FleetState) -> bool,
    {
        let rx = self.store.watch();
        match tokio::time::timeout(Duration::from_millis(timeout_ms), wait_until(rx, pred)).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("⏰ Timeout waiting for fleet state");
                bail!("timeout after {timeout_ms}ms waiting for fleet state")
            }
        }
    }

    /// Assert le statut d'un device à l'instant donné
    pub fn assert_device_status(&self, id: &str, now_secs: i64, expected: DeviceStatus) -> Result<()> {
        let devices = self.devices_at(now_secs);
        let Some(device) = devices.iter().find(|d| d.id == id) else {
            bail!("device '{id}' not found in projection");
        };
        if device.status != expected {
            bail!(
                "device '{id}': expected {expected:?}, got {:?} (heartbeat {}, now {now_secs})",
                device.status,
                device.last_heartbeat
            );
        }
        log::info!("✅ device '{id}' is {expected:?}");
        Ok(())
    }

    /// Assert l'ordre des timestamps de la vue audit
    pub fn assert_audit_timestamps(&self, expected: &[i64]) -> Result<()> {
        let actual: Vec<i64> = self.audit().iter().map(|e| e.timestamp).collect();
        if actual != expected {
            bail!("audit order mismatch: expected {expected:?}, got {actual:?}");
        }
        log::info!("✅ audit order {actual:?}");
        Ok(())
    }
}

async fn wait_until<F>(mut rx: watch::Receiver<FleetState>, pred: F) -> Result<FleetState>
where
    F: Fn(&FleetState) -> bool,
{
    loop {
        {
            let state = rx.borrow_and_update();
            if pred(&*state) {
                return Ok(state.clone());
            }
        }
        if rx.changed().await.is_err() {
            bail!("fleet store dropped while waiting");
        }
    }
}
