/**
 * FLEETWATCH KERNEL - server entry point
 *
 * ROLE: bootstrap config -> gateway -> store -> audit/commands -> monitor -> HTTP.
 * The store is created here and handed explicitly to every consumer.
 */

use anyhow::Context;
use fleetwatch_kernel::audit::AuditRecorder;
use fleetwatch_kernel::commands::FleetCommands;
use fleetwatch_kernel::config::{load_config, GatewayConf, GatewayKind};
use fleetwatch_kernel::gateway::memory::MemoryGateway;
use fleetwatch_kernel::gateway::mqtt::MqttGateway;
use fleetwatch_kernel::gateway::SharedGateway;
use fleetwatch_kernel::health::HealthTracker;
use fleetwatch_kernel::http::{build_router, AppState};
use fleetwatch_kernel::monitor::spawn_projection_monitor;
use fleetwatch_kernel::state::now_secs;
use fleetwatch_kernel::store::FleetStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = load_config().await;
    let health_tracker = HealthTracker::new();

    // remote gateway
    let gateway = build_gateway(&cfg.gateway, &health_tracker)?;

    // single store, cloned into each consumer
    let store = FleetStore::with_settle_delay(
        gateway.clone(),
        Duration::from_millis(cfg.store.settle_delay_ms),
    );
    if let Err(e) = store.init() {
        warn!("initial subscription failed, waiting for a refresh: {e}");
    }

    let commands = FleetCommands::new(store.clone(), AuditRecorder::new(gateway));

    // Online/Offline transitions in the logs
    let (_devices_rx, _monitor) = spawn_projection_monitor(
        &store,
        Duration::from_secs(cfg.monitor.tick_secs.max(1)),
        now_secs,
    );

    let app = build_router(AppState {
        store: store.clone(),
        commands,
        health_tracker,
    });

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("binding {}", cfg.http.bind))?;
    info!("listening on http://{}", cfg.http.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    store.destroy();
    Ok(())
}

fn build_gateway(conf: &GatewayConf, health: &HealthTracker) -> anyhow::Result<SharedGateway> {
    let gateway: SharedGateway = match conf.kind {
        GatewayKind::Mqtt => Arc::new(MqttGateway::connect(&conf.mqtt, health.clone())),
        GatewayKind::Memory => {
            health.mark_gateway_connected();
            match &conf.seed_file {
                Some(path) => Arc::new(
                    MemoryGateway::from_seed_file(path)
                        .with_context(|| format!("loading seed {}", path.display()))?,
                ),
                None => Arc::new(MemoryGateway::new()),
            }
        }
    };
    Ok(gateway)
}
