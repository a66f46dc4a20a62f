//! MQTT-backed gateway.
//!
//! The remote mirror publishes the whole tree as one retained JSON document on
//! `{prefix}/tree`; writes go out as `{"op":"set","path":..,"value":..}` on
//! `{prefix}/write` and come back through the next tree document.

use super::{
    value_at, DataCallback, ErrorCallback, GatewayError, RemoteGateway, SubscriptionHandle,
};
use crate::config::MqttConf;
use crate::health::HealthTracker;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tracing::{debug, error, info, warn};

#[derive(Debug, Serialize)]
struct WriteCommand<'a> {
    op: &'static str,
    path: &'a str,
    value: &'a Value,
}

struct Subscriber {
    path: String,
    on_data: DataCallback,
    on_error: ErrorCallback,
}

#[derive(Default)]
struct Registry {
    subscribers: Mutex<BTreeMap<u64, Subscriber>>,
    next_handle: AtomicU64,
    last_tree: Mutex<Option<Value>>,
    delivery: Mutex<()>,
}

impl Registry {
    fn publish_tree(&self, tree: Value) {
        let _round = self.delivery.lock();
        *self.last_tree.lock() = Some(tree.clone());

        let targets: Vec<(String, DataCallback)> = self
            .subscribers
            .lock()
            .values()
            .map(|s| (s.path.clone(), s.on_data.clone()))
            .collect();
        debug!("tree document delivered to {} subscriptions", targets.len());
        for (path, on_data) in targets {
            on_data(value_at(&tree, &path).cloned().unwrap_or(Value::Null));
        }
    }

    fn fail_all(&self, err: GatewayError) {
        let _round = self.delivery.lock();
        let callbacks: Vec<ErrorCallback> = self
            .subscribers
            .lock()
            .values()
            .map(|s| s.on_error.clone())
            .collect();
        for on_error in callbacks {
            on_error(err.clone());
        }
    }
}

pub struct MqttGateway {
    client: AsyncClient,
    write_topic: String,
    registry: Arc<Registry>,
}

impl MqttGateway {
    /// Connects to the broker and spawns the event loop task.
    pub fn connect(conf: &MqttConf, health: HealthTracker) -> Self {
        let mut opts = MqttOptions::new(&conf.client_id, &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(conf.keep_alive_secs));
        let (client, eventloop) = AsyncClient::new(opts, 10);

        let registry = Arc::new(Registry::default());
        let tree_topic = format!("{}/tree", conf.topic_prefix);
        spawn_event_loop(eventloop, client.clone(), tree_topic, registry.clone(), health);

        info!("mqtt gateway connecting to {}:{}", conf.host, conf.port);
        Self {
            client,
            write_topic: format!("{}/write", conf.topic_prefix),
            registry,
        }
    }
}

fn spawn_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    tree_topic: String,
    registry: Arc<Registry>,
    health: HealthTracker,
) {
    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_gateway_connected();
                    if let Err(e) = client.subscribe(tree_topic.as_str(), QoS::AtLeastOnce).await {
                        error!("subscribe to {tree_topic} failed: {e:?}");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == tree_topic => {
                    match serde_json::from_slice::<Value>(&p.payload) {
                        Ok(tree) => registry.publish_tree(tree),
                        Err(e) => warn!("invalid tree document on {}: {e}", p.topic),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("mqtt connection error: {e:?}");
                    health.mark_gateway_disconnected();
                    health.increment_reconnects();
                    registry.fail_all(GatewayError::Unavailable(e.to_string()));
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

impl RemoteGateway for MqttGateway {
    fn subscribe(
        &self,
        path: &str,
        on_data: DataCallback,
        on_error: ErrorCallback,
    ) -> Result<SubscriptionHandle, GatewayError> {
        let id = self.registry.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        self.registry.subscribers.lock().insert(
            id,
            Subscriber {
                path: path.to_string(),
                on_data: on_data.clone(),
                on_error,
            },
        );

        // Serve the last document right away; the broker only re-sends the
        // retained message on a new connection.
        let _round = self.registry.delivery.lock();
        let cached = self.registry.last_tree.lock().clone();
        if let Some(tree) = cached {
            on_data(value_at(&tree, path).cloned().unwrap_or(Value::Null));
        }
        Ok(SubscriptionHandle(id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.registry.subscribers.lock().remove(&handle.0);
    }

    fn write(&self, path: &str, value: Value) -> Result<(), GatewayError> {
        let payload = serde_json::to_vec(&WriteCommand {
            op: "set",
            path,
            value: &value,
        })
        .map_err(|e| GatewayError::Write(e.to_string()))?;

        self.client
            .try_publish(self.write_topic.as_str(), QoS::AtLeastOnce, false, payload)
            .map_err(|e| GatewayError::Write(e.to_string()))
    }
}
