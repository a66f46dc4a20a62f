//! FLEET STORE - live mirror of the remote tree root.
//!
//! Owns the single subscription to `/` and republishes every pushed snapshot
//! as a [`FleetState`] on a `watch` channel. The store is an explicit context
//! object: the application root creates it, hands clones to consumers, and
//! drives its lifecycle with [`FleetStore::init`], [`FleetStore::refresh`] and
//! [`FleetStore::destroy`].
//!
//! Every attach is tagged with a generation. Starting a new lifecycle step bumps
//! the generation, so callbacks of a torn-down subscription and re-subscriptions
//! scheduled by an earlier `refresh` are dropped on arrival.

use crate::gateway::{GatewayError, SharedGateway, SubscriptionHandle};
use crate::models::FleetState;
use crate::state::{new_state, Generation, Shared};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const ROOT_PATH: &str = "/";
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("subscription failed: {0}")]
    Subscribe(#[from] GatewayError),
}

struct StoreInner {
    gateway: SharedGateway,
    state: watch::Sender<FleetState>,
    subscription: Shared<Option<SubscriptionHandle>>,
    generation: Generation,
    settle_delay: Duration,
}

#[derive(Clone)]
pub struct FleetStore {
    inner: Arc<StoreInner>,
}

impl FleetStore {
    pub fn new(gateway: SharedGateway) -> Self {
        Self::with_settle_delay(gateway, DEFAULT_SETTLE_DELAY)
    }

    pub fn with_settle_delay(gateway: SharedGateway, settle_delay: Duration) -> Self {
        let (state, _) = watch::channel(FleetState::default());
        Self {
            inner: Arc::new(StoreInner {
                gateway,
                state,
                subscription: new_state(None),
                generation: Generation::new(),
                settle_delay,
            }),
        }
    }

    /// Clone of the currently published state.
    pub fn snapshot(&self) -> FleetState {
        self.inner.state.borrow().clone()
    }

    /// Observes the published state. Each receiver sees the latest value.
    pub fn watch(&self) -> watch::Receiver<FleetState> {
        self.inner.state.subscribe()
    }

    pub fn gateway(&self) -> &SharedGateway {
        &self.inner.gateway
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.subscription.lock().is_some()
    }

    /// Subscribes to the remote root, replacing any existing subscription.
    ///
    /// A failure to subscribe is published as `error` as well as returned.
    pub fn init(&self) -> Result<(), StoreError> {
        let mut slot = self.inner.subscription.lock();
        let generation = self.inner.generation.advance();
        self.detach_locked(&mut slot);
        self.attach_locked(&mut slot, generation)
    }

    /// Tears the subscription down, flags `loading`, and re-subscribes after
    /// the settle delay. Only the latest refresh ever installs a subscription.
    pub fn refresh(&self) -> JoinHandle<()> {
        let generation = {
            let mut slot = self.inner.subscription.lock();
            let generation = self.inner.generation.advance();
            self.detach_locked(&mut slot);
            generation
        };
        self.inner.state.send_modify(|s| s.loading = true);
        info!("fleet store refreshing (generation {generation})");

        let store = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(store.inner.settle_delay).await;

            let mut slot = store.inner.subscription.lock();
            if !store.inner.generation.is_current(generation) {
                debug!("refresh generation {generation} superseded, not re-subscribing");
                return;
            }
            if let Err(e) = store.attach_locked(&mut slot, generation) {
                warn!("re-subscription after refresh failed: {e}");
            }
        })
    }

    /// Detaches for good; later pushes from the gateway are ignored.
    pub fn destroy(&self) {
        let mut slot = self.inner.subscription.lock();
        self.inner.generation.advance();
        self.detach_locked(&mut slot);
        info!("fleet store destroyed");
    }

    fn detach_locked(&self, slot: &mut Option<SubscriptionHandle>) {
        if let Some(handle) = slot.take() {
            self.inner.gateway.unsubscribe(handle);
            debug!("unsubscribed {handle:?}");
        }
    }

    fn attach_locked(
        &self,
        slot: &mut Option<SubscriptionHandle>,
        generation: u64,
    ) -> Result<(), StoreError> {
        let on_data = {
            let inner = Arc::downgrade(&self.inner);
            Arc::new(move |root: Value| {
                if let Some(inner) = inner.upgrade() {
                    inner.apply_snapshot(generation, root);
                }
            })
        };
        let on_error = {
            let inner = Arc::downgrade(&self.inner);
            Arc::new(move |err: GatewayError| {
                if let Some(inner) = inner.upgrade() {
                    inner.apply_error(generation, err);
                }
            })
        };

        match self.inner.gateway.subscribe(ROOT_PATH, on_data, on_error) {
            Ok(handle) => {
                *slot = Some(handle);
                debug!("subscribed {handle:?} (generation {generation})");
                Ok(())
            }
            Err(e) => {
                self.inner.apply_error(generation, e.clone());
                Err(e.into())
            }
        }
    }
}

impl StoreInner {
    fn apply_snapshot(&self, generation: u64, root: Value) {
        if !self.generation.is_current(generation) {
            debug!("dropping snapshot from stale generation {generation}");
            return;
        }
        self.state.send_modify(|s| {
            s.replace_from(&root);
            s.loading = false;
            // A delivered snapshot means the subscription is healthy again;
            // refresh() alone leaves a previous error in place.
            s.error = None;
        });
        debug!("snapshot applied (generation {generation})");
    }

    fn apply_error(&self, generation: u64, err: GatewayError) {
        if !self.generation.is_current(generation) {
            return;
        }
        error!("fleet read error: {err}");
        self.state.send_modify(|s| {
            s.error = Some(err.to_string());
            s.loading = false;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryGateway;
    use crate::gateway::RemoteGateway;
    use serde_json::json;

    fn store_over(tree: Value) -> (FleetStore, Arc<MemoryGateway>) {
        let gateway = Arc::new(MemoryGateway::with_tree(tree));
        (FleetStore::new(gateway.clone()), gateway)
    }

    #[test]
    fn starts_loading_with_empty_subtrees() {
        let (store, _) = store_over(json!({}));
        let state = store.snapshot();
        assert!(state.loading);
        assert!(state.systems.is_empty());
        assert_eq!(state.error, None);
    }

    #[test]
    fn init_publishes_first_snapshot() {
        let (store, _) = store_over(json!({ "systems": { "a": { "heartbeat": 1 } } }));
        store.init().unwrap();

        let state = store.snapshot();
        assert!(!state.loading);
        assert_eq!(state.systems.len(), 1);
        assert!(state.audit_logs.is_empty());
    }

    #[test]
    fn init_twice_keeps_one_subscription() {
        let (store, gateway) = store_over(json!({}));
        store.init().unwrap();
        store.init().unwrap();
        assert_eq!(gateway.active_subscriptions(), 1);
    }

    #[test]
    fn errors_keep_last_good_data() {
        let (store, gateway) = store_over(json!({ "systems": { "a": {} } }));
        store.init().unwrap();
        gateway.fail_subscriptions("permission denied");

        let state = store.snapshot();
        assert_eq!(state.error.as_deref(), Some("read failed: permission denied"));
        assert!(!state.loading);
        assert_eq!(state.systems.len(), 1);
    }

    #[test]
    fn destroy_ignores_later_pushes() {
        let (store, gateway) = store_over(json!({}));
        store.init().unwrap();
        store.destroy();

        gateway.write("systems/a/heartbeat", json!(5)).unwrap();
        assert!(store.snapshot().systems.is_empty());
        assert_eq!(gateway.active_subscriptions(), 0);
        assert!(!store.is_subscribed());
    }

    #[test]
    fn watchers_see_updates() {
        let (store, gateway) = store_over(json!({}));
        let mut rx = store.watch();
        store.init().unwrap();
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();

        gateway.write("systems/a/heartbeat", json!(5)).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow().systems.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_waits_for_settle_delay() {
        let (store, gateway) = store_over(json!({ "systems": { "a": {} } }));
        store.init().unwrap();

        let pending = store.refresh();
        let state = store.snapshot();
        assert!(state.loading);
        assert_eq!(state.systems.len(), 1, "previous data kept while settling");
        assert_eq!(gateway.active_subscriptions(), 0);

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(store.snapshot().loading);
        assert!(!store.is_subscribed());

        pending.await.unwrap();
        assert!(!store.snapshot().loading);
        assert_eq!(gateway.active_subscriptions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_refreshes_install_one_subscription() {
        let (store, gateway) = store_over(json!({}));
        store.init().unwrap();

        let first = store.refresh();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let second = store.refresh();

        first.await.unwrap();
        assert_eq!(gateway.active_subscriptions(), 0, "stale refresh must not attach");
        assert!(store.snapshot().loading);

        second.await.unwrap();
        assert_eq!(gateway.active_subscriptions(), 1);
        assert!(!store.snapshot().loading);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_during_settle_cancels_refresh() {
        let (store, gateway) = store_over(json!({}));
        store.init().unwrap();
        let pending = store.refresh();
        store.destroy();

        pending.await.unwrap();
        assert_eq!(gateway.active_subscriptions(), 0);
    }

    struct RefusingGateway;

    impl RemoteGateway for RefusingGateway {
        fn subscribe(
            &self,
            _path: &str,
            _on_data: crate::gateway::DataCallback,
            _on_error: crate::gateway::ErrorCallback,
        ) -> Result<SubscriptionHandle, GatewayError> {
            Err(GatewayError::Unavailable("offline".into()))
        }

        fn unsubscribe(&self, _handle: SubscriptionHandle) {}

        fn write(&self, _path: &str, _value: Value) -> Result<(), GatewayError> {
            Err(GatewayError::Unavailable("offline".into()))
        }
    }

    #[test]
    fn subscribe_failure_is_published() {
        let store = FleetStore::new(Arc::new(RefusingGateway));
        assert!(matches!(store.init(), Err(StoreError::Subscribe(_))));

        let state = store.snapshot();
        assert!(!state.loading);
        assert_eq!(state.error.as_deref(), Some("gateway unavailable: offline"));
    }
}
