//! In-process tree gateway.
//!
//! Holds the whole remote tree as one JSON value. Serves the same contract as a
//! networked gateway (initial value on subscribe, push on every overlapping
//! write) and adds hooks to inject failures from tests.

use super::{
    path_segments, value_at, DataCallback, ErrorCallback, GatewayError, RemoteGateway,
    SubscriptionHandle,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub path: String,
    pub value: Value,
}

struct Subscriber {
    path: String,
    on_data: DataCallback,
    on_error: ErrorCallback,
}

pub struct MemoryGateway {
    tree: Mutex<Value>,
    subscribers: Mutex<BTreeMap<u64, Subscriber>>,
    next_handle: AtomicU64,
    // Held for the whole of a delivery round so subscribers never see two
    // rounds interleave.
    delivery: Mutex<()>,
    fail_writes: AtomicBool,
    writes: Mutex<Vec<WriteRecord>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::with_tree(Value::Object(Map::new()))
    }

    pub fn with_tree(tree: Value) -> Self {
        Self {
            tree: Mutex::new(tree),
            subscribers: Mutex::new(BTreeMap::new()),
            next_handle: AtomicU64::new(1),
            delivery: Mutex::new(()),
            fail_writes: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Loads the initial tree from a JSON document on disk.
    pub fn from_seed_file<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Read(format!("{}: {e}", path.display())))?;
        let tree: Value = serde_json::from_str(&content)
            .map_err(|e| GatewayError::Read(format!("{}: {e}", path.display())))?;
        info!("memory gateway seeded from {}", path.display());
        Ok(Self::with_tree(tree))
    }

    /// Current value at `path`, `None` when absent.
    pub fn value_at(&self, path: &str) -> Option<Value> {
        value_at(&self.tree.lock(), path).cloned()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Reports a read failure to every active subscription.
    pub fn fail_subscriptions(&self, message: &str) {
        let _round = self.delivery.lock();
        let callbacks: Vec<ErrorCallback> = self
            .subscribers
            .lock()
            .values()
            .map(|s| s.on_error.clone())
            .collect();
        warn!("memory gateway failing {} subscriptions: {message}", callbacks.len());
        for on_error in callbacks {
            on_error(GatewayError::Read(message.to_string()));
        }
    }

    /// Re-delivers the current tree to subscribers overlapping `path`.
    pub fn notify(&self, path: &str) {
        let _round = self.delivery.lock();
        let targets: Vec<(String, DataCallback)> = self
            .subscribers
            .lock()
            .values()
            .filter(|s| overlaps(&s.path, path))
            .map(|s| (s.path.clone(), s.on_data.clone()))
            .collect();

        for (sub_path, on_data) in targets {
            let value = self.value_at(&sub_path).unwrap_or(Value::Null);
            on_data(value);
        }
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteGateway for MemoryGateway {
    fn subscribe(
        &self,
        path: &str,
        on_data: DataCallback,
        on_error: ErrorCallback,
    ) -> Result<SubscriptionHandle, GatewayError> {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().insert(
            id,
            Subscriber {
                path: path.to_string(),
                on_data: on_data.clone(),
                on_error,
            },
        );
        debug!("memory gateway: subscription {id} on '{path}'");

        let _round = self.delivery.lock();
        on_data(self.value_at(path).unwrap_or(Value::Null));
        Ok(SubscriptionHandle(id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        if self.subscribers.lock().remove(&handle.0).is_some() {
            debug!("memory gateway: subscription {} removed", handle.0);
        }
    }

    fn write(&self, path: &str, value: Value) -> Result<(), GatewayError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Write(format!("write to '{path}' rejected")));
        }

        {
            let mut tree = self.tree.lock();
            set_at(&mut tree, &path_segments(path), value.clone());
        }
        self.writes.lock().push(WriteRecord {
            path: path.to_string(),
            value,
        });

        self.notify(path);
        Ok(())
    }
}

/// True when one path is an ancestor of (or equal to) the other.
fn overlaps(a: &str, b: &str) -> bool {
    let a = path_segments(a);
    let b = path_segments(b);
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

fn set_at(node: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if value.is_null() {
        if let Some(map) = node.as_object_mut() {
            if rest.is_empty() {
                map.remove(*head);
            } else if let Some(child) = map.get_mut(*head) {
                set_at(child, rest, Value::Null);
                if is_empty(child) {
                    map.remove(*head);
                }
            }
        }
        return;
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.to_string()).or_insert(Value::Null);
        set_at(child, rest, value);
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
