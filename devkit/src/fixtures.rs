/*!
Builders d'arbres distants pour les tests

Produisent le document JSON tel qu'un gateway le pousse sur `/`:
`systems`, `configurations`, `runtime_state`, `logs`, `audit_logs`.
*/

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Heure courante en secondes epoch, horloge murale
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Heure courante en millisecondes epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Builder d'un enregistrement `systems/{id}`
#[derive(Debug, Clone, Default)]
pub struct SystemBuilder {
    meta: Map<String, Value>,
    heartbeat: Option<Value>,
}

impl SystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hostname<S: Into<String>>(self, hostname: S) -> Self {
        self.meta_field("hostname", hostname.into())
    }

    pub fn nickname<S: Into<String>>(self, nickname: S) -> Self {
        self.meta_field("nickname", nickname.into())
    }

    pub fn ip<S: Into<String>>(self, ip: S) -> Self {
        self.meta_field("ip", ip.into())
    }

    pub fn os<S: Into<String>>(self, os: S) -> Self {
        self.meta_field("os", os.into())
    }

    fn meta_field(mut self, key: &str, value: String) -> Self {
        self.meta.insert(key.to_string(), Value::String(value));
        self
    }

    /// Heartbeat absolu (secondes epoch)
    pub fn heartbeat(mut self, secs: i64) -> Self {
        self.heartbeat = Some(json!(secs));
        self
    }

    /// Heartbeat relatif à maintenant
    pub fn seen_secs_ago(self, secs: i64) -> Self {
        self.heartbeat(now_secs() - secs)
    }

    /// Heartbeat de forme arbitraire (enregistrements mal formés)
    pub fn raw_heartbeat(mut self, value: Value) -> Self {
        self.heartbeat = Some(value);
        self
    }

    pub fn build(self) -> Value {
        let mut record = Map::new();
        if !self.meta.is_empty() {
            record.insert("meta".into(), Value::Object(self.meta));
        }
        if let Some(heartbeat) = self.heartbeat {
            record.insert("heartbeat".into(), heartbeat);
        }
        Value::Object(record)
    }
}

/// Builder de l'arbre complet
#[derive(Debug, Clone, Default)]
pub struct TreeBuilder {
    subtrees: BTreeMap<String, Map<String, Value>>,
    raw: Vec<(String, Value)>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system<S: Into<String>>(self, id: S, system: SystemBuilder) -> Self {
        self.insert_at("systems", id.into(), system.build())
    }

    /// Ajoute un job sous `configurations/{system}/{job_id}`
    pub fn job<S: Into<String>>(mut self, system: S, job_id: S, job: Value) -> Self {
        let jobs = self
            .subtree("configurations")
            .entry(system.into())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(jobs) = jobs {
            jobs.insert(job_id.into(), job);
        }
        self
    }

    pub fn runtime<S: Into<String>>(self, system: S, state: Value) -> Self {
        self.insert_at("runtime_state", system.into(), state)
    }

    pub fn log<S: Into<String>>(self, key: S, line: Value) -> Self {
        self.insert_at("logs", key.into(), line)
    }

    /// Entrée d'audit avec timestamp explicite (ms)
    pub fn audit<S: Into<String>>(self, key: S, timestamp: i64, user: &str, action: &str) -> Self {
        let entry = json!({
            "timestamp": timestamp,
            "user": user,
            "action": action,
            "target": "fixture",
            "details": ""
        });
        self.insert_at("audit_logs", key.into(), entry)
    }

    /// Remplace un sous-arbre entier, forme libre
    pub fn raw<S: Into<String>>(mut self, key: S, value: Value) -> Self {
        self.raw.push((key.into(), value));
        self
    }

    pub fn build(self) -> Value {
        let mut root: Map<String, Value> = self
            .subtrees
            .into_iter()
            .map(|(key, subtree)| (key, Value::Object(subtree)))
            .collect();
        for (key, value) in self.raw {
            root.insert(key, value);
        }
        Value::Object(root)
    }

    fn insert_at(mut self, subtree: &str, key: String, value: Value) -> Self {
        self.subtree(subtree).insert(key, value);
        self
    }

    fn subtree(&mut self, key: &str) -> &mut Map<String, Value> {
        self.subtrees.entry(key.to_string()).or_default()
    }
}
