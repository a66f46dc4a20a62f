use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub gateway: GatewayConf,
    pub http: HttpConf,
    pub store: StoreConf,
    pub monitor: MonitorConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    #[default]
    Mqtt,
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GatewayConf {
    pub kind: GatewayKind,
    pub mqtt: MqttConf,
    /// JSON tree loaded into the memory gateway at startup.
    pub seed_file: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "fleetwatch-kernel".into(),
            topic_prefix: "fleetwatch".into(),
            keep_alive_secs: 15,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConf {
    /// Pause between teardown and re-subscription on refresh.
    pub settle_delay_ms: u64,
}

impl Default for StoreConf {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConf {
    pub tick_secs: u64,
}

impl Default for MonitorConf {
    fn default() -> Self {
        Self { tick_secs: 5 }
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("FLEETWATCH_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    load_config_from(Path::new(&path)).await
}

pub async fn load_config_from(path: &Path) -> KernelConfig {
    if !path.exists() {
        warn!("no {} found, using default config", path.display());
        return KernelConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    parse_config(&txt).unwrap_or_else(|e| {
        warn!("invalid config {}: {e}", path.display());
        KernelConfig::default()
    })
}
