use crate::error::{FleetError, Result};
use crate::models::NodeSpec;
use crate::monitor::{AlertThresholds, MonitorSettings};
use crate::router::RoutingAlgorithm;
use crate::topology::{ConnectionProps, ConnectionStatus, DEFAULT_MAX_CONNECTIONS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "FLEET_KERNEL_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub mqtt: Option<MqttConf>,         // absent: events go to the log
    pub health: HealthConf,
    pub router: RouterConf,
    pub topology: TopologyConf,
    pub nodes: Vec<NodeSpec>,           // registered at startup
    pub connections: Vec<ConnectionConf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConf {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "fleet-kernel".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    #[default]
    Tcp,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConf {
    pub interval_secs: u64,
    pub probe_timeout_ms: u64,
    pub history_size: usize,
    pub probe: ProbeMode,
    pub seed: u64,                      // simulated probe only
    pub thresholds: AlertThresholds,
}

impl Default for HealthConf {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            probe_timeout_ms: 5000,
            history_size: 100,
            probe: ProbeMode::Tcp,
            seed: 42,
            thresholds: AlertThresholds::default(),
        }
    }
}

impl HealthConf {
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            interval: Duration::from_secs(self.interval_secs),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            history_size: self.history_size,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConf {
    pub algorithm: RoutingAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConf {
    pub max_connections: usize,
}

impl Default for TopologyConf {
    fn default() -> Self {
        Self { max_connections: DEFAULT_MAX_CONNECTIONS }
    }
}

/// Directed link declared in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConf {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub latency_ms: f64,
    #[serde(default)]
    pub bandwidth_mbps: Option<f64>,
    #[serde(default)]
    pub status: ConnectionStatus,
}

impl ConnectionConf {
    pub fn props(&self) -> ConnectionProps {
        ConnectionProps {
            latency_ms: self.latency_ms,
            bandwidth_mbps: self.bandwidth_mbps,
            status: self.status,
        }
    }
}

impl KernelConfig {
    /// Rejects values the components cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.health.interval_secs == 0 {
            return Err(FleetError::Config("health.interval_secs must be > 0".into()));
        }
        if self.health.probe_timeout_ms == 0 {
            return Err(FleetError::Config("health.probe_timeout_ms must be > 0".into()));
        }
        if self.health.history_size == 0 {
            return Err(FleetError::Config("health.history_size must be > 0".into()));
        }
        if self.topology.max_connections == 0 {
            return Err(FleetError::Config("topology.max_connections must be > 0".into()));
        }
        self.health
            .thresholds
            .validate()
            .map_err(|e| FleetError::Config(format!("health.thresholds: {e}")))
    }
}

/// Parses YAML text; an empty document yields the defaults
pub fn parse_config(txt: &str) -> Result<KernelConfig> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    let cfg: KernelConfig = serde_yaml::from_str(txt).map_err(|e| FleetError::Config(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
}

pub async fn load_config_from(path: impl AsRef<Path>) -> Result<KernelConfig> {
    let path = path.as_ref();
    if !path.exists() {
        warn!("no config at {}, using defaults", path.display());
        return Ok(KernelConfig::default());
    }
    let txt = fs::read_to_string(path)
        .await
        .map_err(|e| FleetError::Config(format!("cannot read {}: {e}", path.display())))?;
    let cfg = parse_config(&txt)?;
    info!("loaded config from {} ({} bootstrap nodes)", path.display(), cfg.nodes.len());
    Ok(cfg)
}

/// Reads `$FLEET_KERNEL_CONFIG`, defaulting to `kernel.yaml`
pub async fn load_config() -> Result<KernelConfig> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "kernel.yaml".into());
    load_config_from(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeClass;

    #[test]
    fn test_empty_document_is_default() {
        let cfg = parse_config("  \n").unwrap();
        assert_eq!(cfg.http.bind, "0.0.0.0:8080");
        assert!(cfg.mqtt.is_none());
        assert_eq!(cfg.health.history_size, 100);
        assert_eq!(cfg.health.probe, ProbeMode::Tcp);
        assert_eq!(cfg.router.algorithm, RoutingAlgorithm::HealthBased);
        assert_eq!(cfg.topology.max_connections, 10);
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
http:
  bind: "127.0.0.1:9000"
mqtt:
  host: broker.local
health:
  interval_secs: 10
  probe: simulated
  seed: 7
  thresholds:
    latency_ms: 150
router:
  algorithm: least_connections
nodes:
  - id: a
    name: node a
    address: http://10.0.0.1:8080
    region: eu
    class: primary
    capabilities: [compute]
  - id: b
    name: node b
    address: http://10.0.0.2:8080
    region: eu
    class: mesh
    capabilities: [compute, storage]
connections:
  - from: a
    to: b
    latency_ms: 12
"#;
        let cfg = parse_config(yaml).unwrap();
        let mqtt = cfg.mqtt.as_ref().unwrap();
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.client_id, "fleet-kernel");
        assert_eq!(cfg.health.probe, ProbeMode::Simulated);
        assert_eq!(cfg.health.thresholds.latency_ms, 150.0);
        assert_eq!(cfg.health.thresholds.uptime, 0.99);
        assert_eq!(cfg.health.monitor_settings().interval, Duration::from_secs(10));
        assert_eq!(cfg.router.algorithm, RoutingAlgorithm::LeastConnections);
        assert_eq!(cfg.nodes.len(), 2);
        assert_eq!(cfg.nodes[1].class, NodeClass::Mesh);
        assert_eq!(cfg.connections[0].props().status, ConnectionStatus::Up);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(parse_config("health:\n  interval_secs: 0\n"), Err(FleetError::Config(_))));
        assert!(matches!(
            parse_config("health:\n  thresholds:\n    uptime: 2.0\n"),
            Err(FleetError::Config(_))
        ));
        assert!(matches!(parse_config("router:\n  algorithm: random\n"), Err(FleetError::Config(_))));
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let cfg = load_config_from("/nonexistent/fleet/kernel.yaml").await.unwrap();
        assert!(cfg.nodes.is_empty());
    }
}
