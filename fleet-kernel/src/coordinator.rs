/**
 * FLEET COORDINATOR - Wiring and fleet-level operations
 *
 * ROLE : Builds registry, topology, monitor and router, and exposes ping,
 * capabilities, network status and health plus pass-throughs.
 *
 * ARCHITECTURE : Components talk through observer subscriptions. Every event
 * that leaves the process goes through `EventBridge`, which republishes it on
 * a versioned topic of the configured sink.
 */

use crate::config::KernelConfig;
use crate::error::{FleetError, Result};
use crate::models::{HealthSample, Node, NodeMetrics, NodeSpec, NodeStatus, NodeUpdate, RemovedNode};
use crate::monitor::{summarize, AlertThresholds, HealthAlert, HealthMonitor, MonitorObserver, NetworkSummary};
use crate::probe::HealthProbe;
use crate::registry::{NodeFilter, NodeRegistry, RegistryEvent, RegistryObserver};
use crate::router::{
    NodeSelection, RequestRouter, RouterObserver, RouterStats, RoutingAlgorithm, SelectionCriteria,
    TrafficAllocation,
};
use crate::sink::EventSink;
use crate::topology::{
    ClusterHealth, ClusterStatus, Connection, ConnectionProps, OptimizationReport, RoutePath, TopologyEvent,
    TopologyGraph, TopologyObserver, TopologySnapshot,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub mod topics {
    pub const NODE_JOINED: &str = "fleet/nodes/joined@v1";
    pub const NODE_LEFT: &str = "fleet/nodes/left@v1";
    pub const NODE_ALERT: &str = "fleet/nodes/alert@v1";
    pub const TOPOLOGY_CHANGED: &str = "fleet/topology/changed@v1";
}

/// Fixed feature flags reported by `get_capabilities`
pub const FEATURES: [&str; 5] = [
    "health_monitoring",
    "topology_routing",
    "load_balancing",
    "traffic_distribution",
    "event_publishing",
];

pub const MAX_PING_COUNT: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PingRequest {
    pub node_id: Option<String>,
    pub timeout_ms: u64,
    pub count: u32,
}

impl Default for PingRequest {
    fn default() -> Self {
        Self {
            node_id: None,
            timeout_ms: 1000,
            count: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PingAttempt {
    pub node_id: String,
    pub sequence: u32,
    pub success: bool,
    pub latency_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingSummary {
    pub total_nodes: usize,
    pub total_pings: usize,
    pub successful_pings: usize,
    pub average_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub packet_loss: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingReport {
    pub results: Vec<PingAttempt>,
    pub summary: PingSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    pub node_count: usize,
    pub capabilities: Vec<String>,
    pub protocols: Vec<String>,
    pub regions: Vec<String>,
    pub features: Vec<&'static str>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusQuery {
    pub region: Option<String>,
    pub include_metrics: bool,
    pub include_topology: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub total_nodes: usize,
    pub available_nodes: usize,
    pub availability: f64,
    pub average_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeMetricsEntry {
    pub node_id: String,
    pub status: NodeStatus,
    pub metrics: NodeMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub network: NetworkSummary,
    pub regions: BTreeMap<String, NetworkSummary>,
    pub services: BTreeMap<String, ServiceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<NodeMetricsEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topology: Option<TopologySnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dependencies {
    pub registry: bool,
    pub topology: bool,
    pub monitor: bool,
    pub event_sink: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct KernelHealth {
    pub status: ClusterStatus,
    pub version: &'static str,
    pub dependencies: Dependencies,
    pub network_health_ratio: f64,
    pub total_nodes: usize,
    pub uptime_secs: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_tick: Option<OffsetDateTime>,
}

#[derive(Serialize)]
struct NodeJoined<'a> {
    node: &'a Node,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

/// Republishes component events on the outbound sink
struct EventBridge {
    sink: Arc<dyn EventSink>,
}

impl EventBridge {
    fn send(&self, topic: &str, payload: Result<Value>) {
        let outcome = payload.and_then(|p| self.sink.publish(topic, &p));
        if let Err(e) = outcome {
            warn!("event on {} dropped: {}", topic, e);
        }
    }
}

impl RegistryObserver for EventBridge {
    fn on_registry_event(&self, event: &RegistryEvent) {
        match event {
            RegistryEvent::NodeAdded(node) => {
                let joined = NodeJoined {
                    node,
                    timestamp: OffsetDateTime::now_utc(),
                };
                self.send(topics::NODE_JOINED, serde_json::to_value(&joined).map_err(Into::into));
            }
            RegistryEvent::NodeRemoved(removed) => {
                self.send(topics::NODE_LEFT, serde_json::to_value(removed).map_err(Into::into));
            }
            _ => {}
        }
    }
}

impl TopologyObserver for EventBridge {
    fn on_topology_changed(&self, event: &TopologyEvent) {
        self.send(topics::TOPOLOGY_CHANGED, serde_json::to_value(event).map_err(Into::into));
    }
}

impl MonitorObserver for EventBridge {
    fn on_alert(&self, alert: &HealthAlert) {
        self.send(topics::NODE_ALERT, serde_json::to_value(alert).map_err(Into::into));
    }
}

impl RouterObserver for EventBridge {
    fn on_node_selected(&self, selection: &NodeSelection) {
        debug!(
            "node_selected {} ({}, {} candidates)",
            selection.node_id, selection.algorithm, selection.candidate_count
        );
    }
}

/// Scheme of a node address; bare `host:port` counts as tcp
pub fn address_protocol(address: &str) -> String {
    match address.split_once("://") {
        Some((scheme, _)) if !scheme.is_empty() => scheme.to_ascii_lowercase(),
        _ => "tcp".to_string(),
    }
}

pub struct Coordinator {
    registry: Arc<NodeRegistry>,
    topology: Arc<TopologyGraph>,
    monitor: Arc<HealthMonitor>,
    router: Arc<RequestRouter>,
    probe: Arc<dyn HealthProbe>,
    sink: Arc<dyn EventSink>,
    started_at: OffsetDateTime,
    started: Instant,
}

impl Coordinator {
    pub fn new(cfg: &KernelConfig, probe: Arc<dyn HealthProbe>, sink: Arc<dyn EventSink>) -> Self {
        let registry = Arc::new(NodeRegistry::new());
        let topology = Arc::new(TopologyGraph::with_max_connections(cfg.topology.max_connections));
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            probe.clone(),
            cfg.health.monitor_settings(),
            cfg.health.thresholds,
        ));
        let router = Arc::new(RequestRouter::new(registry.clone(), cfg.router.algorithm));

        // topology first, so published events already see the graph updated
        registry.subscribe(topology.clone());
        registry.subscribe(monitor.clone());
        registry.subscribe(router.clone());
        let bridge = Arc::new(EventBridge { sink: sink.clone() });
        registry.subscribe(bridge.clone());
        topology.subscribe(bridge.clone());
        monitor.subscribe(bridge.clone());
        router.subscribe(bridge);

        info!(
            "coordinator ready (sink: {}, router: {})",
            sink.name(),
            cfg.router.algorithm
        );

        Self {
            registry,
            topology,
            monitor,
            router,
            probe,
            sink,
            started_at: OffsetDateTime::now_utc(),
            started: Instant::now(),
        }
    }

    /// Registers the configured nodes, then their connections
    pub fn bootstrap(&self, cfg: &KernelConfig) -> Result<()> {
        for spec in &cfg.nodes {
            self.registry.add(spec.clone())?;
        }
        for link in &cfg.connections {
            self.topology.add_connection(&link.from, &link.to, link.props())?;
        }
        if !cfg.nodes.is_empty() {
            info!(
                "bootstrapped {} nodes and {} connections",
                cfg.nodes.len(),
                cfg.connections.len()
            );
        }
        Ok(())
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn topology(&self) -> &Arc<TopologyGraph> {
        &self.topology
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn router(&self) -> &Arc<RequestRouter> {
        &self.router
    }

    pub fn start_monitoring(&self) {
        self.monitor.start();
    }

    pub fn shutdown(&self) {
        self.monitor.stop();
        info!("coordinator shut down");
    }

    /// Probes one node, or every active node, `count` times each
    pub async fn ping(&self, request: &PingRequest) -> Result<PingReport> {
        if request.count == 0 || request.count > MAX_PING_COUNT {
            return Err(FleetError::Validation(format!(
                "ping count must be between 1 and {MAX_PING_COUNT}"
            )));
        }
        if request.timeout_ms == 0 {
            return Err(FleetError::Validation("ping timeout must be positive".into()));
        }

        let targets = match &request.node_id {
            Some(id) => vec![self.registry.get(id).ok_or_else(|| FleetError::node_not_found(id))?],
            None => self.registry.list_by_status(NodeStatus::Active),
        };
        let timeout = Duration::from_millis(request.timeout_ms);

        let runs = targets.iter().map(|node| async move {
            let mut attempts = Vec::with_capacity(request.count as usize);
            for sequence in 1..=request.count {
                let latency_ms = match tokio::time::timeout(timeout, self.probe.ping(node, timeout)).await {
                    Ok(Ok(reading)) => Some(reading.latency_ms),
                    Ok(Err(e)) => {
                        debug!("ping {}#{} failed: {}", node.id, sequence, e);
                        None
                    }
                    Err(_) => None,
                };
                attempts.push(PingAttempt {
                    node_id: node.id.clone(),
                    sequence,
                    success: latency_ms.is_some(),
                    latency_ms,
                });
            }
            attempts
        });
        let results: Vec<PingAttempt> = join_all(runs).await.into_iter().flatten().collect();

        let latencies: Vec<f64> = results.iter().filter_map(|a| a.latency_ms).collect();
        let total_pings = results.len();
        let summary = PingSummary {
            total_nodes: targets.len(),
            total_pings,
            successful_pings: latencies.len(),
            average_latency_ms: if latencies.is_empty() {
                0.0
            } else {
                latencies.iter().sum::<f64>() / latencies.len() as f64
            },
            min_latency_ms: latencies.iter().copied().reduce(f64::min).unwrap_or(0.0),
            max_latency_ms: latencies.iter().copied().reduce(f64::max).unwrap_or(0.0),
            packet_loss: if total_pings == 0 {
                0.0
            } else {
                (total_pings - latencies.len()) as f64 / total_pings as f64
            },
        };

        Ok(PingReport { results, summary })
    }

    pub fn get_capabilities(&self, node_id: Option<&str>, service: Option<&str>) -> Result<CapabilityReport> {
        let nodes = match node_id {
            Some(id) => vec![self.registry.get(id).ok_or_else(|| FleetError::node_not_found(id))?],
            None => self.registry.list(),
        };

        let needle = service.map(str::to_ascii_lowercase);
        let capabilities: BTreeSet<String> = nodes
            .iter()
            .flat_map(|n| n.capabilities.iter())
            .filter(|c| needle.as_deref().map_or(true, |s| c.to_ascii_lowercase().contains(s)))
            .cloned()
            .collect();
        let protocols: BTreeSet<String> = nodes.iter().map(|n| address_protocol(&n.address)).collect();
        let regions: BTreeSet<String> = nodes.iter().map(|n| n.region.clone()).collect();

        Ok(CapabilityReport {
            node_count: nodes.len(),
            capabilities: capabilities.into_iter().collect(),
            protocols: protocols.into_iter().collect(),
            regions: regions.into_iter().collect(),
            features: FEATURES.to_vec(),
        })
    }

    pub fn get_network_status(&self, query: &StatusQuery) -> NetworkStatus {
        let nodes: Vec<Node> = match &query.region {
            Some(region) => self.registry.list_by_region(region),
            None => self.registry.list(),
        };

        let mut by_region: BTreeMap<String, Vec<Node>> = BTreeMap::new();
        for node in &nodes {
            by_region.entry(node.region.clone()).or_default().push(node.clone());
        }
        let regions = by_region
            .into_iter()
            .map(|(region, members)| (region, summarize(&members)))
            .collect();

        let mut by_service: BTreeMap<String, Vec<&Node>> = BTreeMap::new();
        for node in &nodes {
            for capability in &node.capabilities {
                by_service.entry(capability.clone()).or_default().push(node);
            }
        }
        let services = by_service
            .into_iter()
            .map(|(service, members)| {
                let available: Vec<&&Node> = members.iter().filter(|n| n.status == NodeStatus::Active).collect();
                let average_latency_ms = if available.is_empty() {
                    0.0
                } else {
                    available.iter().map(|n| n.metrics.latency_ms).sum::<f64>() / available.len() as f64
                };
                let status = ServiceStatus {
                    total_nodes: members.len(),
                    available_nodes: available.len(),
                    availability: available.len() as f64 / members.len() as f64,
                    average_latency_ms,
                };
                (service, status)
            })
            .collect();

        NetworkStatus {
            timestamp: OffsetDateTime::now_utc(),
            network: summarize(&nodes),
            regions,
            services,
            metrics: query.include_metrics.then(|| {
                nodes
                    .iter()
                    .map(|n| NodeMetricsEntry {
                        node_id: n.id.clone(),
                        status: n.status,
                        metrics: n.metrics.clone(),
                    })
                    .collect()
            }),
            topology: query.include_topology.then(|| self.topology.snapshot()),
        }
    }

    pub fn get_health(&self) -> KernelHealth {
        let network = self.monitor.network_summary();
        let dependencies = Dependencies {
            registry: true,
            topology: true,
            monitor: self.monitor.is_running(),
            event_sink: self.sink.is_connected(),
        };

        let mut status = network.overall_status;
        if status == ClusterStatus::Healthy && !(dependencies.monitor && dependencies.event_sink) {
            status = ClusterStatus::Degraded;
        }

        KernelHealth {
            status,
            version: env!("CARGO_PKG_VERSION"),
            dependencies,
            network_health_ratio: network.health_ratio,
            total_nodes: network.total_nodes,
            uptime_secs: self.started.elapsed().as_secs(),
            started_at: self.started_at,
            last_tick: self.monitor.last_tick(),
        }
    }

    pub fn register_node(&self, spec: NodeSpec) -> Result<Node> {
        self.registry.add(spec)
    }

    pub fn update_node(&self, id: &str, update: NodeUpdate) -> Result<Node> {
        self.registry.update(id, update)
    }

    pub fn deregister_node(&self, id: &str, reason: &str, graceful: bool) -> Result<RemovedNode> {
        self.registry.remove(id, reason, graceful)
    }

    pub fn get_node(&self, id: &str) -> Result<Node> {
        self.registry.get(id).ok_or_else(|| FleetError::node_not_found(id))
    }

    pub fn list_nodes(&self, filter: &NodeFilter) -> Vec<Node> {
        self.registry.filter(filter)
    }

    pub fn node_history(&self, id: &str) -> Result<Vec<HealthSample>> {
        if !self.registry.contains(id) {
            return Err(FleetError::node_not_found(id));
        }
        Ok(self.monitor.history(id))
    }

    pub fn connect(&self, from: &str, to: &str, props: ConnectionProps) -> Result<Connection> {
        self.topology.add_connection(from, to, props)
    }

    pub fn disconnect(&self, from: &str, to: &str) -> Result<Connection> {
        self.topology.remove_connection(from, to)
    }

    pub fn shortest_path(&self, from: &str, to: &str) -> Option<RoutePath> {
        self.topology.shortest_path(from, to)
    }

    pub fn cluster_health(&self, id: &str) -> Result<ClusterHealth> {
        self.topology.cluster_health(id)
    }

    pub fn optimize(&self) -> OptimizationReport {
        self.topology.optimize()
    }

    pub fn topology_snapshot(&self) -> TopologySnapshot {
        self.topology.snapshot()
    }

    pub fn select_node(&self, criteria: &SelectionCriteria, algorithm: Option<RoutingAlgorithm>) -> Result<Node> {
        match algorithm {
            Some(algorithm) => self.router.select_with(algorithm, criteria),
            None => self.router.select_node(criteria),
        }
    }

    pub fn distribute_traffic(&self, total: u64, criteria: &SelectionCriteria) -> Result<Vec<TrafficAllocation>> {
        self.router.distribute_traffic(total, criteria)
    }

    pub fn release(&self, node_id: &str) -> u64 {
        self.router.release(node_id)
    }

    pub fn router_stats(&self) -> RouterStats {
        self.router.stats()
    }

    pub async fn set_thresholds(&self, thresholds: AlertThresholds) -> Result<()> {
        self.monitor.set_thresholds(thresholds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConf;
    use crate::models::{NodeClass, NodeTier};
    use crate::probe::{ProbeReading, SimulatedProbe};
    use crate::sink::RecordingSink;

    fn spec(id: &str, region: &str, address: &str, caps: &[&str]) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            name: id.to_string(),
            address: address.to_string(),
            region: region.to_string(),
            class: NodeClass::Mesh,
            tier: NodeTier::Standard,
            status: NodeStatus::Active,
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            metrics: NodeMetrics::default(),
        }
    }

    fn coordinator() -> (Coordinator, Arc<SimulatedProbe>, Arc<RecordingSink>) {
        let probe = Arc::new(SimulatedProbe::new(3));
        let sink = Arc::new(RecordingSink::new());
        let coordinator = Coordinator::new(&KernelConfig::default(), probe.clone(), sink.clone());
        (coordinator, probe, sink)
    }

    #[test]
    fn test_address_protocol() {
        assert_eq!(address_protocol("https://a.example"), "https");
        assert_eq!(address_protocol("GRPC://a:50051"), "grpc");
        assert_eq!(address_protocol("10.0.0.1:9000"), "tcp");
    }

    #[test]
    fn test_membership_events_published() {
        let (c, _probe, sink) = coordinator();
        c.register_node(spec("a", "eu", "http://a:80", &["compute"])).unwrap();
        c.register_node(spec("b", "eu", "http://b:80", &["compute"])).unwrap();
        c.connect("a", "b", ConnectionProps::default()).unwrap();
        c.deregister_node("b", "decommissioned", false).unwrap();

        assert_eq!(sink.count(topics::NODE_JOINED), 2);
        assert_eq!(sink.last(topics::NODE_JOINED).unwrap()["node"]["id"], "b");
        let left = sink.last(topics::NODE_LEFT).unwrap();
        assert_eq!(left["node"]["id"], "b");
        assert_eq!(left["reason"], "decommissioned");
        assert_eq!(left["graceful"], false);
        assert!(sink.count(topics::TOPOLOGY_CHANGED) >= 4);
        assert!(c.topology().node("b").is_none());
        assert!(c.topology().connections().is_empty());
    }

    #[tokio::test]
    async fn test_alerts_published() {
        let (c, probe, sink) = coordinator();
        c.register_node(spec("a", "eu", "http://a:80", &["compute"])).unwrap();
        probe.pin("a", ProbeReading { latency_ms: 12.0, uptime: 0.85, error_rate: 0.0 });

        c.monitor().check_now().await;

        let alert = sink.last(topics::NODE_ALERT).unwrap();
        assert_eq!(alert["node_id"], "a");
        assert_eq!(alert["type"], "low_uptime");
        assert_eq!(alert["severity"], "critical");
        assert_eq!(c.get_node("a").unwrap().status, NodeStatus::Inactive);
        assert_eq!(c.topology().node("a").unwrap().status, NodeStatus::Inactive);
    }

    #[tokio::test]
    async fn test_ping() {
        let (c, probe, _sink) = coordinator();
        c.register_node(spec("a", "eu", "http://a:80", &["compute"])).unwrap();
        c.register_node(spec("b", "us", "http://b:80", &["compute"])).unwrap();
        probe.pin("a", ProbeReading { latency_ms: 20.0, uptime: 1.0, error_rate: 0.0 });
        probe.fail("b");

        let report = c.ping(&PingRequest { count: 2, ..Default::default() }).await.unwrap();
        assert_eq!(report.summary.total_nodes, 2);
        assert_eq!(report.summary.total_pings, 4);
        assert_eq!(report.summary.successful_pings, 2);
        assert_eq!(report.summary.packet_loss, 0.5);
        assert_eq!(report.summary.min_latency_ms, 20.0);
        assert_eq!(report.results[1].sequence, 2);

        let single = c
            .ping(&PingRequest { node_id: Some("a".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(single.results.len(), 1);

        let unknown = PingRequest { node_id: Some("zz".into()), ..Default::default() };
        assert!(matches!(c.ping(&unknown).await, Err(FleetError::NotFound { .. })));
        let bad = PingRequest { count: 0, ..Default::default() };
        assert!(matches!(c.ping(&bad).await, Err(FleetError::Validation(_))));
    }

    #[test]
    fn test_capabilities() {
        let (c, _probe, _sink) = coordinator();
        c.register_node(spec("a", "eu", "https://a", &["compute", "storage"])).unwrap();
        c.register_node(spec("b", "us", "b:9000", &["gpu-compute"])).unwrap();

        let all = c.get_capabilities(None, None).unwrap();
        assert_eq!(all.capabilities, ["compute", "gpu-compute", "storage"]);
        assert_eq!(all.protocols, ["https", "tcp"]);
        assert_eq!(all.regions, ["eu", "us"]);
        assert_eq!(all.features.len(), FEATURES.len());

        let filtered = c.get_capabilities(None, Some("COMPUTE")).unwrap();
        assert_eq!(filtered.capabilities, ["compute", "gpu-compute"]);

        let one = c.get_capabilities(Some("b"), None).unwrap();
        assert_eq!(one.node_count, 1);
        assert!(c.get_capabilities(Some("zz"), None).is_err());
    }

    #[test]
    fn test_network_status() {
        let (c, _probe, _sink) = coordinator();
        c.register_node(spec("a", "eu", "http://a", &["compute"])).unwrap();
        c.register_node(spec("b", "eu", "http://b", &["compute"])).unwrap();
        let mut down = spec("c", "us", "http://c", &["compute"]);
        down.status = NodeStatus::Inactive;
        c.register_node(down).unwrap();

        let status = c.get_network_status(&StatusQuery::default());
        assert_eq!(status.network.total_nodes, 3);
        assert_eq!(status.regions["eu"].active, 2);
        assert_eq!(status.regions["us"].overall_status, ClusterStatus::Critical);
        assert_eq!(status.services["compute"].available_nodes, 2);
        assert!(status.metrics.is_none());
        assert!(status.topology.is_none());

        let eu = c.get_network_status(&StatusQuery {
            region: Some("eu".into()),
            include_metrics: true,
            include_topology: true,
        });
        assert_eq!(eu.network.total_nodes, 2);
        assert_eq!(eu.metrics.unwrap().len(), 2);
        assert_eq!(eu.topology.unwrap().summary.nodes, 3);
    }

    #[test]
    fn test_health_reports_stopped_monitor() {
        let (c, _probe, _sink) = coordinator();
        let health = c.get_health();
        assert!(!health.dependencies.monitor);
        assert!(health.dependencies.event_sink);
        assert_eq!(health.network_health_ratio, 1.0);
        assert_eq!(health.status, ClusterStatus::Degraded);
    }

    #[tokio::test]
    async fn test_health_with_running_monitor() {
        let (c, _probe, _sink) = coordinator();
        c.start_monitoring();
        assert_eq!(c.get_health().status, ClusterStatus::Healthy);
        c.shutdown();
        c.shutdown();
    }

    #[test]
    fn test_bootstrap_and_routing_passthrough() {
        let (c, _probe, _sink) = coordinator();
        let cfg = KernelConfig {
            nodes: vec![
                spec("a", "eu", "http://a", &["compute"]),
                spec("b", "eu", "http://b", &["compute"]),
            ],
            connections: vec![ConnectionConf {
                from: "a".into(),
                to: "b".into(),
                latency_ms: 5.0,
                bandwidth_mbps: None,
                status: Default::default(),
            }],
            ..Default::default()
        };
        c.bootstrap(&cfg).unwrap();

        assert_eq!(c.shortest_path("a", "b").unwrap().total_latency_ms, 5.0);
        let picked = c.select_node(&SelectionCriteria::in_region("eu"), Some(RoutingAlgorithm::RoundRobin)).unwrap();
        assert_eq!(picked.id, "a");
        assert_eq!(c.release("a"), 0);
        let plan = c.distribute_traffic(9, &SelectionCriteria::default()).unwrap();
        assert_eq!(plan.iter().map(|p| p.requests).sum::<u64>(), 9);
        assert!(c.node_history("zz").is_err());
        assert!(c.node_history("a").unwrap().is_empty());
    }

    #[test]
    fn test_topology_tracks_registry_under_concurrent_updates() {
        let (c, _probe, _sink) = coordinator();
        c.register_node(spec("a", "r0", "http://a", &["compute"])).unwrap();

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let c = &c;
                scope.spawn(move || {
                    for round in 0..500 {
                        let update = NodeUpdate {
                            region: Some(format!("r{}", (worker * 7 + round) % 5)),
                            ..Default::default()
                        };
                        c.update_node("a", update).unwrap();
                    }
                });
            }
        });

        let registered = c.get_node("a").unwrap();
        assert_eq!(c.topology().node("a").unwrap().region, registered.region);
        assert_eq!(c.cluster_health(&registered.region).unwrap().total, 1);
        assert_eq!(c.topology().clusters().len(), 1);
    }

    #[test]
    fn test_no_ghost_nodes_after_concurrent_churn() {
        let (c, _probe, _sink) = coordinator();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let c = &c;
                scope.spawn(move || {
                    for _ in 0..500 {
                        // both calls race other workers on the same id; failures are expected
                        let _ = c.register_node(spec("x", "eu", "http://x", &["compute"]));
                        let _ = c.deregister_node("x", "churn", true);
                    }
                });
            }
        });

        assert_eq!(c.registry().contains("x"), c.topology().node("x").is_some());
        assert_eq!(c.registry().len(), c.topology().summary().nodes);
        assert!(c.topology().verify_edges().is_empty());
    }
}
