/**
 * TOPOLOGY GRAPH - Connections and clusters derived from the node registry
 *
 * ROLE : Directed connections with reciprocal adjacency, fewest-hop paths,
 * region auto-clusters plus explicit clusters, advisory optimization.
 *
 * ARCHITECTURE : Node existence is owned by the registry; the graph only
 * mirrors it through `RegistryObserver`. Auto-cluster ids are region names
 * and explicit clusters can never take over a live region's id.
 */

use crate::error::{FleetError, Result};
use crate::models::{NodeClass, NodeStatus};
use crate::observers::ObserverList;
use crate::registry::{RegistryEvent, RegistryObserver};
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Default fan-out ceiling used by `optimize`
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Up,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionProps {
    pub latency_ms: f64,
    pub bandwidth_mbps: Option<f64>,
    pub status: ConnectionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub from: String,
    pub to: String,
    pub latency_ms: f64,
    pub bandwidth_mbps: Option<f64>,
    pub status: ConnectionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub established_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologyNode {
    pub id: String,
    pub region: String,
    pub class: NodeClass,
    pub status: NodeStatus,
    pub adjacency: IndexSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Healthy,
    Degraded,
    Critical,
}

impl ClusterStatus {
    /// Shared health banding: >= 0.8 healthy, >= 0.5 degraded, else critical
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.8 {
            ClusterStatus::Healthy
        } else if ratio >= 0.5 {
            ClusterStatus::Degraded
        } else {
            ClusterStatus::Critical
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub id: String,
    pub region: String,
    pub members: IndexSet<String>,
    pub auto_region: bool,              // created on demand for the region's nodes
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterHealth {
    pub cluster_id: String,
    pub region: String,
    pub active: usize,
    pub total: usize,
    pub ratio: f64,
    pub status: ClusterStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePath {
    pub path: Vec<String>,
    pub total_latency_ms: f64,
    pub hops: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyChangeType {
    NodeAdded,
    NodeRemoved,
    NodeUpdated,
    ConnectionAdded,
    ConnectionRemoved,
    ClusterDefined,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologySummary {
    pub nodes: usize,
    pub connections: usize,
    pub clusters: usize,
    pub regions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologyEvent {
    pub change_type: TopologyChangeType,
    pub affected_nodes: Vec<String>,
    pub affected_regions: Vec<String>,
    pub summary: TopologySummary,
}

pub trait TopologyObserver: Send + Sync {
    fn on_topology_changed(&self, event: &TopologyEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct OverConnectedNode {
    pub node_id: String,
    pub connections: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub isolated_nodes: Vec<String>,
    pub over_connected_nodes: Vec<OverConnectedNode>,
    pub single_node_regions: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologySnapshot {
    pub nodes: Vec<TopologyNode>,
    pub connections: Vec<Connection>,
    pub clusters: Vec<ClusterHealth>,
    pub summary: TopologySummary,
}

#[derive(Default)]
struct GraphState {
    nodes: IndexMap<String, TopologyNode>,
    edges: IndexMap<(String, String), Connection>,
    clusters: IndexMap<String, Cluster>,
}

impl GraphState {
    fn summary(&self) -> TopologySummary {
        let regions: HashSet<&str> = self.nodes.values().map(|n| n.region.as_str()).collect();
        TopologySummary {
            nodes: self.nodes.len(),
            connections: self.edges.len(),
            clusters: self.clusters.len(),
            regions: regions.len(),
        }
    }

    /// Explicit clusters are never auto-joined, even when their id equals the region
    fn join_region_cluster(&mut self, region: &str, node_id: &str) {
        let cluster = self.clusters.entry(region.to_string()).or_insert_with(|| Cluster {
            id: region.to_string(),
            region: region.to_string(),
            members: IndexSet::new(),
            auto_region: true,
            created_at: OffsetDateTime::now_utc(),
        });
        if !cluster.auto_region {
            debug!("region {} shadowed by explicit cluster, {} not auto-clustered", region, node_id);
            return;
        }
        cluster.members.insert(node_id.to_string());
    }

    fn leave_region_cluster(&mut self, region: &str, node_id: &str) {
        if let Some(cluster) = self.clusters.get_mut(region) {
            if cluster.auto_region {
                cluster.members.shift_remove(node_id);
            }
        }
        self.dissolve_empty_clusters();
    }

    fn dissolve_empty_clusters(&mut self) {
        self.clusters.retain(|id, cluster| {
            if cluster.members.is_empty() {
                debug!("dissolving empty cluster {}", id);
                false
            } else {
                true
            }
        });
    }

    fn edge_latency(&self, a: &str, b: &str) -> f64 {
        self.edges
            .get(&(a.to_string(), b.to_string()))
            .or_else(|| self.edges.get(&(b.to_string(), a.to_string())))
            .map(|c| c.latency_ms)
            .unwrap_or(0.0)
    }

    fn cluster_health(&self, cluster: &Cluster) -> ClusterHealth {
        let total = cluster.members.len();
        let active = cluster
            .members
            .iter()
            .filter(|id| {
                self.nodes
                    .get(*id)
                    .is_some_and(|n| n.status == NodeStatus::Active)
            })
            .count();
        let ratio = if total == 0 { 0.0 } else { active as f64 / total as f64 };
        ClusterHealth {
            cluster_id: cluster.id.clone(),
            region: cluster.region.clone(),
            active,
            total,
            ratio,
            status: ClusterStatus::from_ratio(ratio),
        }
    }
}

pub struct TopologyGraph {
    state: RwLock<GraphState>,
    observers: ObserverList<dyn TopologyObserver>,
    max_connections: usize,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::with_max_connections(DEFAULT_MAX_CONNECTIONS)
    }

    pub fn with_max_connections(max_connections: usize) -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            observers: ObserverList::new(),
            max_connections,
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn TopologyObserver>) {
        self.observers.subscribe(observer);
    }

    fn emit(
        &self,
        change_type: TopologyChangeType,
        affected_nodes: Vec<String>,
        affected_regions: Vec<String>,
        summary: TopologySummary,
    ) {
        let event = TopologyEvent {
            change_type,
            affected_nodes,
            affected_regions,
            summary,
        };
        self.observers.notify(|o| o.on_topology_changed(&event));
    }

    /// Adds a node record; an existing id is refreshed instead
    pub fn add_node(&self, id: &str, region: &str, class: NodeClass, status: NodeStatus) {
        if self.state.read().nodes.contains_key(id) {
            self.update_node(id, region, class, status);
            return;
        }

        let summary = {
            let mut state = self.state.write();
            state.nodes.insert(
                id.to_string(),
                TopologyNode {
                    id: id.to_string(),
                    region: region.to_string(),
                    class,
                    status,
                    adjacency: IndexSet::new(),
                },
            );
            state.join_region_cluster(region, id);
            state.summary()
        };

        debug!("topology: added node {} in {}", id, region);
        self.emit(
            TopologyChangeType::NodeAdded,
            vec![id.to_string()],
            vec![region.to_string()],
            summary,
        );
    }

    /// Removes a node with every incident connection and its cluster memberships
    pub fn remove_node(&self, id: &str) -> Result<()> {
        let (neighbors, region, summary) = {
            let mut state = self.state.write();
            let node = state
                .nodes
                .shift_remove(id)
                .ok_or_else(|| FleetError::node_not_found(id))?;

            state.edges.retain(|(from, to), _| from != id && to != id);
            for neighbor in &node.adjacency {
                if let Some(n) = state.nodes.get_mut(neighbor) {
                    n.adjacency.shift_remove(id);
                }
            }
            for cluster in state.clusters.values_mut() {
                cluster.members.shift_remove(id);
            }
            state.dissolve_empty_clusters();

            (node.adjacency, node.region, state.summary())
        };

        info!("topology: removed node {} ({} connections dropped)", id, neighbors.len());
        let mut affected = vec![id.to_string()];
        affected.extend(neighbors);
        self.emit(TopologyChangeType::NodeRemoved, affected, vec![region], summary);
        Ok(())
    }

    /// Refreshes a node record; only region and class moves count as structural
    pub fn update_node(&self, id: &str, region: &str, class: NodeClass, status: NodeStatus) {
        let change = {
            let mut state = self.state.write();
            let Some(node) = state.nodes.get_mut(id) else {
                debug!("topology: update for unknown node {}", id);
                return;
            };
            node.status = status;
            let old_region = std::mem::replace(&mut node.region, region.to_string());
            let class_changed = std::mem::replace(&mut node.class, class) != class;

            if old_region != region {
                state.leave_region_cluster(&old_region, id);
                state.join_region_cluster(region, id);
                Some((vec![old_region, region.to_string()], state.summary()))
            } else if class_changed {
                Some((vec![region.to_string()], state.summary()))
            } else {
                None
            }
        };

        if let Some((regions, summary)) = change {
            self.emit(TopologyChangeType::NodeUpdated, vec![id.to_string()], regions, summary);
        }
    }

    /// Status-only refresh, fed by health updates; not a structural change
    pub fn set_status(&self, id: &str, status: NodeStatus) {
        if let Some(node) = self.state.write().nodes.get_mut(id) {
            node.status = status;
        }
    }

    /// Adds (or re-declares) the directed connection `from -> to`
    pub fn add_connection(&self, from: &str, to: &str, props: ConnectionProps) -> Result<Connection> {
        if from == to {
            return Err(FleetError::Validation(format!("self connection on {from}")));
        }
        if !(props.latency_ms >= 0.0) {
            return Err(FleetError::Validation(format!(
                "connection latency must be non-negative: {}",
                props.latency_ms
            )));
        }

        let (connection, regions, summary) = {
            let mut state = self.state.write();
            for endpoint in [from, to] {
                if !state.nodes.contains_key(endpoint) {
                    return Err(FleetError::node_not_found(endpoint));
                }
            }

            let connection = Connection {
                from: from.to_string(),
                to: to.to_string(),
                latency_ms: props.latency_ms,
                bandwidth_mbps: props.bandwidth_mbps,
                status: props.status,
                established_at: OffsetDateTime::now_utc(),
            };
            state
                .edges
                .insert((from.to_string(), to.to_string()), connection.clone());

            let mut regions = Vec::new();
            for (a, b) in [(from, to), (to, from)] {
                if let Some(node) = state.nodes.get_mut(a) {
                    node.adjacency.insert(b.to_string());
                    if !regions.contains(&node.region) {
                        regions.push(node.region.clone());
                    }
                }
            }
            (connection, regions, state.summary())
        };

        debug!("topology: connected {} -> {} ({}ms)", from, to, connection.latency_ms);
        self.emit(
            TopologyChangeType::ConnectionAdded,
            vec![from.to_string(), to.to_string()],
            regions,
            summary,
        );
        Ok(connection)
    }

    /// Removes `from -> to`; adjacency survives while the reverse edge exists
    pub fn remove_connection(&self, from: &str, to: &str) -> Result<Connection> {
        let (connection, regions, summary) = {
            let mut state = self.state.write();
            let connection = state
                .edges
                .shift_remove(&(from.to_string(), to.to_string()))
                .ok_or_else(|| FleetError::connection_not_found(from, to))?;

            let reverse_exists = state.edges.contains_key(&(to.to_string(), from.to_string()));
            let mut regions = Vec::new();
            for (a, b) in [(from, to), (to, from)] {
                if let Some(node) = state.nodes.get_mut(a) {
                    if !reverse_exists {
                        node.adjacency.shift_remove(b);
                    }
                    if !regions.contains(&node.region) {
                        regions.push(node.region.clone());
                    }
                }
            }
            (connection, regions, state.summary())
        };

        debug!("topology: disconnected {} -> {}", from, to);
        self.emit(
            TopologyChangeType::ConnectionRemoved,
            vec![from.to_string(), to.to_string()],
            regions,
            summary,
        );
        Ok(connection)
    }

    /// Fewest-hop path from `from` to `to`, with the latency accumulated along it.
    ///
    /// Equal-hop alternatives resolve by adjacency insertion order. Returns
    /// `None` when either endpoint is unknown or unreachable.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<RoutePath> {
        let state = self.state.read();
        if !state.nodes.contains_key(from) || !state.nodes.contains_key(to) {
            return None;
        }
        if from == to {
            return Some(RoutePath {
                path: vec![from.to_string()],
                total_latency_ms: 0.0,
                hops: 0,
            });
        }

        let mut previous: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([from]);
        let mut queue: VecDeque<&str> = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            if current == to {
                break;
            }
            let Some(node) = state.nodes.get(current) else { continue };
            for next in &node.adjacency {
                if visited.insert(next.as_str()) {
                    previous.insert(next.as_str(), current);
                    queue.push_back(next.as_str());
                }
            }
        }

        if !previous.contains_key(to) {
            return None;
        }

        let mut path = vec![to.to_string()];
        let mut cursor = to;
        while let Some(prev) = previous.get(cursor) {
            path.push(prev.to_string());
            cursor = *prev;
        }
        path.reverse();

        let total_latency_ms = path
            .windows(2)
            .map(|w| state.edge_latency(&w[0], &w[1]))
            .sum();

        Some(RoutePath {
            hops: path.len() - 1,
            path,
            total_latency_ms,
        })
    }

    /// Declares an explicit named cluster over existing nodes
    pub fn define_cluster(&self, id: &str, region: &str, members: &[String]) -> Result<Cluster> {
        if id.trim().is_empty() || region.trim().is_empty() {
            return Err(FleetError::Validation("cluster id and region are required".into()));
        }
        if members.is_empty() {
            return Err(FleetError::Validation(format!("cluster {id} has no members")));
        }

        let (cluster, summary) = {
            let mut state = self.state.write();
            match state.clusters.get(id) {
                Some(existing) if existing.auto_region => {
                    return Err(FleetError::Validation(format!("cluster id {id} collides with a live region")));
                }
                Some(_) => return Err(FleetError::Validation(format!("cluster {id} already exists"))),
                None => {}
            }
            if let Some(unknown) = members.iter().find(|m| !state.nodes.contains_key(*m)) {
                return Err(FleetError::node_not_found(unknown.as_str()));
            }
            let cluster = Cluster {
                id: id.to_string(),
                region: region.to_string(),
                members: members.iter().cloned().collect(),
                auto_region: false,
                created_at: OffsetDateTime::now_utc(),
            };
            state.clusters.insert(id.to_string(), cluster.clone());
            (cluster, state.summary())
        };

        info!("topology: defined cluster {} ({} members)", id, cluster.members.len());
        self.emit(
            TopologyChangeType::ClusterDefined,
            cluster.members.iter().cloned().collect(),
            vec![region.to_string()],
            summary,
        );
        Ok(cluster)
    }

    pub fn cluster_health(&self, id: &str) -> Result<ClusterHealth> {
        let state = self.state.read();
        let cluster = state
            .clusters
            .get(id)
            .ok_or_else(|| FleetError::cluster_not_found(id))?;
        Ok(state.cluster_health(cluster))
    }

    pub fn clusters(&self) -> Vec<ClusterHealth> {
        let state = self.state.read();
        state.clusters.values().map(|c| state.cluster_health(c)).collect()
    }

    /// Advisory pass over the graph; never mutates it
    pub fn optimize(&self) -> OptimizationReport {
        let state = self.state.read();

        let isolated_nodes: Vec<String> = state
            .nodes
            .values()
            .filter(|n| n.adjacency.is_empty())
            .map(|n| n.id.clone())
            .collect();

        let over_connected_nodes: Vec<OverConnectedNode> = state
            .nodes
            .values()
            .filter(|n| n.adjacency.len() > self.max_connections)
            .map(|n| OverConnectedNode {
                node_id: n.id.clone(),
                connections: n.adjacency.len(),
            })
            .collect();

        let mut per_region: BTreeMap<&str, usize> = BTreeMap::new();
        for node in state.nodes.values() {
            *per_region.entry(node.region.as_str()).or_insert(0) += 1;
        }
        let single_node_regions: Vec<String> = per_region
            .into_iter()
            .filter(|(_, count)| *count == 1)
            .map(|(region, _)| region.to_string())
            .collect();

        let mut recommendations = Vec::new();
        for id in &isolated_nodes {
            recommendations.push(format!("connect isolated node {id} to at least one peer"));
        }
        for over in &over_connected_nodes {
            recommendations.push(format!(
                "reduce fan-out of {} ({} connections, ceiling {})",
                over.node_id, over.connections, self.max_connections
            ));
        }
        for region in &single_node_regions {
            recommendations.push(format!("add a redundant node in region {region}"));
        }

        OptimizationReport {
            isolated_nodes,
            over_connected_nodes,
            single_node_regions,
            recommendations,
        }
    }

    pub fn node(&self, id: &str) -> Option<TopologyNode> {
        self.state.read().nodes.get(id).cloned()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.state.read().edges.values().cloned().collect()
    }

    pub fn summary(&self) -> TopologySummary {
        self.state.read().summary()
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        let state = self.state.read();
        TopologySnapshot {
            nodes: state.nodes.values().cloned().collect(),
            connections: state.edges.values().cloned().collect(),
            clusters: state.clusters.values().map(|c| state.cluster_health(c)).collect(),
            summary: state.summary(),
        }
    }

    /// Lists edges or adjacency entries pointing at unknown nodes; empty when consistent
    pub fn verify_edges(&self) -> Vec<String> {
        let state = self.state.read();
        let mut violations = Vec::new();
        for (from, to) in state.edges.keys() {
            for endpoint in [from, to] {
                if !state.nodes.contains_key(endpoint) {
                    violations.push(format!("edge {from}->{to} references missing {endpoint}"));
                }
            }
        }
        for node in state.nodes.values() {
            for neighbor in &node.adjacency {
                if !state.nodes.contains_key(neighbor) {
                    violations.push(format!("{} adjacent to missing {}", node.id, neighbor));
                }
            }
        }
        violations
    }
}

impl Default for TopologyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryObserver for TopologyGraph {
    fn on_registry_event(&self, event: &RegistryEvent) {
        match event {
            RegistryEvent::NodeAdded(node) => {
                self.add_node(&node.id, &node.region, node.class, node.status);
            }
            RegistryEvent::NodeRemoved(removed) => {
                if let Err(e) = self.remove_node(&removed.node.id) {
                    debug!("topology: {}", e);
                }
            }
            RegistryEvent::NodeUpdated { node, .. } => {
                self.update_node(&node.id, &node.region, node.class, node.status);
            }
            RegistryEvent::NodeHealthUpdated { node, .. } => {
                self.set_status(&node.id, node.status);
            }
        }
    }
}
