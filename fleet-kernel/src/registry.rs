/**
 * NODE REGISTRY - Canonical set of fleet nodes
 *
 * ROLE : Registration, removal, partial updates and health merges, with
 * region/class/status secondary indexes kept in step with the primary map.
 *
 * ARCHITECTURE : One write lock per mutation. A mutation and its observer
 * notification are serialized, so observers (topology, monitor, router, event
 * bridge) see changes in the order they were applied. Observers must not
 * mutate the registry from a callback.
 */

use crate::error::{FleetError, Result};
use crate::models::{
    HealthSample, Node, NodeClass, NodeMetrics, NodeSpec, NodeStatus, NodeTier, NodeUpdate,
    RemovedNode,
};
use crate::observers::ObserverList;
use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Secondary index kinds maintained by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Region,
    Class,
    Status,
}

impl IndexKind {
    pub const ALL: [IndexKind; 3] = [IndexKind::Region, IndexKind::Class, IndexKind::Status];

    fn key_of(&self, node: &Node) -> String {
        match self {
            IndexKind::Region => node.region.clone(),
            IndexKind::Class => node.class.as_str().to_string(),
            IndexKind::Status => node.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    NodeAdded(Node),
    NodeRemoved(RemovedNode),
    NodeUpdated {
        node: Node,
        previous: Node,
        changed: Vec<&'static str>,
    },
    NodeHealthUpdated {
        node: Node,
        previous_status: NodeStatus,
        sample: HealthSample,
    },
}

pub trait RegistryObserver: Send + Sync {
    fn on_registry_event(&self, event: &RegistryEvent);
}

/// Conjunctive query over node attributes; unset fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeFilter {
    pub region: Option<String>,
    pub class: Option<NodeClass>,
    pub status: Option<NodeStatus>,
    pub tier: Option<NodeTier>,
    pub capabilities: Vec<String>,      // node must offer all of them
    pub exclude: Vec<String>,           // node ids to skip
    pub min_reputation: Option<f64>,
    pub max_latency_ms: Option<f64>,
}

impl NodeFilter {
    pub fn matches(&self, node: &Node) -> bool {
        if self.region.as_deref().is_some_and(|r| r != node.region) {
            return false;
        }
        if self.class.is_some_and(|c| c != node.class) {
            return false;
        }
        if self.status.is_some_and(|s| s != node.status) {
            return false;
        }
        if self.tier.is_some_and(|t| t != node.tier) {
            return false;
        }
        if !self.capabilities.iter().all(|c| node.capabilities.contains(c)) {
            return false;
        }
        if self.exclude.iter().any(|id| id == &node.id) {
            return false;
        }
        if self.min_reputation.is_some_and(|min| node.metrics.reputation < min) {
            return false;
        }
        if self.max_latency_ms.is_some_and(|max| node.metrics.latency_ms > max) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_region: BTreeMap<String, usize>,
    pub by_class: BTreeMap<String, usize>,
}

type Buckets = HashMap<String, IndexSet<String>>;

#[derive(Default)]
struct RegistryState {
    nodes: IndexMap<String, Node>,
    indexes: HashMap<IndexKind, Buckets>,
}

impl RegistryState {
    fn index_insert(&mut self, kind: IndexKind, key: String, id: &str) {
        self.indexes
            .entry(kind)
            .or_default()
            .entry(key)
            .or_default()
            .insert(id.to_string());
    }

    fn index_remove(&mut self, kind: IndexKind, key: &str, id: &str) {
        if let Some(buckets) = self.indexes.get_mut(&kind) {
            if let Some(bucket) = buckets.get_mut(key) {
                bucket.shift_remove(id);
                if bucket.is_empty() {
                    buckets.remove(key);
                }
            }
        }
    }

    fn index_node(&mut self, node: &Node) {
        for kind in IndexKind::ALL {
            self.index_insert(kind, kind.key_of(node), &node.id);
        }
    }

    fn unindex_node(&mut self, node: &Node) {
        for kind in IndexKind::ALL {
            self.index_remove(kind, &kind.key_of(node), &node.id);
        }
    }

    /// Moves the id between buckets for every indexed field that changed
    fn relocate(&mut self, previous: &Node, current: &Node) {
        for kind in IndexKind::ALL {
            let old_key = kind.key_of(previous);
            let new_key = kind.key_of(current);
            if old_key != new_key {
                self.index_remove(kind, &old_key, &current.id);
                self.index_insert(kind, new_key, &current.id);
            }
        }
    }

    fn bucket(&self, kind: IndexKind, key: &str) -> Vec<Node> {
        self.indexes
            .get(&kind)
            .and_then(|buckets| buckets.get(key))
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id).cloned()).collect())
            .unwrap_or_default()
    }
}

pub struct NodeRegistry {
    state: RwLock<RegistryState>,
    // held across a mutation and its notification; readers only take `state`
    mutation: Mutex<()>,
    observers: ObserverList<dyn RegistryObserver>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            mutation: Mutex::new(()),
            observers: ObserverList::new(),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn RegistryObserver>) {
        self.observers.subscribe(observer);
    }

    fn emit(&self, event: RegistryEvent) {
        self.observers.notify(|o| o.on_registry_event(&event));
    }

    /// Validates and inserts a new node
    pub fn add(&self, spec: NodeSpec) -> Result<Node> {
        validate_spec(&spec)?;

        let node = Node::from_spec(spec);

        let _serial = self.mutation.lock();
        {
            let mut state = self.state.write();
            if state.nodes.contains_key(&node.id) {
                return Err(FleetError::Validation(format!("duplicate node id: {}", node.id)));
            }
            state.index_node(&node);
            state.nodes.insert(node.id.clone(), node.clone());
        }

        info!("registered node {} ({}, {}, {})", node.id, node.region, node.class, node.status);
        self.emit(RegistryEvent::NodeAdded(node.clone()));
        Ok(node)
    }

    /// Removes a node, returning the record stamped with removal metadata
    pub fn remove(&self, id: &str, reason: &str, graceful: bool) -> Result<RemovedNode> {
        let _serial = self.mutation.lock();
        let node = {
            let mut state = self.state.write();
            let node = state
                .nodes
                .shift_remove(id)
                .ok_or_else(|| FleetError::node_not_found(id))?;
            state.unindex_node(&node);
            node
        };

        let removed = RemovedNode {
            node,
            reason: reason.to_string(),
            graceful,
            removed_at: OffsetDateTime::now_utc(),
        };

        info!("removed node {} (reason: {}, graceful: {})", id, reason, graceful);
        self.emit(RegistryEvent::NodeRemoved(removed.clone()));
        Ok(removed)
    }

    /// Shallow-merges `update` into the node and relocates index entries
    pub fn update(&self, id: &str, update: NodeUpdate) -> Result<Node> {
        validate_update(&update)?;

        let _serial = self.mutation.lock();
        let (node, previous, changed) = {
            let mut state = self.state.write();
            let current = state
                .nodes
                .get_mut(id)
                .ok_or_else(|| FleetError::node_not_found(id))?;
            let previous = current.clone();
            let changed = apply_update(current, update);
            current.updated_at = OffsetDateTime::now_utc();
            let node = current.clone();
            state.relocate(&previous, &node);
            (node, previous, changed)
        };

        debug!("updated node {} (fields: {:?})", id, changed);
        self.emit(RegistryEvent::NodeUpdated {
            node: node.clone(),
            previous,
            changed,
        });
        Ok(node)
    }

    /// Merges a health sample; unknown ids are ignored since probes may race removals
    pub fn update_health(&self, id: &str, sample: &HealthSample) -> Option<Node> {
        let _serial = self.mutation.lock();
        let (node, previous_status) = {
            let mut state = self.state.write();
            let Some(current) = state.nodes.get_mut(id) else {
                debug!("ignoring health sample for unknown node {}", id);
                return None;
            };
            let previous = current.clone();
            current.status = sample.status;
            current.metrics.latency_ms = sample.latency_ms;
            current.metrics.uptime = sample.uptime;
            current.metrics.reputation = sample.reputation;
            current.metrics.request_count += 1;
            if !sample.success {
                current.metrics.error_count += 1;
            }
            current.last_seen = Some(sample.timestamp);
            current.updated_at = OffsetDateTime::now_utc();
            let node = current.clone();
            state.relocate(&previous, &node);
            (node, previous.status)
        };

        if previous_status != node.status {
            info!("node {} status {} -> {}", id, previous_status, node.status);
        }
        self.emit(RegistryEvent::NodeHealthUpdated {
            node: node.clone(),
            previous_status,
            sample: sample.clone(),
        });
        Some(node)
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.state.read().nodes.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All nodes in registration order
    pub fn list(&self) -> Vec<Node> {
        self.state.read().nodes.values().cloned().collect()
    }

    pub fn list_by(&self, kind: IndexKind, key: &str) -> Vec<Node> {
        self.state.read().bucket(kind, key)
    }

    pub fn list_by_region(&self, region: &str) -> Vec<Node> {
        self.list_by(IndexKind::Region, region)
    }

    pub fn list_by_class(&self, class: NodeClass) -> Vec<Node> {
        self.list_by(IndexKind::Class, class.as_str())
    }

    pub fn list_by_status(&self, status: NodeStatus) -> Vec<Node> {
        self.list_by(IndexKind::Status, status.as_str())
    }

    /// Nodes matching every criterion, in registration order
    pub fn filter(&self, criteria: &NodeFilter) -> Vec<Node> {
        self.state
            .read()
            .nodes
            .values()
            .filter(|n| criteria.matches(n))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        let mut by_status = BTreeMap::new();
        let mut by_region = BTreeMap::new();
        let mut by_class = BTreeMap::new();
        for node in state.nodes.values() {
            *by_status.entry(node.status.to_string()).or_insert(0) += 1;
            *by_region.entry(node.region.clone()).or_insert(0) += 1;
            *by_class.entry(node.class.to_string()).or_insert(0) += 1;
        }
        RegistryStats {
            total: state.nodes.len(),
            by_status,
            by_region,
            by_class,
        }
    }

    /// Lists index entries that disagree with the primary map; empty when consistent
    pub fn verify_indexes(&self) -> Vec<String> {
        let state = self.state.read();
        let mut violations = Vec::new();

        for node in state.nodes.values() {
            for kind in IndexKind::ALL {
                let key = kind.key_of(node);
                let present = state
                    .indexes
                    .get(&kind)
                    .and_then(|b| b.get(&key))
                    .is_some_and(|ids| ids.contains(&node.id));
                if !present {
                    violations.push(format!("{} missing from {:?}[{}]", node.id, kind, key));
                }
            }
        }

        for (kind, buckets) in &state.indexes {
            for (key, ids) in buckets {
                if ids.is_empty() {
                    violations.push(format!("empty bucket {:?}[{}]", kind, key));
                }
                for id in ids {
                    match state.nodes.get(id) {
                        None => violations.push(format!("{} in {:?}[{}] but not registered", id, kind, key)),
                        Some(node) if kind.key_of(node) != *key => {
                            violations.push(format!("{} stale in {:?}[{}]", id, kind, key))
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        violations
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(FleetError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn validate_capabilities(capabilities: &[String]) -> Result<()> {
    if capabilities.is_empty() {
        return Err(FleetError::Validation("capabilities must not be empty".into()));
    }
    if capabilities.iter().any(|c| c.trim().is_empty()) {
        return Err(FleetError::Validation("capabilities must not contain blank entries".into()));
    }
    Ok(())
}

fn validate_metrics(metrics: &NodeMetrics) -> Result<()> {
    if !(0.0..=1.0).contains(&metrics.uptime) {
        return Err(FleetError::Validation(format!("uptime out of range: {}", metrics.uptime)));
    }
    if !(0.0..=1.0).contains(&metrics.reputation) {
        return Err(FleetError::Validation(format!("reputation out of range: {}", metrics.reputation)));
    }
    if !(metrics.latency_ms >= 0.0) {
        return Err(FleetError::Validation(format!("latency must be non-negative: {}", metrics.latency_ms)));
    }
    if metrics.bandwidth_mbps.is_some_and(|b| !(b >= 0.0)) {
        return Err(FleetError::Validation("bandwidth must be non-negative".into()));
    }
    Ok(())
}

fn validate_spec(spec: &NodeSpec) -> Result<()> {
    require("id", &spec.id)?;
    require("name", &spec.name)?;
    require("address", &spec.address)?;
    require("region", &spec.region)?;
    validate_capabilities(&spec.capabilities)?;
    validate_metrics(&spec.metrics)
}

fn validate_update(update: &NodeUpdate) -> Result<()> {
    if let Some(name) = &update.name {
        require("name", name)?;
    }
    if let Some(address) = &update.address {
        require("address", address)?;
    }
    if let Some(region) = &update.region {
        require("region", region)?;
    }
    if let Some(capabilities) = &update.capabilities {
        validate_capabilities(capabilities)?;
    }
    if let Some(metrics) = &update.metrics {
        validate_metrics(metrics)?;
    }
    Ok(())
}

/// Applies the present fields and reports which ones actually changed
fn apply_update(node: &mut Node, update: NodeUpdate) -> Vec<&'static str> {
    let mut changed = Vec::new();

    if let Some(name) = update.name {
        if node.name != name {
            node.name = name;
            changed.push("name");
        }
    }
    if let Some(address) = update.address {
        if node.address != address {
            node.address = address;
            changed.push("address");
        }
    }
    if let Some(region) = update.region {
        let region = region.trim().to_string();
        if node.region != region {
            node.region = region;
            changed.push("region");
        }
    }
    if let Some(class) = update.class {
        if node.class != class {
            node.class = class;
            changed.push("class");
        }
    }
    if let Some(tier) = update.tier {
        if node.tier != tier {
            node.tier = tier;
            changed.push("tier");
        }
    }
    if let Some(status) = update.status {
        if node.status != status {
            node.status = status;
            changed.push("status");
        }
    }
    if let Some(capabilities) = update.capabilities {
        let capabilities: BTreeSet<String> = capabilities.iter().map(|c| c.trim().to_string()).collect();
        if node.capabilities != capabilities {
            node.capabilities = capabilities;
            changed.push("capabilities");
        }
    }
    if let Some(metrics) = update.metrics {
        if node.metrics != metrics {
            node.metrics = metrics;
            changed.push("metrics");
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn spec(id: &str, region: &str, class: NodeClass) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            name: format!("node {id}"),
            address: format!("http://{id}.local:8080"),
            region: region.to_string(),
            class,
            tier: NodeTier::Standard,
            status: NodeStatus::Active,
            capabilities: vec!["compute".into(), "storage".into()],
            metrics: NodeMetrics::default(),
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl RegistryObserver for Recorder {
        fn on_registry_event(&self, event: &RegistryEvent) {
            let name = match event {
                RegistryEvent::NodeAdded(n) => format!("added:{}", n.id),
                RegistryEvent::NodeRemoved(r) => format!("removed:{}", r.node.id),
                RegistryEvent::NodeUpdated { node, .. } => format!("updated:{}", node.id),
                RegistryEvent::NodeHealthUpdated { node, .. } => format!("health:{}", node.id),
            };
            self.0.lock().push(name);
        }
    }

    fn sample(status: NodeStatus, success: bool) -> HealthSample {
        HealthSample {
            status,
            latency_ms: 120.0,
            uptime: 0.97,
            error_rate: 0.02,
            reputation: 0.75,
            success,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_add_and_query() {
        let registry = NodeRegistry::new();
        registry.add(spec("a", "eu", NodeClass::Edge)).unwrap();
        registry.add(spec("b", "us", NodeClass::Primary)).unwrap();
        registry.add(spec("c", "eu", NodeClass::Primary)).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.list_by_region("eu").len(), 2);
        assert_eq!(registry.list_by_class(NodeClass::Primary).len(), 2);
        assert_eq!(registry.list_by_status(NodeStatus::Active).len(), 3);
        assert!(registry.list_by_region("ap").is_empty());

        let ids: Vec<String> = registry.list().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(registry.verify_indexes().is_empty());
    }

    #[test]
    fn test_add_rejects_invalid_nodes() {
        let registry = NodeRegistry::new();

        let mut missing_name = spec("a", "eu", NodeClass::Edge);
        missing_name.name = "  ".into();
        assert!(matches!(registry.add(missing_name), Err(FleetError::Validation(_))));

        let mut no_caps = spec("a", "eu", NodeClass::Edge);
        no_caps.capabilities.clear();
        assert!(matches!(registry.add(no_caps), Err(FleetError::Validation(_))));

        let mut bad_uptime = spec("a", "eu", NodeClass::Edge);
        bad_uptime.metrics.uptime = 1.5;
        assert!(matches!(registry.add(bad_uptime), Err(FleetError::Validation(_))));

        registry.add(spec("a", "eu", NodeClass::Edge)).unwrap();
        assert!(matches!(
            registry.add(spec("a", "us", NodeClass::Mesh)),
            Err(FleetError::Validation(_))
        ));

        // the duplicate must not leak into the us bucket
        assert!(registry.list_by_region("us").is_empty());
        assert!(registry.verify_indexes().is_empty());
    }

    #[test]
    fn test_update_relocates_indexes() {
        let registry = NodeRegistry::new();
        registry.add(spec("a", "eu", NodeClass::Edge)).unwrap();

        let updated = registry
            .update(
                "a",
                NodeUpdate {
                    region: Some("us".into()),
                    status: Some(NodeStatus::Maintenance),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.region, "us");
        assert!(registry.list_by_region("eu").is_empty());
        assert_eq!(registry.list_by_region("us").len(), 1);
        assert!(registry.list_by_status(NodeStatus::Active).is_empty());
        assert_eq!(registry.list_by_status(NodeStatus::Maintenance).len(), 1);
        assert!(registry.verify_indexes().is_empty());
    }

    #[test]
    fn test_update_unknown_and_invalid() {
        let registry = NodeRegistry::new();
        assert!(matches!(
            registry.update("ghost", NodeUpdate::default()),
            Err(FleetError::NotFound { .. })
        ));

        registry.add(spec("a", "eu", NodeClass::Edge)).unwrap();
        let res = registry.update(
            "a",
            NodeUpdate {
                capabilities: Some(vec![]),
                ..Default::default()
            },
        );
        assert!(matches!(res, Err(FleetError::Validation(_))));
        assert_eq!(registry.get("a").unwrap().capabilities.len(), 2);
    }

    #[test]
    fn test_remove_stamps_metadata() {
        let registry = NodeRegistry::new();
        registry.add(spec("a", "eu", NodeClass::Edge)).unwrap();

        let removed = registry.remove("a", "decommissioned", true).unwrap();
        assert_eq!(removed.node.id, "a");
        assert_eq!(removed.reason, "decommissioned");
        assert!(removed.graceful);
        assert!(registry.get("a").is_none());
        assert!(registry.list_by_region("eu").is_empty());

        assert!(matches!(
            registry.remove("a", "again", false),
            Err(FleetError::NotFound { .. })
        ));
        assert!(registry.verify_indexes().is_empty());
    }

    #[test]
    fn test_update_health_merges_metrics() {
        let registry = NodeRegistry::new();
        registry.add(spec("a", "eu", NodeClass::Edge)).unwrap();

        let node = registry.update_health("a", &sample(NodeStatus::Degraded, true)).unwrap();
        assert_eq!(node.status, NodeStatus::Degraded);
        assert_eq!(node.metrics.latency_ms, 120.0);
        assert_eq!(node.metrics.request_count, 1);
        assert_eq!(node.metrics.error_count, 0);
        assert!(node.last_seen.is_some());

        let node = registry.update_health("a", &sample(NodeStatus::Inactive, false)).unwrap();
        assert_eq!(node.metrics.request_count, 2);
        assert_eq!(node.metrics.error_count, 1);
        assert_eq!(registry.list_by_status(NodeStatus::Inactive).len(), 1);
        assert!(registry.list_by_status(NodeStatus::Degraded).is_empty());
        assert!(registry.verify_indexes().is_empty());
    }

    #[test]
    fn test_update_health_unknown_is_noop() {
        let registry = NodeRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.subscribe(recorder.clone());

        assert!(registry.update_health("ghost", &sample(NodeStatus::Active, true)).is_none());
        assert!(recorder.0.lock().is_empty());
    }

    #[test]
    fn test_filter_is_conjunctive() {
        let registry = NodeRegistry::new();
        let mut a = spec("a", "eu", NodeClass::Edge);
        a.metrics.reputation = 0.9;
        a.metrics.latency_ms = 40.0;
        let mut b = spec("b", "eu", NodeClass::Edge);
        b.metrics.reputation = 0.4;
        let mut c = spec("c", "eu", NodeClass::Primary);
        c.capabilities = vec!["compute".into()];
        c.tier = NodeTier::Premium;
        c.metrics.latency_ms = 300.0;
        for s in [a, b, c] {
            registry.add(s).unwrap();
        }

        let found = registry.filter(&NodeFilter {
            region: Some("eu".into()),
            capabilities: vec!["storage".into()],
            min_reputation: Some(0.5),
            ..Default::default()
        });
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");

        let premium = registry.filter(&NodeFilter {
            tier: Some(NodeTier::Premium),
            ..Default::default()
        });
        assert_eq!(premium[0].id, "c");

        let fast = registry.filter(&NodeFilter {
            max_latency_ms: Some(100.0),
            exclude: vec!["a".into()],
            ..Default::default()
        });
        assert_eq!(fast.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_events_are_emitted_in_order() {
        let registry = NodeRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.subscribe(recorder.clone());

        registry.add(spec("a", "eu", NodeClass::Edge)).unwrap();
        registry
            .update("a", NodeUpdate { name: Some("renamed".into()), ..Default::default() })
            .unwrap();
        registry.update_health("a", &sample(NodeStatus::Active, true));
        registry.remove("a", "test", false).unwrap();

        assert_eq!(
            *recorder.0.lock(),
            vec!["added:a", "updated:a", "health:a", "removed:a"]
        );
    }

    #[test]
    fn test_index_invariant_after_mixed_sequence() {
        let registry = NodeRegistry::new();
        let regions = ["eu", "us", "ap"];
        let classes = [NodeClass::Primary, NodeClass::Secondary, NodeClass::Mesh, NodeClass::Edge];
        let statuses = [NodeStatus::Active, NodeStatus::Degraded, NodeStatus::Inactive, NodeStatus::Maintenance];

        for i in 0..24 {
            registry
                .add(spec(&format!("n{i}"), regions[i % 3], classes[i % 4]))
                .unwrap();
        }
        for i in (0..24).step_by(2) {
            registry
                .update(
                    &format!("n{i}"),
                    NodeUpdate {
                        region: Some(regions[(i + 1) % 3].into()),
                        class: Some(classes[(i + 3) % 4]),
                        status: Some(statuses[i % 4]),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        for i in (0..24).step_by(5) {
            registry.remove(&format!("n{i}"), "churn", true).unwrap();
        }

        assert!(registry.verify_indexes().is_empty());
        let stats = registry.stats();
        assert_eq!(stats.total, registry.len());
        assert_eq!(stats.by_region.values().sum::<usize>(), registry.len());
    }
}
