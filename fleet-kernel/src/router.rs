/**
 * REQUEST ROUTER - Picks one active node per request
 *
 * ROLE : Six selection algorithms over `NodeRegistry::filter` candidates
 * (always active-only), plus proportional traffic distribution.
 *
 * ARCHITECTURE : Best-effort, process-local bookkeeping only: round-robin
 * cursors and in-flight counters. Counters of removed nodes are dropped
 * through `RegistryObserver`.
 */

use crate::error::{FleetError, Result};
use crate::models::{Node, NodeStatus};
use crate::observers::ObserverList;
use crate::registry::{NodeFilter, NodeRegistry, RegistryEvent, RegistryObserver};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info};

/// In-flight count at which the load term of the health score reaches zero
pub const LOAD_CEILING: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingAlgorithm {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    #[default]
    HealthBased,
    LatencyBased,
    ReputationBased,
}

impl RoutingAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingAlgorithm::RoundRobin => "round_robin",
            RoutingAlgorithm::WeightedRoundRobin => "weighted_round_robin",
            RoutingAlgorithm::LeastConnections => "least_connections",
            RoutingAlgorithm::HealthBased => "health_based",
            RoutingAlgorithm::LatencyBased => "latency_based",
            RoutingAlgorithm::ReputationBased => "reputation_based",
        }
    }
}

impl fmt::Display for RoutingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionCriteria {
    pub region: Option<String>,
    pub capabilities: Vec<String>,
    pub exclude: Vec<String>,
    pub min_reputation: Option<f64>,
    pub max_latency_ms: Option<f64>,
}

impl SelectionCriteria {
    pub fn in_region(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Default::default()
        }
    }

    fn to_filter(&self) -> NodeFilter {
        NodeFilter {
            region: self.region.clone(),
            status: Some(NodeStatus::Active),
            capabilities: self.capabilities.clone(),
            exclude: self.exclude.clone(),
            min_reputation: self.min_reputation,
            max_latency_ms: self.max_latency_ms,
            ..Default::default()
        }
    }

    fn describe(&self) -> String {
        let mut parts = vec!["status=active".to_string()];
        if let Some(region) = &self.region {
            parts.push(format!("region={region}"));
        }
        if !self.capabilities.is_empty() {
            parts.push(format!("capabilities={}", self.capabilities.join("+")));
        }
        if !self.exclude.is_empty() {
            parts.push(format!("exclude={}", self.exclude.join(",")));
        }
        if let Some(min) = self.min_reputation {
            parts.push(format!("min_reputation={min}"));
        }
        if let Some(max) = self.max_latency_ms {
            parts.push(format!("max_latency_ms={max}"));
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSelection {
    pub node_id: String,
    pub algorithm: RoutingAlgorithm,
    pub criteria: SelectionCriteria,
    pub candidate_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

pub trait RouterObserver: Send + Sync {
    fn on_node_selected(&self, selection: &NodeSelection);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficAllocation {
    pub node_id: String,
    pub requests: u64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub algorithm: RoutingAlgorithm,
    pub total_selections: u64,
    pub in_flight: BTreeMap<String, u64>,
}

/// 0.3 latency + 0.3 uptime + 0.3 reputation + 0.1 load
pub fn health_score(node: &Node, in_flight: u64) -> f64 {
    let latency_score = (1.0 - node.metrics.latency_ms / 500.0).max(0.0);
    let load_score = (1.0 - in_flight as f64 / LOAD_CEILING).max(0.0);
    0.3 * latency_score + 0.3 * node.metrics.uptime + 0.3 * node.metrics.reputation + 0.1 * load_score
}

/// Weight used by weighted round robin
pub fn node_weight(node: &Node) -> i64 {
    ((node.metrics.reputation * 10.0).round() as i64).max(1)
}

// first index with the highest score; ties resolve by list order
fn index_of_max(scores: impl Iterator<Item = f64>) -> usize {
    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;
    for (i, score) in scores.enumerate() {
        if score > best_score {
            best = i;
            best_score = score;
        }
    }
    best
}

#[derive(Default)]
struct RouterState {
    cursor: usize,
    weighted_cursor: usize,
    in_flight: HashMap<String, u64>,
    total_selections: u64,
}

impl RouterState {
    fn in_flight(&self, id: &str) -> u64 {
        self.in_flight.get(id).copied().unwrap_or(0)
    }

    fn choose(&mut self, algorithm: RoutingAlgorithm, candidates: &[Node]) -> usize {
        match algorithm {
            RoutingAlgorithm::RoundRobin => {
                let index = self.cursor % candidates.len();
                self.cursor = self.cursor.wrapping_add(1);
                index
            }
            RoutingAlgorithm::WeightedRoundRobin => {
                // each candidate appears `node_weight` times, in list order
                let expanded: Vec<usize> = candidates
                    .iter()
                    .enumerate()
                    .flat_map(|(i, node)| std::iter::repeat(i).take(node_weight(node) as usize))
                    .collect();
                let index = expanded[self.weighted_cursor % expanded.len()];
                self.weighted_cursor = self.weighted_cursor.wrapping_add(1);
                index
            }
            RoutingAlgorithm::LeastConnections => {
                index_of_max(candidates.iter().map(|n| -(self.in_flight(&n.id) as f64)))
            }
            RoutingAlgorithm::HealthBased => {
                index_of_max(candidates.iter().map(|n| health_score(n, self.in_flight(&n.id))))
            }
            RoutingAlgorithm::LatencyBased => index_of_max(candidates.iter().map(|n| -n.metrics.latency_ms)),
            RoutingAlgorithm::ReputationBased => index_of_max(candidates.iter().map(|n| n.metrics.reputation)),
        }
    }
}

pub struct RequestRouter {
    registry: Arc<NodeRegistry>,
    algorithm: RwLock<RoutingAlgorithm>,
    state: Mutex<RouterState>,
    observers: ObserverList<dyn RouterObserver>,
}

impl RequestRouter {
    pub fn new(registry: Arc<NodeRegistry>, algorithm: RoutingAlgorithm) -> Self {
        Self {
            registry,
            algorithm: RwLock::new(algorithm),
            state: Mutex::new(RouterState::default()),
            observers: ObserverList::new(),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn RouterObserver>) {
        self.observers.subscribe(observer);
    }

    pub fn algorithm(&self) -> RoutingAlgorithm {
        *self.algorithm.read()
    }

    pub fn set_algorithm(&self, algorithm: RoutingAlgorithm) {
        *self.algorithm.write() = algorithm;
        info!("routing algorithm set to {}", algorithm);
    }

    pub fn select_node(&self, criteria: &SelectionCriteria) -> Result<Node> {
        self.select_with(self.algorithm(), criteria)
    }

    pub fn select_with(&self, algorithm: RoutingAlgorithm, criteria: &SelectionCriteria) -> Result<Node> {
        let candidates = self.candidates(criteria)?;

        let chosen = {
            let mut state = self.state.lock();
            let index = state.choose(algorithm, &candidates);
            let chosen = candidates[index].clone();
            *state.in_flight.entry(chosen.id.clone()).or_insert(0) += 1;
            state.total_selections += 1;
            chosen
        };

        debug!(
            "selected {} via {} from {} candidates",
            chosen.id,
            algorithm,
            candidates.len()
        );
        let selection = NodeSelection {
            node_id: chosen.id.clone(),
            algorithm,
            criteria: criteria.clone(),
            candidate_count: candidates.len(),
            timestamp: OffsetDateTime::now_utc(),
        };
        self.observers.notify(|o| o.on_node_selected(&selection));

        Ok(chosen)
    }

    /// Splits `total` requests across candidates in proportion to health score
    pub fn distribute_traffic(&self, total: u64, criteria: &SelectionCriteria) -> Result<Vec<TrafficAllocation>> {
        let candidates = self.candidates(criteria)?;
        let scores: Vec<f64> = {
            let state = self.state.lock();
            candidates
                .iter()
                .map(|n| health_score(n, state.in_flight(&n.id)))
                .collect()
        };

        let score_sum: f64 = scores.iter().sum();
        let last = candidates.len() - 1;
        let mut assigned = 0u64;
        let mut allocations = Vec::with_capacity(candidates.len());
        for (i, (node, score)) in candidates.iter().zip(&scores).enumerate() {
            let requests = if i == last {
                total - assigned
            } else {
                let share = if score_sum > 0.0 {
                    score / score_sum
                } else {
                    1.0 / candidates.len() as f64
                };
                let requests = ((total as f64 * share).floor() as u64).min(total - assigned);
                assigned += requests;
                requests
            };
            allocations.push(TrafficAllocation {
                node_id: node.id.clone(),
                requests,
                score: *score,
            });
        }

        Ok(allocations)
    }

    /// Marks one request against `node_id` as finished; returns what is left
    pub fn release(&self, node_id: &str) -> u64 {
        let mut state = self.state.lock();
        match state.in_flight.get_mut(node_id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                let left = *count;
                if left == 0 {
                    state.in_flight.remove(node_id);
                }
                left
            }
            None => 0,
        }
    }

    pub fn in_flight(&self, node_id: &str) -> u64 {
        self.state.lock().in_flight(node_id)
    }

    /// Clears every counter and cursor
    pub fn reset(&self) {
        *self.state.lock() = RouterState::default();
        debug!("router state reset");
    }

    pub fn stats(&self) -> RouterStats {
        let state = self.state.lock();
        RouterStats {
            algorithm: self.algorithm(),
            total_selections: state.total_selections,
            in_flight: state.in_flight.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    /// Drops every counter kept for `node_id`
    pub fn forget(&self, node_id: &str) {
        if self.state.lock().in_flight.remove(node_id).is_some() {
            debug!("dropped in-flight count of removed node {}", node_id);
        }
    }

    fn candidates(&self, criteria: &SelectionCriteria) -> Result<Vec<Node>> {
        let candidates = self.registry.filter(&criteria.to_filter());
        if candidates.is_empty() {
            return Err(FleetError::NoCandidate(criteria.describe()));
        }
        Ok(candidates)
    }
}

impl RegistryObserver for RequestRouter {
    fn on_registry_event(&self, event: &RegistryEvent) {
        if let RegistryEvent::NodeRemoved(removed) = event {
            self.forget(&removed.node.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeClass, NodeMetrics, NodeSpec, NodeTier};

    fn spec(id: &str, region: &str, reputation: f64, latency_ms: f64) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            name: id.to_string(),
            address: format!("http://{id}:80"),
            region: region.to_string(),
            class: NodeClass::Secondary,
            tier: NodeTier::Standard,
            status: NodeStatus::Active,
            capabilities: vec!["compute".into()],
            metrics: NodeMetrics {
                latency_ms,
                uptime: 0.99,
                reputation,
                ..Default::default()
            },
        }
    }

    fn router(nodes: Vec<NodeSpec>, algorithm: RoutingAlgorithm) -> RequestRouter {
        let registry = Arc::new(NodeRegistry::new());
        for node in nodes {
            registry.add(node).unwrap();
        }
        RequestRouter::new(registry, algorithm)
    }

    #[derive(Default)]
    struct Selections(Mutex<Vec<NodeSelection>>);

    impl RouterObserver for Selections {
        fn on_node_selected(&self, selection: &NodeSelection) {
            self.0.lock().push(selection.clone());
        }
    }

    #[test]
    fn test_health_based_prefers_best_reputation() {
        let r = router(
            vec![
                spec("n1", "us", 0.5, 40.0),
                spec("n2", "us", 0.8, 40.0),
                spec("n3", "us", 0.3, 40.0),
            ],
            RoutingAlgorithm::HealthBased,
        );
        let chosen = r.select_node(&SelectionCriteria::in_region("us")).unwrap();
        assert_eq!(chosen.id, "n2");
    }

    #[test]
    fn test_no_candidate_when_region_only_has_degraded_nodes() {
        let mut degraded = spec("eu-1", "eu", 0.9, 20.0);
        degraded.status = NodeStatus::Degraded;
        let r = router(vec![degraded, spec("us-1", "us", 0.9, 20.0)], RoutingAlgorithm::HealthBased);

        let err = r.select_node(&SelectionCriteria::in_region("eu")).unwrap_err();
        assert!(matches!(err, FleetError::NoCandidate(ref msg) if msg.contains("region=eu")));
        assert!(r.distribute_traffic(10, &SelectionCriteria::in_region("eu")).is_err());
    }

    #[test]
    fn test_health_based_is_deterministic() {
        let nodes = || vec![spec("a", "us", 0.7, 90.0), spec("b", "us", 0.7, 60.0), spec("c", "us", 0.6, 10.0)];
        let first = router(nodes(), RoutingAlgorithm::HealthBased);
        let second = router(nodes(), RoutingAlgorithm::HealthBased);
        let criteria = SelectionCriteria::default();
        assert_eq!(
            first.select_node(&criteria).unwrap().id,
            second.select_node(&criteria).unwrap().id
        );
    }

    #[test]
    fn test_ties_resolve_by_registration_order() {
        let r = router(
            vec![spec("a", "us", 0.6, 30.0), spec("b", "us", 0.6, 30.0)],
            RoutingAlgorithm::ReputationBased,
        );
        assert_eq!(r.select_node(&SelectionCriteria::default()).unwrap().id, "a");
        assert_eq!(r.select_node(&SelectionCriteria::default()).unwrap().id, "a");
    }

    #[test]
    fn test_round_robin_cycles() {
        let r = router(
            vec![spec("a", "us", 0.5, 10.0), spec("b", "us", 0.5, 10.0), spec("c", "us", 0.5, 10.0)],
            RoutingAlgorithm::RoundRobin,
        );
        let picks: Vec<String> = (0..4)
            .map(|_| r.select_node(&SelectionCriteria::default()).unwrap().id)
            .collect();
        assert_eq!(picks, ["a", "b", "c", "a"]);
    }

    #[test]
    fn test_weighted_round_robin_follows_weights() {
        let r = router(
            vec![spec("heavy", "us", 0.2, 10.0), spec("light", "us", 0.1, 10.0)],
            RoutingAlgorithm::WeightedRoundRobin,
        );
        let picks: Vec<String> = (0..6)
            .map(|_| r.select_node(&SelectionCriteria::default()).unwrap().id)
            .collect();
        assert_eq!(picks, ["heavy", "heavy", "light", "heavy", "heavy", "light"]);

        let zero = Node::from_spec(spec("z", "us", 0.0, 10.0));
        assert_eq!(node_weight(&zero), 1);
    }

    #[test]
    fn test_least_connections_and_release() {
        let r = router(
            vec![spec("a", "us", 0.5, 10.0), spec("b", "us", 0.5, 10.0)],
            RoutingAlgorithm::LeastConnections,
        );
        let criteria = SelectionCriteria::default();
        assert_eq!(r.select_node(&criteria).unwrap().id, "a");
        assert_eq!(r.select_node(&criteria).unwrap().id, "b");
        assert_eq!(r.select_node(&criteria).unwrap().id, "a");
        assert_eq!(r.in_flight("a"), 2);

        assert_eq!(r.release("a"), 1);
        assert_eq!(r.release("a"), 0);
        assert_eq!(r.release("a"), 0);
        assert_eq!(r.select_node(&criteria).unwrap().id, "a");

        r.reset();
        assert_eq!(r.stats().total_selections, 0);
        assert!(r.stats().in_flight.is_empty());
    }

    #[test]
    fn test_removed_node_counters_are_dropped() {
        let registry = Arc::new(NodeRegistry::new());
        registry.add(spec("a", "us", 0.5, 10.0)).unwrap();
        registry.add(spec("b", "us", 0.5, 10.0)).unwrap();
        let r = Arc::new(RequestRouter::new(registry.clone(), RoutingAlgorithm::LeastConnections));
        registry.subscribe(r.clone());

        let criteria = SelectionCriteria::default();
        for _ in 0..4 {
            r.select_node(&criteria).unwrap();
        }
        assert_eq!(r.in_flight("a"), 2);

        registry.remove("a", "retired", false).unwrap();
        assert!(!r.stats().in_flight.contains_key("a"));

        // a re-registered id starts from zero and wins least connections again
        registry.add(spec("a", "us", 0.5, 10.0)).unwrap();
        assert_eq!(r.in_flight("a"), 0);
        assert_eq!(r.select_node(&criteria).unwrap().id, "a");
    }

    #[test]
    fn test_latency_based_and_select_with() {
        let r = router(
            vec![spec("slow", "us", 0.9, 120.0), spec("fast", "us", 0.4, 15.0)],
            RoutingAlgorithm::ReputationBased,
        );
        let criteria = SelectionCriteria::default();
        assert_eq!(r.select_node(&criteria).unwrap().id, "slow");
        assert_eq!(r.select_with(RoutingAlgorithm::LatencyBased, &criteria).unwrap().id, "fast");

        r.set_algorithm(RoutingAlgorithm::LatencyBased);
        assert_eq!(r.algorithm(), RoutingAlgorithm::LatencyBased);
        assert_eq!(r.stats().total_selections, 2);
    }

    #[test]
    fn test_criteria_filters_candidates() {
        let mut gpu = spec("gpu", "us", 0.3, 10.0);
        gpu.capabilities.push("gpu".into());
        let r = router(vec![spec("plain", "us", 0.9, 10.0), gpu], RoutingAlgorithm::HealthBased);

        let criteria = SelectionCriteria {
            capabilities: vec!["gpu".into()],
            ..Default::default()
        };
        assert_eq!(r.select_node(&criteria).unwrap().id, "gpu");

        let criteria = SelectionCriteria {
            exclude: vec!["plain".into()],
            min_reputation: Some(0.5),
            ..Default::default()
        };
        assert!(r.select_node(&criteria).is_err());
    }

    #[test]
    fn test_distribution_sums_to_total() {
        let r = router(
            vec![spec("a", "us", 0.9, 20.0), spec("b", "us", 0.5, 150.0), spec("c", "us", 0.2, 400.0)],
            RoutingAlgorithm::HealthBased,
        );
        for total in [0, 1, 7, 100, 1001] {
            let plan = r.distribute_traffic(total, &SelectionCriteria::default()).unwrap();
            assert_eq!(plan.len(), 3);
            assert_eq!(plan.iter().map(|a| a.requests).sum::<u64>(), total);
        }

        let plan = r.distribute_traffic(100, &SelectionCriteria::default()).unwrap();
        assert!(plan[0].requests > plan[1].requests);
        assert!(plan[0].score > plan[2].score);
        assert_eq!(r.stats().total_selections, 0);
    }

    #[test]
    fn test_selection_event_published() {
        let r = router(vec![spec("a", "us", 0.5, 10.0), spec("b", "us", 0.5, 10.0)], RoutingAlgorithm::RoundRobin);
        let seen = Arc::new(Selections::default());
        r.subscribe(seen.clone());

        r.select_node(&SelectionCriteria::in_region("us")).unwrap();

        let events = seen.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].node_id, "a");
        assert_eq!(events[0].algorithm, RoutingAlgorithm::RoundRobin);
        assert_eq!(events[0].candidate_count, 2);
        assert_eq!(events[0].criteria.region.as_deref(), Some("us"));
    }
}
