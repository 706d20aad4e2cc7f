//! Health probes: how the monitor measures a node.
//!
//! `TcpProbe` measures connect latency against the node address and keeps a
//! sliding window of outcomes to derive uptime and error rate.
//! `SimulatedProbe` produces seeded, reproducible readings for tests and
//! standalone runs, and lets callers pin readings or force failures per node.

use crate::error::{FleetError, Result};
use crate::models::Node;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::debug;

/// Raw measurement returned by a probe, before status derivation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeReading {
    pub latency_ms: f64,
    pub uptime: f64,
    pub error_rate: f64,
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Measurement taken by a monitor tick
    async fn check(&self, node: &Node, timeout: Duration) -> Result<ProbeReading>;

    /// On-demand diagnostic measurement; must not feed the state `check` derives readings from
    async fn ping(&self, node: &Node, timeout: Duration) -> Result<ProbeReading> {
        self.check(node, timeout).await
    }

    /// Drops any per-node state kept for `node_id`
    fn forget(&self, _node_id: &str) {}
}

const OUTCOME_WINDOW: usize = 100;

/// Network probe: TCP connect round-trip against the node address
pub struct TcpProbe {
    outcomes: Mutex<HashMap<String, VecDeque<bool>>>,
}

impl TcpProbe {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    /// Records an outcome and returns (uptime, error_rate) over the window
    fn record(&self, node_id: &str, ok: bool) -> (f64, f64) {
        let mut outcomes = self.outcomes.lock();
        let window = outcomes.entry(node_id.to_string()).or_default();
        window.push_back(ok);
        while window.len() > OUTCOME_WINDOW {
            window.pop_front();
        }
        rates(window)
    }

    /// Current (uptime, error_rate) without recording anything
    fn peek(&self, node_id: &str) -> (f64, f64) {
        self.outcomes.lock().get(node_id).map(rates).unwrap_or((1.0, 0.0))
    }

    /// Connect round-trip to `target` in milliseconds
    async fn connect(&self, node: &Node, target: &str, timeout: Duration) -> Result<f64> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, TcpStream::connect(target)).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(Ok(_stream)) => {
                debug!("tcp connect {} ({}) ok in {:.1}ms", node.id, target, latency_ms);
                Ok(latency_ms)
            }
            Ok(Err(e)) => Err(FleetError::Probe {
                node_id: node.id.clone(),
                reason: format!("connect to {target} failed: {e}"),
            }),
            Err(_) => Err(FleetError::Probe {
                node_id: node.id.clone(),
                reason: format!("connect to {target} timed out after {}ms", timeout.as_millis()),
            }),
        }
    }
}

fn rates(window: &VecDeque<bool>) -> (f64, f64) {
    if window.is_empty() {
        return (1.0, 0.0);
    }
    let successes = window.iter().filter(|o| **o).count() as f64;
    let uptime = successes / window.len() as f64;
    (uptime, 1.0 - uptime)
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn check(&self, node: &Node, timeout: Duration) -> Result<ProbeReading> {
        let target = target_of(node)?;
        match self.connect(node, &target, timeout).await {
            Ok(latency_ms) => {
                let (uptime, error_rate) = self.record(&node.id, true);
                Ok(ProbeReading {
                    latency_ms,
                    uptime,
                    error_rate,
                })
            }
            Err(e) => {
                self.record(&node.id, false);
                Err(e)
            }
        }
    }

    async fn ping(&self, node: &Node, timeout: Duration) -> Result<ProbeReading> {
        let target = target_of(node)?;
        let latency_ms = self.connect(node, &target, timeout).await?;
        let (uptime, error_rate) = self.peek(&node.id);
        Ok(ProbeReading {
            latency_ms,
            uptime,
            error_rate,
        })
    }

    fn forget(&self, node_id: &str) {
        self.outcomes.lock().remove(node_id);
    }
}

fn target_of(node: &Node) -> Result<String> {
    socket_target(&node.address).ok_or_else(|| FleetError::Probe {
        node_id: node.id.clone(),
        reason: format!("unusable address: {}", node.address),
    })
}

/// Turns `http://host:port/path`, `tcp://host:port` or `host:port` into `host:port`
pub fn socket_target(address: &str) -> Option<String> {
    let (scheme, rest) = match address.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, address),
    };
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return None;
    }
    if authority.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
        return Some(authority.to_string());
    }
    let default_port = match scheme {
        Some("https") => 443,
        Some("http") | None => 80,
        Some(_) => return None,
    };
    Some(format!("{authority}:{default_port}"))
}

/// Deterministic probe driven by a seeded RNG
pub struct SimulatedProbe {
    rng: Mutex<StdRng>,
    pinned: Mutex<HashMap<String, ProbeReading>>,
    failing: Mutex<HashSet<String>>,
}

impl SimulatedProbe {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            pinned: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Always report `reading` for this node
    pub fn pin(&self, node_id: &str, reading: ProbeReading) {
        self.pinned.lock().insert(node_id.to_string(), reading);
    }

    pub fn unpin(&self, node_id: &str) {
        self.pinned.lock().remove(node_id);
    }

    /// Make every check of this node fail until `recover` is called
    pub fn fail(&self, node_id: &str) {
        self.failing.lock().insert(node_id.to_string());
    }

    pub fn recover(&self, node_id: &str) {
        self.failing.lock().remove(node_id);
    }

    fn simulate(&self) -> ProbeReading {
        let mut rng = self.rng.lock();
        // one in ten checks lands on a latency spike
        let latency_ms = if rng.gen_bool(0.1) {
            rng.gen_range(200.0..600.0)
        } else {
            rng.gen_range(10.0..180.0)
        };
        ProbeReading {
            latency_ms,
            uptime: rng.gen_range(0.95..=1.0),
            error_rate: rng.gen_range(0.0..0.06),
        }
    }
}

#[async_trait]
impl HealthProbe for SimulatedProbe {
    async fn check(&self, node: &Node, _timeout: Duration) -> Result<ProbeReading> {
        if self.failing.lock().contains(&node.id) {
            return Err(FleetError::Probe {
                node_id: node.id.clone(),
                reason: "simulated failure".into(),
            });
        }
        if let Some(reading) = self.pinned.lock().get(&node.id) {
            return Ok(*reading);
        }
        Ok(self.simulate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeClass, NodeMetrics, NodeStatus, NodeTier};
    use time::OffsetDateTime;

    fn node(id: &str, address: &str) -> Node {
        let now = OffsetDateTime::now_utc();
        Node {
            id: id.to_string(),
            name: id.to_string(),
            address: address.to_string(),
            region: "eu".into(),
            class: NodeClass::Edge,
            tier: NodeTier::Standard,
            status: NodeStatus::Active,
            capabilities: ["compute".to_string()].into_iter().collect(),
            metrics: NodeMetrics::default(),
            created_at: now,
            updated_at: now,
            last_seen: None,
        }
    }

    #[test]
    fn test_socket_target() {
        assert_eq!(socket_target("http://10.0.0.1:8080/health").as_deref(), Some("10.0.0.1:8080"));
        assert_eq!(socket_target("https://api.example.org").as_deref(), Some("api.example.org:443"));
        assert_eq!(socket_target("tcp://db.local:5432").as_deref(), Some("db.local:5432"));
        assert_eq!(socket_target("node-7:9000").as_deref(), Some("node-7:9000"));
        assert_eq!(socket_target("grpc://node-7"), None);
        assert_eq!(socket_target("http://"), None);
    }

    #[tokio::test]
    async fn test_simulated_probe_is_reproducible() {
        let n = node("a", "http://a:80");
        let first = SimulatedProbe::new(42);
        let second = SimulatedProbe::new(42);
        for _ in 0..5 {
            let x = first.check(&n, Duration::from_millis(100)).await.unwrap();
            let y = second.check(&n, Duration::from_millis(100)).await.unwrap();
            assert_eq!(x, y);
            assert!((0.95..=1.0).contains(&x.uptime));
            assert!(x.error_rate < 0.06);
        }
    }

    #[tokio::test]
    async fn test_simulated_pin_and_fail() {
        let n = node("a", "http://a:80");
        let probe = SimulatedProbe::new(7);
        let pinned = ProbeReading {
            latency_ms: 12.0,
            uptime: 0.85,
            error_rate: 0.0,
        };
        probe.pin("a", pinned);
        assert_eq!(probe.check(&n, Duration::from_millis(10)).await.unwrap(), pinned);

        probe.fail("a");
        assert!(matches!(
            probe.check(&n, Duration::from_millis(10)).await,
            Err(FleetError::Probe { .. })
        ));
        probe.recover("a");
        probe.unpin("a");
        assert!(probe.check(&n, Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_probe_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let probe = TcpProbe::new();
        let n = node("local", &format!("http://{addr}"));
        let reading = probe.check(&n, Duration::from_secs(2)).await.unwrap();
        assert_eq!(reading.uptime, 1.0);
        assert_eq!(reading.error_rate, 0.0);

        let bad = node("bad", "grpc://nowhere");
        assert!(probe.check(&bad, Duration::from_millis(50)).await.is_err());
    }

    #[tokio::test]
    async fn test_tcp_ping_leaves_window_alone() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = TcpProbe::new();
        let down = node("down", &format!("tcp://{addr}"));
        probe.record("down", true);
        for _ in 0..5 {
            assert!(probe.ping(&down, Duration::from_millis(200)).await.is_err());
        }
        assert_eq!(probe.peek("down"), (1.0, 0.0));

        assert!(probe.check(&down, Duration::from_millis(200)).await.is_err());
        assert_eq!(probe.peek("down"), (0.5, 0.5));

        probe.forget("down");
        assert!(probe.outcomes.lock().is_empty());
    }

    #[test]
    fn test_tcp_outcome_window() {
        let probe = TcpProbe::new();
        probe.record("a", true);
        probe.record("a", true);
        probe.record("a", false);
        let (uptime, error_rate) = probe.record("a", true);
        assert_eq!(uptime, 0.75);
        assert_eq!(error_rate, 0.25);
    }
}
