/*!
Test harness for the fleet kernel

- full coordinator wired to a seeded `SimulatedProbe` and a `RecordingSink`
- expectations and assertions on published fleet events
- helpers to script probe outcomes and run monitor ticks on demand
*/

use crate::fixtures::NodeBuilder;
use anyhow::{bail, Context, Result};
use fleet_kernel::config::KernelConfig;
use fleet_kernel::models::{Node, NodeSpec};
use fleet_kernel::monitor::TickReport;
use fleet_kernel::probe::{ProbeReading, SimulatedProbe};
use fleet_kernel::sink::RecordingSink;
use fleet_kernel::topology::ConnectionProps;
use fleet_kernel::Coordinator;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Installs a test-friendly subscriber once; later calls are no-ops
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init()
        .ok();
}

pub struct TestHarness {
    pub coordinator: Arc<Coordinator>,
    pub probe: Arc<SimulatedProbe>,
    pub sink: Arc<RecordingSink>,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    topic: String,
    expected_count: usize,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(&KernelConfig::default())
    }

    /// Builds the coordinator from `cfg`; bootstrap nodes are not registered
    pub fn with_config(cfg: &KernelConfig) -> Self {
        init_tracing();
        let probe = Arc::new(SimulatedProbe::new(cfg.health.seed));
        let sink = Arc::new(RecordingSink::new());
        let coordinator = Arc::new(Coordinator::new(cfg, probe.clone(), sink.clone()));

        Self {
            coordinator,
            probe,
            sink,
            expectations: Vec::new(),
        }
    }

    /// Same as `with_config`, then registers the configured nodes and links
    pub fn bootstrapped(cfg: &KernelConfig) -> Result<Self> {
        let harness = Self::with_config(cfg);
        harness
            .coordinator
            .bootstrap(cfg)
            .context("bootstrap from config failed")?;
        Ok(harness)
    }

    pub fn add_node(&self, node: impl Into<NodeSpec>) -> Result<Node> {
        let spec = node.into();
        let id = spec.id.clone();
        self.coordinator
            .register_node(spec)
            .with_context(|| format!("registering {id}"))
    }

    pub fn add_nodes(&self, nodes: impl IntoIterator<Item = NodeBuilder>) -> Result<()> {
        for node in nodes {
            self.add_node(node)?;
        }
        Ok(())
    }

    pub fn connect(&self, from: &str, to: &str, latency_ms: f64) -> Result<()> {
        let props = ConnectionProps {
            latency_ms,
            ..Default::default()
        };
        self.coordinator
            .connect(from, to, props)
            .with_context(|| format!("connecting {from} -> {to}"))?;
        Ok(())
    }

    /// Every later probe of `node_id` returns `reading`
    pub fn pin_health(&self, node_id: &str, reading: ProbeReading) {
        self.probe.pin(node_id, reading);
    }

    pub fn fail_probe(&self, node_id: &str) {
        self.probe.fail(node_id);
    }

    /// Runs one health monitor tick right now
    pub async fn tick(&self) -> TickReport {
        self.coordinator.monitor().check_now().await
    }

    /// Expect exactly `count` events on `topic` by the next `verify_expectations`
    pub fn expect_events(&mut self, topic: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            topic: topic.to_string(),
            expected_count: count,
        });
        self
    }

    pub fn verify_expectations(&self) -> Result<()> {
        for expectation in &self.expectations {
            let actual = self.sink.count(&expectation.topic);
            if actual != expectation.expected_count {
                bail!(
                    "expectation failed for topic '{}': expected {} events, got {}",
                    expectation.topic,
                    expectation.expected_count,
                    actual
                );
            }
        }
        info!("{} expectations verified", self.expectations.len());
        Ok(())
    }

    /// Asserts some event on `topic` carries exactly `expected`
    pub fn assert_event_sent(&self, topic: &str, expected: &Value) -> Result<()> {
        if self.sink.by_topic(topic).iter().any(|e| e.payload == *expected) {
            return Ok(());
        }
        bail!("expected event not found on topic: {}", topic);
    }

    pub fn assert_field_exists(&self, topic: &str, field_path: &str) -> Result<()> {
        if let Some(event) = self.sink.last(topic) {
            if nested_field(&event, field_path).is_some() {
                return Ok(());
            }
        }
        bail!("field '{}' not found in latest event on {}", field_path, topic);
    }

    /// Compares a dotted path (`node.region`) in the latest event on `topic`
    pub fn assert_field_equals(&self, topic: &str, field_path: &str, expected: &Value) -> Result<()> {
        let Some(event) = self.sink.last(topic) else {
            bail!("no event published on {}", topic);
        };
        match nested_field(&event, field_path) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => bail!(
                "field '{}' mismatch: expected {}, got {}",
                field_path,
                expected,
                actual
            ),
            None => bail!("field '{}' not found in latest event on {}", field_path, topic),
        }
    }

    pub fn get_stats(&self) -> TestStats {
        let mut topic_counts = BTreeMap::new();
        let events = self.sink.events();
        for event in &events {
            *topic_counts.entry(event.topic.clone()).or_insert(0) += 1;
        }

        let summary = self.coordinator.topology().summary();
        TestStats {
            total_events: events.len(),
            topic_counts,
            nodes: self.coordinator.registry().len(),
            connections: summary.connections,
        }
    }

    /// Forgets recorded events, expectations and router counters
    pub fn reset(&mut self) {
        self.sink.clear();
        self.expectations.clear();
        self.coordinator.router().reset();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.coordinator.monitor().stop();
    }
}

fn nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, part| match current {
        Value::Object(obj) => obj.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[derive(Debug)]
pub struct TestStats {
    pub total_events: usize,
    pub topic_counts: BTreeMap<String, usize>,
    pub nodes: usize,
    pub connections: usize,
}

impl TestStats {
    pub fn print(&self) {
        println!("fleet test stats:");
        println!("  nodes: {}, connections: {}", self.nodes, self.connections);
        println!("  events: {}", self.total_events);
        for (topic, count) in &self.topic_counts {
            println!("    {}: {}", topic, count);
        }
    }
}

/// Declares an async test around a fresh `TestHarness`
#[macro_export]
macro_rules! fleet_test {
    ($name:ident, |$harness:ident| $body:block) => {
        #[tokio::test]
        async fn $name() {
            async fn body($harness: &mut $crate::test_utils::TestHarness) -> $crate::anyhow::Result<()> $body

            let mut harness = $crate::test_utils::TestHarness::new();
            if let Err(e) = body(&mut harness).await {
                panic!("fleet test '{}' failed: {:#}", stringify!($name), e);
            }
            harness.get_stats().print();
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{healthy_reading, node};
    use fleet_kernel::coordinator::topics;
    use serde_json::json;

    #[tokio::test]
    async fn test_harness_basic_functionality() {
        let mut harness = TestHarness::new();
        harness.expect_events(topics::NODE_JOINED, 2);

        harness.add_nodes([node("a"), node("b").region("us-east")]).unwrap();
        harness.verify_expectations().unwrap();
        harness
            .assert_field_equals(topics::NODE_JOINED, "node.region", &json!("us-east"))
            .unwrap();
        harness.assert_field_exists(topics::NODE_JOINED, "timestamp").unwrap();
        assert!(harness
            .assert_field_equals(topics::NODE_JOINED, "node.region", &json!("eu-west"))
            .is_err());

        let stats = harness.get_stats();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.topic_counts[topics::NODE_JOINED], 2);

        harness.reset();
        assert_eq!(harness.get_stats().total_events, 0);
    }

    #[tokio::test]
    async fn test_tick_uses_pinned_readings() {
        let harness = TestHarness::new();
        harness.add_node(node("a")).unwrap();
        harness.pin_health("a", healthy_reading());

        let report = harness.tick().await;
        assert_eq!(report.probed, 1);
        assert_eq!(report.failed_probes, 0);
        assert_eq!(report.alerts, 0);
    }

    #[test]
    fn test_nested_field_paths() {
        let value = json!({"node": {"capabilities": ["compute", "gpu"]}});
        assert_eq!(nested_field(&value, "node.capabilities.1"), Some(&json!("gpu")));
        assert!(nested_field(&value, "node.missing").is_none());
    }

    fleet_test!(test_macro_functionality, |harness| {
        harness.add_node(node("m1"))?;
        harness.assert_field_equals(topics::NODE_JOINED, "node.id", &json!("m1"))?;
        Ok(())
    });
}
