/*!
Node fixtures

Builders for registration payloads and canned probe readings, so tests only
spell out the fields they care about.
*/

use fleet_kernel::models::{NodeClass, NodeMetrics, NodeSpec, NodeStatus, NodeTier};
use fleet_kernel::probe::ProbeReading;

pub struct NodeBuilder {
    spec: NodeSpec,
}

/// Starts a builder with sane defaults: active mesh node in `eu-west`
pub fn node(id: &str) -> NodeBuilder {
    NodeBuilder::new(id)
}

impl NodeBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            spec: NodeSpec {
                id: id.to_string(),
                name: format!("node {id}"),
                address: format!("http://{id}.fleet.local:8080"),
                region: "eu-west".into(),
                class: NodeClass::Mesh,
                tier: NodeTier::Standard,
                status: NodeStatus::Active,
                capabilities: vec!["compute".into()],
                metrics: NodeMetrics::default(),
            },
        }
    }

    pub fn region(mut self, region: &str) -> Self {
        self.spec.region = region.to_string();
        self
    }

    pub fn class(mut self, class: NodeClass) -> Self {
        self.spec.class = class;
        self
    }

    pub fn tier(mut self, tier: NodeTier) -> Self {
        self.spec.tier = tier;
        self
    }

    pub fn status(mut self, status: NodeStatus) -> Self {
        self.spec.status = status;
        self
    }

    pub fn address(mut self, address: &str) -> Self {
        self.spec.address = address.to_string();
        self
    }

    pub fn capability(mut self, capability: &str) -> Self {
        self.spec.capabilities.push(capability.to_string());
        self
    }

    pub fn capabilities(mut self, capabilities: &[&str]) -> Self {
        self.spec.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn reputation(mut self, reputation: f64) -> Self {
        self.spec.metrics.reputation = reputation;
        self
    }

    pub fn latency(mut self, latency_ms: f64) -> Self {
        self.spec.metrics.latency_ms = latency_ms;
        self
    }

    pub fn uptime(mut self, uptime: f64) -> Self {
        self.spec.metrics.uptime = uptime;
        self
    }

    pub fn build(self) -> NodeSpec {
        self.spec
    }
}

impl From<NodeBuilder> for NodeSpec {
    fn from(builder: NodeBuilder) -> Self {
        builder.build()
    }
}

/// Reading that keeps a node active under the default thresholds
pub fn healthy_reading() -> ProbeReading {
    reading(40.0, 0.999, 0.005)
}

pub fn reading(latency_ms: f64, uptime: f64, error_rate: f64) -> ProbeReading {
    ProbeReading {
        latency_ms,
        uptime,
        error_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let spec = node("n1")
            .region("us-east")
            .class(NodeClass::Edge)
            .capability("gpu")
            .reputation(0.8)
            .latency(12.0)
            .build();

        assert_eq!(spec.id, "n1");
        assert_eq!(spec.region, "us-east");
        assert_eq!(spec.class, NodeClass::Edge);
        assert_eq!(spec.capabilities, ["compute", "gpu"]);
        assert_eq!(spec.metrics.reputation, 0.8);
        assert_eq!(spec.metrics.uptime, 1.0);
    }
}
