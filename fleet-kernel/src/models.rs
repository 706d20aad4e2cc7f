use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeClass {
    Primary,
    Secondary,
    Mesh,
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeTier {
    #[default]
    Standard,
    Premium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Active,
    Inactive,
    Degraded,
    Maintenance,
}

impl NodeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeClass::Primary => "primary",
            NodeClass::Secondary => "secondary",
            NodeClass::Mesh => "mesh",
            NodeClass::Edge => "edge",
        }
    }
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Inactive => "inactive",
            NodeStatus::Degraded => "degraded",
            NodeStatus::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeMetrics {
    pub latency_ms: f64,
    pub uptime: f64,                    // ratio 0..1
    pub request_count: u64,             // cumulative
    pub error_count: u64,               // cumulative
    pub reputation: f64,                // derived composite 0..1
    pub bandwidth_mbps: Option<f64>,
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self {
            latency_ms: 0.0,
            uptime: 1.0,
            request_count: 0,
            error_count: 0,
            reputation: 1.0,
            bandwidth_mbps: None,
        }
    }
}

/// A registered service endpoint participating in the fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub address: String,                // ex: http://10.0.0.12:8080
    pub region: String,
    pub class: NodeClass,
    pub tier: NodeTier,
    pub status: NodeStatus,
    pub capabilities: BTreeSet<String>,
    pub metrics: NodeMetrics,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
}

impl Node {
    /// Builds a fresh record from a registration payload, trimming ids
    pub fn from_spec(spec: NodeSpec) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: spec.id.trim().to_string(),
            name: spec.name,
            address: spec.address,
            region: spec.region.trim().to_string(),
            class: spec.class,
            tier: spec.tier,
            status: spec.status,
            capabilities: spec.capabilities.iter().map(|c| c.trim().to_string()).collect(),
            metrics: spec.metrics,
            created_at: now,
            updated_at: now,
            last_seen: None,
        }
    }
}

/// Payload accepted by `NodeRegistry::add`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub name: String,
    pub address: String,
    pub region: String,
    pub class: NodeClass,
    #[serde(default)]
    pub tier: NodeTier,
    #[serde(default)]
    pub status: NodeStatus,
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metrics: NodeMetrics,
}

/// Partial update, shallow-merged into an existing node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub region: Option<String>,
    pub class: Option<NodeClass>,
    pub tier: Option<NodeTier>,
    pub status: Option<NodeStatus>,
    pub capabilities: Option<Vec<String>>,
    pub metrics: Option<NodeMetrics>,
}

/// Point-in-time health observation produced by the health monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub status: NodeStatus,
    pub latency_ms: f64,
    pub uptime: f64,
    pub error_rate: f64,
    pub reputation: f64,
    pub success: bool,                  // false when synthesized after a failed probe
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Node record stamped with removal metadata, handed back by `NodeRegistry::remove`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovedNode {
    pub node: Node,
    pub reason: String,
    pub graceful: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub removed_at: OffsetDateTime,
}
