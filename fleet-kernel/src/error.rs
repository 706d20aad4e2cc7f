use thiserror::Error;

/// Result type for control plane operations
pub type Result<T> = std::result::Result<T, FleetError>;

/// Errors surfaced by the registry, topology, router and coordinator
#[derive(Debug, Error)]
pub enum FleetError {
    /// Malformed node or connection data, rejected before any mutation
    #[error("validation failed: {0}")]
    Validation(String),

    /// Operation on an unknown node, connection or cluster
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Router filter left no node to pick from
    #[error("no candidate node matches the selection criteria ({0})")]
    NoCandidate(String),

    /// Health-check transport failure; never leaves the health monitor
    #[error("probe failed for {node_id}: {reason}")]
    Probe { node_id: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("event sink error: {0}")]
    Sink(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FleetError {
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { kind: "node", id: id.into() }
    }

    pub fn cluster_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { kind: "cluster", id: id.into() }
    }

    pub fn connection_not_found(from: &str, to: &str) -> Self {
        Self::NotFound { kind: "connection", id: format!("{from}->{to}") }
    }

    /// Stable machine-readable name, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::NoCandidate(_) => "no_candidate",
            Self::Probe { .. } => "probe",
            Self::Config(_) => "config",
            Self::Sink(_) => "sink",
            Self::Json(_) => "json",
        }
    }
}
