//! Fleet kernel: control plane for a distributed fleet of service nodes.
//!
//! Node registry with secondary indexes, topology graph with path finding
//! and clusters, periodic health monitoring with SLO alerts, and a request
//! router. `Coordinator` wires them together; `http` exposes it over REST.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod models;
pub mod monitor;
pub mod observers;
pub mod probe;
pub mod registry;
pub mod router;
pub mod sink;
pub mod topology;

pub use coordinator::Coordinator;
pub use error::{FleetError, Result};
