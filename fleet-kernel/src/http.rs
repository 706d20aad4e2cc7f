/**
 * FLEET REST API - HTTP surface of the kernel
 *
 * ROLE : Thin axum layer over `Coordinator`. Every handler extracts its
 * input, calls one coordinator operation and serializes the result.
 *
 * ROUTES : /health, /nodes, /network, /route, /topology
 * ERRORS : `FleetError` maps to 422/404/503/500 with a `{error, kind}` body.
 */

use crate::coordinator::{
    CapabilityReport, Coordinator, KernelHealth, NetworkStatus, PingReport, PingRequest, StatusQuery,
};
use crate::error::FleetError;
use crate::models::{HealthSample, Node, NodeClass, NodeSpec, NodeStatus, NodeTier, NodeUpdate, RemovedNode};
use crate::monitor::AlertThresholds;
use crate::registry::NodeFilter;
use crate::router::{RouterStats, RoutingAlgorithm, SelectionCriteria, TrafficAllocation};
use crate::topology::{ClusterHealth, Connection, ConnectionProps, OptimizationReport, RoutePath, TopologySnapshot};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

type ApiResult<T> = Result<Json<T>, FleetError>;

pub fn status_for(err: &FleetError) -> StatusCode {
    match err {
        FleetError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        FleetError::NotFound { .. } => StatusCode::NOT_FOUND,
        FleetError::NoCandidate(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let body = json!({ "error": self.to_string(), "kind": self.kind() });
        (status, Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/health/thresholds", put(put_thresholds).get(get_thresholds))
        .route("/nodes", get(list_nodes).post(register_node))
        .route("/nodes/{id}", get(get_node).patch(update_node).delete(deregister_node))
        .route("/nodes/{id}/history", get(node_history))
        .route("/network/ping", get(ping))
        .route("/network/capabilities", get(capabilities))
        .route("/network/status", get(network_status))
        .route("/route/select", post(select_node))
        .route("/route/distribute", post(distribute))
        .route("/route/release/{id}", post(release))
        .route("/route/stats", get(router_stats))
        .route("/topology", get(topology))
        .route("/topology/connections", post(connect))
        .route("/topology/connections/{from}/{to}", axum::routing::delete(disconnect))
        .route("/topology/path", get(shortest_path))
        .route("/topology/clusters/{id}/health", get(cluster_health))
        .route("/topology/optimize", get(optimize))
        .with_state(app_state)
}

async fn get_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.coordinator.get_health())
}

async fn get_thresholds(State(app): State<AppState>) -> Json<AlertThresholds> {
    Json(app.coordinator.monitor().thresholds())
}

async fn put_thresholds(State(app): State<AppState>, Json(thresholds): Json<AlertThresholds>) -> ApiResult<AlertThresholds> {
    app.coordinator.set_thresholds(thresholds).await?;
    Ok(Json(thresholds))
}

/// Query-string form of `NodeFilter`; list values are comma-separated
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodeQuery {
    pub region: Option<String>,
    pub class: Option<NodeClass>,
    pub status: Option<NodeStatus>,
    pub tier: Option<NodeTier>,
    pub capabilities: Option<String>,
    pub exclude: Option<String>,
    pub min_reputation: Option<f64>,
    pub max_latency_ms: Option<f64>,
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

impl From<NodeQuery> for NodeFilter {
    fn from(q: NodeQuery) -> Self {
        NodeFilter {
            region: q.region,
            class: q.class,
            status: q.status,
            tier: q.tier,
            capabilities: split_list(q.capabilities),
            exclude: split_list(q.exclude),
            min_reputation: q.min_reputation,
            max_latency_ms: q.max_latency_ms,
        }
    }
}

async fn list_nodes(State(app): State<AppState>, Query(q): Query<NodeQuery>) -> Json<Vec<Node>> {
    Json(app.coordinator.list_nodes(&q.into()))
}

async fn register_node(
    State(app): State<AppState>,
    Json(spec): Json<NodeSpec>,
) -> Result<(StatusCode, Json<Node>), FleetError> {
    let node = app.coordinator.register_node(spec)?;
    Ok((StatusCode::CREATED, Json(node)))
}

async fn get_node(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<Node> {
    Ok(Json(app.coordinator.get_node(&id)?))
}

async fn update_node(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<NodeUpdate>,
) -> ApiResult<Node> {
    Ok(Json(app.coordinator.update_node(&id, update)?))
}

#[derive(Debug, Deserialize)]
struct RemoveParams {
    reason: Option<String>,
    #[serde(default = "graceful_default")]
    graceful: bool,
}

fn graceful_default() -> bool {
    true
}

async fn deregister_node(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RemoveParams>,
) -> ApiResult<RemovedNode> {
    let reason = params.reason.unwrap_or_else(|| "deregistered via api".into());
    Ok(Json(app.coordinator.deregister_node(&id, &reason, params.graceful)?))
}

async fn node_history(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<Vec<HealthSample>> {
    Ok(Json(app.coordinator.node_history(&id)?))
}

async fn ping(State(app): State<AppState>, Query(request): Query<PingRequest>) -> ApiResult<PingReport> {
    Ok(Json(app.coordinator.ping(&request).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CapabilityParams {
    node_id: Option<String>,
    service: Option<String>,
}

async fn capabilities(
    State(app): State<AppState>,
    Query(params): Query<CapabilityParams>,
) -> ApiResult<CapabilityReport> {
    let report = app
        .coordinator
        .get_capabilities(params.node_id.as_deref(), params.service.as_deref())?;
    Ok(Json(report))
}

async fn network_status(State(app): State<AppState>, Query(query): Query<StatusQuery>) -> Json<NetworkStatus> {
    Json(app.coordinator.get_network_status(&query))
}

#[derive(Debug, Default, Deserialize)]
pub struct SelectBody {
    #[serde(default)]
    pub algorithm: Option<RoutingAlgorithm>,
    #[serde(flatten)]
    pub criteria: SelectionCriteria,
}

async fn select_node(State(app): State<AppState>, Json(body): Json<SelectBody>) -> ApiResult<Node> {
    Ok(Json(app.coordinator.select_node(&body.criteria, body.algorithm)?))
}

#[derive(Debug, Deserialize)]
pub struct DistributeBody {
    pub total: u64,
    #[serde(flatten)]
    pub criteria: SelectionCriteria,
}

async fn distribute(State(app): State<AppState>, Json(body): Json<DistributeBody>) -> ApiResult<Vec<TrafficAllocation>> {
    Ok(Json(app.coordinator.distribute_traffic(body.total, &body.criteria)?))
}

#[derive(Serialize)]
struct Released {
    node_id: String,
    in_flight: u64,
}

async fn release(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<Released> {
    if !app.coordinator.registry().contains(&id) {
        return Err(FleetError::node_not_found(id));
    }
    let in_flight = app.coordinator.release(&id);
    Ok(Json(Released { node_id: id, in_flight }))
}

async fn router_stats(State(app): State<AppState>) -> Json<RouterStats> {
    Json(app.coordinator.router_stats())
}

async fn topology(State(app): State<AppState>) -> Json<TopologySnapshot> {
    Json(app.coordinator.topology_snapshot())
}

#[derive(Debug, Deserialize)]
pub struct ConnectBody {
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub props: ConnectionProps,
}

async fn connect(
    State(app): State<AppState>,
    Json(body): Json<ConnectBody>,
) -> Result<(StatusCode, Json<Connection>), FleetError> {
    let connection = app.coordinator.connect(&body.from, &body.to, body.props)?;
    Ok((StatusCode::CREATED, Json(connection)))
}

async fn disconnect(State(app): State<AppState>, Path((from, to)): Path<(String, String)>) -> ApiResult<Connection> {
    Ok(Json(app.coordinator.disconnect(&from, &to)?))
}

#[derive(Debug, Deserialize)]
struct PathParams {
    from: String,
    to: String,
}

async fn shortest_path(State(app): State<AppState>, Query(p): Query<PathParams>) -> ApiResult<RoutePath> {
    app.coordinator
        .shortest_path(&p.from, &p.to)
        .map(Json)
        .ok_or_else(|| FleetError::NotFound {
            kind: "path",
            id: format!("{}->{}", p.from, p.to),
        })
}

async fn cluster_health(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<ClusterHealth> {
    Ok(Json(app.coordinator.cluster_health(&id)?))
}

async fn optimize(State(app): State<AppState>) -> Json<OptimizationReport> {
    Json(app.coordinator.optimize())
}
