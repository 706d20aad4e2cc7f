/**
 * HEALTH MONITOR - Periodic probing, status derivation and SLO alerting
 *
 * ROLE : Each tick probes every node concurrently, except nodes an operator
 * put in maintenance, writes samples back to the registry and raises alerts.
 *
 * ARCHITECTURE : tokio interval task + per-probe timeout. A failed or hung
 * probe only affects its own node, which gets a synthetic inactive sample.
 * Status is re-derived from the latest sample alone.
 */

use crate::error::{FleetError, Result};
use crate::models::{HealthSample, NodeStatus};
use crate::observers::ObserverList;
use crate::probe::{HealthProbe, ProbeReading};
use crate::registry::{NodeRegistry, RegistryEvent, RegistryObserver};
use crate::topology::ClusterStatus;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Latency at or beyond which the latency component of reputation is zero
pub const LATENCY_CEILING_MS: f64 = 500.0;

/// Hard floors: breaching any of them marks the node inactive
pub const INACTIVE_UPTIME_FLOOR: f64 = 0.9;
pub const INACTIVE_ERROR_RATE_CEILING: f64 = 0.1;
pub const INACTIVE_REPUTATION_FLOOR: f64 = 0.5;

/// Severity escalation points
pub const CRITICAL_UPTIME_FLOOR: f64 = 0.95;
pub const CRITICAL_ERROR_RATE: f64 = 0.1;
pub const CRITICAL_REPUTATION_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub latency_ms: f64,
    pub uptime: f64,
    pub error_rate: f64,
    pub reputation: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            latency_ms: 200.0,
            uptime: 0.99,
            error_rate: 0.05,
            reputation: 0.7,
        }
    }
}

impl AlertThresholds {
    pub fn validate(&self) -> Result<()> {
        if !(self.latency_ms > 0.0) {
            return Err(FleetError::Validation("latency threshold must be positive".into()));
        }
        for (name, value) in [
            ("uptime", self.uptime),
            ("error_rate", self.error_rate),
            ("reputation", self.reputation),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(FleetError::Validation(format!("{name} threshold out of range: {value}")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HighLatency,
    LowUptime,
    HighErrorRate,
    LowReputation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthAlert {
    pub id: String,
    pub node_id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub metric: &'static str,
    pub value: f64,
    pub threshold: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

pub trait MonitorObserver: Send + Sync {
    fn on_alert(&self, alert: &HealthAlert);
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub history_size: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            history_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkSummary {
    pub total_nodes: usize,
    pub active: usize,
    pub degraded: usize,
    pub inactive: usize,
    pub maintenance: usize,
    pub average_latency_ms: f64,
    pub average_uptime: f64,
    pub average_reputation: f64,
    pub health_ratio: f64,
    pub overall_status: ClusterStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub probed: usize,
    pub skipped: usize,                 // nodes in maintenance
    pub failed_probes: usize,
    pub alerts: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

/// reputation = 0.3 latency score + 0.3 uptime + 0.2 error score; the
/// remaining 0.2 belongs to the router's load term and is not applied here
pub fn compute_reputation(latency_ms: f64, uptime: f64, error_rate: f64) -> f64 {
    let latency_score = (1.0 - latency_ms / LATENCY_CEILING_MS).max(0.0);
    let error_score = (1.0 - error_rate * 10.0).max(0.0);
    0.3 * latency_score + 0.3 * uptime + 0.2 * error_score
}

pub fn derive_status(reading: &ProbeReading, reputation: f64, thresholds: &AlertThresholds) -> NodeStatus {
    if reading.uptime < INACTIVE_UPTIME_FLOOR
        || reading.error_rate > INACTIVE_ERROR_RATE_CEILING
        || reputation < INACTIVE_REPUTATION_FLOOR
    {
        NodeStatus::Inactive
    } else if reading.latency_ms > thresholds.latency_ms
        || reading.uptime < thresholds.uptime
        || reading.error_rate > thresholds.error_rate
        || reputation < thresholds.reputation
    {
        NodeStatus::Degraded
    } else {
        NodeStatus::Active
    }
}

pub fn build_sample(reading: ProbeReading, thresholds: &AlertThresholds) -> HealthSample {
    let reputation = compute_reputation(reading.latency_ms, reading.uptime, reading.error_rate);
    HealthSample {
        status: derive_status(&reading, reputation, thresholds),
        latency_ms: reading.latency_ms,
        uptime: reading.uptime,
        error_rate: reading.error_rate,
        reputation,
        success: true,
        timestamp: OffsetDateTime::now_utc(),
    }
}

/// Stand-in sample for a node whose probe failed or timed out
pub fn failed_sample(timeout: Duration) -> HealthSample {
    HealthSample {
        status: NodeStatus::Inactive,
        latency_ms: timeout.as_secs_f64() * 1000.0,
        uptime: 0.0,
        error_rate: 1.0,
        reputation: 0.0,
        success: false,
        timestamp: OffsetDateTime::now_utc(),
    }
}

/// One alert per breached threshold
pub fn evaluate_alerts(node_id: &str, sample: &HealthSample, thresholds: &AlertThresholds) -> Vec<HealthAlert> {
    let mut alerts = Vec::new();
    let mut raise = |alert_type, critical: bool, metric, value: f64, threshold: f64, message: String| {
        alerts.push(HealthAlert {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.to_string(),
            alert_type,
            severity: if critical { AlertSeverity::Critical } else { AlertSeverity::Warning },
            message,
            metric,
            value,
            threshold,
            timestamp: sample.timestamp,
        });
    };

    if sample.latency_ms > thresholds.latency_ms {
        raise(
            AlertType::HighLatency,
            sample.latency_ms > thresholds.latency_ms * 2.0,
            "latency_ms",
            sample.latency_ms,
            thresholds.latency_ms,
            format!("node {node_id} latency {:.0}ms above {:.0}ms", sample.latency_ms, thresholds.latency_ms),
        );
    }
    if sample.uptime < thresholds.uptime {
        raise(
            AlertType::LowUptime,
            sample.uptime < CRITICAL_UPTIME_FLOOR,
            "uptime",
            sample.uptime,
            thresholds.uptime,
            format!("node {node_id} uptime {:.3} below {:.3}", sample.uptime, thresholds.uptime),
        );
    }
    if sample.error_rate > thresholds.error_rate {
        raise(
            AlertType::HighErrorRate,
            sample.error_rate > CRITICAL_ERROR_RATE,
            "error_rate",
            sample.error_rate,
            thresholds.error_rate,
            format!("node {node_id} error rate {:.3} above {:.3}", sample.error_rate, thresholds.error_rate),
        );
    }
    if sample.reputation < thresholds.reputation {
        raise(
            AlertType::LowReputation,
            sample.reputation < CRITICAL_REPUTATION_FLOOR,
            "reputation",
            sample.reputation,
            thresholds.reputation,
            format!("node {node_id} reputation {:.3} below {:.3}", sample.reputation, thresholds.reputation),
        );
    }

    alerts
}

pub struct HealthMonitor {
    registry: Arc<NodeRegistry>,
    probe: Arc<dyn HealthProbe>,
    settings: MonitorSettings,
    thresholds: RwLock<AlertThresholds>,
    tick_guard: tokio::sync::Mutex<()>,
    history: Mutex<HashMap<String, VecDeque<HealthSample>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    last_tick: Mutex<Option<OffsetDateTime>>,
    observers: ObserverList<dyn MonitorObserver>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        probe: Arc<dyn HealthProbe>,
        settings: MonitorSettings,
        thresholds: AlertThresholds,
    ) -> Self {
        Self {
            registry,
            probe,
            settings,
            thresholds: RwLock::new(thresholds),
            tick_guard: tokio::sync::Mutex::new(()),
            history: Mutex::new(HashMap::new()),
            task: Mutex::new(None),
            last_tick: Mutex::new(None),
            observers: ObserverList::new(),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn MonitorObserver>) {
        self.observers.subscribe(observer);
    }

    /// Arms the recurring tick; the first tick fires immediately
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("health monitor already running, start ignored");
            return;
        }

        let monitor = Arc::clone(self);
        let period = self.settings.interval;
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                monitor.check_now().await;
            }
        }));

        info!("health monitor started (interval: {}s)", period.as_secs());
    }

    /// Cancels the recurring tick; calling it again is harmless
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            info!("health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Runs one tick: probe every node, write samples back, raise alerts
    pub async fn check_now(&self) -> TickReport {
        let _tick = self.tick_guard.lock().await;
        let thresholds = *self.thresholds.read();
        let timeout = self.settings.probe_timeout;
        let (nodes, maintenance): (Vec<_>, Vec<_>) = self
            .registry
            .list()
            .into_iter()
            .partition(|n| n.status != NodeStatus::Maintenance);

        let probes = nodes.iter().map(|node| async move {
            let reading = match tokio::time::timeout(timeout, self.probe.check(node, timeout)).await {
                Ok(Ok(reading)) => Some(reading),
                Ok(Err(e)) => {
                    warn!("probe failed: {}", e);
                    None
                }
                Err(_) => {
                    warn!("probe for {} timed out after {}ms", node.id, timeout.as_millis());
                    None
                }
            };
            (node, reading)
        });
        let results = join_all(probes).await;

        let mut failed_probes = 0;
        let mut alert_count = 0;
        for (node, reading) in results {
            let sample = match reading {
                Some(reading) => build_sample(reading, &thresholds),
                None => {
                    failed_probes += 1;
                    failed_sample(timeout)
                }
            };

            // node removed while its probe was in flight
            if self.registry.update_health(&node.id, &sample).is_none() {
                self.probe.forget(&node.id);
                continue;
            }
            self.record(&node.id, sample.clone());

            for alert in evaluate_alerts(&node.id, &sample, &thresholds) {
                warn!("[{:?}] {}", alert.severity, alert.message);
                alert_count += 1;
                self.observers.notify(|o| o.on_alert(&alert));
            }
        }

        self.prune_history();
        let completed_at = OffsetDateTime::now_utc();
        *self.last_tick.lock() = Some(completed_at);
        debug!(
            "health tick done: {} probed, {} in maintenance, {} failed, {} alerts",
            nodes.len(),
            maintenance.len(),
            failed_probes,
            alert_count
        );

        TickReport {
            probed: nodes.len(),
            skipped: maintenance.len(),
            failed_probes,
            alerts: alert_count,
            completed_at,
        }
    }

    fn record(&self, node_id: &str, sample: HealthSample) {
        let mut history = self.history.lock();
        let samples = history.entry(node_id.to_string()).or_default();
        samples.push_back(sample);
        while samples.len() > self.settings.history_size {
            samples.pop_front();
        }
    }

    fn prune_history(&self) {
        let known: HashSet<String> = self.registry.list().into_iter().map(|n| n.id).collect();
        self.history.lock().retain(|id, _| known.contains(id));
    }

    /// Samples for one node, oldest first
    pub fn history(&self, node_id: &str) -> Vec<HealthSample> {
        self.history
            .lock()
            .get(node_id)
            .map(|samples| samples.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, node_id: &str) -> Option<HealthSample> {
        self.history.lock().get(node_id).and_then(|s| s.back().cloned())
    }

    pub fn thresholds(&self) -> AlertThresholds {
        *self.thresholds.read()
    }

    /// Swaps thresholds between ticks, never in the middle of one
    pub async fn set_thresholds(&self, thresholds: AlertThresholds) -> Result<()> {
        thresholds.validate()?;
        let _tick = self.tick_guard.lock().await;
        *self.thresholds.write() = thresholds;
        info!("alert thresholds updated: {:?}", thresholds);
        Ok(())
    }

    pub fn last_tick(&self) -> Option<OffsetDateTime> {
        *self.last_tick.lock()
    }

    pub fn network_summary(&self) -> NetworkSummary {
        summarize(&self.registry.list())
    }
}

impl RegistryObserver for HealthMonitor {
    fn on_registry_event(&self, event: &RegistryEvent) {
        if let RegistryEvent::NodeRemoved(removed) = event {
            self.history.lock().remove(&removed.node.id);
            self.probe.forget(&removed.node.id);
        }
    }
}

/// Status counts plus averages over active nodes
pub fn summarize(nodes: &[crate::models::Node]) -> NetworkSummary {
    let count = |status: NodeStatus| nodes.iter().filter(|n| n.status == status).count();
    let active_nodes: Vec<_> = nodes.iter().filter(|n| n.status == NodeStatus::Active).collect();
    let mean = |f: fn(&crate::models::Node) -> f64| {
        if active_nodes.is_empty() {
            0.0
        } else {
            active_nodes.iter().map(|n| f(n)).sum::<f64>() / active_nodes.len() as f64
        }
    };

    let health_ratio = if nodes.is_empty() {
        1.0
    } else {
        active_nodes.len() as f64 / nodes.len() as f64
    };

    NetworkSummary {
        total_nodes: nodes.len(),
        active: active_nodes.len(),
        degraded: count(NodeStatus::Degraded),
        inactive: count(NodeStatus::Inactive),
        maintenance: count(NodeStatus::Maintenance),
        average_latency_ms: mean(|n| n.metrics.latency_ms),
        average_uptime: mean(|n| n.metrics.uptime),
        average_reputation: mean(|n| n.metrics.reputation),
        health_ratio,
        overall_status: ClusterStatus::from_ratio(health_ratio),
    }
}
