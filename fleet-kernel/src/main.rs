/**
 * FLEET KERNEL - entry point of the fleet control plane
 *
 * Loads the YAML config, picks the probe and the event sink, bootstraps the
 * configured nodes, starts the health monitor and serves the REST API until
 * ctrl-c.
 */

use anyhow::{Context, Result};
use fleet_kernel::config::{load_config, ProbeMode};
use fleet_kernel::http::{build_router, AppState};
use fleet_kernel::probe::{HealthProbe, SimulatedProbe, TcpProbe};
use fleet_kernel::sink::{EventSink, LogEventSink, MqttEventSink};
use fleet_kernel::Coordinator;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await.context("failed to load kernel config")?;

    let probe: Arc<dyn HealthProbe> = match cfg.health.probe {
        ProbeMode::Tcp => Arc::new(TcpProbe::new()),
        ProbeMode::Simulated => {
            info!("using simulated probe (seed {})", cfg.health.seed);
            Arc::new(SimulatedProbe::new(cfg.health.seed))
        }
    };

    let sink: Arc<dyn EventSink> = match &cfg.mqtt {
        Some(mqtt) => Arc::new(MqttEventSink::connect(mqtt)),
        None => {
            warn!("no mqtt section, fleet events only go to the log");
            Arc::new(LogEventSink)
        }
    };

    let coordinator = Arc::new(Coordinator::new(&cfg, probe, sink));
    coordinator.bootstrap(&cfg).context("failed to register bootstrap nodes")?;
    coordinator.start_monitoring();

    let app = build_router(AppState {
        coordinator: coordinator.clone(),
    });

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("cannot bind {}", cfg.http.bind))?;
    info!("listening on http://{}", cfg.http.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("http server failed")?;

    coordinator.shutdown();
    Ok(())
}
