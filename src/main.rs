//! Solar Risk Monitor: binary entrypoint.
//! Loads configuration, opens the observation store, wires sources and
//! notifiers, then polls until Ctrl-C.
//!
//! See `README.md` for quickstart.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use solar_risk_monitor::alert::AlertPolicy;
use solar_risk_monitor::ingest::{self, providers};
use solar_risk_monitor::notify::{Notifier, NotifierMux};
use solar_risk_monitor::report::{spawn_report_task, ReportCfg};
use solar_risk_monitor::scheduler::{Scheduler, SchedulerCfg};
use solar_risk_monitor::store::{ObservationStore, SqliteStore};
use solar_risk_monitor::MonitorConfig;

/// `LOG_FORMAT=json` switches to JSON lines; compact otherwise.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("solar_risk_monitor=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = MonitorConfig::load_default().context("load configuration")?;

    if let Some(addr) = cfg.metrics_addr {
        solar_risk_monitor::metrics::install_exporter(addr)?;
    }
    ingest::ensure_metrics_described();

    let store: Arc<dyn ObservationStore> = Arc::new(
        SqliteStore::open(&cfg.database_path)
            .with_context(|| format!("open store {}", cfg.database_path.display()))?,
    );
    let notifier: Arc<dyn Notifier> =
        Arc::new(NotifierMux::from_config(&cfg.notify).context("build notifiers")?);

    let client = providers::http::build_client().context("build http client")?;
    let adapters = providers::build_adapters(cfg.descriptors(), client, cfg.nasa_api_key());

    for h in ingest::probe_sources(&adapters).await {
        match &h.outcome {
            Ok(()) => tracing::info!(target: "ingest", source = %h.name, priority = h.priority, "source ok"),
            Err(e) => tracing::warn!(
                target: "ingest",
                source = %h.name,
                priority = h.priority,
                kind = e.kind(),
                error = %e,
                "source unavailable at startup"
            ),
        }
    }

    let shutdown = CancellationToken::new();

    let report = cfg.report.enabled.then(|| {
        spawn_report_task(
            Arc::clone(&store),
            Arc::clone(&notifier),
            ReportCfg {
                period: std::time::Duration::from_secs(cfg.report.period_secs),
                threshold: cfg.alert.threshold,
                notify_timeout: cfg.notify_timeout(),
            },
            shutdown.clone(),
        )
    });

    let policy = AlertPolicy {
        threshold: cfg.alert.threshold,
        notify_on_recovery: cfg.alert.notify_on_recovery,
        max_delivery_attempts: cfg.alert.max_delivery_attempts,
        notify_timeout: cfg.notify_timeout(),
    };
    let scheduler = Scheduler::new(
        SchedulerCfg::from_config(&cfg),
        adapters,
        cfg.risk.clone(),
        policy,
        store,
        notifier,
    );
    let poller = tokio::spawn(scheduler.run(shutdown.clone()));

    tokio::signal::ctrl_c().await.context("listen for ctrl-c")?;
    tracing::info!("shutdown requested");
    shutdown.cancel();

    poller.await.context("scheduler task")?;
    if let Some(h) = report {
        h.await.context("report task")?;
    }
    Ok(())
}
