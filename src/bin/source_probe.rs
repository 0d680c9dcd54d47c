//! Fetch every configured source once and print which ones answer.
//! Exit code 1 when none of them do.

use anyhow::{Context, Result};
use solar_risk_monitor::config::MonitorConfig;
use solar_risk_monitor::ingest::{probe_sources, providers};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    // The probe does not need notification channels, so skip full validation.
    let mut cfg = match std::env::var("SOLAR_CONFIG_PATH") {
        Ok(p) => MonitorConfig::load_from(std::path::Path::new(&p))?,
        Err(_) => {
            let default = std::path::Path::new("config/monitor.toml");
            if default.exists() {
                MonitorConfig::load_from(default)?
            } else {
                MonitorConfig::default()
            }
        }
    };
    cfg.apply_env(|k| std::env::var(k).ok())?;

    let client = providers::http::build_client().context("build http client")?;
    let adapters = providers::build_adapters(cfg.descriptors(), client, cfg.nasa_api_key());

    let report = probe_sources(&adapters).await;
    let mut ok = 0usize;
    for h in &report {
        match &h.outcome {
            Ok(()) => {
                ok += 1;
                println!("[{:>2}] {:<20} ok", h.priority, h.name);
            }
            Err(e) => println!("[{:>2}] {:<20} {} ({e})", h.priority, h.name, e.kind()),
        }
    }
    println!("{ok}/{} sources reachable", report.len());

    if ok == 0 {
        std::process::exit(1);
    }
    Ok(())
}
