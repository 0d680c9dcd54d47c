use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::ingest::ensure_metrics_described;

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
/// Must be called from inside the tokio runtime.
pub fn install_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("prometheus: install exporter on {addr}"))?;

    ensure_metrics_described();
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}
