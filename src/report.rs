//! Periodic summary report (daily by default) sent through the notifier.

use anyhow::{anyhow, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::notify::Notifier;
use crate::store::{ObservationStore, WindowSummary};

#[derive(Clone, Copy, Debug)]
pub struct ReportCfg {
    pub period: Duration,
    pub threshold: f64,
    pub notify_timeout: Duration,
}

pub fn format_report(s: &WindowSummary, period: Duration, threshold: f64) -> String {
    let hours = period.as_secs() / 3600;
    let mut out = format!("📊 Solar risk report (last {hours}h)\n");
    if s.records == 0 {
        out.push_str("No observations recorded.");
        return out;
    }
    out.push_str(&format!("Records: {}\n", s.records));
    out.push_str(&format!(
        "Avg flares: M {:.2} / X {:.2}\n",
        s.avg_flares_m, s.avg_flares_x
    ));
    out.push_str(&format!("Max risk: {:.0}%\n", s.max_risk * 100.0));
    out.push_str(&format!(
        "Above threshold ({:.0}%): {}\n",
        threshold * 100.0,
        s.above_threshold
    ));
    out.push_str(&format!("Fallback records: {}\n", s.fallback_records));
    match &s.last_alert {
        Some(a) => out.push_str(&format!(
            "Last alert: {} ({})",
            a.triggered_at.format("%Y-%m-%d %H:%M UTC"),
            a.status.as_str()
        )),
        None => out.push_str("Last alert: none"),
    }
    out
}

/// Summarise the last `cfg.period` and send it once.
pub async fn send_report(
    store: &Arc<dyn ObservationStore>,
    notifier: &dyn Notifier,
    cfg: ReportCfg,
) -> Result<WindowSummary> {
    let since = Utc::now()
        - ChronoDuration::from_std(cfg.period).context("report period out of range")?;
    let threshold = cfg.threshold;
    let st = Arc::clone(store);
    let summary = tokio::task::spawn_blocking(move || st.summary(since, threshold))
        .await
        .context("report task")?
        .context("summarise window")?;

    let text = format_report(&summary, cfg.period, cfg.threshold);
    tokio::time::timeout(cfg.notify_timeout, notifier.send(&text))
        .await
        .map_err(|_| anyhow!("report delivery timed out"))??;
    Ok(summary)
}

/// Send a report every `cfg.period` until `shutdown` fires.
pub fn spawn_report_task(
    store: Arc<dyn ObservationStore>,
    notifier: Arc<dyn Notifier>,
    cfg: ReportCfg,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(cfg.period) => {}
            }
            match send_report(&store, notifier.as_ref(), cfg).await {
                Ok(s) => tracing::info!(target: "notify", records = s.records, "report sent"),
                Err(e) => tracing::warn!(target: "notify", error = %format!("{e:#}"), "report failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_says_so() {
        let s = WindowSummary {
            records: 0,
            avg_flares_m: 0.0,
            avg_flares_x: 0.0,
            max_risk: 0.0,
            above_threshold: 0,
            fallback_records: 0,
            last_alert: None,
        };
        let text = format_report(&s, Duration::from_secs(86_400), 0.6);
        assert!(text.contains("last 24h"));
        assert!(text.contains("No observations"));
    }

    #[test]
    fn report_lists_counts() {
        let s = WindowSummary {
            records: 288,
            avg_flares_m: 1.5,
            avg_flares_x: 0.25,
            max_risk: 0.7,
            above_threshold: 4,
            fallback_records: 2,
            last_alert: None,
        };
        let text = format_report(&s, Duration::from_secs(86_400), 0.6);
        assert!(text.contains("Records: 288"));
        assert!(text.contains("M 1.50 / X 0.25"));
        assert!(text.contains("Max risk: 70%"));
        assert!(text.contains("Above threshold (60%): 4"));
        assert!(text.contains("Fallback records: 2"));
        assert!(text.contains("Last alert: none"));
    }
}
