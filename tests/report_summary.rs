// tests/report_summary.rs
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use solar_risk_monitor::normalize::synthetic_fallback;
use solar_risk_monitor::notify::Notifier;
use solar_risk_monitor::observation::{AlertEvent, DeliveryStatus, Provenance, SolarObservation};
use solar_risk_monitor::report::{send_report, ReportCfg};
use solar_risk_monitor::risk::score;
use solar_risk_monitor::store::{ObservationStore, SqliteStore};

#[derive(Default)]
struct Capture(Mutex<Vec<String>>);

#[async_trait]
impl Notifier for Capture {
    async fn send(&self, text: &str) -> Result<()> {
        self.0.lock().unwrap().push(text.to_string());
        Ok(())
    }
    fn name(&self) -> &'static str {
        "capture"
    }
}

#[tokio::test]
async fn daily_report_summarises_recent_records() {
    let store: Arc<dyn ObservationStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = Utc::now();

    let storm = SolarObservation {
        kp: 7.2,
        wind_speed: 750.0,
        flares_m: 2,
        provenance: Provenance::source("noaa-kp"),
        ..synthetic_fallback(now)
    };
    let quiet = synthetic_fallback(now);
    store.append(&storm, &score(&storm)).unwrap();
    store.append(&quiet, &score(&quiet)).unwrap();
    store
        .record_alert(&AlertEvent {
            id: None,
            triggered_at: now,
            risk: 0.8,
            message: "⚠️ SOLAR ALERT".into(),
            status: DeliveryStatus::Sent,
            attempts: 1,
        })
        .unwrap();

    let capture = Capture::default();
    let cfg = ReportCfg {
        period: Duration::from_secs(86_400),
        threshold: 0.6,
        notify_timeout: Duration::from_secs(1),
    };
    let summary = send_report(&store, &capture, cfg).await.unwrap();

    assert_eq!(summary.records, 2);
    assert_eq!(summary.fallback_records, 1);
    assert_eq!(summary.above_threshold, 1);
    assert!((summary.avg_flares_m - 1.0).abs() < 1e-9);

    let sent = capture.0.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Records: 2"));
    assert!(sent[0].contains("(sent)"));
}
