// tests/alert_sequence.rs
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};
use std::time::Duration;

use solar_risk_monitor::alert::{AlertLevel, AlertMachine, AlertOutcome, AlertPolicy};
use solar_risk_monitor::notify::Notifier;
use solar_risk_monitor::observation::{DeliveryStatus, RiskAssessment};

/// Records messages; the first `fail_first` sends fail.
struct Recorder {
    sent: Mutex<Vec<String>>,
    calls: AtomicUsize,
    fail_first: usize,
}

impl Recorder {
    fn new(fail_first: usize) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail_first,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for Recorder {
    async fn send(&self, text: &str) -> Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(anyhow!("transport down"));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

/// Never answers.
struct Hung;

#[async_trait]
impl Notifier for Hung {
    async fn send(&self, _text: &str) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "hung"
    }
}

fn assessments(scores: &[f64]) -> Vec<RiskAssessment> {
    let t0 = Utc.with_ymd_and_hms(2025, 5, 10, 0, 0, 0).unwrap();
    scores
        .iter()
        .enumerate()
        .map(|(i, s)| RiskAssessment {
            score: *s,
            contributions: vec![],
            observed_at: t0 + ChronoDuration::minutes(5 * i as i64),
        })
        .collect()
}

fn machine(policy: AlertPolicy) -> AlertMachine {
    AlertMachine::new(policy, Utc::now())
}

#[tokio::test]
async fn two_rising_edges_send_two_messages() {
    let rec = Recorder::new(0);
    let mut m = machine(AlertPolicy::default());

    let mut levels = Vec::new();
    for a in assessments(&[0.2, 0.7, 0.8, 0.75, 0.3, 0.9]) {
        m.evaluate(&a, &rec).await;
        levels.push(m.state().level);
    }

    assert_eq!(rec.calls(), 2);
    assert_eq!(rec.sent.lock().unwrap().len(), 2);
    assert_eq!(
        levels,
        vec![
            AlertLevel::Normal,
            AlertLevel::Alerting,
            AlertLevel::Alerting,
            AlertLevel::Alerting,
            AlertLevel::Normal,
            AlertLevel::Alerting,
        ]
    );
}

#[tokio::test]
async fn recovery_message_only_when_enabled() {
    let rec = Recorder::new(0);
    let mut m = machine(AlertPolicy {
        notify_on_recovery: true,
        ..AlertPolicy::default()
    });
    for a in assessments(&[0.7, 0.2]) {
        m.evaluate(&a, &rec).await;
    }
    assert_eq!(rec.calls(), 2);
    assert!(rec.sent.lock().unwrap()[1].contains("back to normal"));
}

#[tokio::test]
async fn failed_delivery_is_retried_exactly_once_next_cycle() {
    let rec = Recorder::new(1);
    let mut m = machine(AlertPolicy::default());
    let a = assessments(&[0.7, 0.8, 0.8]);

    let first = m.evaluate(&a[0], &rec).await;
    assert!(matches!(first, AlertOutcome::Raised(ref ev) if ev.status == DeliveryStatus::Failed));
    assert_eq!(m.state().level, AlertLevel::Alerting);

    let second = m.evaluate(&a[1], &rec).await;
    match second {
        AlertOutcome::Retried(ev) => {
            assert_eq!(ev.status, DeliveryStatus::Sent);
            assert_eq!(ev.attempts, 2);
        }
        other => panic!("expected retry, got {other:?}"),
    }

    // Delivered now; nothing more to send for this episode.
    assert_eq!(m.evaluate(&a[2], &rec).await, AlertOutcome::Unchanged);
    assert_eq!(rec.calls(), 2);
}

#[tokio::test]
async fn retries_stop_at_max_attempts() {
    let rec = Recorder::new(usize::MAX);
    let mut m = machine(AlertPolicy {
        max_delivery_attempts: 3,
        ..AlertPolicy::default()
    });
    for a in assessments(&[0.7, 0.7, 0.7, 0.7, 0.7]) {
        m.evaluate(&a, &rec).await;
    }
    assert_eq!(rec.calls(), 3);
    let ev = m.current_event().unwrap();
    assert_eq!(ev.status, DeliveryStatus::Failed);
    assert_eq!(ev.attempts, 3);
}

#[tokio::test]
async fn hung_notifier_is_cut_by_timeout_and_state_still_advances() {
    let mut m = machine(AlertPolicy {
        notify_timeout: Duration::from_millis(50),
        ..AlertPolicy::default()
    });
    let a = assessments(&[0.9]);
    let out = tokio::time::timeout(Duration::from_secs(2), m.evaluate(&a[0], &Hung))
        .await
        .expect("evaluate must not hang");
    assert!(matches!(out, AlertOutcome::Raised(ref ev) if ev.status == DeliveryStatus::Failed));
    assert_eq!(m.state().level, AlertLevel::Alerting);
}

#[tokio::test]
async fn transition_timestamp_follows_observation() {
    let rec = Recorder::new(0);
    let mut m = machine(AlertPolicy::default());
    let a = assessments(&[0.1, 0.65]);
    m.evaluate(&a[0], &rec).await;
    m.evaluate(&a[1], &rec).await;
    assert_eq!(m.state().since, a[1].observed_at);
}
