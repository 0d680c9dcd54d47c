//! # Alert State Machine
//! NORMAL ⇄ ALERTING driven by successive risk assessments.
//!
//! - NORMAL → ALERTING (score >= threshold): raise one `AlertEvent` and send it.
//! - ALERTING → ALERTING: silent; a failed delivery is retried once per
//!   evaluation until `max_delivery_attempts` is reached.
//! - ALERTING → NORMAL: silent unless `notify_on_recovery`.
//!
//! Delivery outcome never feeds back into the logical state.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use std::time::Duration;

use crate::notify::Notifier;
use crate::observation::{AlertEvent, DeliveryStatus, RiskAssessment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Normal,
    Alerting,
}

/// The one process-wide alert state, owned by `AlertMachine`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertState {
    pub level: AlertLevel,
    /// Time of the last transition (startup time while never transitioned).
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AlertPolicy {
    pub threshold: f64,
    pub notify_on_recovery: bool,
    pub max_delivery_attempts: u32,
    pub notify_timeout: Duration,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            notify_on_recovery: false,
            max_delivery_attempts: 3,
            notify_timeout: Duration::from_secs(10),
        }
    }
}

/// What one evaluation did.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    /// No transition and nothing sent.
    Unchanged,
    /// Rising edge; the event carries its delivery status.
    Raised(AlertEvent),
    /// Still above threshold and the episode's event was re-sent.
    Retried(AlertEvent),
    /// Falling edge. `recovery_sent` is `None` when recovery messages are off.
    Cleared { recovery_sent: Option<bool> },
}

pub struct AlertMachine {
    policy: AlertPolicy,
    state: AlertState,
    /// Event of the current episode while ALERTING.
    current: Option<AlertEvent>,
}

pub fn format_alert_message(a: &RiskAssessment) -> String {
    let mut msg = format!(
        "⚠️ SOLAR ALERT\nRisk: {:.0}%\nObserved: {}",
        a.score * 100.0,
        a.observed_at.format("%Y-%m-%d %H:%M UTC")
    );
    if !a.contributions.is_empty() {
        let factors: Vec<String> = a
            .contributions
            .iter()
            .map(|c| format!("{} {} (+{:.2})", c.factor, c.tier, c.increment))
            .collect();
        msg.push_str("\nFactors: ");
        msg.push_str(&factors.join(", "));
    }
    msg
}

fn format_recovery_message(a: &RiskAssessment) -> String {
    format!(
        "✅ Solar risk back to normal\nRisk: {:.0}%\nObserved: {}",
        a.score * 100.0,
        a.observed_at.format("%Y-%m-%d %H:%M UTC")
    )
}

/// Send with the notifier's own deadline; any failure becomes `Failed`.
async fn deliver(notifier: &dyn Notifier, text: &str, timeout: Duration) -> DeliveryStatus {
    match tokio::time::timeout(timeout, notifier.send(text)).await {
        Ok(Ok(())) => DeliveryStatus::Sent,
        Ok(Err(e)) => {
            tracing::warn!(target: "alert", channel = notifier.name(), error = %format!("{e:#}"), "alert delivery failed");
            counter!("alert_delivery_failures_total").increment(1);
            DeliveryStatus::Failed
        }
        Err(_) => {
            tracing::warn!(target: "alert", channel = notifier.name(), timeout_ms = timeout.as_millis() as u64, "alert delivery timed out");
            counter!("alert_delivery_failures_total").increment(1);
            DeliveryStatus::Failed
        }
    }
}

impl AlertMachine {
    pub fn new(policy: AlertPolicy, now: DateTime<Utc>) -> Self {
        gauge!("alert_state").set(0.0);
        Self {
            policy,
            state: AlertState {
                level: AlertLevel::Normal,
                since: now,
            },
            current: None,
        }
    }

    pub fn state(&self) -> &AlertState {
        &self.state
    }

    pub fn current_event(&self) -> Option<&AlertEvent> {
        self.current.as_ref()
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Remember the row id the store assigned to the current episode's event.
    pub fn attach_event_id(&mut self, id: i64) {
        if let Some(ev) = self.current.as_mut() {
            ev.id = Some(id);
        }
    }

    pub async fn evaluate(
        &mut self,
        assessment: &RiskAssessment,
        notifier: &dyn Notifier,
    ) -> AlertOutcome {
        let above = assessment.score >= self.policy.threshold;

        match (self.state.level, above) {
            (AlertLevel::Normal, false) => AlertOutcome::Unchanged,

            (AlertLevel::Normal, true) => {
                self.transition(AlertLevel::Alerting, assessment.observed_at);
                let mut ev = AlertEvent {
                    id: None,
                    triggered_at: assessment.observed_at,
                    risk: assessment.score,
                    message: format_alert_message(assessment),
                    status: DeliveryStatus::Pending,
                    attempts: 0,
                };
                ev.status = deliver(notifier, &ev.message, self.policy.notify_timeout).await;
                ev.attempts = 1;
                counter!("alerts_fired_total").increment(1);
                tracing::info!(
                    target: "alert",
                    risk = assessment.score,
                    status = ev.status.as_str(),
                    "alert raised"
                );
                self.current = Some(ev.clone());
                AlertOutcome::Raised(ev)
            }

            (AlertLevel::Alerting, true) => {
                let max = self.policy.max_delivery_attempts;
                let timeout = self.policy.notify_timeout;
                let Some(ev) = self.current.as_mut() else {
                    return AlertOutcome::Unchanged;
                };
                if ev.status != DeliveryStatus::Failed || ev.attempts >= max {
                    return AlertOutcome::Unchanged;
                }
                ev.status = deliver(notifier, &ev.message, timeout).await;
                ev.attempts += 1;
                tracing::info!(
                    target: "alert",
                    attempt = ev.attempts,
                    status = ev.status.as_str(),
                    "alert delivery retried"
                );
                AlertOutcome::Retried(ev.clone())
            }

            (AlertLevel::Alerting, false) => {
                self.transition(AlertLevel::Normal, assessment.observed_at);
                self.current = None;
                let recovery_sent = if self.policy.notify_on_recovery {
                    let status = deliver(
                        notifier,
                        &format_recovery_message(assessment),
                        self.policy.notify_timeout,
                    )
                    .await;
                    Some(status == DeliveryStatus::Sent)
                } else {
                    None
                };
                tracing::info!(target: "alert", risk = assessment.score, "alert cleared");
                AlertOutcome::Cleared { recovery_sent }
            }
        }
    }

    fn transition(&mut self, level: AlertLevel, at: DateTime<Utc>) {
        self.state = AlertState { level, since: at };
        gauge!("alert_state").set(if level == AlertLevel::Alerting { 1.0 } else { 0.0 });
    }
}
