//! # Scheduler
//! Fixed-interval polling loop: acquire → merge (or fallback) → score →
//! append → alert. One cycle at a time; ticks missed while a cycle runs are
//! skipped. A failing or panicking cycle is logged and the loop goes on.

use chrono::Utc;
use futures::FutureExt;
use metrics::{counter, gauge};
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::alert::{AlertMachine, AlertOutcome, AlertPolicy, AlertState};
use crate::config::MonitorConfig;
use crate::ingest::{acquire, ensure_metrics_described, types::SourceAdapter};
use crate::normalize::{merge, synthetic_fallback};
use crate::notify::Notifier;
use crate::observation::{AlertEvent, Provenance};
use crate::risk::RiskModel;
use crate::store::{ObservationStore, StoreError};

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub interval: Duration,
    pub concurrent_fetch: bool,
    pub shutdown_grace: Duration,
    pub startup_notice: bool,
}

impl SchedulerCfg {
    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self {
            interval: cfg.interval(),
            concurrent_fetch: cfg.poll.concurrent_fetch,
            shutdown_grace: cfg.shutdown_grace(),
            startup_notice: cfg.notify.on_startup,
        }
    }
}

/// What a single cycle produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Row id of the appended record; `None` when the append failed.
    pub record_id: Option<i64>,
    pub provenance: Provenance,
    pub score: f64,
    pub source_failures: usize,
    /// `None` when alert evaluation was skipped (store failure).
    pub alert: Option<AlertOutcome>,
}

pub struct Scheduler {
    cfg: SchedulerCfg,
    adapters: Vec<Box<dyn SourceAdapter>>,
    model: RiskModel,
    store: Arc<dyn ObservationStore>,
    notifier: Arc<dyn Notifier>,
    alerts: AlertMachine,
}

/// Run a store call on the blocking pool.
async fn blocking<T, F>(store: &Arc<dyn ObservationStore>, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn ObservationStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

impl Scheduler {
    /// `adapters` are re-sorted by ascending priority.
    pub fn new(
        cfg: SchedulerCfg,
        mut adapters: Vec<Box<dyn SourceAdapter>>,
        model: RiskModel,
        policy: AlertPolicy,
        store: Arc<dyn ObservationStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        ensure_metrics_described();
        adapters.sort_by_key(|a| a.descriptor().priority);
        Self {
            cfg,
            adapters,
            model,
            store,
            notifier,
            alerts: AlertMachine::new(policy, Utc::now()),
        }
    }

    pub fn alert_state(&self) -> &AlertState {
        self.alerts.state()
    }

    pub fn adapter_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    /// One full pass through the pipeline.
    pub async fn run_cycle(&mut self) -> CycleReport {
        counter!("poll_cycles_total").increment(1);

        let acq = acquire(&self.adapters, self.cfg.concurrent_fetch).await;
        let source_failures = acq.failures.len();
        if !acq.is_empty() && !acq.missing.is_empty() {
            let missing: Vec<&str> = acq.missing.iter().map(|c| c.as_str()).collect();
            tracing::warn!(
                target: "scheduler",
                missing = ?missing,
                "no source answered for some capabilities, defaults used"
            );
        }
        let obs = match merge(acq.raws) {
            Some(obs) => obs,
            None => {
                tracing::warn!(
                    target: "scheduler",
                    failed = source_failures,
                    "all sources failed, using synthetic fallback"
                );
                counter!("fallback_observations_total").increment(1);
                synthetic_fallback(Utc::now())
            }
        };

        let assessment = self.model.score(&obs);
        gauge!("risk_score").set(assessment.score);

        let append = {
            let (o, a) = (obs.clone(), assessment.clone());
            blocking(&self.store, move |s| s.append(&o, &a)).await
        };
        let record_id = match append {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(target: "store", error = %e, "append failed, skipping alert evaluation");
                counter!("store_write_errors_total").increment(1);
                return CycleReport {
                    record_id: None,
                    provenance: obs.provenance,
                    score: assessment.score,
                    source_failures,
                    alert: None,
                };
            }
        };

        let outcome = self
            .alerts
            .evaluate(&assessment, self.notifier.as_ref())
            .await;
        self.persist_alert(&outcome).await;

        gauge!("poll_last_run_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(
            target: "scheduler",
            id = record_id,
            provenance = %obs.provenance,
            score = assessment.score,
            kp = obs.kp,
            wind = obs.wind_speed,
            "cycle complete"
        );

        CycleReport {
            record_id: Some(record_id),
            provenance: obs.provenance,
            score: assessment.score,
            source_failures,
            alert: Some(outcome),
        }
    }

    /// Alert-log writes are best effort; the logical state is already settled.
    async fn persist_alert(&mut self, outcome: &AlertOutcome) {
        match outcome {
            AlertOutcome::Raised(ev) => {
                let ev: AlertEvent = ev.clone();
                match blocking(&self.store, move |s| s.record_alert(&ev)).await {
                    Ok(id) => self.alerts.attach_event_id(id),
                    Err(e) => {
                        tracing::error!(target: "store", error = %e, "failed to record alert event")
                    }
                }
            }
            AlertOutcome::Retried(ev) => {
                let Some(id) = ev.id else { return };
                let (status, attempts) = (ev.status, ev.attempts);
                if let Err(e) = blocking(&self.store, move |s| {
                    s.update_alert_delivery(id, status, attempts)
                })
                .await
                {
                    tracing::error!(target: "store", id, error = %e, "failed to update alert delivery");
                }
            }
            AlertOutcome::Unchanged | AlertOutcome::Cleared { .. } => {}
        }
    }

    async fn send_startup_notice(&self) {
        let text = format!(
            "🛰️ Solar risk monitor started\nSources: {}\nInterval: {}s\nThreshold: {:.2}",
            self.adapter_names().join(", "),
            self.cfg.interval.as_secs(),
            self.alerts.policy().threshold
        );
        let timeout = self.alerts.policy().notify_timeout;
        match tokio::time::timeout(timeout, self.notifier.send(&text)).await {
            Ok(Ok(())) => tracing::info!(target: "notify", "startup notice sent"),
            Ok(Err(e)) => {
                tracing::warn!(target: "notify", error = %format!("{e:#}"), "startup notice failed")
            }
            Err(_) => tracing::warn!(target: "notify", "startup notice timed out"),
        }
    }

    /// Poll until `shutdown` fires. An in-flight cycle gets `shutdown_grace`
    /// to finish, then it is dropped at its next await point.
    pub async fn run(mut self, shutdown: CancellationToken) {
        if self.cfg.startup_notice {
            self.send_startup_notice().await;
        }

        let grace = self.cfg.shutdown_grace;
        let mut ticker = tokio::time::interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            target: "scheduler",
            interval_secs = self.cfg.interval.as_secs(),
            sources = self.adapters.len(),
            concurrent = self.cfg.concurrent_fetch,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let cycle = AssertUnwindSafe(self.run_cycle()).catch_unwind();
            tokio::pin!(cycle);

            tokio::select! {
                res = &mut cycle => {
                    if res.is_err() {
                        tracing::error!(target: "scheduler", "cycle panicked, continuing at next tick");
                    }
                }
                _ = shutdown.cancelled() => {
                    match tokio::time::timeout(grace, &mut cycle).await {
                        Ok(Ok(_)) => tracing::info!(target: "scheduler", "in-flight cycle finished during shutdown"),
                        Ok(Err(_)) => tracing::error!(target: "scheduler", "cycle panicked during shutdown"),
                        Err(_) => tracing::warn!(
                            target: "scheduler",
                            grace_secs = grace.as_secs(),
                            "in-flight cycle aborted after grace period"
                        ),
                    }
                    break;
                }
            }
        }

        tracing::info!(target: "scheduler", "scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{
        FetchError, RawObservation, RawPayload, SourceDescriptor, SourceKind,
    };
    use crate::notify::LogNotifier;
    use crate::store::SqliteStore;
    use async_trait::async_trait;

    struct Panicky(SourceDescriptor);

    #[async_trait]
    impl SourceAdapter for Panicky {
        async fn fetch(&self) -> Result<RawObservation, FetchError> {
            panic!("decoder bug");
        }
        fn descriptor(&self) -> &SourceDescriptor {
            &self.0
        }
    }

    struct Quiet(SourceDescriptor);

    #[async_trait]
    impl SourceAdapter for Quiet {
        async fn fetch(&self) -> Result<RawObservation, FetchError> {
            Ok(RawObservation {
                source: self.0.name.clone(),
                fetched_at: Utc::now(),
                payload: RawPayload::Geomagnetic { kp: Some(1.0) },
            })
        }
        fn descriptor(&self) -> &SourceDescriptor {
            &self.0
        }
    }

    fn desc(name: &str, priority: u32) -> SourceDescriptor {
        SourceDescriptor {
            name: name.into(),
            kind: SourceKind::KpIndex,
            url_template: "http://127.0.0.1/".into(),
            priority,
            timeout: Duration::from_millis(200),
        }
    }

    fn cfg() -> SchedulerCfg {
        SchedulerCfg {
            interval: Duration::from_millis(20),
            concurrent_fetch: false,
            shutdown_grace: Duration::from_millis(50),
            startup_notice: false,
        }
    }

    #[tokio::test]
    async fn adapters_are_ordered_by_priority() {
        let store: Arc<dyn ObservationStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let s = Scheduler::new(
            cfg(),
            vec![Box::new(Quiet(desc("b", 2))), Box::new(Quiet(desc("a", 1)))],
            RiskModel::default(),
            AlertPolicy::default(),
            store,
            Arc::new(LogNotifier),
        );
        assert_eq!(s.adapter_names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn panicking_cycle_does_not_stop_the_loop() {
        let store: Arc<dyn ObservationStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let s = Scheduler::new(
            cfg(),
            vec![Box::new(Panicky(desc("boom", 1)))],
            RiskModel::default(),
            AlertPolicy::default(),
            Arc::clone(&store),
            Arc::new(LogNotifier),
        );
        let token = CancellationToken::new();
        let handle = tokio::spawn(s.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(120)).await;
        token.cancel();
        handle.await.unwrap();
        // Panicking cycles never reach the store.
        assert!(store.latest().unwrap().is_none());
    }
}
