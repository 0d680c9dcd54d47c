// src/ingest/mod.rs
pub mod providers;
pub mod types;

use crate::ingest::types::{Capability, FetchError, RawObservation, SourceAdapter};
use futures::future::join_all;
use std::collections::BTreeMap;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("poll_cycles_total", "Polling cycles started.");
        describe_counter!(
            "source_fetch_errors_total",
            "Adapter failures by source and failure kind."
        );
        describe_histogram!("source_fetch_ms", "Source fetch time in milliseconds.");
        describe_counter!(
            "fallback_observations_total",
            "Cycles where every source failed and a synthetic record was used."
        );
        describe_counter!(
            "store_write_errors_total",
            "Failed observation appends."
        );
        describe_counter!("alerts_fired_total", "Rising-edge alerts raised.");
        describe_counter!(
            "alert_delivery_failures_total",
            "Alert notifications that failed or timed out."
        );
        describe_gauge!("risk_score", "Most recent composite risk score.");
        describe_gauge!("alert_state", "1 while ALERTING, 0 while NORMAL.");
        describe_gauge!("poll_last_run_ts", "Unix ts when the last cycle finished.");
    });
}

/// Result of walking every capability chain once.
#[derive(Debug, Default)]
pub struct Acquisition {
    /// One winning observation per capability that answered, in capability order.
    pub raws: Vec<RawObservation>,
    /// Capabilities whose every source failed this cycle.
    pub missing: Vec<Capability>,
    /// Failures of sources ranked ahead of their chain's winner (or all, on
    /// a failed chain).
    pub failures: Vec<(String, FetchError)>,
}

impl Acquisition {
    /// True when no chain produced anything.
    pub fn is_empty(&self) -> bool {
        self.raws.is_empty()
    }
}

/// Fetch one adapter under its descriptor's timeout, independent of what the
/// adapter itself enforces.
pub async fn fetch_bounded(adapter: &dyn SourceAdapter) -> Result<RawObservation, FetchError> {
    let timeout = adapter.descriptor().timeout;
    match tokio::time::timeout(timeout, adapter.fetch()).await {
        Ok(res) => res,
        Err(_) => Err(FetchError::Timeout(timeout)),
    }
}

fn record_failure(name: &str, e: &FetchError) {
    tracing::warn!(target: "ingest", source = name, kind = e.kind(), error = %e, "source fetch failed");
    counter!(
        "source_fetch_errors_total",
        "source" => name.to_string(),
        "kind" => e.kind()
    )
    .increment(1);
}

type ChainOutcome = (Option<RawObservation>, Vec<(String, FetchError)>);

/// Walk one chain in order (callers pass it sorted by priority); the first
/// success wins. With `concurrent`, all fetches run at once but the winner is
/// still chosen by position, never by arrival order.
async fn walk_chain(chain: &[&dyn SourceAdapter], concurrent: bool) -> ChainOutcome {
    let mut failures = Vec::new();

    if concurrent {
        let results = join_all(chain.iter().map(|a| fetch_bounded(*a))).await;
        for (adapter, res) in chain.iter().zip(results) {
            match res {
                Ok(raw) => return (Some(raw), failures),
                Err(e) => {
                    record_failure(adapter.name(), &e);
                    failures.push((adapter.name().to_string(), e));
                }
            }
        }
    } else {
        for adapter in chain {
            match fetch_bounded(*adapter).await {
                Ok(raw) => return (Some(raw), failures),
                Err(e) => {
                    record_failure(adapter.name(), &e);
                    failures.push((adapter.name().to_string(), e));
                }
            }
        }
    }

    (None, failures)
}

/// Group adapters by capability and run one priority chain per group.
/// Groups are independent and are walked concurrently; each fetch stays
/// bounded by its own timeout.
pub async fn acquire(adapters: &[Box<dyn SourceAdapter>], concurrent: bool) -> Acquisition {
    let mut chains: BTreeMap<Capability, Vec<&dyn SourceAdapter>> = BTreeMap::new();
    for a in adapters {
        chains
            .entry(a.descriptor().kind.capability())
            .or_default()
            .push(a.as_ref());
    }

    let outcomes = join_all(chains.iter().map(|(cap, chain)| async move {
        (*cap, walk_chain(chain, concurrent).await)
    }))
    .await;

    let mut acq = Acquisition::default();
    for (cap, (raw, failures)) in outcomes {
        acq.failures.extend(failures);
        match raw {
            Some(raw) => acq.raws.push(raw),
            None => acq.missing.push(cap),
        }
    }
    acq
}

/// Per-source health as reported by `probe_sources`.
#[derive(Debug)]
pub struct SourceHealth {
    pub name: String,
    pub priority: u32,
    pub outcome: Result<(), FetchError>,
}

/// Fetch every source once, concurrently, and report which ones answer.
pub async fn probe_sources(adapters: &[Box<dyn SourceAdapter>]) -> Vec<SourceHealth> {
    let results = join_all(adapters.iter().map(|a| fetch_bounded(a.as_ref()))).await;
    adapters
        .iter()
        .zip(results)
        .map(|(a, res)| SourceHealth {
            name: a.name().to_string(),
            priority: a.descriptor().priority,
            outcome: res.map(|_| ()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{RawPayload, SourceDescriptor, SourceKind};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;

    struct Stub {
        desc: SourceDescriptor,
        delay: Duration,
        ok: bool,
    }

    fn stub(name: &str, priority: u32, delay_ms: u64, ok: bool) -> Box<dyn SourceAdapter> {
        stub_of(SourceKind::KpIndex, name, priority, delay_ms, ok)
    }

    fn stub_of(
        kind: SourceKind,
        name: &str,
        priority: u32,
        delay_ms: u64,
        ok: bool,
    ) -> Box<dyn SourceAdapter> {
        Box::new(Stub {
            desc: SourceDescriptor {
                name: name.into(),
                kind,
                url_template: "http://stub".into(),
                priority,
                timeout: Duration::from_millis(200),
            },
            delay: Duration::from_millis(delay_ms),
            ok,
        })
    }

    #[async_trait]
    impl SourceAdapter for Stub {
        async fn fetch(&self) -> Result<RawObservation, FetchError> {
            tokio::time::sleep(self.delay).await;
            if self.ok {
                Ok(RawObservation {
                    source: self.desc.name.clone(),
                    fetched_at: Utc::now(),
                    payload: match self.desc.kind {
                        SourceKind::KpIndex => RawPayload::Geomagnetic { kp: Some(3.0) },
                        SourceKind::SolarWind => RawPayload::SolarWind {
                            speed: Some(420.0),
                            density: None,
                        },
                        _ => RawPayload::Geomagnetic { kp: Some(3.0) },
                    },
                })
            } else {
                Err(FetchError::Unreachable("stub down".into()))
            }
        }

        fn descriptor(&self) -> &SourceDescriptor {
            &self.desc
        }
    }

    #[tokio::test]
    async fn sequential_takes_first_success() {
        let adapters = vec![stub("a", 0, 0, false), stub("b", 1, 0, true), stub("c", 2, 0, true)];
        let acq = acquire(&adapters, false).await;
        assert_eq!(acq.raws[0].source, "b");
        assert_eq!(acq.failures.len(), 1);
        assert_eq!(acq.failures[0].0, "a");
    }

    #[tokio::test]
    async fn concurrent_winner_is_by_priority_not_arrival() {
        // "slow" answers last but outranks "fast".
        let adapters = vec![stub("slow", 0, 80, true), stub("fast", 1, 0, true)];
        let acq = acquire(&adapters, true).await;
        assert_eq!(acq.raws[0].source, "slow");
        assert!(acq.failures.is_empty());
    }

    #[tokio::test]
    async fn hung_source_is_cut_at_timeout() {
        let adapters = vec![stub("hung", 0, 5_000, true), stub("ok", 1, 0, true)];
        let t0 = std::time::Instant::now();
        let acq = acquire(&adapters, false).await;
        assert!(t0.elapsed() < Duration::from_secs(2));
        assert_eq!(acq.raws[0].source, "ok");
        assert!(matches!(acq.failures[0].1, FetchError::Timeout(_)));
    }

    #[tokio::test]
    async fn all_failed_yields_none() {
        let adapters = vec![stub("a", 0, 0, false), stub("b", 1, 0, false)];
        let acq = acquire(&adapters, true).await;
        assert!(acq.is_empty());
        assert_eq!(acq.missing, vec![Capability::Geomagnetic]);
        assert_eq!(acq.failures.len(), 2);
    }

    #[tokio::test]
    async fn each_capability_runs_its_own_chain() {
        // The kp feed outranks the wind feed globally, yet both must answer.
        let adapters = vec![
            stub_of(SourceKind::KpIndex, "kp-down", 0, 0, false),
            stub_of(SourceKind::KpIndex, "kp-backup", 1, 0, true),
            stub_of(SourceKind::SolarWind, "wind", 2, 0, true),
            stub_of(SourceKind::ProtonFlux, "protons-down", 3, 0, false),
        ];
        let acq = acquire(&adapters, false).await;

        let winners: Vec<&str> = acq.raws.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(winners, vec!["kp-backup", "wind"]);
        assert_eq!(acq.missing, vec![Capability::ProtonFlux]);
        assert_eq!(acq.failures.len(), 2);
    }

    #[tokio::test]
    async fn probe_reports_every_source() {
        let adapters = vec![stub("up", 0, 0, true), stub("down", 1, 0, false)];
        let report = probe_sources(&adapters).await;
        assert_eq!(report.len(), 2);
        assert!(report[0].outcome.is_ok());
        assert_eq!(report[1].name, "down");
        assert!(matches!(report[1].outcome, Err(FetchError::Unreachable(_))));
    }
}
