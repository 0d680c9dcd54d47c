// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod config;
pub mod ingest;
pub mod normalize;
pub mod observation;
pub mod risk;
pub mod store;

pub mod alert;
pub mod scheduler;

// Notifications & background jobs
pub mod notify;
pub mod report;

pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::config::{ConfigError, MonitorConfig};
pub use crate::notify::{Notifier, NotifierMux};
pub use crate::observation::{Provenance, RiskAssessment, SolarObservation};
pub use crate::scheduler::Scheduler;
pub use crate::store::{ObservationStore, SqliteStore};
