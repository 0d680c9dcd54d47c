//! # Observation Store
//! Append-only SQLite time series of observations + assessments, plus the
//! alert-event log. A single connection behind a mutex gives single-writer
//! discipline; readers wait for an in-flight append instead of seeing half of it.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use std::{path::Path, sync::Mutex, time::Duration};
use thiserror::Error;

use crate::observation::{
    AlertEvent, DeliveryStatus, Provenance, RiskAssessment, SolarObservation, StoredRecord,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("encoding factors: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store mutex poisoned")]
    Poisoned,
    #[error("store task failed: {0}")]
    Task(String),
}

/// Aggregate over a window of records (daily report).
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSummary {
    pub records: u64,
    pub avg_flares_m: f64,
    pub avg_flares_x: f64,
    pub max_risk: f64,
    pub above_threshold: u64,
    pub fallback_records: u64,
    pub last_alert: Option<AlertEvent>,
}

/// Storage contract. Observation rows are never updated or deleted.
pub trait ObservationStore: Send + Sync {
    /// Persist one observation+assessment pair atomically; returns the row id.
    fn append(&self, obs: &SolarObservation, assessment: &RiskAssessment)
        -> Result<i64, StoreError>;
    fn latest(&self) -> Result<Option<StoredRecord>, StoreError>;
    /// Records with `from <= observed_at < to`, ascending. A fresh query each call.
    fn range(&self, from: DateTime<Utc>, to: DateTime<Utc>)
        -> Result<Vec<StoredRecord>, StoreError>;

    fn record_alert(&self, ev: &AlertEvent) -> Result<i64, StoreError>;
    fn update_alert_delivery(
        &self,
        id: i64,
        status: DeliveryStatus,
        attempts: u32,
    ) -> Result<(), StoreError>;
    fn latest_alert(&self) -> Result<Option<AlertEvent>, StoreError>;

    fn summary(&self, since: DateTime<Utc>, threshold: f64) -> Result<WindowSummary, StoreError>;
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(dir) = path.as_ref().parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }
}

fn ts_from_ms(ix: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            ix,
            Type::Integer,
            format!("timestamp {ms} out of range").into(),
        )
    })
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

const RECORD_COLUMNS: &str = "id, observed_at_ms, kp, flares_m, flares_x, wind_speed, \
     wind_density, proton_10mev, proton_100mev, risk_score, factors_json, provenance";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let observed_at = ts_from_ms(1, row.get(1)?)?;
    let factors: String = row.get(10)?;
    let contributions = serde_json::from_str(&factors)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;
    let provenance: String = row.get(11)?;

    Ok(StoredRecord {
        id: row.get(0)?,
        observation: SolarObservation {
            observed_at,
            kp: row.get(2)?,
            flares_m: row.get(3)?,
            flares_x: row.get(4)?,
            wind_speed: row.get(5)?,
            wind_density: row.get(6)?,
            proton_10mev: row.get(7)?,
            proton_100mev: row.get(8)?,
            provenance: Provenance::from(provenance),
        },
        assessment: RiskAssessment {
            score: row.get(9)?,
            contributions,
            observed_at,
        },
    })
}

const ALERT_COLUMNS: &str = "id, triggered_at_ms, risk, message, status, attempts";

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<AlertEvent> {
    let status: String = row.get(4)?;
    Ok(AlertEvent {
        id: Some(row.get(0)?),
        triggered_at: ts_from_ms(1, row.get(1)?)?,
        risk: row.get(2)?,
        message: row.get(3)?,
        status: DeliveryStatus::parse(&status),
        attempts: row.get(5)?,
    })
}

impl ObservationStore for SqliteStore {
    fn append(
        &self,
        obs: &SolarObservation,
        assessment: &RiskAssessment,
    ) -> Result<i64, StoreError> {
        let factors = serde_json::to_string(&assessment.contributions)?;
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO observations (observed_at_ms, observed_at, kp, flares_m, flares_x, \
                 wind_speed, wind_density, proton_10mev, proton_100mev, risk_score, factors_json, \
                 provenance) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    obs.observed_at.timestamp_millis(),
                    iso(obs.observed_at),
                    obs.kp,
                    obs.flares_m,
                    obs.flares_x,
                    obs.wind_speed,
                    obs.wind_density,
                    obs.proton_10mev,
                    obs.proton_100mev,
                    assessment.score,
                    factors,
                    obs.provenance.to_string(),
                ],
            )?;
            Ok(c.last_insert_rowid())
        })
    }

    fn latest(&self) -> Result<Option<StoredRecord>, StoreError> {
        self.with_conn(|c| {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM observations \
                 ORDER BY observed_at_ms DESC, id DESC LIMIT 1"
            );
            Ok(c.query_row(&sql, [], record_from_row).optional()?)
        })
    }

    fn range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        self.with_conn(|c| {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM observations \
                 WHERE observed_at_ms >= ?1 AND observed_at_ms < ?2 \
                 ORDER BY observed_at_ms ASC, id ASC"
            );
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map(
                params![from.timestamp_millis(), to.timestamp_millis()],
                record_from_row,
            )?;
            let rows: rusqlite::Result<Vec<StoredRecord>> = rows.collect();
            Ok(rows?)
        })
    }

    fn record_alert(&self, ev: &AlertEvent) -> Result<i64, StoreError> {
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO alert_events (triggered_at_ms, triggered_at, risk, message, status, \
                 attempts) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    ev.triggered_at.timestamp_millis(),
                    iso(ev.triggered_at),
                    ev.risk,
                    ev.message,
                    ev.status.as_str(),
                    ev.attempts,
                ],
            )?;
            Ok(c.last_insert_rowid())
        })
    }

    fn update_alert_delivery(
        &self,
        id: i64,
        status: DeliveryStatus,
        attempts: u32,
    ) -> Result<(), StoreError> {
        self.with_conn(|c| {
            c.execute(
                "UPDATE alert_events SET status = ?1, attempts = ?2, \
                 updated_at = CURRENT_TIMESTAMP WHERE id = ?3",
                params![status.as_str(), attempts, id],
            )?;
            Ok(())
        })
    }

    fn latest_alert(&self) -> Result<Option<AlertEvent>, StoreError> {
        self.with_conn(|c| {
            let sql = format!(
                "SELECT {ALERT_COLUMNS} FROM alert_events \
                 ORDER BY triggered_at_ms DESC, id DESC LIMIT 1"
            );
            Ok(c.query_row(&sql, [], alert_from_row).optional()?)
        })
    }

    fn summary(&self, since: DateTime<Utc>, threshold: f64) -> Result<WindowSummary, StoreError> {
        let since_ms = since.timestamp_millis();
        let (records, avg_m, avg_x, max_risk, above, fallback) = self.with_conn(|c| {
            Ok(c.query_row(
                "SELECT COUNT(*), AVG(flares_m), AVG(flares_x), MAX(risk_score), \
                 COUNT(CASE WHEN risk_score >= ?2 THEN 1 END), \
                 COUNT(CASE WHEN provenance = 'fallback' THEN 1 END) \
                 FROM observations WHERE observed_at_ms >= ?1",
                params![since_ms, threshold],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )?)
        })?;
        let last_alert = self
            .latest_alert()?
            .filter(|a| a.triggered_at.timestamp_millis() >= since_ms);

        Ok(WindowSummary {
            records: records.max(0) as u64,
            avg_flares_m: avg_m.unwrap_or(0.0),
            avg_flares_x: avg_x.unwrap_or(0.0),
            max_risk: max_risk.unwrap_or(0.0),
            above_threshold: above.max(0) as u64,
            fallback_records: fallback.max(0) as u64,
            last_alert,
        })
    }
}
