//! # Observation model
//! Canonical records that flow through the pipeline: the normalized
//! `SolarObservation`, its derived `RiskAssessment`, and the `AlertEvent`
//! produced on a rising edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Literal provenance tag written for synthetic records.
pub const FALLBACK_TAG: &str = "fallback";

/// Separator between source names in the stored provenance tag.
pub const SOURCE_SEPARATOR: char = ',';

/// Which upstream sources (or the synthetic fallback) produced an observation.
/// A merged record names one winning source per capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Provenance {
    Sources(Vec<String>),
    Fallback,
}

impl Provenance {
    /// Single-source provenance.
    pub fn source(name: impl Into<String>) -> Self {
        Provenance::Sources(vec![name.into()])
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Provenance::Fallback)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Fallback => f.write_str(FALLBACK_TAG),
            Provenance::Sources(names) => {
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{SOURCE_SEPARATOR}")?;
                    }
                    f.write_str(name)?;
                }
                Ok(())
            }
        }
    }
}

impl From<Provenance> for String {
    fn from(p: Provenance) -> Self {
        p.to_string()
    }
}

impl From<String> for Provenance {
    fn from(s: String) -> Self {
        if s == FALLBACK_TAG {
            Provenance::Fallback
        } else {
            Provenance::Sources(s.split(SOURCE_SEPARATOR).map(str::to_string).collect())
        }
    }
}

/// One normalized telemetry snapshot. Every field is always populated;
/// the normalizer substitutes documented defaults for anything a feed omits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarObservation {
    pub observed_at: DateTime<Utc>,
    /// Planetary K index, 0..=9.
    pub kp: f64,
    pub flares_m: u32,
    pub flares_x: u32,
    /// km/s
    pub wind_speed: f64,
    /// particles/cm³
    pub wind_density: f64,
    /// pfu at >=10 MeV
    pub proton_10mev: f64,
    /// pfu at >=100 MeV
    pub proton_100mev: f64,
    pub provenance: Provenance,
}

/// Which factor of the composite model a contribution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    Flares,
    Geomagnetic,
    SolarWind,
    ProtonFlux,
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskFactor::Flares => "flares",
            RiskFactor::Geomagnetic => "geomagnetic",
            RiskFactor::SolarWind => "solar_wind",
            RiskFactor::ProtonFlux => "proton_flux",
        };
        f.write_str(s)
    }
}

/// A single non-zero contribution to the composite score (explainability).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub factor: RiskFactor,
    /// Human-readable tier, e.g. "strong (kp>=7)".
    pub tier: String,
    pub increment: f64,
}

/// Risk derived from exactly one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Clamped to [0,1].
    pub score: f64,
    pub contributions: Vec<Contribution>,
    pub observed_at: DateTime<Utc>,
}

impl RiskAssessment {
    /// Contribution of a single factor, 0.0 when that factor did not fire.
    pub fn contribution_of(&self, factor: RiskFactor) -> f64 {
        self.contributions
            .iter()
            .filter(|c| c.factor == factor)
            .map(|c| c.increment)
            .sum()
    }
}

/// Delivery status of an alert notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => DeliveryStatus::Sent,
            "failed" => DeliveryStatus::Failed,
            _ => DeliveryStatus::Pending,
        }
    }
}

/// Raised once per alert episode (rising edge).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Row id once persisted.
    pub id: Option<i64>,
    pub triggered_at: DateTime<Utc>,
    pub risk: f64,
    pub message: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
}

/// One persisted row: the observation plus its assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub observation: SolarObservation,
    pub assessment: RiskAssessment,
}
