// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Closed set of upstream feed kinds. Each kind has its own decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    KpIndex,
    SolarWind,
    ProtonFlux,
    XrayFlares,
    DonkiFlares,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::KpIndex => "kp-index",
            SourceKind::SolarWind => "solar-wind",
            SourceKind::ProtonFlux => "proton-flux",
            SourceKind::XrayFlares => "xray-flares",
            SourceKind::DonkiFlares => "donki-flares",
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            SourceKind::KpIndex => Capability::Geomagnetic,
            SourceKind::SolarWind => Capability::SolarWind,
            SourceKind::ProtonFlux => Capability::ProtonFlux,
            SourceKind::XrayFlares | SourceKind::DonkiFlares => Capability::Flares,
        }
    }

    /// Only the flare adapters substitute `{api_key}`.
    pub fn takes_api_key(&self) -> bool {
        matches!(self, SourceKind::XrayFlares | SourceKind::DonkiFlares)
    }
}

/// Which part of an observation a feed supplies. Feeds of the same
/// capability are interchangeable and form one priority chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Geomagnetic,
    SolarWind,
    ProtonFlux,
    Flares,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Geomagnetic => "geomagnetic",
            Capability::SolarWind => "solar_wind",
            Capability::ProtonFlux => "proton_flux",
            Capability::Flares => "flares",
        }
    }
}

/// Identity of one upstream feed. Built once at startup from config.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    pub name: String,
    pub kind: SourceKind,
    /// May contain `{start_date}`, `{end_date}`, `{api_key}`.
    pub url_template: String,
    /// Lower is polled first.
    pub priority: u32,
    pub timeout: Duration,
}

/// Decoded payload of one feed. Numeric fields are `None` when the feed
/// omitted them; the normalizer fills defaults.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Geomagnetic {
        kp: Option<f64>,
    },
    SolarWind {
        speed: Option<f64>,
        density: Option<f64>,
    },
    ProtonFlux {
        p10: Option<f64>,
        p100: Option<f64>,
    },
    Flares {
        m: Option<u32>,
        x: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub payload: RawPayload,
}

/// Uniform failure contract for every adapter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl FetchError {
    /// Short label used for metrics and probe output.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            FetchError::Unreachable(_) => "unreachable",
            FetchError::MalformedResponse(_) => "malformed",
        }
    }

    /// Map a transport error, reporting `timeout` as the bound that elapsed.
    pub fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(timeout)
        } else if e.is_decode() || e.is_body() {
            FetchError::MalformedResponse(e.to_string())
        } else {
            FetchError::Unreachable(e.to_string())
        }
    }
}

#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self) -> Result<RawObservation, FetchError>;
    fn descriptor(&self) -> &SourceDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }
}
