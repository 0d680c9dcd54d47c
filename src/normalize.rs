//! # Normalizer
//! Maps a source-specific `RawObservation` onto the canonical
//! `SolarObservation`. Never fails: anything missing or out of range resolves
//! to the quiet-sun defaults below.

use chrono::{DateTime, Utc};

use crate::ingest::types::{RawObservation, RawPayload};
use crate::observation::{Provenance, SolarObservation};

pub const DEFAULT_KP: f64 = 2.0;
pub const DEFAULT_WIND_SPEED: f64 = 400.0;
pub const DEFAULT_WIND_DENSITY: f64 = 5.0;
pub const DEFAULT_PROTON_10MEV: f64 = 0.5;
pub const DEFAULT_PROTON_100MEV: f64 = 0.05;

/// Accept finite, non-negative values only.
fn sane(v: Option<f64>, default: f64) -> f64 {
    match v {
        Some(x) if x.is_finite() && x >= 0.0 => x,
        _ => default,
    }
}

fn baseline(observed_at: DateTime<Utc>, provenance: Provenance) -> SolarObservation {
    SolarObservation {
        observed_at,
        kp: DEFAULT_KP,
        flares_m: 0,
        flares_x: 0,
        wind_speed: DEFAULT_WIND_SPEED,
        wind_density: DEFAULT_WIND_DENSITY,
        proton_10mev: DEFAULT_PROTON_10MEV,
        proton_100mev: DEFAULT_PROTON_100MEV,
        provenance,
    }
}

fn apply(obs: &mut SolarObservation, payload: RawPayload) {
    match payload {
        RawPayload::Geomagnetic { kp } => {
            obs.kp = sane(kp, DEFAULT_KP).min(9.0);
        }
        RawPayload::SolarWind { speed, density } => {
            obs.wind_speed = sane(speed, DEFAULT_WIND_SPEED);
            obs.wind_density = sane(density, DEFAULT_WIND_DENSITY);
        }
        RawPayload::ProtonFlux { p10, p100 } => {
            obs.proton_10mev = sane(p10, DEFAULT_PROTON_10MEV);
            obs.proton_100mev = sane(p100, DEFAULT_PROTON_100MEV);
        }
        RawPayload::Flares { m, x } => {
            obs.flares_m = m.unwrap_or(0);
            obs.flares_x = x.unwrap_or(0);
        }
    }
}

pub fn normalize(raw: RawObservation) -> SolarObservation {
    let mut obs = baseline(raw.fetched_at, Provenance::source(raw.source));
    apply(&mut obs, raw.payload);
    obs
}

/// Fold one winner per capability into a single record. `observed_at` is the
/// latest fetch time and provenance lists every contributing source in input
/// order. Fields no winner covers keep their defaults. `None` on empty input.
pub fn merge(raws: Vec<RawObservation>) -> Option<SolarObservation> {
    let observed_at = raws.iter().map(|r| r.fetched_at).max()?;
    let names = raws.iter().map(|r| r.source.clone()).collect();
    let mut obs = baseline(observed_at, Provenance::Sources(names));
    for raw in raws {
        apply(&mut obs, raw.payload);
    }
    Some(obs)
}

/// Synthetic record used when every source failed in a cycle. Always tagged
/// `Provenance::Fallback` and pinned to the quiet baseline so it cannot raise
/// risk on its own.
pub fn synthetic_fallback(now: DateTime<Utc>) -> SolarObservation {
    baseline(now, Provenance::Fallback)
}
