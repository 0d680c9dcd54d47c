//! # Risk Scorer
//! Pure, deterministic mapping `SolarObservation` → `RiskAssessment`.
//! No I/O, suitable for unit tests against literal inputs.
//!
//! Composite additive model, saturating at 1.0:
//! - flares: any X-class → base + per-flare; else >=2 M-class → smaller base + per-flare
//! - geomagnetic (kp), solar wind speed, >=10 MeV proton flux: tiered,
//!   only the highest qualifying tier of each factor contributes.

use serde::Deserialize;

use crate::observation::{Contribution, RiskAssessment, RiskFactor, SolarObservation};

/// One step of a tiered factor.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Tier {
    pub threshold: f64,
    pub increment: f64,
    pub label: String,
}

impl Tier {
    fn new(threshold: f64, increment: f64, label: &str) -> Self {
        Self {
            threshold,
            increment,
            label: label.to_string(),
        }
    }
}

/// Model constants. `Default` is the canonical formula; a `[risk]` table in
/// the config file may override any field.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RiskModel {
    pub x_flare_base: f64,
    pub x_flare_per: f64,
    pub m_flare_min: u32,
    pub m_flare_base: f64,
    pub m_flare_per: f64,
    /// Matched with `kp >= threshold`.
    pub kp_tiers: Vec<Tier>,
    /// Matched with `speed > threshold`.
    pub wind_tiers: Vec<Tier>,
    /// Matched with `>=10 MeV flux >= threshold` (pfu).
    pub proton_tiers: Vec<Tier>,
}

impl Default for RiskModel {
    fn default() -> Self {
        Self {
            x_flare_base: 0.30,
            x_flare_per: 0.10,
            m_flare_min: 2,
            m_flare_base: 0.10,
            m_flare_per: 0.05,
            kp_tiers: vec![
                Tier::new(7.0, 0.40, "strong (kp>=7)"),
                Tier::new(5.0, 0.30, "moderate (kp>=5)"),
                Tier::new(4.0, 0.20, "minor (kp>=4)"),
            ],
            wind_tiers: vec![
                Tier::new(700.0, 0.30, "very high speed (>700 km/s)"),
                Tier::new(500.0, 0.15, "high speed (>500 km/s)"),
            ],
            proton_tiers: vec![
                Tier::new(1000.0, 0.30, "S3 (>=1000 pfu)"),
                Tier::new(100.0, 0.20, "S2 (>=100 pfu)"),
                Tier::new(10.0, 0.10, "S1 (>=10 pfu)"),
            ],
        }
    }
}

impl RiskModel {
    /// Reject negative or non-finite constants.
    pub fn validate(&self) -> Result<(), String> {
        let scalars = [
            ("x_flare_base", self.x_flare_base),
            ("x_flare_per", self.x_flare_per),
            ("m_flare_base", self.m_flare_base),
            ("m_flare_per", self.m_flare_per),
        ];
        for (name, v) in scalars {
            if !v.is_finite() || v < 0.0 {
                return Err(format!("risk.{name} must be a finite, non-negative number"));
            }
        }
        for (name, tiers) in [
            ("kp_tiers", &self.kp_tiers),
            ("wind_tiers", &self.wind_tiers),
            ("proton_tiers", &self.proton_tiers),
        ] {
            for t in tiers {
                if !t.threshold.is_finite() || !t.increment.is_finite() || t.increment < 0.0 {
                    return Err(format!("risk.{name}: invalid tier {:?}", t.label));
                }
            }
        }
        Ok(())
    }

    pub fn score(&self, obs: &SolarObservation) -> RiskAssessment {
        let mut contributions = Vec::new();

        if obs.flares_x > 0 {
            contributions.push(Contribution {
                factor: RiskFactor::Flares,
                tier: format!("{} X-class", obs.flares_x),
                increment: self.x_flare_base + self.x_flare_per * f64::from(obs.flares_x),
            });
        } else if obs.flares_m >= self.m_flare_min {
            contributions.push(Contribution {
                factor: RiskFactor::Flares,
                tier: format!("{} M-class", obs.flares_m),
                increment: self.m_flare_base + self.m_flare_per * f64::from(obs.flares_m),
            });
        }

        let tiered = [
            (RiskFactor::Geomagnetic, &self.kp_tiers, obs.kp, true),
            (RiskFactor::SolarWind, &self.wind_tiers, obs.wind_speed, false),
            (RiskFactor::ProtonFlux, &self.proton_tiers, obs.proton_10mev, true),
        ];
        for (factor, tiers, value, inclusive) in tiered {
            if let Some(t) = highest_tier(tiers, value, inclusive) {
                contributions.push(Contribution {
                    factor,
                    tier: t.label.clone(),
                    increment: t.increment,
                });
            }
        }

        let raw: f64 = contributions.iter().map(|c| c.increment).sum();
        RiskAssessment {
            score: raw.clamp(0.0, 1.0),
            contributions,
            observed_at: obs.observed_at,
        }
    }
}

/// The qualifying tier with the greatest threshold, independent of the order
/// tiers were configured in.
fn highest_tier(tiers: &[Tier], value: f64, inclusive: bool) -> Option<&Tier> {
    tiers
        .iter()
        .filter(|t| {
            if inclusive {
                value >= t.threshold
            } else {
                value > t.threshold
            }
        })
        .max_by(|a, b| a.threshold.total_cmp(&b.threshold))
}

/// Score with the canonical model.
pub fn score(obs: &SolarObservation) -> RiskAssessment {
    RiskModel::default().score(obs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::synthetic_fallback;
    use chrono::Utc;

    fn quiet() -> SolarObservation {
        synthetic_fallback(Utc::now())
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn quiet_sun_scores_zero() {
        let a = score(&quiet());
        assert_eq!(a.score, 0.0);
        assert!(a.contributions.is_empty());
    }

    #[test]
    fn x_flare_dominates_m_flares() {
        let mut obs = quiet();
        obs.flares_x = 2;
        obs.flares_m = 5;
        let a = score(&obs);
        assert!(approx(a.contribution_of(RiskFactor::Flares), 0.50));
    }

    #[test]
    fn single_m_flare_does_not_count() {
        let mut obs = quiet();
        obs.flares_m = 1;
        assert_eq!(score(&obs).contribution_of(RiskFactor::Flares), 0.0);
        obs.flares_m = 2;
        assert!(approx(score(&obs).contribution_of(RiskFactor::Flares), 0.20));
    }

    #[test]
    fn wind_threshold_is_strict() {
        let mut obs = quiet();
        obs.wind_speed = 500.0;
        assert_eq!(score(&obs).contribution_of(RiskFactor::SolarWind), 0.0);
        obs.wind_speed = 500.1;
        assert!(approx(score(&obs).contribution_of(RiskFactor::SolarWind), 0.15));
    }

    #[test]
    fn tier_order_in_config_does_not_matter() {
        let mut model = RiskModel::default();
        model.kp_tiers.reverse();
        let mut obs = quiet();
        obs.kp = 8.0;
        assert!(approx(model.score(&obs).contribution_of(RiskFactor::Geomagnetic), 0.40));
    }

    #[test]
    fn saturates_at_one() {
        let mut obs = quiet();
        obs.flares_x = 5;
        obs.kp = 9.0;
        obs.wind_speed = 900.0;
        obs.proton_10mev = 5_000.0;
        assert_eq!(score(&obs).score, 1.0);
    }

    #[test]
    fn validate_rejects_negative_increment() {
        let mut model = RiskModel::default();
        model.wind_tiers[0].increment = -0.1;
        assert!(model.validate().is_err());
        assert!(RiskModel::default().validate().is_ok());
    }
}
