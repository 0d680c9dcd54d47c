use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use super::http::{get_body, parse_json, render_url};
use crate::ingest::types::{FetchError, RawObservation, RawPayload, SourceAdapter, SourceDescriptor};

#[derive(Debug, Deserialize)]
struct ProtonRow {
    #[serde(default)]
    flux: Option<f64>,
    #[serde(default)]
    energy: Option<String>,
}

/// Decode GOES `integral-protons-*.json`. Rows are chronological and
/// interleave energy channels; the last row per channel wins.
pub fn decode(body: &str) -> Result<RawPayload, FetchError> {
    let rows: Vec<ProtonRow> = parse_json(body, "proton flux")?;

    let latest = |channel: &str| -> Option<Option<f64>> {
        rows.iter()
            .rev()
            .find(|r| r.energy.as_deref().map(str::trim) == Some(channel))
            .map(|r| r.flux)
    };

    let p10 = latest(">=10 MeV");
    let p100 = latest(">=100 MeV");
    if p10.is_none() && p100.is_none() {
        return Err(FetchError::MalformedResponse(
            "proton flux: no >=10 MeV or >=100 MeV rows".into(),
        ));
    }

    Ok(RawPayload::ProtonFlux {
        p10: p10.flatten(),
        p100: p100.flatten(),
    })
}

pub struct ProtonFluxProvider {
    desc: SourceDescriptor,
    client: Client,
}

impl ProtonFluxProvider {
    pub fn new(desc: SourceDescriptor, client: Client) -> Self {
        Self { desc, client }
    }
}

#[async_trait]
impl SourceAdapter for ProtonFluxProvider {
    async fn fetch(&self) -> Result<RawObservation, FetchError> {
        let now = Utc::now();
        let url = render_url(&self.desc.url_template, now, "")
            .map_err(FetchError::Unreachable)?;
        let body = get_body(&self.client, &self.desc, &url).await?;
        Ok(RawObservation {
            source: self.desc.name.clone(),
            fetched_at: now,
            payload: decode(&body)?,
        })
    }

    fn descriptor(&self) -> &SourceDescriptor {
        &self.desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_row_per_channel_wins() {
        let body = r#"[
            {"time_tag":"2025-05-01T00:00:00Z","satellite":18,"flux":0.31,"energy":">=10 MeV"},
            {"time_tag":"2025-05-01T00:00:00Z","satellite":18,"flux":0.04,"energy":">=100 MeV"},
            {"time_tag":"2025-05-01T00:05:00Z","satellite":18,"flux":0.27,"energy":">=1 MeV"},
            {"time_tag":"2025-05-01T00:05:00Z","satellite":18,"flux":152.0,"energy":">=10 MeV"}
        ]"#;
        assert_eq!(
            decode(body).unwrap(),
            RawPayload::ProtonFlux {
                p10: Some(152.0),
                p100: Some(0.04)
            }
        );
    }

    #[test]
    fn feed_without_known_channels_is_malformed() {
        let body = r#"[{"time_tag":"t","flux":1.0,"energy":">=1 MeV"}]"#;
        assert!(matches!(decode(body), Err(FetchError::MalformedResponse(_))));
    }
}
