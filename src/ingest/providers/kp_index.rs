use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::http::{get_body, parse_json, render_url};
use crate::ingest::types::{FetchError, RawObservation, RawPayload, SourceAdapter, SourceDescriptor};

/// One row of NOAA SWPC `planetary_k_index_1m.json`.
#[derive(Debug, Deserialize)]
struct KpRow {
    #[serde(default)]
    estimated_kp: Option<f64>,
    #[serde(default)]
    kp_index: Option<f64>,
}

/// Decode the 1-minute planetary K feed. The last row is the most recent;
/// `estimated_kp` (fractional) is preferred over the integer `kp_index`.
pub fn decode(body: &str) -> Result<RawPayload, FetchError> {
    let rows: Vec<KpRow> = parse_json(body, "kp index")?;
    let last = rows
        .last()
        .ok_or_else(|| FetchError::MalformedResponse("kp index: no rows".into()))?;
    Ok(RawPayload::Geomagnetic {
        kp: last.estimated_kp.or(last.kp_index),
    })
}

pub struct KpIndexProvider {
    desc: SourceDescriptor,
    client: Client,
}

impl KpIndexProvider {
    pub fn new(desc: SourceDescriptor, client: Client) -> Self {
        Self { desc, client }
    }
}

#[async_trait]
impl SourceAdapter for KpIndexProvider {
    async fn fetch(&self) -> Result<RawObservation, FetchError> {
        let now: DateTime<Utc> = Utc::now();
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
