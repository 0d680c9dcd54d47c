use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;

use super::http::{get_body, parse_json, render_url};
use crate::ingest::types::{FetchError, RawObservation, RawPayload, SourceAdapter, SourceDescriptor};

/// Cells arrive as strings ("412.3"), numbers, or null.
fn cell_f64(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decode SWPC `plasma-*.json`: an array of rows whose first row is a header
/// (`["time_tag","density","speed","temperature"]`). Walks back from the end
/// to the most recent row with a usable speed.
pub fn decode(body: &str) -> Result<RawPayload, FetchError> {
    let rows: Vec<Vec<Value>> = parse_json(body, "solar wind")?;
    let (header, data) = rows
        .split_first()
        .ok_or_else(|| FetchError::MalformedResponse("solar wind: no header row".into()))?;

    let col = |name: &str| header.iter().position(|h| h.as_str() == Some(name));
    let speed_ix = col("speed")
        .ok_or_else(|| FetchError::MalformedResponse("solar wind: no speed column".into()))?;
    let density_ix = col("density");

    if data.is_empty() {
        return Err(FetchError::MalformedResponse("solar wind: no data rows".into()));
    }

    for row in data.iter().rev() {
        if let Some(speed) = cell_f64(row.get(speed_ix)) {
            let density = density_ix.and_then(|ix| cell_f64(row.get(ix)));
            return Ok(RawPayload::SolarWind {
                speed: Some(speed),
                density,
            });
        }
    }

    // Rows exist but every speed is null: let the normalizer default it.
    Ok(RawPayload::SolarWind {
        speed: None,
        density: None,
    })
}

pub struct SolarWindProvider {
    desc: SourceDescriptor,
    client: Client,
}

impl SolarWindProvider {
    pub fn new(desc: SourceDescriptor, client: Client) -> Self {
        Self { desc, client }
    }
}

#[async_trait]
impl SourceAdapter for SolarWindProvider {
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
