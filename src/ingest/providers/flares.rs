//! Flare-count feeds: GOES X-ray flare list (SWPC) and NASA DONKI FLR.
//! Both reduce to M-class / X-class counts.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::http::{get_body, parse_json, render_url};
use crate::ingest::types::{
    FetchError, RawObservation, RawPayload, SourceAdapter, SourceDescriptor, SourceKind,
};

/// Flares older than this (relative to fetch time) are not counted.
pub const FLARE_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
struct GoesFlare {
    #[serde(default)]
    max_class: Option<String>,
    #[serde(default)]
    begin_class: Option<String>,
    #[serde(default)]
    max_time: Option<String>,
    #[serde(default)]
    begin_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DonkiFlare {
    #[serde(default)]
    class_type: Option<String>,
}

/// SWPC uses RFC 3339; DONKI drops the seconds ("2024-05-10T06:27Z").
fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%MZ")
                .ok()
                .map(|n| n.and_utc())
        })
}

#[derive(Default)]
struct Counts {
    m: u32,
    x: u32,
}

impl Counts {
    fn add_class(&mut self, class: &str) {
        match class.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('X') => self.x += 1,
            Some('M') => self.m += 1,
            _ => {}
        }
    }

    fn into_payload(self) -> RawPayload {
        RawPayload::Flares {
            m: Some(self.m),
            x: Some(self.x),
        }
    }
}

/// Decode GOES `xray-flares-*.json`, counting flares that peaked (or began,
/// when still in progress) within the last `FLARE_WINDOW_HOURS`.
/// An empty list is a quiet sun, not a failure.
pub fn decode_goes(body: &str, now: DateTime<Utc>) -> Result<RawPayload, FetchError> {
    let rows: Vec<GoesFlare> = parse_json(body, "xray flares")?;
    let cutoff = now - ChronoDuration::hours(FLARE_WINDOW_HOURS);

    let mut counts = Counts::default();
    for f in rows {
        let ts = f
            .max_time
            .as_deref()
            .or(f.begin_time.as_deref())
            .and_then(parse_ts);
        let Some(ts) = ts else { continue };
        if ts < cutoff || ts > now {
            continue;
        }
        if let Some(class) = f.max_class.as_deref().or(f.begin_class.as_deref()) {
            counts.add_class(class);
        }
    }
    Ok(counts.into_payload())
}

/// Decode DONKI `FLR`. The query itself is windowed by the URL template,
/// so every entry counts. DONKI answers an empty body when nothing matched.
pub fn decode_donki(body: &str) -> Result<RawPayload, FetchError> {
    if body.trim().is_empty() {
        return Ok(Counts::default().into_payload());
    }
    let rows: Vec<DonkiFlare> = parse_json(body, "donki flares")?;
    let mut counts = Counts::default();
    for f in rows {
        if let Some(class) = f.class_type.as_deref() {
            counts.add_class(class);
        }
    }
    Ok(counts.into_payload())
}

pub struct FlareProvider {
    desc: SourceDescriptor,
    client: Client,
    api_key: String,
}

impl FlareProvider {
    pub fn new(desc: SourceDescriptor, client: Client, api_key: String) -> Self {
        Self {
            desc,
            client,
            api_key,
        }
    }
}

#[async_trait]
impl SourceAdapter for FlareProvider {
    async fn fetch(&self) -> Result<RawObservation, FetchError> {
        let now = Utc::now();
        let url = render_url(&self.desc.url_template, now, &self.api_key)
            .map_err(FetchError::Unreachable)?;
        let body = get_body(&self.client, &self.desc, &url).await?;
        let payload = match self.desc.kind {
            SourceKind::DonkiFlares => decode_donki(&body)?,
            _ => decode_goes(&body, now)?,
        };
        Ok(RawObservation {
            source: self.desc.name.clone(),
            fetched_at: now,
            payload,
        })
    }

    fn descriptor(&self) -> &SourceDescriptor {
        &self.desc
    }
}
