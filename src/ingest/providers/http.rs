use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::histogram;
use reqwest::{header, Client};

use crate::ingest::types::{FetchError, SourceDescriptor};

const USER_AGENT: &str = concat!("solar-risk-monitor/", env!("CARGO_PKG_VERSION"));

/// Default key for the public NASA API gateway (rate limited, but works).
pub const DEFAULT_NASA_API_KEY: &str = "DEMO_KEY";

/// Shared client for all feeds. Per-request timeouts come from descriptors.
pub fn build_client() -> reqwest::Result<Client> {
    Client::builder().user_agent(USER_AGENT).build()
}

/// Expand `{start_date}`, `{end_date}` and `{api_key}` in a URL template.
/// Dates are UTC `YYYY-MM-DD`: one day back and today.
pub fn render_url(template: &str, now: DateTime<Utc>, api_key: &str) -> Result<String, String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| format!("unclosed placeholder in {template}"))?;
        match &after[..close] {
            "start_date" => {
                let start = now - ChronoDuration::days(1);
                out.push_str(&start.format("%Y-%m-%d").to_string());
            }
            "end_date" => out.push_str(&now.format("%Y-%m-%d").to_string()),
            "api_key" => out.push_str(api_key),
            other => return Err(format!("unknown placeholder {{{other}}} in {template}")),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// GET `url` within the descriptor's timeout and return the body text.
/// Non-2xx statuses count as unreachable.
pub async fn get_body(
    client: &Client,
    desc: &SourceDescriptor,
    url: &str,
) -> Result<String, FetchError> {
    let t0 = std::time::Instant::now();
    let resp = client
        .get(url)
        .timeout(desc.timeout)
        .header(header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(e, desc.timeout))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Unreachable(format!("{url} returned HTTP {status}")));
    }

    let body = resp
        .text()
        .await
        .map_err(|e| FetchError::from_reqwest(e, desc.timeout))?;

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("source_fetch_ms", "source" => desc.name.clone()).record(ms);
    Ok(body)
}

/// Parse JSON, mapping any decode failure to `MalformedResponse`.
pub fn parse_json<T: serde::de::DeserializeOwned>(body: &str, what: &str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::MalformedResponse(format!("{what}: {e}")))
}
