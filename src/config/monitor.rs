// src/config/monitor.rs
use serde::Deserialize;
use std::{
    collections::HashSet,
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

use crate::ingest::providers::http::{render_url, DEFAULT_NASA_API_KEY};
use crate::ingest::types::{SourceDescriptor, SourceKind};
use crate::risk::RiskModel;

pub const ENV_CONFIG_PATH: &str = "SOLAR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{ENV_CONFIG_PATH} points to non-existent path {0}")]
    MissingPath(PathBuf),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn invalid<T>(msg: impl Into<String>) -> Result<T, ConfigError> {
    Err(ConfigError::Invalid(msg.into()))
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/solar_risk.db")
}
fn default_interval_secs() -> u64 {
    300
}
fn default_shutdown_grace_secs() -> u64 {
    20
}
fn default_threshold() -> f64 {
    0.6
}
fn default_max_delivery_attempts() -> u32 {
    3
}
fn default_notify_timeout_secs() -> u64 {
    10
}
fn default_source_timeout_secs() -> u64 {
    10
}
fn default_report_period_secs() -> u64 {
    24 * 3600
}
fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    /// Fetch all sources at once; the winner is still chosen by priority.
    pub concurrent_fetch: bool,
    /// How long an in-flight cycle may run after shutdown is requested.
    pub shutdown_grace_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            concurrent_fetch: false,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub threshold: f64,
    /// Send a message on the ALERTING → NORMAL edge too.
    pub notify_on_recovery: bool,
    /// Total delivery attempts per alert episode, first send included.
    pub max_delivery_attempts: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            notify_on_recovery: false,
            max_delivery_attempts: default_max_delivery_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Log messages instead of sending them; no channel required.
    pub dry_run: bool,
    pub timeout_secs: u64,
    pub on_startup: bool,
    pub telegram: Option<TelegramConfig>,
    pub slack_webhook_url: Option<String>,
    pub email: Option<EmailConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            timeout_secs: default_notify_timeout_secs(),
            on_startup: false,
            telegram: None,
            slack_webhook_url: None,
            email: None,
        }
    }
}

impl NotifyConfig {
    pub fn has_channel(&self) -> bool {
        self.telegram.is_some() || self.slack_webhook_url.is_some() || self.email.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub enabled: bool,
    pub period_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period_secs: default_report_period_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
    pub priority: u32,
    #[serde(default = "default_source_timeout_secs")]
    pub timeout_secs: u64,
}

impl SourceConfig {
    fn new(name: &str, kind: SourceKind, url: &str, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            kind,
            url: url.to_string(),
            priority,
            timeout_secs: default_source_timeout_secs(),
        }
    }
}

/// NOAA SWPC feeds plus NASA DONKI as the last resort.
pub fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::new(
            "noaa-kp",
            SourceKind::KpIndex,
            "https://services.swpc.noaa.gov/json/planetary_k_index_1m.json",
            0,
        ),
        SourceConfig::new(
            "noaa-solar-wind",
            SourceKind::SolarWind,
            "https://services.swpc.noaa.gov/products/solar-wind/plasma-1-day.json",
            1,
        ),
        SourceConfig::new(
            "goes-protons",
            SourceKind::ProtonFlux,
            "https://services.swpc.noaa.gov/json/goes/primary/integral-protons-1-day.json",
            2,
        ),
        SourceConfig::new(
            "goes-xray-flares",
            SourceKind::XrayFlares,
            "https://services.swpc.noaa.gov/json/goes/primary/xray-flares-7-day.json",
            3,
        ),
        SourceConfig::new(
            "nasa-donki-flares",
            SourceKind::DonkiFlares,
            "https://api.nasa.gov/DONKI/FLR?startDate={start_date}&endDate={end_date}&api_key={api_key}",
            4,
        ),
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub database_path: PathBuf,
    pub nasa_api_key: Option<String>,
    pub metrics_addr: Option<SocketAddr>,
    pub poll: PollConfig,
    pub alert: AlertConfig,
    pub notify: NotifyConfig,
    pub report: ReportConfig,
    pub risk: RiskModel,
    pub sources: Vec<SourceConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            nasa_api_key: None,
            metrics_addr: None,
            poll: PollConfig::default(),
            alert: AlertConfig::default(),
            notify: NotifyConfig::default(),
            report: ReportConfig::default(),
            risk: RiskModel::default(),
            sources: default_sources(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}={raw:?} is not a valid value")))
}

impl MonitorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallbacks, then apply environment overrides and
    /// validate:
    /// 1) $SOLAR_CONFIG_PATH (must exist)
    /// 2) config/monitor.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self, ConfigError> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(ConfigError::MissingPath(pb));
            }
            Self::load_from(&pb)?
        } else {
            let pb = PathBuf::from(DEFAULT_CONFIG_PATH);
            if pb.exists() {
                Self::load_from(&pb)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply environment overrides through `lookup` (injectable for tests).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("POLL_INTERVAL_SECS") {
            self.poll.interval_secs = parse_env("POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("ALERT_THRESHOLD") {
            self.alert.threshold = parse_env("ALERT_THRESHOLD", &v)?;
        }
        if let Some(v) = get("DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = get("NASA_API_KEY") {
            self.nasa_api_key = Some(v);
        }
        if let Some(v) = get("METRICS_ADDR") {
            self.metrics_addr = Some(parse_env("METRICS_ADDR", &v)?);
        }

        let token = get("TELEGRAM_BOT_TOKEN");
        let chat = get("TELEGRAM_CHAT_ID");
        if token.is_some() || chat.is_some() {
            let tg = self.notify.telegram.get_or_insert_with(|| TelegramConfig {
                bot_token: String::new(),
                chat_id: String::new(),
                api_base: default_telegram_api_base(),
            });
            if let Some(t) = token {
                tg.bot_token = t;
            }
            if let Some(c) = chat {
                tg.chat_id = c;
            }
        }

        if let Some(v) = get("SLACK_WEBHOOK_URL") {
            self.notify.slack_webhook_url = Some(v);
        }

        if let (Some(host), Some(user), Some(pass), Some(from), Some(to)) = (
            get("SMTP_HOST"),
            get("SMTP_USER"),
            get("SMTP_PASS"),
            get("NOTIFY_EMAIL_FROM"),
            get("NOTIFY_EMAIL_TO"),
        ) {
            self.notify.email = Some(EmailConfig {
                smtp_host: host,
                smtp_user: user,
                smtp_pass: pass,
                from,
                to,
            });
        }
        Ok(())
    }

    pub fn nasa_api_key(&self) -> &str {
        self.nasa_api_key.as_deref().unwrap_or(DEFAULT_NASA_API_KEY)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify.timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.poll.shutdown_grace_secs)
    }

    /// Fail fast on anything the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.interval_secs == 0 {
            return invalid("poll.interval_secs must be > 0");
        }
        let t = self.alert.threshold;
        if !(t > 0.0 && t <= 1.0) {
            return invalid(format!("alert.threshold must be in (0, 1], got {t}"));
        }
        if self.alert.max_delivery_attempts == 0 {
            return invalid("alert.max_delivery_attempts must be >= 1");
        }
        if self.notify.timeout_secs == 0 || self.notify.timeout_secs >= self.poll.interval_secs {
            return invalid("notify.timeout_secs must be > 0 and shorter than poll.interval_secs");
        }
        if self.report.enabled && self.report.period_secs == 0 {
            return invalid("report.period_secs must be > 0");
        }
        self.risk.validate().map_err(ConfigError::Invalid)?;

        if self.sources.is_empty() {
            return invalid("at least one [[sources]] entry is required");
        }
        let mut names = HashSet::new();
        let now = chrono::Utc::now();
        for s in &self.sources {
            if s.name.trim().is_empty() {
                return invalid("source name must not be empty");
            }
            if s.name == crate::observation::FALLBACK_TAG {
                return invalid("source name \"fallback\" is reserved");
            }
            if s.name.contains(crate::observation::SOURCE_SEPARATOR) {
                return invalid(format!("source name {:?} must not contain ','", s.name));
            }
            if !names.insert(s.name.as_str()) {
                return invalid(format!("duplicate source name {:?}", s.name));
            }
            if s.timeout_secs == 0 {
                return invalid(format!("source {:?}: timeout_secs must be > 0", s.name));
            }
            if !s.kind.takes_api_key() && s.url.contains("{api_key}") {
                return invalid(format!(
                    "source {:?}: {{api_key}} is only supported for flare feeds",
                    s.name
                ));
            }
            let url = render_url(&s.url, now, self.nasa_api_key())
                .map_err(|e| ConfigError::Invalid(format!("source {:?}: {e}", s.name)))?;
            if let Err(e) = reqwest::Url::parse(&url) {
                return invalid(format!("source {:?}: bad url {url:?}: {e}", s.name));
            }
        }

        if !self.notify.dry_run && !self.notify.has_channel() {
            return invalid(
                "no notification channel configured (set TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID, \
                 SLACK_WEBHOOK_URL or SMTP_*), or enable notify.dry_run",
            );
        }
        if let Some(tg) = &self.notify.telegram {
            if tg.bot_token.trim().is_empty() || tg.chat_id.trim().is_empty() {
                return invalid("telegram needs both bot_token and chat_id");
            }
        }
        Ok(())
    }

    /// Immutable source descriptors, in config order.
    pub fn descriptors(&self) -> Vec<SourceDescriptor> {
        self.sources
            .iter()
            .map(|s| SourceDescriptor {
                name: s.name.clone(),
                kind: s.kind,
                url_template: s.url.clone(),
                priority: s.priority,
                timeout: Duration::from_secs(s.timeout_secs),
            })
            .collect()
    }
}
