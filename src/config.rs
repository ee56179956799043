//! Runtime configuration, loaded from the environment via figment.

use figment::Figment;
use figment::providers::Env;
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.cepik.gov.pl";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base log level for the crate's own targets.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Upstream API root, or a CORS proxy that forwards to it verbatim.
    #[serde(default = "default_base_url", alias = "cepik_api_url")]
    pub cepik_base_url: String,
    /// Partition tasks allowed in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Attempts per partition task, first attempt included.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Bound on each upstream request, e.g. `30s` or `1500ms`.
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,
    /// Directory for the on-disk result cache. Unset keeps the cache in memory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(flatten)]
    pub rate_limiting: RateLimitingConfig,
}

/// Outbound request budget shared by every partition task.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitingConfig {
    #[serde(default = "default_requests_per_second", rename = "rate_limit_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst", rename = "rate_limit_burst")]
    pub burst: u32,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

impl Config {
    /// Extract from raw environment variables (`LOG_LEVEL`, `MAX_CONCURRENT`, ...).
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_figment(Figment::new().merge(Env::raw()))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, figment::Error> {
        figment.extract()
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_owned()
}

fn default_max_concurrent() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_requests_per_second() -> u32 {
    2
}

fn default_burst() -> u32 {
    5
}

/// Accepts bare integers (seconds) or unit-suffixed strings like `30s`, `500ms`.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => {
            let parser = DurationParser::with_time_units(&[
                TimeUnit::MilliSecond,
                TimeUnit::Second,
                TimeUnit::Minute,
                TimeUnit::Hour,
            ]);
            let parsed = parser
                .parse(text.trim())
                .map_err(|e| serde::de::Error::custom(format!("invalid duration {text:?}: {e}")))?;
            Duration::try_from(parsed)
                .map_err(|e| serde::de::Error::custom(format!("invalid duration {text:?}: {e}")))
        }
    }
}
