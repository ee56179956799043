//! HTTP client for the CEPiK open-data API (or a CORS proxy in front of it).

use anyhow::Context;
use reqwest::header::{ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

use super::errors::FetchError;
use super::json::parse_json_with_context;
use super::middleware::{PauseGate, ThrottleMiddleware};
use super::models::{ApiErrorEntry, Dictionary, DictionaryList, VehiclePage};
use super::query::SearchCriteria;
use super::VehicleSource;
use crate::config::RateLimitingConfig;

const CLIENT_USER_AGENT: &str = concat!("brona/", env!("CARGO_PKG_VERSION"));

/// Dictionary holding the voivodeship list, served by its own endpoint.
const VOIVODESHIP_DICTIONARY: &str = "wojewodztwa";

pub struct CepikApi {
    http: ClientWithMiddleware,
    base_url: String,
    timeout: Duration,
    gate: Arc<PauseGate>,
}

impl CepikApi {
    /// Create a client rooted at `base_url`. The base may carry a path prefix
    /// (e.g. `http://localhost:8000/api` when going through a proxy).
    pub fn new(
        base_url: &str,
        timeout: Duration,
        rate_limiting: &RateLimitingConfig,
    ) -> anyhow::Result<Self> {
        Url::parse(base_url).with_context(|| format!("Invalid CEPiK base URL: {base_url}"))?;

        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let gate = Arc::new(PauseGate::new());
        let http = ClientBuilder::new(client)
            .with(ThrottleMiddleware::new(rate_limiting, gate.clone()))
            .build();

        info!(
            base_url,
            timeout_secs = timeout.as_secs(),
            requests_per_second = rate_limiting.requests_per_second,
            burst = rate_limiting.burst,
            "CEPiK client configured"
        );

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            timeout,
            gate,
        })
    }

    /// When requests resume, if upstream throttling has paused them.
    pub fn paused_until(&self) -> Option<tokio::time::Instant> {
        self.gate.paused_until()
    }

    fn endpoint(&self, path: &str, params: &[(String, String)]) -> Result<Url, FetchError> {
        let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse_with_params(&raw, params)
            .map_err(|e| FetchError::InvalidQuery(format!("cannot build URL {raw}: {e}")))
    }

    /// GET `url` and decode its JSON body. The whole exchange, body included,
    /// is bounded by the configured timeout.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let exchange = async {
            let resp = self
                .http
                .get(url.clone())
                .header(ACCEPT, "application/json")
                .header(USER_AGENT, CLIENT_USER_AGENT)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let retry_after = resp
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                // An unreadable body still yields the status error.
                let body = resp.text().await.unwrap_or_default();
                let (reason, code) = match embedded_error(&body) {
                    Some(entry) => (entry.message().map(str::to_owned), entry.code),
                    None => (None, None),
                };
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                    retry_after,
                    reason,
                    code,
                });
            }

            let body = resp.text().await?;
            parse_json_with_context(&body).map_err(|source| FetchError::ParseFailed {
                url: url.to_string(),
                source,
            })
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_elapsed) => Err(FetchError::Timeout {
                url: url.to_string(),
                after: self.timeout,
            }),
        }
    }

    /// Names of every dictionary the API publishes, except the voivodeship
    /// list which is fixed.
    pub async fn list_dictionaries(&self) -> Result<Vec<String>, FetchError> {
        let url = self.endpoint(
            "slowniki",
            &[
                ("limit".to_owned(), "100".to_owned()),
                ("page".to_owned(), "1".to_owned()),
            ],
        )?;
        let list: DictionaryList = self.get_json(url).await?;
        Ok(list
            .data
            .into_iter()
            .map(|d| d.id)
            .filter(|id| id != VOIVODESHIP_DICTIONARY)
            .collect())
    }

    /// Filter values for one dictionary (e.g. `marka`, `rodzaj-paliwa`).
    #[instrument(skip(self))]
    pub async fn get_dictionary(&self, name: &str) -> Result<Vec<String>, FetchError> {
        let url = self.endpoint(&format!("slowniki/{name}"), &[])?;
        let dictionary: Dictionary = self.get_json(url).await?;
        let values = dictionary.filter_values();
        debug!(count = values.len(), "Fetched dictionary");
        Ok(values)
    }
}

#[async_trait::async_trait]
impl VehicleSource for CepikApi {
    async fn fetch_page(
        &self,
        partition_code: &str,
        criteria: &SearchCriteria,
        page: u32,
    ) -> Result<VehiclePage, FetchError> {
        let url = self.endpoint("pojazdy", &criteria.api_params(partition_code, page))?;
        self.get_json(url).await
    }
}

/// First entry of an `errors` payload in an error response body, if the body
/// is JSON of that shape.
fn embedded_error(body: &str) -> Option<ApiErrorEntry> {
    serde_json::from_str::<VehiclePage>(body)
        .ok()?
        .errors
        .into_iter()
        .next()
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored and the
/// caller falls back to its own backoff.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
