//! Error types for the CEPiK API client and the fetch engine built on it.

use std::time::Duration;

use crate::utils::fmt_duration;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} timed out after {}", fmt_duration(*after))]
    Timeout { url: String, after: Duration },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest_middleware::Error),
    #[error("HTTP {status} from {url}{}", describe_api_error(reason.as_deref(), code.as_deref()))]
    Status {
        status: u16,
        url: String,
        /// Server-suggested delay from a `Retry-After` header.
        retry_after: Option<Duration>,
        /// `error-result`/`error-reason` from an `errors` payload in the body.
        reason: Option<String>,
        /// `error-code` from the same payload.
        code: Option<String>,
    },
    /// The API embedded an `errors` array in an otherwise successful response.
    #[error("CEPiK API error: {reason} ({})", code.as_deref().unwrap_or("no code"))]
    Domain { reason: String, code: Option<String> },
    #[error("Failed to parse response from {url}")]
    ParseFailed {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("unknown partition code: {0}")]
    UnknownPartition(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.into())
    }
}

impl FetchError {
    /// Whether the error signals upstream throttling, either as HTTP 429 or as
    /// an embedded error payload carrying code `429`.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Status { status, code, .. } => {
                *status == 429 || code.as_deref().map(str::trim) == Some("429")
            }
            Self::Domain { code, .. } => code.as_deref().map(str::trim) == Some("429"),
            _ => false,
        }
    }

    /// Client errors (4xx other than 429), malformed responses, and invalid
    /// queries are fatal. Everything transient is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport(_) => true,
            Self::Status { status, .. } => {
                !(400..500).contains(status) || self.is_rate_limited()
            }
            Self::Domain { .. } => self.is_rate_limited(),
            Self::ParseFailed { .. } | Self::UnknownPartition(_) | Self::InvalidQuery(_) => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// `: reason (code)` suffix for status errors that came with an `errors` payload.
fn describe_api_error(reason: Option<&str>, code: Option<&str>) -> String {
    match (reason, code) {
        (Some(reason), Some(code)) => format!(": {reason} ({code})"),
        (Some(reason), None) => format!(": {reason}"),
        (None, Some(code)) => format!(" (code {code})"),
        (None, None) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> FetchError {
        FetchError::Status {
            status: code,
            url: "https://api.cepik.gov.pl/pojazdy".to_owned(),
            retry_after: None,
            reason: None,
            code: None,
        }
    }

    #[test]
    fn test_client_errors_are_fatal() {
        assert!(!status(400).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(422).is_retryable());
    }

    #[test]
    fn test_rate_limit_and_server_errors_retry() {
        assert!(status(429).is_retryable());
        assert!(status(429).is_rate_limited());
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
    }

    #[test]
    fn test_timeout_retries() {
        let err = FetchError::Timeout {
            url: "https://api.cepik.gov.pl/pojazdy".to_owned(),
            after: Duration::from_secs(30),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_domain_error_retries_only_when_throttled() {
        let invalid = FetchError::Domain {
            reason: "Niepoprawny parametr".to_owned(),
            code: Some("400".to_owned()),
        };
        assert!(!invalid.is_retryable());

        let throttled = FetchError::Domain {
            reason: "Too many requests".to_owned(),
            code: Some("429".to_owned()),
        };
        assert!(throttled.is_retryable());
        assert!(throttled.is_rate_limited());
    }

    #[test]
    fn test_domain_error_display_without_code() {
        let err = FetchError::Domain {
            reason: "Unknown error".to_owned(),
            code: None,
        };
        assert_eq!(err.to_string(), "CEPiK API error: Unknown error (no code)");
    }

    #[test]
    fn test_retry_after_only_from_status() {
        let err = FetchError::Status {
            status: 429,
            url: "u".to_owned(),
            retry_after: Some(Duration::from_secs(7)),
            reason: None,
            code: None,
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(status(500).retry_after(), None);
    }

    #[test]
    fn test_status_carries_embedded_reason() {
        let err = FetchError::Status {
            status: 400,
            url: "https://api.cepik.gov.pl/pojazdy".to_owned(),
            retry_after: None,
            reason: Some("Niepoprawny parametr data-od".to_owned()),
            code: Some("400".to_owned()),
        };
        assert_eq!(
            err.to_string(),
            "HTTP 400 from https://api.cepik.gov.pl/pojazdy: Niepoprawny parametr data-od (400)"
        );
        assert!(!err.is_retryable());
        assert_eq!(
            status(503).to_string(),
            "HTTP 503 from https://api.cepik.gov.pl/pojazdy"
        );
    }

    #[test]
    fn test_status_with_embedded_429_code_is_rate_limited() {
        let err = FetchError::Status {
            status: 400,
            url: "https://api.cepik.gov.pl/pojazdy".to_owned(),
            retry_after: None,
            reason: Some("Przekroczono limit".to_owned()),
            code: Some("429".to_owned()),
        };
        assert!(err.is_rate_limited());
        assert!(err.is_retryable());
    }
}
