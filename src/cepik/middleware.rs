//! Outbound request middleware: global throttling, a shared pause after
//! upstream rate limiting, and request logging.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::config::RateLimitingConfig;
use crate::utils::fmt_duration;

/// Pause applied after a 429/503 that came without a usable `Retry-After`.
pub const DEFAULT_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(15);
/// Upper bound on any pause, whatever the server asks for.
pub const MAX_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(30);

/// Deadline before which no request may leave. Set when any request sees
/// upstream throttling, honored by every request sharing the client.
#[derive(Debug, Default)]
pub struct PauseGate {
    until: Mutex<Option<tokio::time::Instant>>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold requests for `duration` from now. An existing later deadline wins.
    pub fn pause_for(&self, duration: Duration) {
        let deadline = tokio::time::Instant::now() + duration.min(MAX_RATE_LIMIT_PAUSE);
        let mut until = self.until.lock().unwrap_or_else(PoisonError::into_inner);
        if until.is_none_or(|current| current < deadline) {
            *until = Some(deadline);
        }
    }

    /// The active deadline, if it is still in the future.
    pub fn paused_until(&self) -> Option<tokio::time::Instant> {
        let until = *self.until.lock().unwrap_or_else(PoisonError::into_inner);
        until.filter(|deadline| *deadline > tokio::time::Instant::now())
    }

    /// Wait out the pause. Loops because another request may extend it while
    /// this one sleeps.
    pub async fn wait(&self) {
        while let Some(deadline) = self.paused_until() {
            tokio::time::sleep_until(deadline).await;
        }
    }
}

/// Spaces all upstream requests through a single token bucket, so concurrent
/// partition tasks cannot collectively exceed the configured request rate.
/// A 429 or 503 on any request pauses all of them.
pub struct ThrottleMiddleware {
    limiter: Arc<DefaultDirectRateLimiter>,
    gate: Arc<PauseGate>,
}

impl ThrottleMiddleware {
    pub fn new(config: &RateLimitingConfig, gate: Arc<PauseGate>) -> Self {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(per_second);
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            gate,
        }
    }
}

fn is_throttling(status: u16) -> bool {
    status == 429 || status == 503
}

/// `Retry-After` seconds, else the default pause.
fn pause_from(resp: &Response) -> Duration {
    resp.headers()
        .get(http::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RATE_LIMIT_PAUSE)
}

#[async_trait::async_trait]
impl Middleware for ThrottleMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let waited = Instant::now();
        self.gate.wait().await;
        self.limiter.until_ready().await;
        let throttled = waited.elapsed();
        if !throttled.is_zero() {
            trace!(waited = fmt_duration(throttled), "Request throttled");
        }

        let method = req.method().clone();
        let url = req.url().clone();
        let start = Instant::now();
        let result = next.run(req, extensions).await;
        let duration = start.elapsed();

        match &result {
            Ok(resp) if is_throttling(resp.status().as_u16()) => {
                let pause = pause_from(resp).min(MAX_RATE_LIMIT_PAUSE);
                self.gate.pause_for(pause);
                warn!(
                    method = %method,
                    path = url.path(),
                    status = resp.status().as_u16(),
                    duration = fmt_duration(duration),
                    pause = fmt_duration(pause),
                    "Upstream rate limit hit, pausing all requests"
                );
            }
            Ok(resp) => {
                debug!(
                    method = %method,
                    path = url.path(),
                    query = url.query().unwrap_or(""),
                    status = resp.status().as_u16(),
                    duration = fmt_duration(duration),
                    "Request completed"
                );
            }
            Err(e) => {
                warn!(
                    method = %method,
                    path = url.path(),
                    duration = fmt_duration(duration),
                    error = %e,
                    "Request failed"
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_gate_is_open_by_default() {
        let gate = PauseGate::new();
        assert!(gate.paused_until().is_none());
        let start = Instant::now();
        gate.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_every_waiter_until_the_deadline() {
        let gate = Arc::new(PauseGate::new());
        let start = Instant::now();
        gate.pause_for(Duration::from_secs(7));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move {
                    gate.wait().await;
                    Instant::now()
                })
            })
            .collect();
        for waiter in waiters {
            let released = waiter.await.unwrap();
            assert_eq!(released - start, Duration::from_secs(7));
        }
        assert!(gate.paused_until().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_pause_does_not_cut_a_longer_one() {
        let gate = PauseGate::new();
        let start = Instant::now();
        gate.pause_for(Duration::from_secs(10));
        gate.pause_for(Duration::from_secs(2));
        assert_eq!(
            gate.paused_until(),
            Some(start + Duration::from_secs(10))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_extension_while_waiting_is_honored() {
        let gate = Arc::new(PauseGate::new());
        let start = Instant::now();
        gate.pause_for(Duration::from_secs(2));

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.wait().await;
                Instant::now()
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        gate.pause_for(Duration::from_secs(4));

        assert_eq!(waiter.await.unwrap() - start, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_is_capped() {
        let gate = PauseGate::new();
        let start = Instant::now();
        gate.pause_for(Duration::from_secs(600));
        assert_eq!(gate.paused_until(), Some(start + MAX_RATE_LIMIT_PAUSE));
    }

    #[test]
    fn test_throttling_statuses() {
        assert!(is_throttling(429));
        assert!(is_throttling(503));
        assert!(!is_throttling(500));
        assert!(!is_throttling(400));
    }
}
