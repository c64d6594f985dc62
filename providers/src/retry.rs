//! Bounded retry with exponential backoff for OpenAI requests.
//!
//! - Retries: 2 by default (3 attempts total), configurable
//! - Backoff: 500ms doubling per attempt, capped at 8s, down-jitter up to 25%
//! - Retryable: HTTP 408, 409, 429, 5xx and connect/timeout errors
//! - `Retry-After` / `Retry-After-Ms` under 60s replaces the computed delay
//! - `x-should-retry` from the server overrides the status classification
//!
//! Every attempt of one logical request carries the same `Idempotency-Key`.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use uuid::Uuid;

const RETRY_COUNT_HEADER: &str = "X-Retry-Count";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
const MAX_HONORED_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Fraction the delay may be reduced by at random (0.25 = up to 25%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Server-requested delay, if present and below one minute.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let requested = header("retry-after-ms")
        .and_then(|ms| ms.trim().parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .or_else(|| {
            header("retry-after")
                .and_then(|secs| secs.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        })?;

    (requested > Duration::ZERO && requested < MAX_HONORED_RETRY_AFTER).then_some(requested)
}

#[must_use]
pub fn should_retry(status: StatusCode, headers: &HeaderMap) -> bool {
    match headers.get("x-should-retry").and_then(|v| v.to_str().ok()) {
        Some(v) if v.eq_ignore_ascii_case("true") => return true,
        Some(v) if v.eq_ignore_ascii_case("false") => return false,
        _ => {}
    }

    matches!(status.as_u16(), 408 | 409 | 429 | 500..=599)
}

/// Delay before retry number `attempt + 1`.
#[must_use]
pub fn retry_delay(attempt: u32, policy: &RetryPolicy, headers: Option<&HeaderMap>) -> Duration {
    if let Some(delay) = headers.and_then(parse_retry_after) {
        return delay;
    }

    let exponent = attempt.min(16) as i32;
    let base = policy.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(policy.max_delay.as_secs_f64());
    let jitter = 1.0 - rand::random::<f64>() * policy.jitter_factor.clamp(0.0, 1.0);
    Duration::from_secs_f64(capped * jitter)
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

#[must_use]
pub fn generate_idempotency_key() -> String {
    format!("dalibot-{}", Uuid::new_v4())
}

/// How a retried request ended.
#[derive(Debug)]
pub enum RetryOutcome {
    /// 2xx response.
    Success(Response),
    /// Non-2xx response that was not retryable or exhausted the retries.
    HttpError(Response),
    /// No response at all.
    Transport { attempts: u32, source: reqwest::Error },
}

/// Sends the request built by `build_request`, retrying per `policy`.
pub async fn send_with_retry<F>(build_request: F, policy: &RetryPolicy) -> RetryOutcome
where
    F: Fn() -> RequestBuilder,
{
    let idempotency_key = generate_idempotency_key();
    let mut attempt: u32 = 0;

    loop {
        let exhausted = attempt >= policy.max_retries;
        let request = build_request()
            .header(RETRY_COUNT_HEADER, attempt.to_string())
            .header(IDEMPOTENCY_HEADER, &idempotency_key);

        let delay = match request.send().await {
            Ok(response) if response.status().is_success() => {
                return RetryOutcome::Success(response);
            }
            Ok(response) => {
                let status = response.status();
                if exhausted || !should_retry(status, response.headers()) {
                    return RetryOutcome::HttpError(response);
                }
                let delay = retry_delay(attempt, policy, Some(response.headers()));
                tracing::debug!(
                    %status,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "Retrying OpenAI request after error status"
                );
                delay
            }
            Err(source) => {
                if exhausted || !is_retryable_error(&source) {
                    return RetryOutcome::Transport {
                        attempts: attempt + 1,
                        source,
                    };
                }
                let delay = retry_delay(attempt, policy, None);
                tracing::debug!(
                    error = %source,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "Retrying OpenAI request after connection error"
                );
                delay
            }
        };

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
