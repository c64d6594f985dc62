//! OpenAI API client for the relay.
//!
//! [`OpenAIClient`] covers the three upstream calls the bot makes:
//!
//! | call | endpoint | used for |
//! |------|----------|----------|
//! | [`OpenAIClient::chat`] | `POST /chat/completions` | text turns and intent routing |
//! | [`OpenAIClient::vision`] | `POST /chat/completions` | photo + caption turns |
//! | [`OpenAIClient::generate_image`] | `POST /images/generations` | image requests |
//!
//! All calls go through [`retry::send_with_retry`]. Failures come back as
//! [`ProviderError`]; nothing here talks to the chat platform.

pub mod openai;
pub mod retry;

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use thiserror::Error;

pub use openai::{
    ChatCompletion, ChatOptions, ClientSettings, GeneratedImage, OpenAIClient, Usage,
};
pub use retry::RetryPolicy;

/// Canonical OpenAI API base URL.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("OpenAI API error {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("failed to decode OpenAI response: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("OpenAI response contained no {0}")]
    EmptyResponse(&'static str),
}

impl ProviderError {
    /// HTTP status of the failed call, when the API answered at all.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ProviderError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// HTTP client with the connection settings used for every OpenAI call.
pub fn http_client(request_timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(request_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .build()
        .map_err(ProviderError::Client)
}

/// Reads at most 32 KiB of an error body.
pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Turns a retry outcome into the successful response or a typed error.
pub(crate) async fn into_response(
    outcome: retry::RetryOutcome,
) -> Result<reqwest::Response, ProviderError> {
    match outcome {
        retry::RetryOutcome::Success(response) => Ok(response),
        retry::RetryOutcome::HttpError(response) => {
            let status = response.status();
            let body = read_capped_error_body(response).await;
            Err(ProviderError::Api { status, body })
        }
        retry::RetryOutcome::Transport { attempts, source } => {
            Err(ProviderError::Transport { attempts, source })
        }
    }
}
