use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use dalibot_types::{ApiKey, ModelName, Role, WireMessage};

use crate::retry::{RetryPolicy, send_with_retry};
use crate::{OPENAI_API_BASE_URL, ProviderError, http_client, into_response};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Connection settings for [`OpenAIClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: OPENAI_API_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-call sampling options for chat completions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletion {
    pub content: String,
    pub model: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub url: String,
    pub revised_prompt: Option<String>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
    revised_prompt: Option<String>,
}

pub struct OpenAIClient {
    http: reqwest::Client,
    api_key: ApiKey,
    base_url: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("api_key", &self.api_key)
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl OpenAIClient {
    pub fn new(api_key: ApiKey, settings: ClientSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            http: http_client(settings.request_timeout)?,
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            retry: settings.retry,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = self.endpoint(path);
        let auth = format!("Bearer {}", self.api_key.as_str());
        let outcome = send_with_retry(
            || {
                self.http
                    .post(&url)
                    .header("Authorization", &auth)
                    .json(body)
            },
            &self.retry,
        )
        .await;
        into_response(outcome).await
    }

    async fn complete(&self, body: Value) -> Result<ChatCompletion, ProviderError> {
        let response = self.post_json("chat/completions", &body).await?;
        let parsed: CompletionResponse = response.json().await.map_err(ProviderError::Decode)?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ProviderError::EmptyResponse("completion choices"))?;

        if let Some(usage) = parsed.usage {
            tracing::info!(
                model = %parsed.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "OpenAI token usage"
            );
        }

        Ok(ChatCompletion {
            content: content.trim().to_string(),
            model: parsed.model,
            usage: parsed.usage,
        })
    }

    /// Chat completion over an already truncated window.
    pub async fn chat(
        &self,
        model: &ModelName,
        messages: &[WireMessage],
        options: ChatOptions,
    ) -> Result<ChatCompletion, ProviderError> {
        let mut body = json!({
            "model": model.as_str(),
            "messages": messages,
        });
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        tracing::debug!(model = %model, messages = messages.len(), "Sending chat completion");
        self.complete(body).await
    }

    /// Single-turn question about one image. `image_url` may be a data URL.
    pub async fn vision(
        &self,
        model: &ModelName,
        caption: &str,
        image_url: &str,
    ) -> Result<ChatCompletion, ProviderError> {
        let body = json!({
            "model": model.as_str(),
            "messages": [{
                "role": Role::User,
                "content": [
                    { "type": "text", "text": caption },
                    { "type": "image_url", "image_url": { "url": image_url } },
                ],
            }],
        });

        tracing::debug!(model = %model, "Sending vision request");
        self.complete(body).await
    }

    pub async fn generate_image(
        &self,
        model: &ModelName,
        prompt: &str,
        size: &str,
    ) -> Result<GeneratedImage, ProviderError> {
        let body = json!({
            "model": model.as_str(),
            "prompt": prompt,
            "n": 1,
            "size": size,
        });

        tracing::debug!(model = %model, size, "Requesting image generation");
        let response = self.post_json("images/generations", &body).await?;
        let parsed: ImagesResponse = response.json().await.map_err(ProviderError::Decode)?;

        parsed
            .data
            .into_iter()
            .find_map(|image| {
                image.url.map(|url| GeneratedImage {
                    url,
                    revised_prompt: image.revised_prompt,
                })
            })
            .ok_or(ProviderError::EmptyResponse("image URL"))
    }
}
