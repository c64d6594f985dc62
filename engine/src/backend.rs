use async_trait::async_trait;

use dalibot_providers::{ChatCompletion, ChatOptions, GeneratedImage, OpenAIClient, ProviderError};
use dalibot_types::{ModelName, WireMessage};

/// Upstream model API used by the relay.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        model: &ModelName,
        messages: &[WireMessage],
        options: ChatOptions,
    ) -> Result<ChatCompletion, ProviderError>;

    /// One caption plus one image. `image_url` may be a `data:` URL.
    async fn vision(
        &self,
        model: &ModelName,
        caption: &str,
        image_url: &str,
    ) -> Result<ChatCompletion, ProviderError>;

    async fn generate_image(
        &self,
        model: &ModelName,
        prompt: &str,
        size: &str,
    ) -> Result<GeneratedImage, ProviderError>;
}

#[async_trait]
impl ChatBackend for OpenAIClient {
    async fn chat(
        &self,
        model: &ModelName,
        messages: &[WireMessage],
        options: ChatOptions,
    ) -> Result<ChatCompletion, ProviderError> {
        OpenAIClient::chat(self, model, messages, options).await
    }

    async fn vision(
        &self,
        model: &ModelName,
        caption: &str,
        image_url: &str,
    ) -> Result<ChatCompletion, ProviderError> {
        OpenAIClient::vision(self, model, caption, image_url).await
    }

    async fn generate_image(
        &self,
        model: &ModelName,
        prompt: &str,
        size: &str,
    ) -> Result<GeneratedImage, ProviderError> {
        OpenAIClient::generate_image(self, model, prompt, size).await
    }
}
