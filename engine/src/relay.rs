//! One inbound message in, one reply out.
//!
//! [`Relay`] owns the flow between the session store and the model backend.
//! It knows nothing about Telegram: the dispatcher hands it text or photo
//! bytes and sends back whatever [`RelayReply`] it gets.

use thiserror::Error;

use dalibot_context::SessionStore;
use dalibot_providers::{ChatOptions, ProviderError};
use dalibot_types::{
    ChatMessage, ChatModelPreset, ImageReference, ModelName, Role, SessionId, WireMessage,
};

use crate::backend::ChatBackend;
use crate::commands::{Command, help_text};
use crate::media::InboundPhoto;
use crate::prompts::{
    self, ASSISTANT_NAME, IMAGE_ASSISTANT_NAME, IMAGE_ROUTER_PROMPT, RESET_REPLY,
    SYSTEM_PROMPT_REPLY, SYSTEM_PROMPT_USAGE,
};
use crate::routing::{
    Intent, ROUTER_MAX_TOKENS, ROUTER_TEMPERATURE, clip_router_input, parse_router_reply,
};

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub bot_name: String,
    /// Telegram `@username`; commands addressed to another bot are ignored.
    pub bot_username: Option<String>,
    pub router_model: ModelName,
    pub image_size: String,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayReply {
    Text(String),
    Photo { url: String, caption: Option<String> },
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("model request failed")]
    Provider(#[from] ProviderError),
}

pub struct Relay<B> {
    backend: B,
    sessions: SessionStore,
    settings: RelaySettings,
}

impl<B> std::fmt::Debug for Relay<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("sessions", &self.sessions)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<B: ChatBackend> Relay<B> {
    pub fn new(backend: B, sessions: SessionStore, settings: RelaySettings) -> Self {
        Self {
            backend,
            sessions,
            settings,
        }
    }

    #[must_use]
    pub fn with_bot_username(mut self, username: Option<String>) -> Self {
        self.settings.bot_username = username;
        self
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Handles a text message: a command, an image request, or a chat turn.
    pub async fn handle_text(
        &self,
        session: SessionId,
        username: &str,
        text: &str,
    ) -> Result<RelayReply, RelayError> {
        if let Some(command) = Command::parse(text, self.settings.bot_username.as_deref()) {
            return Ok(RelayReply::Text(self.run_command(session, command)));
        }

        match self.route(text).await {
            Intent::Image { prompt } => self.image_turn(session, username, text, &prompt).await,
            Intent::Chat => self.chat_turn(session, username, text).await,
        }
    }

    /// Handles a photo with an optional caption through the vision model.
    ///
    /// The user turn is recorded before the request, like a chat turn. History
    /// keeps the platform file id, not the image bytes.
    pub async fn handle_photo(
        &self,
        session: SessionId,
        username: &str,
        caption: &str,
        photo: InboundPhoto<'_>,
    ) -> Result<RelayReply, RelayError> {
        let model = self.sessions.models(session).chat_model().clone();
        self.sessions.insert(
            session,
            ChatMessage::image(Role::User, username, caption, photo.reference()),
        );

        tracing::info!(session = %session, model = %model, bytes = photo.bytes.len(), "Vision turn");
        let completion = self
            .backend
            .vision(&model, caption, &photo.data_url())
            .await?;

        self.sessions.insert(
            session,
            ChatMessage::text(Role::Assistant, ASSISTANT_NAME, completion.content.clone()),
        );
        Ok(RelayReply::Text(completion.content))
    }

    fn run_command(&self, session: SessionId, command: Command<'_>) -> String {
        tracing::debug!(session = %session, command = ?command, "Handling command");
        match command {
            Command::Start => prompts::greeting(&self.settings.bot_name),
            Command::Help => help_text(),
            Command::Reset => {
                self.sessions.reset(session);
                RESET_REPLY.to_string()
            }
            Command::System(prompt) if prompt.is_empty() => SYSTEM_PROMPT_USAGE.to_string(),
            Command::System(prompt) => {
                self.sessions.set_system_prompt(session, prompt);
                SYSTEM_PROMPT_REPLY.to_string()
            }
            Command::Model("") => {
                let models = self.sessions.models(session);
                prompts::current_model(models.chat_model().as_str())
            }
            Command::Model(arg) => match ChatModelPreset::parse(arg) {
                Ok(preset) => {
                    self.sessions.set_chat_model(session, preset.to_model_name());
                    prompts::model_changed(preset.model_id())
                }
                Err(err) => prompts::unknown_model(err.raw(), err.expected()),
            },
            Command::Unknown(name) => prompts::unknown_command(name),
        }
    }

    async fn route(&self, text: &str) -> Intent {
        let messages = [
            WireMessage::new(Role::System, IMAGE_ROUTER_PROMPT),
            WireMessage::new(Role::User, clip_router_input(text)),
        ];
        let options = ChatOptions {
            temperature: Some(ROUTER_TEMPERATURE),
            max_tokens: Some(ROUTER_MAX_TOKENS),
        };
        match self
            .backend
            .chat(&self.settings.router_model, &messages, options)
            .await
        {
            Ok(reply) => parse_router_reply(&reply.content, text),
            Err(err) => {
                tracing::warn!(error = %err, "Intent router failed; answering as text");
                Intent::Chat
            }
        }
    }

    async fn chat_turn(
        &self,
        session: SessionId,
        username: &str,
        text: &str,
    ) -> Result<RelayReply, RelayError> {
        let model = self.sessions.models(session).chat_model().clone();
        let window = self
            .sessions
            .record_and_window(session, ChatMessage::text(Role::User, username, text));

        tracing::info!(session = %session, model = %model, window = window.len(), "Chat turn");
        let options = ChatOptions {
            temperature: Some(self.settings.temperature),
            max_tokens: None,
        };
        let completion = self.backend.chat(&model, &window, options).await?;

        self.sessions.insert(
            session,
            ChatMessage::text(Role::Assistant, ASSISTANT_NAME, completion.content.clone()),
        );
        Ok(RelayReply::Text(completion.content))
    }

    async fn image_turn(
        &self,
        session: SessionId,
        username: &str,
        text: &str,
        prompt: &str,
    ) -> Result<RelayReply, RelayError> {
        let model = self.sessions.models(session).image_model().clone();
        tracing::info!(session = %session, model = %model, "Image turn");

        let image = self
            .backend
            .generate_image(&model, prompt, &self.settings.image_size)
            .await?;

        self.sessions
            .insert(session, ChatMessage::text(Role::User, username, text));
        self.sessions.insert(
            session,
            ChatMessage::image(
                Role::Assistant,
                IMAGE_ASSISTANT_NAME,
                prompt,
                ImageReference::Url(image.url.clone()),
            ),
        );
        Ok(RelayReply::Photo {
            url: image.url,
            caption: image.revised_prompt,
        })
    }
}
