//! Model names and the per-conversation model selection.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A model identifier as understood by the upstream API (e.g. `gpt-4o`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelName(String);

impl ModelName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Chat models selectable with `/model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatModelPreset {
    Gpt4o,
    Gpt4oMini,
    Gpt4Turbo,
    Gpt35Turbo,
}

const PRESET_MODEL_IDS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "gpt-3.5-turbo"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown model '{raw}'; expected one of: {expected:?}")]
pub struct ModelParseError {
    raw: String,
    expected: &'static [&'static str],
}

impl ModelParseError {
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub const fn expected(&self) -> &'static [&'static str] {
        self.expected
    }
}

impl ChatModelPreset {
    #[must_use]
    pub const fn all() -> &'static [ChatModelPreset] {
        &[
            ChatModelPreset::Gpt4o,
            ChatModelPreset::Gpt4oMini,
            ChatModelPreset::Gpt4Turbo,
            ChatModelPreset::Gpt35Turbo,
        ]
    }

    #[must_use]
    pub const fn model_id(self) -> &'static str {
        match self {
            ChatModelPreset::Gpt4o => "gpt-4o",
            ChatModelPreset::Gpt4oMini => "gpt-4o-mini",
            ChatModelPreset::Gpt4Turbo => "gpt-4-turbo",
            ChatModelPreset::Gpt35Turbo => "gpt-3.5-turbo",
        }
    }

    #[must_use]
    pub fn to_model_name(self) -> ModelName {
        ModelName::new(self.model_id())
    }

    /// Parses the argument of `/model`.
    ///
    /// Exact model ids match first. Anything else falls back to the tier
    /// keywords the bot has always accepted: an argument containing `4`
    /// selects GPT-4 Turbo, one containing `3` selects GPT-3.5 Turbo.
    pub fn parse(raw: &str) -> Result<Self, ModelParseError> {
        let trimmed = raw.trim();
        let err = || ModelParseError {
            raw: trimmed.to_string(),
            expected: PRESET_MODEL_IDS,
        };
        if trimmed.is_empty() {
            return Err(err());
        }

        if let Some(preset) = Self::all()
            .iter()
            .copied()
            .find(|preset| preset.model_id().eq_ignore_ascii_case(trimmed))
        {
            return Ok(preset);
        }

        if trimmed.contains('4') {
            Ok(ChatModelPreset::Gpt4Turbo)
        } else if trimmed.contains('3') {
            Ok(ChatModelPreset::Gpt35Turbo)
        } else {
            Err(err())
        }
    }
}

/// Current chat and image model of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    chat: ModelName,
    image: ModelName,
}

impl ModelSelection {
    #[must_use]
    pub fn new(chat: ModelName, image: ModelName) -> Self {
        Self { chat, image }
    }

    #[must_use]
    pub fn chat_model(&self) -> &ModelName {
        &self.chat
    }

    #[must_use]
    pub fn image_model(&self) -> &ModelName {
        &self.image
    }

    pub fn set_chat_model(&mut self, model: ModelName) {
        self.chat = model;
    }

    pub fn set_image_model(&mut self, model: ModelName) {
        self.image = model;
    }
}
