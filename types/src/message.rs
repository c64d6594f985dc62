//! Conversation turn records.
//!
//! A [`ChatMessage`] is one turn of a conversation. It is immutable once
//! constructed; the only interior state is the memoized token cost, which is
//! derived from the content and never observable as a mutation.
//! Constructors stamp the timestamp themselves; [`ChatMessage::with_timestamp`]
//! exists for callers (and tests) that own the clock.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
}

/// Where the picture of an image turn lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageReference {
    /// Remote URL, e.g. a generated image.
    Url(String),
    /// Binary held by the chat platform, e.g. a Telegram photo's
    /// `file_unique_id`. The bytes themselves are never stored.
    Attachment { file_id: String, media_type: String },
}

impl ImageReference {
    /// Remote URL, if the image has one. Attachments must be fetched from
    /// the platform.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            ImageReference::Url(url) => Some(url),
            ImageReference::Attachment { .. } => None,
        }
    }
}

/// Token cost of a message under one tokenization scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenMemo {
    pub scheme: &'static str,
    pub tokens: u32,
}

/// One turn of a conversation.
///
/// `kind` is derived from whether an image reference is present, so the two
/// can never disagree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ChatMessageSerde", into = "ChatMessageSerde")]
pub struct ChatMessage {
    role: Role,
    username: String,
    content: String,
    timestamp: DateTime<Utc>,
    image: Option<ImageReference>,
    token_memo: OnceLock<TokenMemo>,
}

impl ChatMessage {
    #[must_use]
    pub fn text(role: Role, username: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role,
            username: username.into(),
            content: content.into(),
            timestamp: Utc::now(),
            image: None,
            token_memo: OnceLock::new(),
        }
    }

    /// An image turn. `caption` may be empty.
    #[must_use]
    pub fn image(
        role: Role,
        username: impl Into<String>,
        caption: impl Into<String>,
        image: ImageReference,
    ) -> Self {
        Self {
            role,
            username: username.into(),
            content: caption.into(),
            timestamp: Utc::now(),
            image: Some(image),
            token_memo: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, "system", content)
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self.image {
            Some(_) => MessageKind::Image,
            None => MessageKind::Text,
        }
    }

    #[must_use]
    pub const fn image_reference(&self) -> Option<&ImageReference> {
        self.image.as_ref()
    }

    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self.role, Role::System)
    }

    /// Returns the memoized token cost for `scheme`, computing it on first use.
    ///
    /// The memo holds one scheme. A request for a different scheme is computed
    /// fresh and not stored.
    pub fn tokens_with(&self, scheme: &'static str, compute: impl FnOnce(&Self) -> u32) -> u32 {
        if let Some(memo) = self.token_memo.get() {
            if memo.scheme == scheme {
                return memo.tokens;
            }
            return compute(self);
        }

        let tokens = compute(self);
        let _ = self.token_memo.set(TokenMemo { scheme, tokens });
        tokens
    }

    #[must_use]
    pub fn token_memo(&self) -> Option<TokenMemo> {
        self.token_memo.get().copied()
    }

    /// The `{role, content}` pair sent to the chat-completion API.
    #[must_use]
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A message in the shape the chat-completion API expects. No metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl WireMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum InvalidMessageError {
    #[error("message kind is image but no image reference is present")]
    MissingImage,
    #[error("message kind is text but an image reference is present")]
    UnexpectedImage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessageSerde {
    role: Role,
    #[serde(default)]
    username: String,
    #[serde(default)]
    content: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_reference: Option<ImageReference>,
}

impl From<ChatMessage> for ChatMessageSerde {
    fn from(message: ChatMessage) -> Self {
        let kind = message.kind();
        Self {
            role: message.role,
            username: message.username,
            content: message.content,
            timestamp: message.timestamp,
            kind,
            image_reference: message.image,
        }
    }
}

impl TryFrom<ChatMessageSerde> for ChatMessage {
    type Error = InvalidMessageError;

    fn try_from(raw: ChatMessageSerde) -> Result<Self, Self::Error> {
        match (raw.kind, raw.image_reference.is_some()) {
            (MessageKind::Image, false) => return Err(InvalidMessageError::MissingImage),
            (MessageKind::Text, true) => return Err(InvalidMessageError::UnexpectedImage),
            _ => {}
        }

        Ok(Self {
            role: raw.role,
            username: raw.username,
            content: raw.content,
            timestamp: raw.timestamp,
            image: raw.image_reference,
            token_memo: OnceLock::new(),
        })
    }
}
