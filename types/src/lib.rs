//! Core domain types for Dalibot.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

mod ids;
mod message;
mod model;

pub use ids::SessionId;
pub use message::{
    ChatMessage, ImageReference, InvalidMessageError, MessageKind, Role, TokenMemo, WireMessage,
};
pub use model::{ChatModelPreset, ModelName, ModelParseError, ModelSelection};

// ============================================================================
// API Keys
// ============================================================================

/// An OpenAI API key.
///
/// Note: `Debug` is manually implemented to redact the key value, preventing accidental
/// credential disclosure in logs or error messages.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::ApiKey;

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("sk-secret-value");
        let debug = format!("{key:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("redacted"));
        assert_eq!(key.as_str(), "sk-secret-value");
    }
}
