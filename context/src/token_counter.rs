//! Token estimation using tiktoken.
//!
//! The encoding is chosen from the model name through tiktoken's model table
//! (`gpt-4o` → `o200k_base`, `gpt-4-turbo` / `gpt-3.5-turbo` → `cl100k_base`, ...).
//! Models tiktoken does not know about (image models, custom deployments) fall
//! back to `o200k_base`. Counts are for budgeting only, never billing:
//!
//! - **Message overhead**: the fixed 4-token overhead per message is an approximation
//! - **Missing vocabulary**: if an encoding fails to load, counting degrades to
//!   byte length, which over-estimates and therefore stays on the safe side

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;
use tiktoken_rs::tokenizer::{Tokenizer, get_tokenizer};

use dalibot_types::ChatMessage;

const MESSAGE_OVERHEAD: u32 = 4;

/// Tokenization schemes the counter can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    O200kBase,
    Cl100kBase,
    P50kBase,
    R50kBase,
}

impl Encoding {
    /// Scheme used for models tiktoken does not recognize.
    pub const DEFAULT: Encoding = Encoding::O200kBase;

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Encoding::O200kBase => "o200k_base",
            Encoding::Cl100kBase => "cl100k_base",
            Encoding::P50kBase => "p50k_base",
            Encoding::R50kBase => "r50k_base",
        }
    }

    /// Returns the encoding for `model`, or `None` when tiktoken does not know it.
    #[must_use]
    pub fn for_model(model: &str) -> Option<Self> {
        match get_tokenizer(model.trim())? {
            Tokenizer::O200kBase => Some(Encoding::O200kBase),
            Tokenizer::Cl100kBase => Some(Encoding::Cl100kBase),
            Tokenizer::P50kBase | Tokenizer::P50kEdit => Some(Encoding::P50kBase),
            Tokenizer::R50kBase | Tokenizer::Gpt2 => Some(Encoding::R50kBase),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Vocabularies are expensive to load, so each is built once per process.
    fn encoder(self) -> Option<&'static CoreBPE> {
        static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();
        static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();
        static P50K: OnceLock<Option<CoreBPE>> = OnceLock::new();
        static R50K: OnceLock<Option<CoreBPE>> = OnceLock::new();

        let cell = match self {
            Encoding::O200kBase => &O200K,
            Encoding::Cl100kBase => &CL100K,
            Encoding::P50kBase => &P50K,
            Encoding::R50kBase => &R50K,
        };

        cell.get_or_init(|| {
            let loaded = match self {
                Encoding::O200kBase => tiktoken_rs::o200k_base(),
                Encoding::Cl100kBase => tiktoken_rs::cl100k_base(),
                Encoding::P50kBase => tiktoken_rs::p50k_base(),
                Encoding::R50kBase => tiktoken_rs::r50k_base(),
            };
            match loaded {
                Ok(bpe) => Some(bpe),
                Err(e) => {
                    tracing::error!(
                        encoding = self.name(),
                        "Failed to initialize tiktoken encoder: {e}. Falling back to byte-length estimates."
                    );
                    None
                }
            }
        })
        .as_ref()
    }
}

/// Approximate token counter bound to one tokenization scheme.
///
/// Cheap to construct and `Copy`; the vocabularies behind it are shared
/// process-wide.
///
/// # Example
///
/// ```
/// use dalibot_context::TokenCounter;
///
/// let counter = TokenCounter::for_model("gpt-4o");
/// assert!(counter.count_str("Hello, world!") > 0);
///
/// // Unknown models degrade to the default scheme instead of failing.
/// let counter = TokenCounter::for_model("dall-e-3");
/// assert!(counter.is_fallback());
/// ```
#[derive(Clone, Copy)]
pub struct TokenCounter {
    encoding: Encoding,
    encoder: Option<&'static CoreBPE>,
    fallback: bool,
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoding", &self.encoding)
            .field("encoder", &self.encoder.as_ref().map(|_| "<CoreBPE>"))
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl TokenCounter {
    /// Counter using the default general-purpose scheme.
    #[must_use]
    pub fn new() -> Self {
        Self::with_encoding(Encoding::DEFAULT, false)
    }

    /// Counter using the scheme associated with `model`.
    #[must_use]
    pub fn for_model(model: &str) -> Self {
        match Encoding::for_model(model) {
            Some(encoding) => Self::with_encoding(encoding, false),
            None => {
                tracing::debug!(model, "No tokenizer registered for model; using default scheme");
                Self::with_encoding(Encoding::DEFAULT, true)
            }
        }
    }

    fn with_encoding(encoding: Encoding, fallback: bool) -> Self {
        Self {
            encoding,
            encoder: encoding.encoder(),
            fallback,
        }
    }

    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// True when the model was unknown and the default scheme was substituted.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Identifies the counting scheme for memoization.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self.encoder {
            Some(_) => self.encoding.name(),
            None => "bytes",
        }
    }

    #[must_use]
    pub fn count_str(&self, text: &str) -> u32 {
        let len = match self.encoder {
            Some(encoder) => encoder.encode_ordinary(text).len(),
            None => text.len(),
        };

        u32::try_from(len).unwrap_or(u32::MAX)
    }

    /// Counts tokens for a single message as it goes over the wire:
    /// role + content + ~4 tokens of structure. The result is memoized on the
    /// message for this counter's scheme.
    #[must_use]
    pub fn count_message(&self, msg: &ChatMessage) -> u32 {
        msg.tokens_with(self.scheme(), |msg| {
            self.count_str(msg.role().as_str()) + self.count_str(msg.content()) + MESSAGE_OVERHEAD
        })
    }

    #[must_use]
    pub fn count_messages<'a>(&self, messages: impl IntoIterator<Item = &'a ChatMessage>) -> u32 {
        messages
            .into_iter()
            .map(|msg| self.count_message(msg))
            .sum()
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Estimates the token cost of `text` under `model`'s tokenizer.
#[must_use]
pub fn estimate(text: &str, model: &str) -> u32 {
    TokenCounter::for_model(model).count_str(text)
}

#[cfg(test)]
mod tests {
    use super::{Encoding, TokenCounter, estimate};
    use dalibot_types::{ChatMessage, Role};

    #[test]
    fn known_models_resolve_their_encoding() {
        assert_eq!(Encoding::for_model("gpt-4o"), Some(Encoding::O200kBase));
        assert_eq!(Encoding::for_model("gpt-4o-mini"), Some(Encoding::O200kBase));
        assert_eq!(Encoding::for_model("gpt-4-turbo"), Some(Encoding::Cl100kBase));
        assert_eq!(
            Encoding::for_model("gpt-3.5-turbo"),
            Some(Encoding::Cl100kBase)
        );
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        let counter = TokenCounter::for_model("definitely-not-a-model");
        assert!(counter.is_fallback());
        assert_eq!(counter.encoding(), Encoding::DEFAULT);
        assert!(counter.count_str("still counts") > 0);
    }

    #[test]
    fn known_model_is_not_fallback() {
        let counter = TokenCounter::for_model("gpt-4o");
        assert!(!counter.is_fallback());
    }

    #[test]
    fn count_str_empty_string() {
        let counter = TokenCounter::new();
        assert_eq!(counter.count_str(""), 0);
    }

    #[test]
    fn count_str_longer_text() {
        let counter = TokenCounter::new();

        let text = "The quick brown fox jumps over the lazy dog.";
        let tokens = counter.count_str(text);

        assert!(tokens >= 5);
        assert!(tokens <= 20);
    }

    #[test]
    fn consistent_token_counts() {
        let text = "This is a test sentence for token counting.";
        assert_eq!(estimate(text, "gpt-4o"), estimate(text, "gpt-4o"));
        assert_eq!(
            estimate(text, "gpt-3.5-turbo"),
            TokenCounter::for_model("gpt-3.5-turbo").count_str(text)
        );
    }

    #[test]
    fn count_message_includes_role_and_overhead() {
        let counter = TokenCounter::new();
        let msg = ChatMessage::text(Role::User, "Ada", "Hello!");

        let expected = counter.count_str("Hello!") + counter.count_str("user") + 4;
        assert_eq!(counter.count_message(&msg), expected);
    }

    #[test]
    fn count_message_ignores_username() {
        let counter = TokenCounter::new();
        let short = ChatMessage::text(Role::User, "A", "same content");
        let long = ChatMessage::text(Role::User, "A very long display name indeed", "same content");
        assert_eq!(counter.count_message(&short), counter.count_message(&long));
    }

    #[test]
    fn count_message_memoizes_on_message() {
        let counter = TokenCounter::new();
        let msg = ChatMessage::text(Role::Assistant, "Assistant", "memo me");
        assert!(msg.token_memo().is_none());

        let tokens = counter.count_message(&msg);
        let memo = msg.token_memo().expect("memo set after counting");
        assert_eq!(memo.tokens, tokens);
        assert_eq!(memo.scheme, counter.scheme());
    }

    #[test]
    fn count_messages_sums_each_message() {
        let counter = TokenCounter::new();
        let messages = vec![
            ChatMessage::text(Role::User, "u", "Hello!"),
            ChatMessage::text(Role::Assistant, "a", "How are you today?"),
        ];
        let sum: u32 = messages.iter().map(|m| counter.count_message(m)).sum();
        assert_eq!(counter.count_messages(&messages), sum);
    }
}
