//! Relay flow for Dalibot, independent of the chat transport.
//!
//! - [`commands`]: slash command parsing and help text
//! - [`routing`]: text-or-image intent routing
//! - [`Relay`]: chat, image and vision turns over a [`SessionStore`](dalibot_context::SessionStore)
//! - [`delivery`]: message splitting and operator diagnostics
//! - [`media`]: inbound photos for vision requests

mod backend;
pub mod commands;
pub mod delivery;
pub mod media;
pub mod prompts;
mod relay;
pub mod routing;

pub use backend::ChatBackend;
pub use commands::{Command, help_text};
pub use delivery::{TELEGRAM_MESSAGE_LIMIT, escape_html, format_diagnostic, split_message};
pub use media::InboundPhoto;
pub use prompts::{APOLOGY, DEFAULT_SYSTEM_PROMPT};
pub use relay::{Relay, RelayError, RelayReply, RelaySettings};
pub use routing::Intent;
