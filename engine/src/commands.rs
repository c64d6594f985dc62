//! Slash commands understood by the bot.
//!
//! Every inbound text goes through [`Command::parse`] first. A command is
//! handled directly and never reaches the history or the model.

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
}

const COMMAND_SPECS: &[CommandSpec] = &[
    CommandSpec {
        name: "start",
        usage: "/start",
        description: "Say hello",
    },
    CommandSpec {
        name: "reset",
        usage: "/reset",
        description: "Forget the conversation and restore the default system prompt",
    },
    CommandSpec {
        name: "system",
        usage: "/system <prompt>",
        description: "Replace the system prompt and start over",
    },
    CommandSpec {
        name: "model",
        usage: "/model <name>",
        description: "Switch the chat model (gpt-4o, gpt-4o-mini, 4, 3)",
    },
    CommandSpec {
        name: "help",
        usage: "/help",
        description: "Show available commands",
    },
];

#[must_use]
pub fn command_specs() -> &'static [CommandSpec] {
    COMMAND_SPECS
}

#[must_use]
pub fn help_text() -> String {
    let lines: Vec<String> = COMMAND_SPECS
        .iter()
        .map(|spec| format!("{} - {}", spec.usage, spec.description))
        .collect();
    format!("Commands:\n{}", lines.join("\n"))
}

/// Parsed command with its argument text.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Start,
    Reset,
    System(&'a str),
    Model(&'a str),
    Help,
    Unknown(&'a str),
}

/// Strips zero-width and direction marks that clients sometimes put before the slash.
fn strip_invisible(text: &str) -> &str {
    const INVISIBLE: &[char] = &[
        '\u{feff}', '\u{200b}', '\u{200c}', '\u{200d}', '\u{2060}', '\u{200e}', '\u{200f}',
    ];
    text.trim_start_matches(|c: char| c.is_whitespace() || INVISIBLE.contains(&c))
        .trim_end()
}

impl<'a> Command<'a> {
    /// Returns `None` for ordinary text.
    ///
    /// Accepts `/cmd@botname` as sent in group chats. When `bot_username` is
    /// known, a command addressed to any other bot is ordinary text. Arguments
    /// are the rest of the message with surrounding whitespace removed.
    #[must_use]
    pub fn parse(raw: &'a str, bot_username: Option<&str>) -> Option<Self> {
        let text = strip_invisible(raw);
        let body = text.strip_prefix('/')?;

        let (head, args) = match body.find(char::is_whitespace) {
            Some(idx) => (&body[..idx], body[idx..].trim()),
            None => (body, ""),
        };
        let (name, addressee) = match head.split_once('@') {
            Some((name, addressee)) => (name, Some(addressee)),
            None => (head, None),
        };
        if name.is_empty() {
            return None;
        }
        if let (Some(addressee), Some(own)) = (addressee, bot_username)
            && !addressee.eq_ignore_ascii_case(own.trim_start_matches('@'))
        {
            return None;
        }

        let command = match name.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "reset" => Command::Reset,
            "system" => Command::System(args),
            "model" => Command::Model(args),
            "help" => Command::Help,
            _ => Command::Unknown(name),
        };
        Some(command)
    }
}
