//! Text-or-image intent routing.
//!
//! A small router model reads the user's text and answers either `@noimage`
//! or `@image <prompt>`. Only the marker matters; anything before it is ignored.

use crate::prompts::IMAGE_MARKER;

/// Router input is clipped to this many characters.
pub const ROUTER_INPUT_LIMIT: usize = 2048;

/// Completion budget for the router call.
pub const ROUTER_MAX_TOKENS: u32 = 512;

pub const ROUTER_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Chat,
    Image { prompt: String },
}

/// Interprets the router reply for `user_text`.
///
/// An `@image` reply with nothing after the marker still routes to the image
/// path, using the user's own text as the prompt.
#[must_use]
pub fn parse_router_reply(reply: &str, user_text: &str) -> Intent {
    let Some(idx) = find_image_marker(reply) else {
        return Intent::Chat;
    };
    let prompt = reply[idx + IMAGE_MARKER.len()..]
        .trim()
        .trim_matches(|c| matches!(c, '[' | ']' | '\'' | '"'))
        .trim();
    let prompt = if prompt.is_empty() {
        user_text.trim()
    } else {
        prompt
    };
    Intent::Image {
        prompt: prompt.to_string(),
    }
}

// `@imagery` or similar words must not count as the marker.
fn find_image_marker(reply: &str) -> Option<usize> {
    reply.match_indices(IMAGE_MARKER).find_map(|(idx, _)| {
        let rest = &reply[idx + IMAGE_MARKER.len()..];
        let boundary = rest
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric() && c != '_');
        boundary.then_some(idx)
    })
}

/// First `ROUTER_INPUT_LIMIT` characters of `text`.
#[must_use]
pub fn clip_router_input(text: &str) -> &str {
    match text.char_indices().nth(ROUTER_INPUT_LIMIT) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noimage_routes_to_chat() {
        assert_eq!(parse_router_reply("@noimage", "hi"), Intent::Chat);
        assert_eq!(parse_router_reply("plain answer", "hi"), Intent::Chat);
    }

    #[test]
    fn image_marker_extracts_prompt() {
        assert_eq!(
            parse_router_reply("@image [a corgi on a skateboard]", "draw a dog"),
            Intent::Image {
                prompt: "a corgi on a skateboard".to_string()
            }
        );
    }

    #[test]
    fn bare_marker_falls_back_to_user_text() {
        assert_eq!(
            parse_router_reply("Sure! @image", "  draw a cat "),
            Intent::Image {
                prompt: "draw a cat".to_string()
            }
        );
    }

    #[test]
    fn marker_needs_word_boundary() {
        assert_eq!(parse_router_reply("@imagery is nice", "hi"), Intent::Chat);
    }

    #[test]
    fn clip_respects_char_boundaries() {
        let short = "héllo";
        assert_eq!(clip_router_input(short), short);

        let long = "é".repeat(ROUTER_INPUT_LIMIT + 10);
        let clipped = clip_router_input(&long);
        assert_eq!(clipped.chars().count(), ROUTER_INPUT_LIMIT);
    }
}
