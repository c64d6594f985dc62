//! Fixed prompt text and canned replies.

/// System prompt every conversation starts with unless configured otherwise.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.\n\n\
Always return a response that is less than 3600 or so in string length. \
User can ask follow up questions if a longer response is needed.";

/// Instructions for the router model that decides between text and image replies.
pub const IMAGE_ROUTER_PROMPT: &str = "Use your best judgement to analyze this user prompt, \
and find out if user wants a text or image response. If the user wants to draw or return an \
image, generate an image prompt for it and append @image. This prompt will be sent to an image \
generation model. For example, if user asks to create a dog image, you return \
'@image [your_detailed_image_prompt]'. If the user wants text response, just return '@noimage'.";

/// Router reply marker that selects the image path.
pub const IMAGE_MARKER: &str = "@image";

/// Username recorded on generated image turns.
pub const IMAGE_ASSISTANT_NAME: &str = "Assistant-image";

/// Username recorded on assistant text turns.
pub const ASSISTANT_NAME: &str = "Assistant";

pub const RESET_REPLY: &str = "Reset..";
pub const SYSTEM_PROMPT_REPLY: &str = "Sure.";
pub const SYSTEM_PROMPT_USAGE: &str = "Usage: /system <prompt>";
pub const APOLOGY: &str = "Sorry, something went wrong while answering. Please try again.";

#[must_use]
pub fn greeting(bot_name: &str) -> String {
    format!("Welcome! I'm a GPT-powered {bot_name}.")
}

#[must_use]
pub fn model_changed(model: &str) -> String {
    format!("Changing model to {model}")
}

#[must_use]
pub fn current_model(model: &str) -> String {
    format!("Current model: {model}\nUse /model <name> to switch.")
}

#[must_use]
pub fn unknown_model(raw: &str, expected: &[&str]) -> String {
    format!(
        "Unknown model '{raw}'. Choose one of: {}",
        expected.join(", ")
    )
}

#[must_use]
pub fn unknown_command(name: &str) -> String {
    format!("Unknown command /{name}. Send /help for the list of commands.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_names_the_bot() {
        assert_eq!(greeting("Dalibot"), "Welcome! I'm a GPT-powered Dalibot.");
    }

    #[test]
    fn router_prompt_mentions_marker() {
        assert!(IMAGE_ROUTER_PROMPT.contains(IMAGE_MARKER));
        assert!(IMAGE_ROUTER_PROMPT.contains("@noimage"));
    }

    #[test]
    fn unknown_model_lists_choices() {
        let text = unknown_model("llama", &["gpt-4o", "gpt-4o-mini"]);
        assert!(text.contains("'llama'"));
        assert!(text.ends_with("gpt-4o, gpt-4o-mini"));
    }
}
