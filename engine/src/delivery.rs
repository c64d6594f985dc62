//! Formatting replies for the chat platform.

use std::error::Error;
use std::fmt::Write as _;

/// Telegram's maximum message length, in UTF-16 code units.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

/// Splits `text` into chunks of at most `limit` UTF-16 units.
///
/// Chunks break after the last newline that fits; a single line longer than
/// the limit is cut at a character boundary. The newline at a break is dropped.
/// A character wider than `limit` still forms a chunk of its own.
#[must_use]
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    if utf16_len(text) <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let mut units = 0;
        let mut fit_end = remaining.len();
        let mut last_newline = None;
        for (idx, ch) in remaining.char_indices() {
            units += ch.len_utf16();
            if units > limit {
                fit_end = if idx == 0 { ch.len_utf8() } else { idx };
                break;
            }
            if ch == '\n' {
                last_newline = Some(idx);
            }
        }

        if fit_end == remaining.len() {
            chunks.push(remaining.to_string());
            break;
        }

        match last_newline {
            Some(nl) if nl > 0 => {
                chunks.push(remaining[..nl].to_string());
                remaining = &remaining[nl + 1..];
            }
            _ => {
                chunks.push(remaining[..fit_end].to_string());
                remaining = &remaining[fit_end..];
            }
        }
    }
    chunks
}

#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// HTML diagnostic for the operator chat: the update that failed and the
/// error with its source chain. Each part is escaped and capped so the whole
/// message fits in one Telegram message.
#[must_use]
pub fn format_diagnostic(update_summary: &str, error: &(dyn Error + 'static)) -> String {
    const PART_LIMIT: usize = 1800;

    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(chain, "\ncaused by: {cause}");
        source = cause.source();
    }

    format!(
        "An exception was raised while handling an update\n\
         <pre>update = {}</pre>\n\n\
         <pre>{}</pre>",
        escape_html(clip_chars(update_summary, PART_LIMIT)),
        escape_html(clip_chars(&chain, PART_LIMIT)),
    )
}

fn clip_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer <failure>")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn splits_on_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc";
        let chunks = split_message(text, 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn long_line_is_cut_at_char_boundary() {
        let text = "é".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunks_respect_utf16_limit() {
        // Each emoji is two UTF-16 units.
        let text = "😀".repeat(6);
        let chunks = split_message(&text, 4);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| utf16_len(c) <= 4));
    }

    #[test]
    fn character_wider_than_limit_still_advances() {
        assert_eq!(split_message("\u{1F600}", 1), vec!["\u{1F600}".to_string()]);
        assert_eq!(split_message("a\u{1F600}b", 1), vec!["a", "\u{1F600}", "b"]);
    }

    #[test]
    fn full_size_reply_splits_under_limit() {
        let line = "x".repeat(100);
        let text = vec![line; 100].join("\n");
        let chunks = split_message(&text, TELEGRAM_MESSAGE_LIMIT);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| utf16_len(c) <= TELEGRAM_MESSAGE_LIMIT));
    }

    #[test]
    fn escapes_html_specials() {
        assert_eq!(escape_html("<b>&\"x\"</b>"), "&lt;b&gt;&amp;&quot;x&quot;&lt;/b&gt;");
    }

    #[test]
    fn diagnostic_includes_escaped_chain() {
        let err = Outer(std::io::Error::other("disk <gone>"));
        let text = format_diagnostic("chat 42: <hi>", &err);
        assert!(text.contains("<pre>update = chat 42: &lt;hi&gt;</pre>"));
        assert!(text.contains("outer &lt;failure&gt;"));
        assert!(text.contains("caused by: disk &lt;gone&gt;"));
        assert!(utf16_len(&text) <= TELEGRAM_MESSAGE_LIMIT);
    }
}
