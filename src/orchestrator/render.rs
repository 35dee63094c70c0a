//! Turning raw model output into something safe to post.

use once_cell::sync::Lazy;
use regex::Regex;

pub const ERROR_SENTINEL: &str = "[Error]";

static LINK_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://").expect("link scheme pattern is valid"));

/// Drops everything from the first line that starts with `#`.
pub fn cut_runaway(text: &str) -> &str {
    match text.find("\n#") {
        Some(index) => &text[..index],
        None => text,
    }
}

/// Caps `text` at `max_chars` characters, marking the cut with `...`.
pub fn cap_length(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}

/// Neutralizes markup, mentions and links.
pub fn escape_for_transport(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('<', "\\<")
        .replace('>', "\\>")
        .replace('@', "\\@ ");
    LINK_SCHEME.replace_all(&escaped, "").into_owned()
}

pub fn render_text_reply(raw: &str, max_chars: usize) -> String {
    let capped = cap_length(cut_runaway(raw), max_chars);
    let rendered = escape_for_transport(&capped).trim().to_string();
    if rendered.is_empty() {
        ERROR_SENTINEL.to_string()
    } else {
        rendered
    }
}

/// First usable caption line from a caption-writing call, or `fallback`.
pub fn clean_caption(raw: &str, fallback: &str) -> String {
    let caption = cut_runaway(raw).trim();
    if caption.is_empty() {
        fallback.to_string()
    } else {
        caption.replace('\n', " ")
    }
}
