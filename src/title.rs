//! Conversation title derivation.

use once_cell::sync::Lazy;
use regex::Regex;

/// Title used when nothing printable is left after cleaning.
pub const DEFAULT_TITLE: &str = "Cuộc trò chuyện mới";

const MAX_TITLE_CHARS: usize = 50;
const ELLIPSIS: &str = "...";

/// Anything outside ASCII word characters, whitespace and the Latin ranges
/// that carry Vietnamese diacritics.
static DISALLOWED_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^A-Za-z0-9_\s\x{00C0}-\x{024F}\x{1E00}-\x{1EFF}]")
        .expect("Invalid title filter regex")
});

/// Derive a conversation title from the first user message.
///
/// # Example
/// ```
/// use tthc_chat::title::derive_title;
///
/// assert_eq!(derive_title("Hỏi gì"), "Hỏi gì");
/// assert_eq!(derive_title("???"), "Cuộc trò chuyện mới");
/// ```
pub fn derive_title(text: &str) -> String {
    let cleaned = DISALLOWED_CHARS.replace_all(text, "");
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return DEFAULT_TITLE.to_string();
    }

    if cleaned.chars().count() > MAX_TITLE_CHARS {
        let mut title: String = cleaned.chars().take(MAX_TITLE_CHARS).collect();
        title.push_str(ELLIPSIS);
        title
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_clean_input_is_unchanged() {
        assert_eq!(derive_title("Hỏi gì"), "Hỏi gì");
        assert_eq!(derive_title("Đăng ký doanh nghiệp"), "Đăng ký doanh nghiệp");
    }

    #[test]
    fn test_strips_punctuation_and_symbols() {
        assert_eq!(derive_title("  Thủ tục 1.001?!  "), "Thủ tục 1001");
        assert_eq!(derive_title("🚀 Cấp hộ chiếu"), "Cấp hộ chiếu");
    }

    #[test]
    fn test_truncates_long_input() {
        let text = "a".repeat(60);
        let title = derive_title(&text);
        assert_eq!(title, format!("{}...", "a".repeat(50)));

        let exact = "ư".repeat(50);
        assert_eq!(derive_title(&exact), exact);
    }

    #[test]
    fn test_empty_input_uses_placeholder() {
        assert_eq!(derive_title(""), DEFAULT_TITLE);
        assert_eq!(derive_title("   "), DEFAULT_TITLE);
        assert_eq!(derive_title("?!."), DEFAULT_TITLE);
    }
}
