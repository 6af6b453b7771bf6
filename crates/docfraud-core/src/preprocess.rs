//! Size policy applied to extracted text before it reaches the completion service.

use tracing::warn;

/// Document text as it will be embedded in the analysis prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedText<'a> {
    pub text: &'a str,
    /// Original character count when the text was cut, `None` when forwarded whole.
    pub truncated_from: Option<usize>,
}

impl<'a> PreparedText<'a> {
    pub fn whole(text: &'a str) -> Self {
        Self {
            text,
            truncated_from: None,
        }
    }
}

/// Cut `text` to at most `max_chars` characters, always on a character boundary.
pub fn prepare_text(text: &str, max_chars: usize) -> PreparedText<'_> {
    match text.char_indices().nth(max_chars) {
        None => PreparedText::whole(text),
        Some((cut, _)) => {
            let original = text.chars().count();
            warn!(
                original_chars = original,
                kept_chars = max_chars,
                "document text exceeds input budget; truncating"
            );
            PreparedText {
                text: &text[..cut],
                truncated_from: Some(original),
            }
        }
    }
}
