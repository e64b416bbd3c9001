//! Embedding input preparation for TM entry source text.
//!
//! The embedded text is the whitespace-normalized plain text of the source
//! segment. Tag payloads are excluded on purpose: markup bytes carry no
//! meaning and would pull unrelated entries together just because both are
//! heavily tagged.

use crate::segment::SegText;

/// Maximum embedding input length (characters, not tokens)
const MAX_INPUT_LENGTH: usize = 512;

/// Ellipsis suffix when input is truncated
const TRUNCATION_SUFFIX: &str = "...";

/// Prepare a segment's source side for embedding.
///
/// Returns `None` when the segment has no text content (tags only or empty),
/// in which case the entry is simply not indexed.
pub fn embedding_input(source: &SegText) -> Option<String> {
    let text = source.normalized_text();
    if text.is_empty() {
        return None;
    }
    Some(truncate_input(&text))
}

fn truncate_input(text: &str) -> String {
    if text.chars().count() <= MAX_INPUT_LENGTH {
        return text.to_string();
    }

    let max_chars = MAX_INPUT_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}

/// Hash of the embedding input, used for change detection: an entry whose
/// stored hash still matches does not need re-embedding on reconcile.
pub fn content_hash(input: &str) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.trim().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Tag;

    #[test]
    fn empty_and_tag_only_segments_yield_none() {
        assert!(embedding_input(&SegText::default()).is_none());
        assert!(embedding_input(&SegText::from_text("   \t ")).is_none());

        let mut tags_only = SegText::default();
        tags_only.push_tag(Tag::new("bold", "<b>"));
        assert!(embedding_input(&tags_only).is_none());
    }

    #[test]
    fn input_is_normalized_plain_text_without_tags() {
        let mut text = SegText::default();
        text.push_text("Click  ");
        text.push_tag(Tag::new("bold", "<b>"));
        text.push_text("here");

        assert_eq!(embedding_input(&text), Some("Click here".to_string()));
    }

    #[test]
    fn long_input_is_truncated_with_suffix() {
        let long = "x".repeat(600);
        let input = embedding_input(&SegText::from_text(long)).unwrap();
        assert!(input.chars().count() <= MAX_INPUT_LENGTH);
        assert!(input.ends_with(TRUNCATION_SUFFIX));
    }

    #[test]
    fn content_hash_is_deterministic_and_content_sensitive() {
        assert_eq!(content_hash("Hello world."), content_hash("Hello world."));
        assert_ne!(content_hash("Hello world."), content_hash("Good morning."));
    }
}
