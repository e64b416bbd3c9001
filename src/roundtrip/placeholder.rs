//! Session table pairing internal tag payloads with the placeholder tokens
//! visible in an exported bilingual document.
//!
//! Tokens look like `<<t:3>>`. Numbers are minted in first-seen order at
//! export time; within one session the same payload always maps to the same
//! token, and a token means nothing outside the session that minted it. The
//! table travels as a sidecar file next to the exported document and is
//! loaded back for reimport.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::segment::{Run, SegText, Tag};

use super::RoundTripError;

const TOKEN_OPEN: &str = "<<t:";
const TOKEN_CLOSE: &str = ">>";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderMap {
    tags: Vec<Tag>,
}

impl PlaceholderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Token for a payload, minting the next number on first sight.
    pub fn token_for(&mut self, tag: &Tag) -> String {
        let number = match self.tags.iter().position(|t| t.payload == tag.payload) {
            Some(pos) => pos + 1,
            None => {
                self.tags.push(tag.clone());
                self.tags.len()
            }
        };
        format!("{TOKEN_OPEN}{number}{TOKEN_CLOSE}")
    }

    fn tag_for_number(&self, number: usize) -> Option<&Tag> {
        self.tags.get(number.checked_sub(1)?)
    }

    /// Render one side of a segment as editable text, tags as tokens.
    pub fn render(&mut self, text: &SegText) -> String {
        let mut out = String::new();
        for run in &text.runs {
            match run {
                Run::Text(text) => out.push_str(text),
                Run::Tag(tag) => out.push_str(&self.token_for(tag)),
            }
        }
        out
    }

    /// Parse edited text back into runs, restoring known tokens to their
    /// tags. Anything that merely looks like a token stays literal text, so
    /// a stray `<<t:99>>` typed by hand survives as text and shows up in
    /// tag validation instead of vanishing.
    pub fn parse(&self, text: &str) -> SegText {
        let mut result = SegText::default();
        let mut plain = String::new();
        let mut rest = text;

        while let Some(start) = rest.find(TOKEN_OPEN) {
            plain.push_str(&rest[..start]);
            let after = &rest[start + TOKEN_OPEN.len()..];

            let token = after.find(TOKEN_CLOSE).and_then(|end| {
                let digits = &after[..end];
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let number: usize = digits.parse().ok()?;
                Some((end, self.tag_for_number(number)?.clone()))
            });

            match token {
                Some((end, tag)) => {
                    if !plain.is_empty() {
                        result.push_text(std::mem::take(&mut plain));
                    }
                    result.push_tag(tag);
                    rest = &after[end + TOKEN_CLOSE.len()..];
                }
                None => {
                    plain.push_str(TOKEN_OPEN);
                    rest = after;
                }
            }
        }

        plain.push_str(rest);
        if !plain.is_empty() {
            result.push_text(plain);
        }
        result
    }

    /// Persist the session table next to an exported document.
    pub fn save(&self, path: &Path) -> Result<(), RoundTripError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| RoundTripError::Session(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, RoundTripError> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| RoundTripError::Session(e.to_string()))
    }
}
