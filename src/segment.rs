//! Segment and inline-tag model.
//!
//! A segment is one translatable unit: an ordered sequence of text runs and
//! inline tags. Tag payloads are opaque; they round-trip byte-for-byte and
//! are only ever compared for equality, never parsed.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static WS_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Collapse whitespace runs to single spaces and trim. Case is preserved.
///
/// This is the normalization behind exact-lookup keys, so `"Hello   world"`
/// and `" Hello world "` are the same key. The fuzzy matcher applies the
/// same collapsing when it builds its comparison units.
pub fn normalize_ws(text: &str) -> String {
    WS_RUN_RE.replace_all(text.trim(), " ").into_owned()
}

/// Stable per-project segment identifier. Assigned at creation, never reused.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SegmentId {
    fn from(id: u64) -> Self {
        SegmentId(id)
    }
}

/// An inline formatting marker (bold span, hyperlink, field code).
///
/// `kind` is a short label from the document parser; `payload` is whatever
/// bytes the parser handed over. Two tags are the same tag iff their
/// payloads are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub kind: String,
    pub payload: String,
}

impl Tag {
    pub fn new(kind: impl Into<String>, payload: impl Into<String>) -> Self {
        Tag {
            kind: kind.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Run {
    Text(String),
    Tag(Tag),
}

/// One comparison unit of a segment as seen by the fuzzy matcher: a single
/// character of whitespace-normalized text, or a whole tag.
///
/// Tags are never decomposed into their payload bytes, so a segment full of
/// markup does not score closer or farther from a query because of how long
/// the markup happens to be.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MatchUnit {
    Ch(char),
    Tag(String),
}

/// Ordered run sequence making up one side (source or target) of a segment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegText {
    pub runs: Vec<Run>,
}

impl SegText {
    pub fn from_text(text: impl Into<String>) -> Self {
        SegText {
            runs: vec![Run::Text(text.into())],
        }
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.runs.push(Run::Text(text.into()));
    }

    pub fn push_tag(&mut self, tag: Tag) {
        self.runs.push(Run::Tag(tag));
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Concatenated text content. Tags contribute nothing.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for run in &self.runs {
            if let Run::Text(text) = run {
                out.push_str(text);
            }
        }
        out
    }

    /// Normalized text projection used as the exact-lookup key.
    pub fn normalized_text(&self) -> String {
        normalize_ws(&self.plain_text())
    }

    /// The unit sequence the fuzzy matcher compares: characters of the
    /// whitespace-normalized text, with each tag contributing exactly one
    /// opaque unit at its position.
    pub fn match_units(&self) -> Vec<MatchUnit> {
        let mut units = Vec::new();
        let mut pending_ws = false;
        for run in &self.runs {
            match run {
                Run::Text(text) => {
                    for ch in text.chars() {
                        if ch.is_whitespace() {
                            pending_ws = !units.is_empty();
                        } else {
                            if pending_ws {
                                units.push(MatchUnit::Ch(' '));
                                pending_ws = false;
                            }
                            units.push(MatchUnit::Ch(ch));
                        }
                    }
                }
                Run::Tag(tag) => {
                    if pending_ws {
                        units.push(MatchUnit::Ch(' '));
                        pending_ws = false;
                    }
                    units.push(MatchUnit::Tag(tag.payload.clone()));
                }
            }
        }
        units
    }

    /// Runs with adjacent text merged and empty text dropped. Two texts
    /// whose canonical runs match render identically in any external
    /// format, however their runs happen to be split.
    pub fn canonical_runs(&self) -> Vec<Run> {
        let mut out: Vec<Run> = Vec::with_capacity(self.runs.len());
        for run in &self.runs {
            match run {
                Run::Text(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    if let Some(Run::Text(last)) = out.last_mut() {
                        last.push_str(text);
                    } else {
                        out.push(Run::Text(text.clone()));
                    }
                }
                Run::Tag(tag) => out.push(Run::Tag(tag.clone())),
            }
        }
        out
    }

    /// Tag payloads in run order.
    pub fn tag_payloads(&self) -> Vec<&str> {
        self.runs
            .iter()
            .filter_map(|run| match run {
                Run::Tag(tag) => Some(tag.payload.as_str()),
                Run::Text(_) => None,
            })
            .collect()
    }

    /// Payload → occurrence count. Ordering is deterministic so reports
    /// list discrepancies stably.
    pub fn tag_multiset(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for payload in self.tag_payloads() {
            *counts.entry(payload.to_string()).or_insert(0) += 1;
        }
        counts
    }
}

/// One tag payload whose occurrence count differs between a segment's
/// source and its reimported target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCountDelta {
    pub payload: String,
    pub expected: usize,
    pub found: usize,
}

/// Compare tag payload multisets of `source` and `target`.
///
/// Empty result means the target carries exactly the source's tags (order
/// is irrelevant, only counts matter). A non-empty result lists every
/// payload that was dropped, invented, or duplicated.
pub fn tag_multiset_diff(source: &SegText, target: &SegText) -> Vec<TagCountDelta> {
    let expected = source.tag_multiset();
    let found = target.tag_multiset();

    let mut deltas = Vec::new();
    for (payload, &exp) in &expected {
        let got = found.get(payload).copied().unwrap_or(0);
        if got != exp {
            deltas.push(TagCountDelta {
                payload: payload.clone(),
                expected: exp,
                found: got,
            });
        }
    }
    for (payload, &got) in &found {
        if !expected.contains_key(payload) {
            deltas.push(TagCountDelta {
                payload: payload.clone(),
                expected: 0,
                found: got,
            });
        }
    }
    deltas
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    #[default]
    Untranslated,
    Draft,
    Confirmed,
    Locked,
}

/// Where a segment's current target text came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchOrigin {
    Manual,
    TmExact,
    TmFuzzy,
    TmSemantic,
    Ai,
    ExternalEdit,
}

/// A translatable unit owned by a [`crate::project::Project`].
///
/// The source side is fixed at creation; only the target side (plus status
/// and origin) ever changes. There is deliberately no API to edit, merge or
/// split sources, because segment identity has to survive export/reimport
/// cycles.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    source: SegText,
    pub target: SegText,
    pub status: SegmentStatus,
    pub origin: Option<MatchOrigin>,
}

impl Segment {
    pub fn new(id: SegmentId, source: SegText) -> Self {
        Segment {
            id,
            source,
            target: SegText::default(),
            status: SegmentStatus::Untranslated,
            origin: None,
        }
    }

    pub fn source(&self) -> &SegText {
        &self.source
    }

    pub fn is_locked(&self) -> bool {
        self.status == SegmentStatus::Locked
    }

    /// Replace the target text. Locked segments refuse the edit and return
    /// false. Untranslated segments move to draft; confirmed segments drop
    /// back to draft since the text changed.
    pub fn set_target(&mut self, target: SegText, origin: MatchOrigin) -> bool {
        if self.is_locked() {
            return false;
        }
        self.target = target;
        self.origin = Some(origin);
        self.status = SegmentStatus::Draft;
        true
    }

    pub fn confirm(&mut self) {
        if self.status != SegmentStatus::Locked {
            self.status = SegmentStatus::Confirmed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged_text() -> SegText {
        let mut text = SegText::default();
        text.push_text("Click ");
        text.push_tag(Tag::new("bold", "<b>"));
        text.push_text("here");
        text.push_tag(Tag::new("bold", "</b>"));
        text.push_text(".");
        text
    }

    #[test]
    fn normalize_collapses_whitespace_preserving_case() {
        assert_eq!(normalize_ws("  Hello   World \t!"), "Hello World !");
        assert_eq!(normalize_ws("Hello world."), "Hello world.");
    }

    #[test]
    fn plain_text_skips_tags() {
        assert_eq!(tagged_text().plain_text(), "Click here.");
    }

    #[test]
    fn match_units_keep_tags_as_single_opaque_units() {
        let units = tagged_text().match_units();
        let expected: Vec<MatchUnit> = "Click "
            .chars()
            .map(MatchUnit::Ch)
            .chain([MatchUnit::Tag("<b>".into())])
            .chain("here".chars().map(MatchUnit::Ch))
            .chain([MatchUnit::Tag("</b>".into())])
            .chain([MatchUnit::Ch('.')])
            .collect();
        assert_eq!(units, expected);
    }

    #[test]
    fn match_units_collapse_and_trim_whitespace() {
        let text = SegText::from_text("  Hello \t  world. ");
        let expected: Vec<MatchUnit> = "Hello world.".chars().map(MatchUnit::Ch).collect();
        assert_eq!(text.match_units(), expected);
    }

    #[test]
    fn canonical_runs_merge_split_text() {
        let mut split = SegText::default();
        split.push_text("Bonjour");
        split.push_text("");
        split.push_text(" !");

        assert_eq!(
            split.canonical_runs(),
            SegText::from_text("Bonjour !").canonical_runs()
        );
    }

    #[test]
    fn multiset_diff_empty_for_permuted_tags() {
        let source = tagged_text();
        let mut target = SegText::default();
        target.push_tag(Tag::new("bold", "</b>"));
        target.push_text("Cliquez ici");
        target.push_tag(Tag::new("bold", "<b>"));

        assert!(tag_multiset_diff(&source, &target).is_empty());
    }

    #[test]
    fn multiset_diff_reports_dropped_and_invented_tags() {
        let source = tagged_text();
        let mut target = SegText::default();
        target.push_text("Cliquez ici.");
        target.push_tag(Tag::new("bold", "<b>"));
        target.push_tag(Tag::new("link", "<a href=\"x\">"));

        let deltas = tag_multiset_diff(&source, &target);
        assert_eq!(deltas.len(), 2);

        let dropped = deltas.iter().find(|d| d.payload == "</b>").unwrap();
        assert_eq!((dropped.expected, dropped.found), (1, 0));

        let invented = deltas.iter().find(|d| d.payload == "<a href=\"x\">").unwrap();
        assert_eq!((invented.expected, invented.found), (0, 1));
    }

    #[test]
    fn set_target_moves_untranslated_to_draft() {
        let mut seg = Segment::new(SegmentId(1), SegText::from_text("Hello"));
        assert_eq!(seg.status, SegmentStatus::Untranslated);

        assert!(seg.set_target(SegText::from_text("Bonjour"), MatchOrigin::Manual));
        assert_eq!(seg.status, SegmentStatus::Draft);
        assert_eq!(seg.origin, Some(MatchOrigin::Manual));
    }

    #[test]
    fn locked_segment_refuses_target_edit() {
        let mut seg = Segment::new(SegmentId(2), SegText::from_text("Hello"));
        assert!(seg.set_target(SegText::from_text("Hallo"), MatchOrigin::Manual));
        seg.status = SegmentStatus::Locked;

        assert!(!seg.set_target(SegText::from_text("Bonjour"), MatchOrigin::Manual));
        assert_eq!(seg.status, SegmentStatus::Locked);
        assert_eq!(seg.target, SegText::from_text("Hallo"));
    }
}
