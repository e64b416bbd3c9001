//! Export and reimport of segments over a pluggable bilingual format.
//!
//! A unit leaves export carrying its segment's identifier out-of-band plus
//! both text sides rendered with placeholder tokens. On reimport each unit
//! either matches the current project state (unchanged), gets its edited
//! target applied (reconciled, tag counts checked against the immutable
//! source), or conflicts on identity (unknown or duplicated key) and
//! applies nothing. Violations are reported, never repaired: translating
//! over the wrong segment or quietly dropping a tag loses work that cannot
//! be recovered.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};

use serde::Serialize;

use crate::segment::{tag_multiset_diff, MatchOrigin, SegText, Segment, SegmentId, TagCountDelta};

use super::placeholder::PlaceholderMap;

/// One row of a bilingual document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalUnit {
    pub key: String,
    pub source: String,
    pub target: String,
}

/// Capability interface for one external CAT tool's bilingual document
/// syntax. The engine only requires a key column and opaque placeholders;
/// everything tool-specific lives behind this trait.
pub trait ExternalFormat: Send + Sync {
    fn name(&self) -> &'static str;

    /// File extension without the dot, for default output paths.
    fn extension(&self) -> &'static str;

    fn write_document(
        &self,
        units: &[ExternalUnit],
        out: &mut dyn Write,
    ) -> Result<(), RoundTripError>;

    fn read_document(&self, input: &mut dyn Read) -> Result<Vec<ExternalUnit>, RoundTripError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RoundTripError {
    #[error("malformed bilingual document: {0}")]
    Malformed(String),

    #[error("placeholder table error: {0}")]
    Session(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One structural violation found during reimport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RoundTripIssue {
    /// The unit's key resolves to no segment in the project. Usually the
    /// aftermath of an external merge or split, which is unsupported.
    OrphanSegment { key: String },

    /// The same segment key appears on more than one unit. None of the
    /// competing targets is applied.
    DuplicateSegment { id: SegmentId },

    /// The reimported target's tag counts differ from the source's. The
    /// target is applied anyway and the mismatch is left for review.
    TagMismatch {
        id: SegmentId,
        deltas: Vec<TagCountDelta>,
    },

    /// The segment is locked, so the edited target was not applied.
    LockedSegment { id: SegmentId },
}

/// Outcome of one reimport pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RoundTripReport {
    /// Units whose target changed and was applied.
    pub reconciled: usize,
    /// Units identical to the current project state.
    pub unchanged: usize,
    pub issues: Vec<RoundTripIssue>,
}

impl RoundTripReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn tag_mismatches(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| matches!(issue, RoundTripIssue::TagMismatch { .. }))
            .count()
    }
}

/// Render segments for external editing. Tokens for tag payloads are minted
/// in `placeholders`, which must travel with the exported document and come
/// back for reimport.
pub fn export_units(segments: &[Segment], placeholders: &mut PlaceholderMap) -> Vec<ExternalUnit> {
    segments
        .iter()
        .map(|segment| ExternalUnit {
            key: segment.id.to_string(),
            source: placeholders.render(segment.source()),
            target: placeholders.render(&segment.target),
        })
        .collect()
}

/// Fold externally edited units back into `segments`.
pub fn reimport_units(
    segments: &mut [Segment],
    units: &[ExternalUnit],
    placeholders: &PlaceholderMap,
) -> RoundTripReport {
    let mut report = RoundTripReport::default();

    let by_id: HashMap<SegmentId, usize> = segments
        .iter()
        .enumerate()
        .map(|(pos, segment)| (segment.id, pos))
        .collect();

    // resolve every key up front so a duplicated key conflicts as a whole
    // instead of applying whichever unit happens to come last
    let mut key_uses: HashMap<SegmentId, usize> = HashMap::new();
    let mut resolved: Vec<Option<SegmentId>> = Vec::with_capacity(units.len());
    for unit in units {
        let id = unit
            .key
            .trim()
            .parse::<u64>()
            .ok()
            .map(SegmentId)
            .filter(|id| by_id.contains_key(id));
        if let Some(id) = id {
            *key_uses.entry(id).or_insert(0) += 1;
        }
        resolved.push(id);
    }

    let mut duplicates_reported: HashSet<SegmentId> = HashSet::new();
    for (unit, id) in units.iter().zip(&resolved) {
        let Some(id) = *id else {
            report.issues.push(RoundTripIssue::OrphanSegment {
                key: unit.key.clone(),
            });
            continue;
        };
        if key_uses.get(&id).copied().unwrap_or(0) > 1 {
            if duplicates_reported.insert(id) {
                report.issues.push(RoundTripIssue::DuplicateSegment { id });
            }
            continue;
        }

        let segment = &mut segments[by_id[&id]];
        let target = placeholders.parse(&unit.target);

        if target.canonical_runs() == segment.target.canonical_runs() {
            report.unchanged += 1;
            continue;
        }
        if segment.is_locked() {
            report.issues.push(RoundTripIssue::LockedSegment { id });
            continue;
        }

        let deltas = tag_multiset_diff(segment.source(), &target);
        if !deltas.is_empty() {
            report.issues.push(RoundTripIssue::TagMismatch { id, deltas });
        }
        segment.set_target(target, MatchOrigin::ExternalEdit);
        report.reconciled += 1;
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{SegmentStatus, Tag};

    fn tagged_segment(id: u64) -> Segment {
        let mut source = SegText::default();
        source.push_text("Click ");
        source.push_tag(Tag::new("bold", "<b>"));
        source.push_text("here");
        source.push_tag(Tag::new("bold", "</b>"));
        source.push_text(".");
        Segment::new(SegmentId(id), source)
    }

    fn plain_segment(id: u64, text: &str) -> Segment {
        Segment::new(SegmentId(id), SegText::from_text(text))
    }

    fn edit_target(units: &mut [ExternalUnit], key: &str, target: &str) {
        let unit = units.iter_mut().find(|u| u.key == key).unwrap();
        unit.target = target.to_string();
    }

    #[test]
    fn untouched_reimport_changes_nothing_and_reports_nothing() {
        let mut segments = vec![tagged_segment(1), plain_segment(2, "Hello world.")];
        segments[1].set_target(SegText::from_text("Bonjour le monde."), MatchOrigin::Manual);
        let before = segments.clone();

        let mut placeholders = PlaceholderMap::new();
        let units = export_units(&segments, &mut placeholders);
        let report = reimport_units(&mut segments, &units, &placeholders);

        assert!(report.is_clean());
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.reconciled, 0);
        for (seg, orig) in segments.iter().zip(&before) {
            assert_eq!(seg.target, orig.target);
            assert_eq!(seg.status, orig.status);
        }
    }

    #[test]
    fn edited_target_with_tags_preserved_reconciles_cleanly() {
        let mut segments = vec![tagged_segment(1)];
        let mut placeholders = PlaceholderMap::new();
        let mut units = export_units(&segments, &mut placeholders);

        edit_target(&mut units, "1", "Cliquez <<t:1>>ici<<t:2>>.");
        let report = reimport_units(&mut segments, &units, &placeholders);

        assert!(report.is_clean());
        assert_eq!(report.reconciled, 1);
        assert_eq!(segments[0].target.plain_text(), "Cliquez ici.");
        assert_eq!(segments[0].target.tag_payloads(), vec!["<b>", "</b>"]);
        assert_eq!(segments[0].origin, Some(MatchOrigin::ExternalEdit));
        assert_eq!(segments[0].status, SegmentStatus::Draft);
    }

    #[test]
    fn reordered_tags_are_not_a_mismatch() {
        let mut segments = vec![tagged_segment(1)];
        let mut placeholders = PlaceholderMap::new();
        let mut units = export_units(&segments, &mut placeholders);

        edit_target(&mut units, "1", "<<t:2>>Cliquez ici<<t:1>>.");
        let report = reimport_units(&mut segments, &units, &placeholders);

        assert!(report.is_clean());
        assert_eq!(report.reconciled, 1);
    }

    #[test]
    fn dropped_tag_reports_one_mismatch_but_still_applies() {
        let mut segments = vec![tagged_segment(1)];
        let mut placeholders = PlaceholderMap::new();
        let mut units = export_units(&segments, &mut placeholders);

        edit_target(&mut units, "1", "Cliquez ici.");
        let report = reimport_units(&mut segments, &units, &placeholders);

        assert_eq!(report.tag_mismatches(), 1);
        assert_eq!(report.issues.len(), 1);
        match &report.issues[0] {
            RoundTripIssue::TagMismatch { id, deltas } => {
                assert_eq!(*id, SegmentId(1));
                assert_eq!(deltas.len(), 2);
                assert!(deltas.iter().all(|d| d.expected == 1 && d.found == 0));
            }
            other => panic!("unexpected issue {other:?}"),
        }
        // the edited text is applied regardless
        assert_eq!(report.reconciled, 1);
        assert_eq!(segments[0].target.plain_text(), "Cliquez ici.");
    }

    #[test]
    fn unknown_key_is_an_orphan() {
        let mut segments = vec![plain_segment(1, "Hello world.")];
        let mut placeholders = PlaceholderMap::new();
        let mut units = export_units(&segments, &mut placeholders);
        units.push(ExternalUnit {
            key: "42".to_string(),
            source: String::new(),
            target: "ghost".to_string(),
        });

        let report = reimport_units(&mut segments, &units, &placeholders);
        assert_eq!(
            report.issues,
            vec![RoundTripIssue::OrphanSegment {
                key: "42".to_string()
            }]
        );
        assert!(segments[0].target.is_empty());
    }

    #[test]
    fn duplicated_key_conflicts_and_applies_neither_unit() {
        let mut segments = vec![plain_segment(1, "Hello world.")];
        let mut placeholders = PlaceholderMap::new();
        let mut units = export_units(&segments, &mut placeholders);
        let mut copy = units[0].clone();
        copy.target = "Version A".to_string();
        units[0].target = "Version B".to_string();
        units.push(copy);

        let report = reimport_units(&mut segments, &units, &placeholders);
        assert_eq!(
            report.issues,
            vec![RoundTripIssue::DuplicateSegment { id: SegmentId(1) }]
        );
        assert_eq!(report.reconciled, 0);
        assert!(segments[0].target.is_empty());
    }

    #[test]
    fn locked_segment_keeps_its_target_and_is_reported() {
        let mut segments = vec![plain_segment(1, "Hello world.")];
        segments[0].set_target(SegText::from_text("Bonjour le monde."), MatchOrigin::Manual);
        segments[0].status = SegmentStatus::Locked;

        let mut placeholders = PlaceholderMap::new();
        let mut units = export_units(&segments, &mut placeholders);
        edit_target(&mut units, "1", "Salut le monde.");

        let report = reimport_units(&mut segments, &units, &placeholders);
        assert_eq!(
            report.issues,
            vec![RoundTripIssue::LockedSegment { id: SegmentId(1) }]
        );
        assert_eq!(segments[0].target.plain_text(), "Bonjour le monde.");
    }

    #[test]
    fn unchanged_locked_segment_is_not_reported() {
        let mut segments = vec![plain_segment(1, "Hello world.")];
        segments[0].set_target(SegText::from_text("Bonjour le monde."), MatchOrigin::Manual);
        segments[0].status = SegmentStatus::Locked;

        let mut placeholders = PlaceholderMap::new();
        let units = export_units(&segments, &mut placeholders);
        let report = reimport_units(&mut segments, &units, &placeholders);

        assert!(report.is_clean());
        assert_eq!(report.unchanged, 1);
    }

    #[test]
    fn invented_tag_token_typed_by_hand_stays_text_and_flags_nothing_extra() {
        let mut segments = vec![plain_segment(1, "Hello world.")];
        let mut placeholders = PlaceholderMap::new();
        let mut units = export_units(&segments, &mut placeholders);

        edit_target(&mut units, "1", "Bonjour <<t:7>> le monde.");
        let report = reimport_units(&mut segments, &units, &placeholders);

        // the token was never minted, so it is plain text, not a tag
        assert!(report.is_clean());
        assert_eq!(
            segments[0].target.plain_text(),
            "Bonjour <<t:7>> le monde."
        );
    }
}
