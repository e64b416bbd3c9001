//! Fuzzy retrieval over a TM snapshot.
//!
//! Similarity is a normalized edit distance over comparison units: the
//! characters of the whitespace-collapsed source text, with each inline tag
//! kept as one opaque unit (see [`SegText::match_units`]). The score is
//! `1 - distance / max(query_len, candidate_len)`, so an exact textual match
//! scores 1.0 and longer edits pull the score toward 0. The comparison is
//! O(n·m) per candidate, which is why candidates are length-prefiltered
//! before the DP runs and scored in parallel batches.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::cancel::CancelToken;
use crate::segment::{MatchUnit, SegText};
use crate::tm::TmEntry;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FuzzyParams {
    /// Matches scoring below this are dropped.
    pub min_score: f32,
    /// Candidates whose unit count differs from the query by more than this
    /// ratio are skipped without scoring.
    pub max_len_ratio: f32,
    /// Entries scored per parallel batch; cancellation is checked between
    /// batches.
    pub batch_size: usize,
}

impl Default for FuzzyParams {
    fn default() -> Self {
        FuzzyParams {
            min_score: 0.70,
            max_len_ratio: 2.0,
            batch_size: 512,
        }
    }
}

/// The issuing side cancelled the query before it finished. No partial
/// results are returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cancelled;

/// Unit-level Levenshtein distance, insert/delete/substitute all cost 1.
pub fn edit_distance(a: &[MatchUnit], b: &[MatchUnit]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for (i, unit_a) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, unit_b) in b.iter().enumerate() {
            let substitute = prev[j] + usize::from(unit_a != unit_b);
            curr[j + 1] = substitute.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Similarity in [0,1]: 1.0 iff the unit sequences are identical.
pub fn similarity(query: &[MatchUnit], candidate: &[MatchUnit]) -> f32 {
    let max_len = query.len().max(candidate.len());
    if max_len == 0 {
        return 1.0;
    }
    let dist = edit_distance(query, candidate);
    (1.0 - dist as f32 / max_len as f32).clamp(0.0, 1.0)
}

// The distance can never be smaller than the length difference, so both the
// ratio bound and the score floor can reject a candidate before the DP runs.
fn length_prefilter(query_len: usize, cand_len: usize, params: &FuzzyParams) -> bool {
    let max_len = query_len.max(cand_len) as f32;
    let min_len = query_len.min(cand_len) as f32;
    if max_len == 0.0 {
        return true;
    }
    if max_len / min_len > params.max_len_ratio {
        return false;
    }
    1.0 - (max_len - min_len) / max_len >= params.min_score
}

/// Score `entries` against `query`, keeping at most `k` results at or above
/// `params.min_score`, descending by score, most recent entry first on ties.
pub fn search_scored(
    query: &SegText,
    entries: &[TmEntry],
    k: usize,
    params: &FuzzyParams,
    cancel: &CancelToken,
) -> Result<Vec<(TmEntry, f32)>, Cancelled> {
    let query_units = query.match_units();
    let batch_size = params.batch_size.max(1);

    let mut hits: Vec<(TmEntry, f32)> = Vec::new();
    for batch in entries.chunks(batch_size) {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let scored: Vec<(TmEntry, f32)> = batch
            .par_iter()
            .filter_map(|entry| {
                let cand_units = entry.source.match_units();
                if !length_prefilter(query_units.len(), cand_units.len(), params) {
                    return None;
                }
                let score = similarity(&query_units, &cand_units);
                if score >= params.min_score {
                    Some((entry.clone(), score))
                } else {
                    None
                }
            })
            .collect();
        hits.extend(scored);
    }

    if cancel.is_cancelled() {
        return Err(Cancelled);
    }

    hits.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.0.created_at.cmp(&a.0.created_at))
    });
    hits.truncate(k);
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Tag;
    use crate::tm::LanguagePair;
    use chrono::{Duration, Utc};

    fn units(text: &str) -> Vec<MatchUnit> {
        SegText::from_text(text).match_units()
    }

    fn entry(id: u64, source: &str, target: &str, minutes_ago: i64) -> TmEntry {
        TmEntry {
            id,
            pair: LanguagePair::new("en", "fr"),
            source: SegText::from_text(source),
            target: SegText::from_text(target),
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            provenance: String::new(),
        }
    }

    fn relaxed(min_score: f32) -> FuzzyParams {
        FuzzyParams {
            min_score,
            max_len_ratio: 10.0,
            batch_size: 2,
        }
    }

    #[test]
    fn identical_text_scores_one() {
        assert_eq!(similarity(&units("Hello world."), &units("Hello world.")), 1.0);
        assert_eq!(
            similarity(&units("Hello   world."), &units(" Hello world. ")),
            1.0
        );
    }

    #[test]
    fn score_strictly_decreases_with_distance() {
        let base = units("abcdefgh");
        let one_edit = similarity(&base, &units("abcdefgx"));
        let two_edits = similarity(&base, &units("abcdefxy"));
        let three_edits = similarity(&base, &units("abcdexyz"));
        assert!(1.0 > one_edit);
        assert!(one_edit > two_edits);
        assert!(two_edits > three_edits);
    }

    #[test]
    fn punctuation_variant_scores_between_floor_and_one() {
        // "Hello, world!" vs "Hello world.": one deleted comma, one
        // substituted terminator, over 13 units.
        let score = similarity(&units("Hello, world!"), &units("Hello world."));
        assert!(score > 0.70 && score < 1.0, "score was {score}");
        assert!((score - (1.0 - 2.0 / 13.0)).abs() < 1e-6);
    }

    #[test]
    fn unrelated_text_falls_below_default_floor() {
        let score = similarity(&units("Good morning."), &units("Hello world."));
        assert!(score < 0.70, "score was {score}");
    }

    #[test]
    fn tag_payload_length_does_not_distort_score() {
        let mut short_tags = SegText::default();
        short_tags.push_text("Click ");
        short_tags.push_tag(Tag::new("bold", "<b>"));
        short_tags.push_text("here");
        short_tags.push_tag(Tag::new("bold", "</b>"));
        short_tags.push_text(".");

        let mut long_tags = SegText::default();
        long_tags.push_text("Click ");
        long_tags.push_tag(Tag::new("link", "<a href=\"https://example.com/very/long\">"));
        long_tags.push_text("here");
        long_tags.push_tag(Tag::new("link", "</a>"));
        long_tags.push_text(".");

        // Two tag substitutions over 13 units, whatever the payload bytes.
        let score = similarity(&short_tags.match_units(), &long_tags.match_units());
        assert!((score - (1.0 - 2.0 / 13.0)).abs() < 1e-6);
    }

    #[test]
    fn search_filters_by_floor_and_sorts_descending() {
        let entries = vec![
            entry(0, "Hello world.", "Bonjour le monde.", 0),
            entry(1, "Hello, world!", "Bonjour, le monde !", 0),
            entry(2, "Good morning.", "Bonjour.", 0),
        ];

        let hits = search_scored(
            &SegText::from_text("Hello world."),
            &entries,
            10,
            &FuzzyParams::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.id, 0);
        assert_eq!(hits[0].1, 1.0);
        assert!(hits[1].1 > 0.70 && hits[1].1 < 1.0);
    }

    #[test]
    fn search_truncates_to_k() {
        let entries: Vec<TmEntry> = (0..20)
            .map(|i| entry(i, "Hello world.", "Bonjour.", i as i64))
            .collect();

        let hits = search_scored(
            &SegText::from_text("Hello world."),
            &entries,
            5,
            &relaxed(0.0),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn equal_scores_tie_break_by_recency() {
        let entries = vec![
            entry(0, "Hello world.", "older", 60),
            entry(1, "Hello world.", "newer", 1),
        ];

        let hits = search_scored(
            &SegText::from_text("Hello world."),
            &entries,
            10,
            &relaxed(0.0),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(hits[0].0.id, 1);
        assert_eq!(hits[1].0.id, 0);
    }

    #[test]
    fn length_ratio_prefilter_skips_oversized_candidates() {
        let entries = vec![entry(0, "aaaa aaaa aaaa aaaa", "long", 0)];
        let query = SegText::from_text("aaaa");

        let tight = FuzzyParams {
            min_score: 0.0,
            max_len_ratio: 2.0,
            batch_size: 512,
        };
        assert!(search_scored(&query, &entries, 10, &tight, &CancelToken::new())
            .unwrap()
            .is_empty());

        let loose = FuzzyParams {
            min_score: 0.0,
            max_len_ratio: 10.0,
            batch_size: 512,
        };
        assert_eq!(
            search_scored(&query, &entries, 10, &loose, &CancelToken::new())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn cancelled_token_aborts_without_partial_results() {
        let entries: Vec<TmEntry> = (0..100)
            .map(|i| entry(i, "Hello world.", "Bonjour.", 0))
            .collect();

        let cancel = CancelToken::new();
        cancel.cancel();

        let result = search_scored(
            &SegText::from_text("Hello world."),
            &entries,
            10,
            &FuzzyParams::default(),
            &cancel,
        );
        assert_eq!(result, Err(Cancelled));
    }
}
