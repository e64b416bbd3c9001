//! Merging exact, fuzzy and semantic candidates into one ranked list.
//!
//! The three strategies score on the same [0,1] scale but are not directly
//! comparable in trustworthiness, so ranking is policy, not arithmetic: an
//! exact match always lands at rank 1, everything else is de-duplicated by
//! entry id (keeping the best score but remembering every kind that found
//! it) and sorted by score, with fuzzy beating semantic on ties because a
//! literal match is safer for formatting-sensitive work.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use crate::tm::TmEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Fuzzy,
    Semantic,
}

/// A TM entry plus the score and strategies that retrieved it. Produced
/// transiently per query, never persisted.
#[derive(Clone, Debug, Serialize)]
pub struct CandidateMatch {
    pub entry: TmEntry,
    pub score: f32,
    pub kinds: Vec<MatchKind>,
}

impl CandidateMatch {
    pub fn is_exact(&self) -> bool {
        self.kinds.contains(&MatchKind::Exact)
    }

    fn kind_priority(&self) -> u8 {
        u8::from(!self.kinds.contains(&MatchKind::Fuzzy))
    }
}

fn merge_into(
    merged: &mut HashMap<u64, CandidateMatch>,
    entry: TmEntry,
    score: f32,
    kind: MatchKind,
) {
    let id = entry.id;
    let cand = merged.entry(id).or_insert_with(|| CandidateMatch {
        entry,
        score,
        kinds: Vec::new(),
    });
    if score > cand.score {
        cand.score = score;
    }
    if !cand.kinds.contains(&kind) {
        cand.kinds.push(kind);
    }
}

/// Merge per-strategy results into at most `k` candidates, descending by
/// score. The exact match, if any, is always first with score 1.0; ties
/// elsewhere break by kind (fuzzy first), then recency, then entry id.
pub fn rank(
    exact: Option<TmEntry>,
    fuzzy: Vec<(TmEntry, f32)>,
    semantic: Vec<(TmEntry, f32)>,
    k: usize,
) -> Vec<CandidateMatch> {
    if k == 0 {
        return Vec::new();
    }

    let mut merged: HashMap<u64, CandidateMatch> = HashMap::new();
    for (entry, score) in fuzzy {
        merge_into(&mut merged, entry, score, MatchKind::Fuzzy);
    }
    for (entry, score) in semantic {
        merge_into(&mut merged, entry, score, MatchKind::Semantic);
    }

    let top = exact.map(|entry| {
        let mut kinds = vec![MatchKind::Exact];
        if let Some(prior) = merged.remove(&entry.id) {
            kinds.extend(prior.kinds);
        }
        CandidateMatch {
            entry,
            score: 1.0,
            kinds,
        }
    });

    let mut rest: Vec<CandidateMatch> = merged.into_values().collect();
    rest.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.kind_priority().cmp(&b.kind_priority()))
            .then_with(|| b.entry.created_at.cmp(&a.entry.created_at))
            .then_with(|| b.entry.id.cmp(&a.entry.id))
    });

    let mut out = Vec::with_capacity(rest.len() + 1);
    out.extend(top);
    out.append(&mut rest);
    out.truncate(k);
    out
}
