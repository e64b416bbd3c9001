//! Query and commit facade over attached TM stores.
//!
//! A project references stores with independent read and write toggles. The
//! toggles travel with every call instead of living in ambient state, so
//! what a query returns is a function of its arguments alone and two
//! projects sharing a store read-only cannot interfere with each other.

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::matcher::{self, Cancelled, FuzzyParams};
use crate::project::Project;
use crate::rank::{self, CandidateMatch};
use crate::segment::{MatchOrigin, SegText, SegmentId};
use crate::semantic::SemanticService;
use crate::tm::{LanguagePair, TmEntry, TmEntryCreate, TmError, TmStore};

/// One TM store attached for the duration of a call, with its per-project
/// toggles and the semantic service maintaining its index.
pub struct AttachedStore<'a> {
    pub store: &'a dyn TmStore,
    pub semantic: Option<&'a SemanticService>,
    pub read_enabled: bool,
    pub write_enabled: bool,
}

impl<'a> AttachedStore<'a> {
    pub fn read_write(store: &'a dyn TmStore, semantic: Option<&'a SemanticService>) -> Self {
        AttachedStore {
            store,
            semantic,
            read_enabled: true,
            write_enabled: true,
        }
    }

    pub fn read_only(store: &'a dyn TmStore, semantic: Option<&'a SemanticService>) -> Self {
        AttachedStore {
            store,
            semantic,
            read_enabled: true,
            write_enabled: false,
        }
    }
}

/// Ranked candidates for one source segment.
#[derive(Debug)]
pub struct Suggestions {
    pub candidates: Vec<CandidateMatch>,
    /// True when a consulted semantic index still had queued writes, so its
    /// candidates may lag the newest store mutations.
    pub semantic_stale: bool,
}

/// What an accept call committed. The segment edit itself either happened
/// or the call returned an error.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AcceptOutcome {
    /// Entries written, one per write-enabled store that took the pair.
    pub committed: usize,
    /// Write-enabled stores that rejected the pair as a duplicate.
    pub duplicates: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    #[error("segment {0} not found")]
    SegmentNotFound(SegmentId),

    #[error("segment {0} is locked")]
    SegmentLocked(SegmentId),

    #[error(transparent)]
    Tm(#[from] TmError),
}

pub struct QueryService {
    fuzzy: FuzzyParams,
    max_results: usize,
}

impl QueryService {
    pub fn new(config: &Config) -> Self {
        QueryService {
            fuzzy: config.fuzzy.params(),
            max_results: config.max_results,
        }
    }

    pub fn with_params(fuzzy: FuzzyParams, max_results: usize) -> Self {
        QueryService {
            fuzzy,
            max_results,
        }
    }

    /// Ranked suggestions for `query` across every read-enabled store.
    ///
    /// Exact lookup takes the first hit in attachment order, so a project's
    /// primary store shadows reference stores. Fuzzy scoring runs over each
    /// store's snapshot; semantic hits are resolved back through the store
    /// and dropped when the entry is gone or belongs to another language
    /// pair. A semantic backend failure degrades the query to exact plus
    /// fuzzy instead of failing it.
    pub fn suggest(
        &self,
        query: &SegText,
        pair: &LanguagePair,
        stores: &[AttachedStore<'_>],
        cancel: &CancelToken,
    ) -> Result<Suggestions, Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let query_text = query.normalized_text();

        let mut exact: Option<TmEntry> = None;
        for attached in stores.iter().filter(|a| a.read_enabled) {
            if let Some(entry) = attached.store.lookup_exact(&query_text, pair) {
                exact = Some(entry);
                break;
            }
        }

        let mut fuzzy: Vec<(TmEntry, f32)> = Vec::new();
        for attached in stores.iter().filter(|a| a.read_enabled) {
            let snapshot = attached.store.all(pair);
            let hits =
                matcher::search_scored(query, &snapshot, self.max_results, &self.fuzzy, cancel)?;
            fuzzy.extend(hits);
        }

        let mut semantic: Vec<(TmEntry, f32)> = Vec::new();
        let mut semantic_stale = false;
        for attached in stores.iter().filter(|a| a.read_enabled) {
            let Some(service) = attached.semantic.filter(|s| s.is_enabled()) else {
                continue;
            };
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            semantic_stale |= service.is_stale();
            match service.search_scored(&query_text, self.max_results) {
                Ok(hits) => {
                    for hit in hits {
                        // the index trails the store, so ids that no longer
                        // resolve or hold another pair are dropped here
                        let Some(entry) = attached.store.get(hit.id) else {
                            continue;
                        };
                        if !entry.pair.matches(pair) {
                            continue;
                        }
                        semantic.push((entry, hit.score));
                    }
                }
                Err(e) => {
                    log::warn!("semantic retrieval unavailable: {e}");
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        Ok(Suggestions {
            candidates: rank::rank(exact, fuzzy, semantic, self.max_results),
            semantic_stale,
        })
    }

    /// Write `target` into the segment and, with `commit`, store the pair
    /// into every write-enabled store. Committed entries carry the project
    /// name as provenance, and each receiving store's semantic index is
    /// scheduled for an upsert.
    pub fn accept(
        &self,
        project: &mut Project,
        segment_id: SegmentId,
        target: SegText,
        origin: MatchOrigin,
        commit: bool,
        stores: &[AttachedStore<'_>],
    ) -> Result<AcceptOutcome, AcceptError> {
        let pair = project.pair.clone();
        let provenance = project.name.clone();

        let segment = project
            .get_mut(segment_id)
            .ok_or(AcceptError::SegmentNotFound(segment_id))?;
        let source = segment.source().clone();

        if !segment.set_target(target.clone(), origin) {
            return Err(AcceptError::SegmentLocked(segment_id));
        }

        let mut outcome = AcceptOutcome::default();
        if !commit {
            return Ok(outcome);
        }

        for attached in stores.iter().filter(|a| a.write_enabled) {
            let create = TmEntryCreate {
                pair: pair.clone(),
                source: source.clone(),
                target: target.clone(),
                provenance: provenance.clone(),
                created_at: None,
            };
            match attached.store.insert(create) {
                Ok(entry) => {
                    outcome.committed += 1;
                    if let Some(service) = attached.semantic {
                        if let Err(e) = service.enqueue_upsert(entry.id, &entry.source) {
                            log::warn!("semantic index update not queued: {e}");
                        }
                    }
                }
                Err(TmError::DuplicateKey { existing_id }) => {
                    log::debug!("store already holds this source as entry {existing_id}");
                    outcome.duplicates += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(outcome)
    }
}
