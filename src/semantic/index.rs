//! In-memory vector index with cosine similarity search.
//!
//! Keyed by TM entry id. Raw cosine similarity lives in [-1,1]; the index
//! reports scores mapped to [0,1] via `(cos + 1) / 2` so semantic scores
//! share a scale with exact and fuzzy scores and one floor applies.

use std::collections::HashMap;

/// An entry in the vector index.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// Hash of the embedding input, for change detection
    pub content_hash: u64,
    /// The embedding vector
    pub embedding: Vec<f32>,
}

/// One search result: a TM entry id and its mapped similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: u64,
    pub score: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,
}

/// In-memory nearest-neighbor index over entry embeddings.
pub struct VectorIndex {
    entries: HashMap<u64, VectorEntry>,
    dimensions: usize,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: HashMap::new(),
            dimensions,
        }
    }

    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the vector for an entry id.
    pub fn insert(
        &mut self,
        id: u64,
        content_hash: u64,
        embedding: Vec<f32>,
    ) -> Result<(), IndexError> {
        if embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }
        if l2_norm(&embedding) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        self.entries.insert(
            id,
            VectorEntry {
                content_hash,
                embedding,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, id: u64) -> Option<VectorEntry> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<&VectorEntry> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    /// All indexed entry ids.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &VectorEntry)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Nearest entries to `query`, scored in mapped [0,1] space, at most
    /// `limit` results at or above `min_score`, best first.
    pub fn search(
        &self,
        query: &[f32],
        min_score: f32,
        limit: usize,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter_map(|(id, entry)| {
                let cos = cosine_similarity(query, &entry.embedding, query_norm);
                let score = mapped_score(cos);
                if score >= min_score {
                    Some(SearchHit { id: *id, score })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Bulk load entries, e.g. when restoring from storage.
    pub fn bulk_load(&mut self, entries: Vec<(u64, u64, Vec<f32>)>) -> Result<(), IndexError> {
        for (id, content_hash, embedding) in entries {
            self.insert(id, content_hash, embedding)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot / (query_norm * target_norm)
}

/// [-1,1] cosine onto the engine's [0,1] score scale.
fn mapped_score(cos: f32) -> f32 {
    ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vector_scores_one() {
        let mut index = VectorIndex::new(3);
        index.insert(1, 100, vec![1.0, 0.0, 0.0]).unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 0.0, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_maps_to_half_and_opposite_to_zero() {
        let mut index = VectorIndex::new(2);
        index.insert(1, 100, vec![0.0, 1.0]).unwrap();
        index.insert(2, 200, vec![-1.0, 0.0]).unwrap();

        let hits = index.search(&[1.0, 0.0], 0.0, 10).unwrap();
        let by_id = |id: u64| hits.iter().find(|h| h.id == id).unwrap().score;
        assert!((by_id(1) - 0.5).abs() < 1e-6);
        assert!(by_id(2).abs() < 1e-6);
    }

    #[test]
    fn min_score_filters_in_mapped_space() {
        let mut index = VectorIndex::new(2);
        index.insert(1, 100, vec![1.0, 0.0]).unwrap();
        index.insert(2, 200, vec![0.0, 1.0]).unwrap();

        // orthogonal maps to 0.5, below the default 0.60 floor
        let hits = index.search(&[1.0, 0.0], 0.60, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn results_are_sorted_and_limited() {
        let mut index = VectorIndex::new(2);
        index.insert(1, 0, vec![1.0, 0.0]).unwrap();
        index.insert(2, 0, vec![0.9, 0.4]).unwrap();
        index.insert(3, 0, vec![0.5, 0.8]).unwrap();

        let hits = index.search(&[1.0, 0.0], 0.0, 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 1);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn insert_replaces_existing_vector() {
        let mut index = VectorIndex::new(2);
        index.insert(1, 100, vec![1.0, 0.0]).unwrap();
        index.insert(1, 200, vec![0.0, 1.0]).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.get(1).unwrap().content_hash, 200);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut index = VectorIndex::new(3);
        assert!(matches!(
            index.insert(1, 100, vec![1.0, 0.0]),
            Err(IndexError::DimensionMismatch { expected: 3, got: 2 })
        ));
        assert!(matches!(
            index.search(&[1.0], 0.0, 10),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn zero_norm_vectors_are_rejected() {
        let mut index = VectorIndex::new(2);
        assert!(matches!(
            index.insert(1, 100, vec![0.0, 0.0]),
            Err(IndexError::ZeroNormVector)
        ));
    }

    #[test]
    fn remove_evicts_entry() {
        let mut index = VectorIndex::new(2);
        index.insert(1, 100, vec![1.0, 0.0]).unwrap();

        assert!(index.remove(1).is_some());
        assert!(!index.contains(1));
        assert!(index.search(&[1.0, 0.0], 0.0, 10).unwrap().is_empty());
    }

    #[test]
    fn bulk_load_fills_index() {
        let mut index = VectorIndex::new(2);
        index
            .bulk_load(vec![
                (1, 100, vec![1.0, 0.0]),
                (2, 200, vec![0.0, 1.0]),
            ])
            .unwrap();
        assert_eq!(index.len(), 2);
        let ids: Vec<u64> = index.ids().collect();
        assert!(ids.contains(&1) && ids.contains(&2));
    }
}
