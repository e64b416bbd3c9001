//! Semantic retrieval over TM entries.
//!
//! Meaning-based search: every entry's source text is embedded into a vector
//! and queries are answered by cosine similarity, so a paraphrase can match
//! where the fuzzy matcher sees nothing. The index is a derived cache of the
//! TM store, maintained incrementally by a background worker and rebuildable
//! from the store at any time.
//!
//! # Architecture
//!
//! - `embeddings`: the embedding collaborator seam and its fastembed impl
//! - `index`: in-memory vector index with cosine similarity search
//! - `storage`: binary file I/O for vectors.bin persistence
//! - `preprocess`: embedding input preparation and change-detection hashing
//! - `service`: high-level service owning the index and its maintenance queue

pub mod embeddings;
mod index;
mod preprocess;
mod service;
mod storage;

pub use embeddings::{Embedder, EmbeddingError, FastembedEmbedder};
pub use index::{IndexError, SearchHit, VectorIndex};
pub use preprocess::{content_hash, embedding_input};
pub use service::{ReconcileReport, SemanticError, SemanticService};
pub use storage::{VectorStorage, VectorStorageError};

/// Default embedding model name (bge-base trades speed for noticeably
/// better retrieval quality than MiniLM)
pub const DEFAULT_MODEL: &str = "bge-base-en-v1.5";

/// Default similarity floor for semantic candidates, in mapped [0,1] space.
pub const DEFAULT_MIN_SCORE: f32 = 0.60;
