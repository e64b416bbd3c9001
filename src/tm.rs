use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::segment::{normalize_ws, SegText};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguagePair {
    pub source_lang: String,
    pub target_lang: String,
}

impl LanguagePair {
    pub fn new(source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        LanguagePair {
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
        }
    }

    /// Language codes compare case-insensitively ("en-US" == "en-us").
    pub fn matches(&self, other: &LanguagePair) -> bool {
        self.source_lang.eq_ignore_ascii_case(&other.source_lang)
            && self.target_lang.eq_ignore_ascii_case(&other.target_lang)
    }
}

/// A committed source/target pair. Immutable once written; changed only
/// through explicit [`TmStore::delete`] / [`TmStore::replace`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TmEntry {
    pub id: u64,
    pub pair: LanguagePair,
    pub source: SegText,
    pub target: SegText,
    pub created_at: DateTime<Utc>,
    pub provenance: String,
}

impl TmEntry {
    /// Whitespace-collapsed source text, the store's exact-lookup key.
    pub fn normalized_source(&self) -> String {
        self.source.normalized_text()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TmEntryCreate {
    pub pair: LanguagePair,
    pub source: SegText,
    pub target: SegText,
    #[serde(default)]
    pub provenance: String,
    /// Creation time to record; `None` stamps the current time. Imports
    /// pass the original date so recency ranking keeps meaning.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// What `insert` does when an entry with the same normalized source already
/// exists for the language pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    Overwrite,
}

#[derive(thiserror::Error, Debug)]
pub enum TmError {
    #[error("entry with the same normalized source already exists (id {existing_id})")]
    DuplicateKey { existing_id: u64 },

    #[error("tm entry {0} not found")]
    NotFound(u64),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },
}

pub trait TmStore: Send + Sync {
    /// Entry whose normalized source equals the normalized query, if any.
    fn lookup_exact(&self, source_text: &str, pair: &LanguagePair) -> Option<TmEntry>;

    /// Persist a new entry. Success is reported only after the entry is
    /// durably written; duplicates are handled per the store's policy.
    fn insert(&self, create: TmEntryCreate) -> Result<TmEntry, TmError>;

    fn replace(&self, id: u64, create: TmEntryCreate) -> Result<TmEntry, TmError>;

    fn delete(&self, id: u64) -> Result<(), TmError>;

    fn get(&self, id: u64) -> Option<TmEntry>;

    /// Consistent snapshot of every entry for the pair. A query iterating
    /// the result never observes a half-written entry, and batch consumers
    /// restart simply by calling again.
    fn all(&self, pair: &LanguagePair) -> Vec<TmEntry>;

    /// Snapshot of the whole store across language pairs, for bulk
    /// maintenance like an index rebuild.
    fn snapshot(&self) -> Vec<TmEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const CSV_HEADERS: [&str; 7] = [
    "id",
    "source_lang",
    "target_lang",
    "source",
    "target",
    "created_at",
    "provenance",
];

const TM_FILE_NAME: &str = "tm.csv";

/// CSV-file-backed TM store. The whole memory is held in RAM behind a
/// read/write lock and rewritten through a temp file on every mutation, so
/// a successful return means the entry is already on disk.
#[derive(Debug, Clone)]
pub struct BackendCsv {
    list: Arc<RwLock<Vec<TmEntry>>>,
    path: PathBuf,
    policy: DuplicatePolicy,
}

impl BackendCsv {
    /// Open (or create) the store living in `base_dir/tm.csv`.
    pub fn open(base_dir: &Path, policy: DuplicatePolicy) -> Result<Self, TmError> {
        std::fs::create_dir_all(base_dir)?;
        let path = base_dir.join(TM_FILE_NAME);

        if let Err(err) = std::fs::metadata(&path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("creating new translation memory at {}", path.display());
                    let mut csv_wrt = csv::Writer::from_path(&path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => return Err(err.into()),
            }
        }

        let now = Instant::now();
        let mut csv_reader = csv::Reader::from_path(&path)?;

        let mut entries = vec![];
        for (row, record) in csv_reader.records().enumerate() {
            let record = record?;
            entries.push(Self::parse_record(&record, row + 1)?);
        }

        log::debug!(
            "loaded {} tm entries in {}ms",
            entries.len(),
            now.elapsed().as_micros() as f64 / 1000.0
        );

        Ok(BackendCsv {
            list: Arc::new(RwLock::new(entries)),
            path,
            policy,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_record(record: &csv::StringRecord, row: usize) -> Result<TmEntry, TmError> {
        let field = |idx: usize, name: &str| -> Result<&str, TmError> {
            record.get(idx).ok_or_else(|| TmError::MalformedRow {
                row,
                reason: format!("missing {name}"),
            })
        };

        let id = field(0, "id")?
            .parse::<u64>()
            .map_err(|e| TmError::MalformedRow {
                row,
                reason: format!("bad id: {e}"),
            })?;
        let pair = LanguagePair::new(field(1, "source_lang")?, field(2, "target_lang")?);
        let source: SegText =
            serde_json::from_str(field(3, "source")?).map_err(|e| TmError::MalformedRow {
                row,
                reason: format!("bad source runs: {e}"),
            })?;
        let target: SegText =
            serde_json::from_str(field(4, "target")?).map_err(|e| TmError::MalformedRow {
                row,
                reason: format!("bad target runs: {e}"),
            })?;
        let created_at = field(5, "created_at")?
            .parse::<DateTime<Utc>>()
            .map_err(|e| TmError::MalformedRow {
                row,
                reason: format!("bad created_at: {e}"),
            })?;
        let provenance = field(6, "provenance")?.to_string();

        Ok(TmEntry {
            id,
            pair,
            source,
            target,
            created_at,
            provenance,
        })
    }

    fn save(&self) -> Result<(), TmError> {
        let entries = self.list.read().unwrap();

        let temp_path = self.path.with_extension("csv.tmp");
        let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for entry in entries.iter() {
            csv_wrt.write_record([
                entry.id.to_string().as_str(),
                &entry.pair.source_lang,
                &entry.pair.target_lang,
                &serde_json::to_string(&entry.source).expect("runs serialize"),
                &serde_json::to_string(&entry.target).expect("runs serialize"),
                &entry.created_at.to_rfc3339(),
                &entry.provenance,
            ])?;
        }
        csv_wrt.flush()?;
        drop(csv_wrt);

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn position_of_key(entries: &[TmEntry], normalized: &str, pair: &LanguagePair) -> Option<usize> {
        entries
            .iter()
            .position(|e| e.pair.matches(pair) && e.normalized_source() == normalized)
    }
}

impl TmStore for BackendCsv {
    fn lookup_exact(&self, source_text: &str, pair: &LanguagePair) -> Option<TmEntry> {
        let normalized = normalize_ws(source_text);
        let entries = self.list.read().unwrap();
        Self::position_of_key(&entries, &normalized, pair).map(|idx| entries[idx].clone())
    }

    fn insert(&self, create: TmEntryCreate) -> Result<TmEntry, TmError> {
        let normalized = normalize_ws(&create.source.plain_text());

        let entry = {
            let mut entries = self.list.write().unwrap();

            if let Some(idx) = Self::position_of_key(&entries, &normalized, &create.pair) {
                match self.policy {
                    DuplicatePolicy::Reject => {
                        return Err(TmError::DuplicateKey {
                            existing_id: entries[idx].id,
                        });
                    }
                    DuplicatePolicy::Overwrite => {
                        let existing = &mut entries[idx];
                        existing.source = create.source;
                        existing.target = create.target;
                        existing.created_at = create.created_at.unwrap_or_else(Utc::now);
                        existing.provenance = create.provenance;
                        existing.clone()
                    }
                }
            } else {
                let id = entries.iter().map(|e| e.id).max().map_or(0, |id| id + 1);
                let entry = TmEntry {
                    id,
                    pair: create.pair,
                    source: create.source,
                    target: create.target,
                    created_at: create.created_at.unwrap_or_else(Utc::now),
                    provenance: create.provenance,
                };
                entries.push(entry.clone());
                entry
            }
        };

        self.save()?;
        Ok(entry)
    }

    fn replace(&self, id: u64, create: TmEntryCreate) -> Result<TmEntry, TmError> {
        let entry = {
            let mut entries = self.list.write().unwrap();
            let idx = entries
                .iter()
                .position(|e| e.id == id)
                .ok_or(TmError::NotFound(id))?;

            let existing = &mut entries[idx];
            existing.pair = create.pair;
            existing.source = create.source;
            existing.target = create.target;
            existing.created_at = create.created_at.unwrap_or_else(Utc::now);
            existing.provenance = create.provenance;
            existing.clone()
        };

        self.save()?;
        Ok(entry)
    }

    fn delete(&self, id: u64) -> Result<(), TmError> {
        {
            let mut entries = self.list.write().unwrap();
            let idx = entries
                .iter()
                .position(|e| e.id == id)
                .ok_or(TmError::NotFound(id))?;
            entries.remove(idx);
        }

        self.save()?;
        Ok(())
    }

    fn get(&self, id: u64) -> Option<TmEntry> {
        self.list.read().unwrap().iter().find(|e| e.id == id).cloned()
    }

    fn all(&self, pair: &LanguagePair) -> Vec<TmEntry> {
        self.list
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.pair.matches(pair))
            .cloned()
            .collect()
    }

    fn snapshot(&self) -> Vec<TmEntry> {
        self.list.read().unwrap().clone()
    }

    fn len(&self) -> usize {
        self.list.read().unwrap().len()
    }
}
