use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::matcher::FuzzyParams;
use crate::tm::DuplicatePolicy;

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Default fuzzy score floor; matches below it are noise for translators
const DEFAULT_FUZZY_MIN_SCORE: f32 = 0.70;
/// Default length-ratio prefilter for fuzzy candidates
const DEFAULT_FUZZY_MAX_LEN_RATIO: f32 = 2.0;
/// Default number of entries scored per parallel fuzzy batch
const DEFAULT_FUZZY_BATCH_SIZE: usize = 512;

/// Default embedding model (bge-base recalls rephrasings MiniLM misses)
const DEFAULT_SEMANTIC_MODEL: &str = "bge-base-en-v1.5";
/// Default similarity threshold for semantic retrieval
const DEFAULT_SEMANTIC_MIN_SCORE: f32 = 0.60;
/// Default bound on queued index writes before enqueue blocks
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default cap on suggestions returned per query
const DEFAULT_MAX_RESULTS: usize = 5;

/// Configuration for fuzzy retrieval
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FuzzyConfig {
    /// Matches scoring below this are dropped [0.0, 1.0]
    #[serde(default = "default_fuzzy_min_score")]
    pub min_score: f32,

    /// Candidates whose length differs from the query by more than this
    /// ratio are skipped without scoring
    #[serde(default = "default_fuzzy_max_len_ratio")]
    pub max_len_ratio: f32,

    /// Entries scored per parallel batch
    #[serde(default = "default_fuzzy_batch_size")]
    pub batch_size: usize,
}

impl FuzzyConfig {
    pub fn params(&self) -> FuzzyParams {
        FuzzyParams {
            min_score: self.min_score,
            max_len_ratio: self.max_len_ratio,
            batch_size: self.batch_size,
        }
    }
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_FUZZY_MIN_SCORE,
            max_len_ratio: DEFAULT_FUZZY_MAX_LEN_RATIO,
            batch_size: DEFAULT_FUZZY_BATCH_SIZE,
        }
    }
}

fn default_fuzzy_min_score() -> f32 {
    DEFAULT_FUZZY_MIN_SCORE
}

fn default_fuzzy_max_len_ratio() -> f32 {
    DEFAULT_FUZZY_MAX_LEN_RATIO
}

fn default_fuzzy_batch_size() -> usize {
    DEFAULT_FUZZY_BATCH_SIZE
}

/// Configuration for semantic retrieval
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Enable or disable semantic retrieval
    #[serde(default)]
    pub enabled: bool,

    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_semantic_model")]
    pub model: String,

    /// Similarity threshold [0.0, 1.0]
    #[serde(default = "default_semantic_min_score")]
    pub min_score: f32,

    /// Index writes queued before enqueue blocks the caller
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: DEFAULT_SEMANTIC_MODEL.to_string(),
            min_score: DEFAULT_SEMANTIC_MIN_SCORE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

fn default_semantic_model() -> String {
    DEFAULT_SEMANTIC_MODEL.to_string()
}

fn default_semantic_min_score() -> f32 {
    DEFAULT_SEMANTIC_MIN_SCORE
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Configuration for the TM store itself
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TmConfig {
    /// What insert does when an entry with the same normalized source
    /// already exists for the language pair
    #[serde(default)]
    pub on_duplicate: DuplicatePolicy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fuzzy: FuzzyConfig,
    #[serde(default)]
    pub semantic: SemanticConfig,
    #[serde(default)]
    pub tm: TmConfig,

    /// Suggestions returned per query across all strategies
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(skip_serializing, skip_deserializing)]
    base_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fuzzy: FuzzyConfig::default(),
            semantic: SemanticConfig::default(),
            tm: TmConfig::default(),
            max_results: DEFAULT_MAX_RESULTS,
            base_dir: PathBuf::new(),
        }
    }
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

impl Config {
    fn validate(&mut self) {
        if !(0.0..=1.0).contains(&self.fuzzy.min_score) {
            panic!(
                "fuzzy.min_score must be between 0.0 and 1.0, got {}",
                self.fuzzy.min_score
            );
        }
        if self.fuzzy.max_len_ratio < 1.0 {
            panic!(
                "fuzzy.max_len_ratio must be at least 1.0, got {}",
                self.fuzzy.max_len_ratio
            );
        }
        if self.fuzzy.batch_size == 0 {
            self.fuzzy.batch_size = 1;
        }

        if !(0.0..=1.0).contains(&self.semantic.min_score) {
            panic!(
                "semantic.min_score must be between 0.0 and 1.0, got {}",
                self.semantic.min_score
            );
        }
        if self.semantic.queue_capacity == 0 {
            self.semantic.queue_capacity = 1;
        }

        if self.max_results == 0 {
            self.max_results = 1;
        }
    }

    pub fn load_with(base_dir: &Path) -> Self {
        let path = base_dir.join(CONFIG_FILE_NAME);

        // create new if does not exist
        if !path.exists() {
            std::fs::create_dir_all(base_dir).expect("cannot create config directory");
            std::fs::write(
                &path,
                serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
            )
            .expect("cannot write default config");
        }

        let config_str = std::fs::read_to_string(&path).expect("cannot read config file");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_dir = base_dir.to_path_buf();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        let path = self.base_dir.join(CONFIG_FILE_NAME);
        let config_str = serde_yml::to_string(&self).unwrap();
        std::fs::write(path, config_str).expect("cannot write config file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_creates_the_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path());

        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
        assert!(!config.semantic.enabled);
        assert_eq!(config.max_results, DEFAULT_MAX_RESULTS);
        assert_eq!(config.fuzzy.min_score, DEFAULT_FUZZY_MIN_SCORE);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "semantic:\n  enabled: true\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path());

        assert!(config.semantic.enabled);
        assert_eq!(config.semantic.model, DEFAULT_SEMANTIC_MODEL);
        assert_eq!(config.fuzzy.batch_size, DEFAULT_FUZZY_BATCH_SIZE);
        assert_eq!(config.max_results, DEFAULT_MAX_RESULTS);
        assert_eq!(config.tm.on_duplicate, DuplicatePolicy::Reject);
    }

    #[test]
    fn zero_sized_knobs_are_bumped_to_one() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "max_results: 0\nfuzzy:\n  batch_size: 0\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path());

        assert_eq!(config.max_results, 1);
        assert_eq!(config.fuzzy.batch_size, 1);
    }

    #[test]
    #[should_panic(expected = "fuzzy.min_score")]
    fn out_of_range_score_floor_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "fuzzy:\n  min_score: 1.5\n",
        )
        .unwrap();

        Config::load_with(dir.path());
    }

    #[test]
    fn saved_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::load_with(dir.path());
        config.semantic.enabled = true;
        config.max_results = 9;
        config.save();

        let reloaded = Config::load_with(dir.path());
        assert!(reloaded.semantic.enabled);
        assert_eq!(reloaded.max_results, 9);
    }
}
