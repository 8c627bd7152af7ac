use std::collections::HashSet;

use crate::error::{Result, StatsError};
use crate::lang::Language;

/// Fixed-point scale for co-occurrence weights. Window scores are stored as
/// integers scaled by this constant so run records stay `u64` end to end.
pub const BASE_SCORE: u64 = 1000;

/// Configuration of the unigram + co-occurrence counting stage.
///
/// The defaults reproduce the Wikipedia-scale setup (about 10GB of RAM for
/// the in-memory batch). All knobs are per-instantiation; stages never read
/// process-global state.
#[derive(Debug, Clone)]
pub struct CountConfig {
    pub language: Language,
    /// Symmetric window radius for co-occurrence scanning.
    pub window_radius: usize,
    /// Multiplicative decay per token of gap inside the window.
    pub score_decay: f64,
    /// Extra multiplier when the pair straddles a sentence boundary.
    pub sentence_gap_penalty: f64,
    /// Batch budget in processed words; reaching it triggers a flush.
    pub batch_max_words: u64,
    /// Cutoffs fire every `batch_max_words / batch_cutoff_freq` words.
    pub batch_cutoff_freq: u64,
    pub min_word_count: u64,
    pub min_cooc_count: u64,
    /// Top-K cap on co-occurring words kept per word at flush time.
    pub max_cooc_per_word: usize,
    /// Fan-in of the hierarchical run merger.
    pub merge_unit: usize,
    pub max_sentences_per_doc: usize,
    pub idf_cap: f64,
    pub idf_power: f64,
    pub numeric_word_weight: f64,
    pub stop_word_weight: f64,
}

impl Default for CountConfig {
    fn default() -> Self {
        Self {
            language: Language::En,
            window_radius: 16,
            score_decay: 0.95,
            sentence_gap_penalty: 0.5,
            batch_max_words: 100_000_000,
            batch_cutoff_freq: 4,
            min_word_count: 16,
            min_cooc_count: 4,
            max_cooc_per_word: 256,
            merge_unit: 16,
            max_sentences_per_doc: 64,
            idf_cap: 10.0,
            idf_power: 1.6,
            numeric_word_weight: 0.2,
            stop_word_weight: 0.5,
        }
    }
}

impl CountConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_max_words == 0 {
            return Err(StatsError::Config("batch_max_words must be > 0".into()));
        }
        if self.batch_cutoff_freq == 0 {
            return Err(StatsError::Config("batch_cutoff_freq must be > 0".into()));
        }
        if self.merge_unit < 2 {
            return Err(StatsError::Config("merge_unit must be >= 2".into()));
        }
        if !(0.0..1.0).contains(&self.score_decay) {
            return Err(StatsError::Config("score_decay must be in [0, 1)".into()));
        }
        Ok(())
    }
}

/// Configuration of the n-gram phrase counting stage.
///
/// The batch budget and minimum count intentionally differ from
/// [`CountConfig`]; the two engines were tuned independently and unifying
/// the constants would silently change output statistics.
#[derive(Debug, Clone)]
pub struct NgramConfig {
    /// Maximum n-gram length.
    pub num_ngrams: usize,
    pub batch_max_words: u64,
    pub batch_cutoff_freq: u64,
    pub min_phrase_count: u64,
    pub merge_unit: usize,
    pub max_sentences_per_doc: usize,
}

impl Default for NgramConfig {
    fn default() -> Self {
        Self {
            num_ngrams: 3,
            batch_max_words: 20_000_000,
            batch_cutoff_freq: 3,
            min_phrase_count: 5,
            merge_unit: 16,
            max_sentences_per_doc: 64,
        }
    }
}

impl NgramConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_ngrams == 0 {
            return Err(StatsError::Config("num_ngrams must be > 0".into()));
        }
        if self.batch_max_words == 0 {
            return Err(StatsError::Config("batch_max_words must be > 0".into()));
        }
        if self.batch_cutoff_freq == 0 {
            return Err(StatsError::Config("batch_cutoff_freq must be > 0".into()));
        }
        if self.merge_unit < 2 {
            return Err(StatsError::Config("merge_unit must be >= 2".into()));
        }
        Ok(())
    }
}

/// Configuration of the aligned domain phrase-pair counting stage.
///
/// This stage budgets by sentences rather than words and never cuts off
/// mid-batch; its batches are small enough that the flush filter alone
/// bounds memory.
#[derive(Debug, Clone)]
pub struct DomainConfig {
    pub batch_max_sentences: u64,
    pub min_phrase_count: u64,
    pub merge_unit: usize,
    /// Tokens considered per sentence side.
    pub max_tokens: usize,
    /// A domain keeps only its best records by alignment score.
    pub max_sentences_in_domain: usize,
    /// Joint-target cap per source phrase at flush time.
    pub max_targets_in_batch: usize,
    /// Optional whitelist; empty means accept every Latin-script phrase.
    pub keywords: HashSet<String>,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            batch_max_sentences: 300_000,
            min_phrase_count: 2,
            merge_unit: 16,
            max_tokens: 64,
            max_sentences_in_domain: 1000,
            max_targets_in_batch: 64,
            keywords: HashSet::new(),
        }
    }
}

impl DomainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_max_sentences == 0 {
            return Err(StatsError::Config("batch_max_sentences must be > 0".into()));
        }
        if self.merge_unit < 2 {
            return Err(StatsError::Config("merge_unit must be >= 2".into()));
        }
        Ok(())
    }
}

/// Configuration of the probability derivation pass over a merged run.
#[derive(Debug, Clone)]
pub struct DivideConfig {
    pub language: Language,
    pub max_cooc_per_word: usize,
    pub cache_capacity: usize,
    pub idf_cap: f64,
    pub idf_power: f64,
    pub numeric_word_weight: f64,
    pub stop_word_weight: f64,
}

impl Default for DivideConfig {
    fn default() -> Self {
        Self {
            language: Language::En,
            max_cooc_per_word: 256,
            cache_capacity: 50_000,
            idf_cap: 10.0,
            idf_power: 1.6,
            numeric_word_weight: 0.2,
            stop_word_weight: 0.5,
        }
    }
}

/// Configuration of the n-gram probability derivation pass.
#[derive(Debug, Clone)]
pub struct NgramDivideConfig {
    /// Phrases below this probability are dropped outright.
    pub min_prob: f64,
    /// An (n)-gram must retain this ratio of its (n-1)-gram prefix count.
    pub seq_min_ratio: f64,
    /// `min_prob` multiplier for phrases containing digits.
    pub numeric_penalty: f64,
}

impl Default for NgramDivideConfig {
    fn default() -> Self {
        Self {
            min_prob: 0.000_000_1,
            seq_min_ratio: 0.001,
            numeric_penalty: 0.1,
        }
    }
}

/// Configuration of the final IDF-weighted scoring pass.
#[derive(Debug, Clone)]
pub struct ScoreConfig {
    pub language: Language,
    pub max_cooc_per_word: usize,
    pub cache_capacity: usize,
    pub idf_cap: f64,
    pub idf_power: f64,
    /// Pair probabilities are capped here before IDF weighting so a single
    /// dominant collocation cannot saturate the score.
    pub max_prob: f64,
    pub numeric_word_weight: f64,
    pub stop_word_weight: f64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            language: Language::En,
            max_cooc_per_word: 128,
            cache_capacity: 50_000,
            idf_cap: 10.0,
            idf_power: 1.6,
            max_prob: 0.05,
            numeric_word_weight: 0.2,
            stop_word_weight: 0.5,
        }
    }
}
