//! Corpus statistics aggregation engine.
//!
//! Streams a tokenized corpus through bounded in-memory counting batches,
//! spills sorted run files, merges them hierarchically, and derives
//! probability and IDF-weighted co-occurrence score tables from the merged
//! runs. Counting is lossy on purpose: mid-batch cutoffs and fill-scaled
//! flush filters trade exact tail counts for a bounded memory footprint,
//! which is what makes whole-Wikipedia inputs tractable on one machine.

pub mod accumulator;
pub mod cache;
pub mod config;
pub mod corpus;
pub mod error;
pub mod event;
pub mod lang;
pub mod merge;
pub mod pipeline;
pub mod prob;
pub mod run;
pub mod score;
pub mod shard;
pub mod table;

/// Counting stage drivers. Each stage owns its accumulators and its merge
/// schedule; feeding it documents (or domain groups) and calling `finish`
/// produces the finalized count run for that stage.
///
/// The three stages share the run format but are configured independently;
/// see [`config`] for the knobs and their defaults.
pub use pipeline::{NgramCountStage, PairCountStage, WordCountStage};

/// Probability derivation over finalized count runs, producing the
/// random-access tables the scoring pass reads.
pub use prob::{derive_cooc_probs, derive_ngram_probs, derive_word_probs};

/// The final IDF-weighted co-occurrence scoring pass and its output record.
pub use score::{score_cooccurrences, CoocScore};

/// Crate-wide error and result types.
pub use error::{Result, StatsError};
