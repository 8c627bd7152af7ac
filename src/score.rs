use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::LruCache;
use crate::config::{ScoreConfig, BASE_SCORE};
use crate::error::{Result, StatsError};
use crate::lang::word_weight;
use crate::prob::cached_prob;
use crate::table::{Table, TableWriter};

/// Final scored entry for one word: its own IDF score plus the ranked
/// related-word list. Scores are fixed-point integers scaled by
/// [`BASE_SCORE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoocScore {
    pub word_score: u64,
    pub cooc: Vec<(String, u64)>,
}

/// Pass 2: walks the co-occurrence probability table and re-scores every
/// related-word list with IDF weighting from the word probability table.
///
/// A word whose own probability is missing (cut off after its pairs
/// survived) is dropped rather than scored against a guess; the same goes
/// for individual related words.
pub fn score_cooccurrences(
    word_prob_path: &Path,
    cooc_prob_path: &Path,
    dest: &Path,
    config: &ScoreConfig,
) -> Result<u64> {
    info!(src = %cooc_prob_path.display(), dest = %dest.display(), "scoring cooccurrences");
    let word_probs = Table::open(word_prob_path)?;
    let cooc_probs = Table::open(cooc_prob_path)?;
    let mut cache = LruCache::new(config.cache_capacity);
    let mut writer = TableWriter::create(dest, cooc_probs.len())?;
    let mut num_records = 0u64;
    let mut num_skipped = 0u64;
    for entry in cooc_probs.iter::<Vec<(String, f64)>>()? {
        let (word, related) = entry?;
        let Some(word_prob) = cached_prob(&mut cache, &word_probs, &word)? else {
            num_skipped += 1;
            continue;
        };
        let word_idf = (-word_prob.ln()).min(config.idf_cap);
        let word_score = word_idf.powf(config.idf_power)
            * word_weight(
                config.language,
                &word,
                config.numeric_word_weight,
                config.stop_word_weight,
            );
        let mut scored: Vec<(String, f64)> = Vec::with_capacity(related.len());
        for (cooc_word, prob) in related {
            let Some(cooc_word_prob) = cached_prob(&mut cache, &word_probs, &cooc_word)? else {
                continue;
            };
            let prob = prob.min(config.max_prob);
            let cooc_idf = (-cooc_word_prob.ln()).min(config.idf_cap);
            let score = prob
                * cooc_idf.powf(config.idf_power)
                * word_weight(
                    config.language,
                    &cooc_word,
                    config.numeric_word_weight,
                    config.stop_word_weight,
                );
            scored.push((cooc_word, score));
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(config.max_cooc_per_word);
        let value = CoocScore {
            word_score: (word_score * BASE_SCORE as f64) as u64,
            cooc: scored
                .into_iter()
                .map(|(cooc_word, score)| (cooc_word, (score * BASE_SCORE as f64) as u64))
                .collect(),
        };
        writer.insert(&word, &value)?;
        num_records += 1;
        if num_records % 100_000 == 0 {
            info!(records = num_records, "scoring cooccurrences");
        }
    }
    writer.finish()?;
    if num_skipped > 0 {
        info!(records = num_skipped, "skipped words without a probability");
    }
    info!(records = num_records, "cooccurrence score table done");
    Ok(num_records)
}

/// Sanity wrapper used by the command layer: refuses to score from an empty
/// probability table, which always indicates a pipeline misordering.
pub fn require_non_empty(table_path: &Path) -> Result<()> {
    let table = Table::open(table_path)?;
    if table.is_empty() {
        return Err(StatsError::Config(format!(
            "{} holds no records; run the counting and division passes first",
            table_path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Language;
    use tempfile::TempDir;

    fn write_word_probs(path: &Path, entries: &[(&str, f64)]) {
        let mut writer = TableWriter::create(path, entries.len() as u64).unwrap();
        for (key, prob) in entries {
            writer.insert(key, prob).unwrap();
        }
        writer.finish().unwrap();
    }

    fn write_cooc_probs(path: &Path, entries: &[(&str, Vec<(&str, f64)>)]) {
        let mut writer = TableWriter::create(path, entries.len() as u64).unwrap();
        for (key, related) in entries {
            let related: Vec<(String, f64)> = related
                .iter()
                .map(|(w, p)| (w.to_string(), *p))
                .collect();
            writer.insert(key, &related).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn scores_weight_rare_words_higher() {
        let dir = TempDir::new().unwrap();
        let word_path = dir.path().join("wp.tbl");
        let cooc_path = dir.path().join("cp.tbl");
        let dest = dir.path().join("cs.tbl");
        write_word_probs(
            &word_path,
            &[("cat", 0.01), ("common", 0.04), ("rare", 0.0001)],
        );
        // equal probabilities; only IDF separates them
        write_cooc_probs(
            &cooc_path,
            &[("cat", vec![("common", 0.04), ("rare", 0.04)])],
        );
        let config = ScoreConfig::default();
        assert_eq!(
            score_cooccurrences(&word_path, &cooc_path, &dest, &config).unwrap(),
            1
        );
        let table = Table::open(&dest).unwrap();
        let scored: CoocScore = table.get("cat").unwrap().unwrap();
        assert_eq!(scored.cooc.len(), 2);
        assert_eq!(scored.cooc[0].0, "rare");
        assert!(scored.cooc[0].1 > scored.cooc[1].1);
        assert!(scored.word_score > 0);
    }

    #[test]
    fn pair_probability_is_capped() {
        let dir = TempDir::new().unwrap();
        let word_path = dir.path().join("wp.tbl");
        let cooc_path = dir.path().join("cp.tbl");
        let dest = dir.path().join("cs.tbl");
        write_word_probs(&word_path, &[("a", 0.01), ("b", 0.01), ("c", 0.01)]);
        // 0.9 and 0.05 both clamp to max_prob, so the scores tie
        write_cooc_probs(&cooc_path, &[("a", vec![("b", 0.9), ("c", 0.05)])]);
        let config = ScoreConfig::default();
        score_cooccurrences(&word_path, &cooc_path, &dest, &config).unwrap();
        let table = Table::open(&dest).unwrap();
        let scored: CoocScore = table.get("a").unwrap().unwrap();
        assert_eq!(scored.cooc[0].1, scored.cooc[1].1);
    }

    #[test]
    fn stop_words_are_down_weighted() {
        let dir = TempDir::new().unwrap();
        let word_path = dir.path().join("wp.tbl");
        let cooc_path = dir.path().join("cp.tbl");
        let dest = dir.path().join("cs.tbl");
        write_word_probs(&word_path, &[("cat", 0.01), ("the", 0.01), ("dog", 0.01)]);
        write_cooc_probs(&cooc_path, &[("cat", vec![("the", 0.02), ("dog", 0.02)])]);
        let config = ScoreConfig {
            language: Language::En,
            ..ScoreConfig::default()
        };
        score_cooccurrences(&word_path, &cooc_path, &dest, &config).unwrap();
        let table = Table::open(&dest).unwrap();
        let scored: CoocScore = table.get("cat").unwrap().unwrap();
        let the = scored.cooc.iter().find(|(w, _)| w == "the").unwrap();
        let dog = scored.cooc.iter().find(|(w, _)| w == "dog").unwrap();
        // stop-word multiplier halves the score
        assert_eq!(the.1, dog.1 / 2);
    }

    #[test]
    fn missing_word_probabilities_skip_cleanly() {
        let dir = TempDir::new().unwrap();
        let word_path = dir.path().join("wp.tbl");
        let cooc_path = dir.path().join("cp.tbl");
        let dest = dir.path().join("cs.tbl");
        write_word_probs(&word_path, &[("cat", 0.01)]);
        write_cooc_probs(
            &cooc_path,
            &[
                ("cat", vec![("ghost", 0.02)]),
                ("ghost", vec![("cat", 0.02)]),
            ],
        );
        let config = ScoreConfig::default();
        let written = score_cooccurrences(&word_path, &cooc_path, &dest, &config).unwrap();
        // "ghost" has no word probability: dropped as a primary, and its
        // entry inside "cat" is dropped too
        assert_eq!(written, 1);
        let table = Table::open(&dest).unwrap();
        let scored: CoocScore = table.get("cat").unwrap().unwrap();
        assert!(scored.cooc.is_empty());
        assert!(table.get::<CoocScore>("ghost").unwrap().is_none());
    }

    #[test]
    fn related_list_is_capped() {
        let dir = TempDir::new().unwrap();
        let word_path = dir.path().join("wp.tbl");
        let cooc_path = dir.path().join("cp.tbl");
        let dest = dir.path().join("cs.tbl");
        let mut words: Vec<(String, f64)> = (0..10).map(|i| (format!("w{i}"), 0.01)).collect();
        words.push(("x".to_string(), 0.01));
        let word_entries: Vec<(&str, f64)> =
            words.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        write_word_probs(&word_path, &word_entries);
        let related: Vec<(String, f64)> = (0..10)
            .map(|i| (format!("w{i}"), 0.001 * (i + 1) as f64))
            .collect();
        let related_refs: Vec<(&str, f64)> =
            related.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        write_cooc_probs(&cooc_path, &[("x", related_refs)]);
        let config = ScoreConfig {
            max_cooc_per_word: 4,
            ..ScoreConfig::default()
        };
        score_cooccurrences(&word_path, &cooc_path, &dest, &config).unwrap();
        let table = Table::open(&dest).unwrap();
        let scored: CoocScore = table.get("x").unwrap().unwrap();
        assert_eq!(scored.cooc.len(), 4);
        assert_eq!(scored.cooc[0].0, "w9");
    }
}
