use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::info;

use crate::cache::LruCache;
use crate::config::{DivideConfig, NgramDivideConfig, BASE_SCORE};
use crate::error::{Result, StatsError};
use crate::event::split_pair_key;
use crate::lang::word_weight;
use crate::run::{count_records, RunReader};
use crate::table::{Table, TableWriter};

/// LRU-fronted probability lookup. Misses fall through to the table and
/// populate the cache; absent keys stay absent (a key cut off into oblivion
/// must be skipped, never scored as zero).
pub(crate) fn cached_prob(
    cache: &mut LruCache<f64>,
    table: &Table,
    key: &str,
) -> Result<Option<f64>> {
    if let Some(&prob) = cache.get(key) {
        return Ok(Some(prob));
    }
    match table.get::<f64>(key)? {
        Some(prob) => {
            cache.insert(key, prob);
            Ok(Some(prob))
        }
        None => Ok(None),
    }
}

/// Pass 1a: divides word counts by the sentinel total, producing the
/// random-access word probability table.
pub fn derive_word_probs(count_run: &Path, dest: &Path) -> Result<u64> {
    info!(src = %count_run.display(), dest = %dest.display(), "writing word probability table");
    let expected = count_records(count_run)?;
    let mut reader = RunReader::open(count_run)?;
    let total = reader.read_sentinel()?;
    if total == 0 {
        return Err(StatsError::Config(format!(
            "run {} has a zero sentinel total",
            count_run.display()
        )));
    }
    let mut writer = TableWriter::create(dest, expected)?;
    let mut num_records = 0u64;
    for record in reader {
        let record = record?;
        let prob = record.value as f64 / total as f64;
        writer.insert(&record.key, &prob)?;
        num_records += 1;
        if num_records % 100_000 == 0 {
            info!(records = num_records, "dividing word counts");
        }
    }
    writer.finish()?;
    info!(records = num_records, "word probability table done");
    Ok(num_records)
}

/// Pass 1b: walks the merged co-occurrence run (grouped by primary word,
/// which the sort order makes contiguous), divides each pair count by the
/// primary word's realized count, and writes the capped related-word lists.
///
/// Primary words whose own probability cannot be resolved are skipped
/// entirely.
pub fn derive_cooc_probs(
    cooc_run: &Path,
    word_prob_path: &Path,
    dest: &Path,
    config: &DivideConfig,
) -> Result<u64> {
    info!(src = %cooc_run.display(), dest = %dest.display(), "writing cooccurrence probability table");
    let word_probs = Table::open(word_prob_path)?;
    let mut cache = LruCache::new(config.cache_capacity);
    let mut reader = RunReader::open(cooc_run)?;
    let total = reader.read_sentinel()?;
    if total == 0 {
        return Err(StatsError::Config(format!(
            "run {} has a zero sentinel total",
            cooc_run.display()
        )));
    }
    let mut writer = TableWriter::create(dest, word_probs.len())?;
    let mut num_records = 0u64;
    let mut num_malformed = 0u64;
    let mut cur_word: Option<String> = None;
    let mut cur_word_prob: Option<f64> = None;
    // (cooc word, probability, ranking score)
    let mut group: Vec<(String, f64, f64)> = Vec::new();
    for record in reader {
        let record = record?;
        let Some((word, cooc_word)) = split_pair_key(&record.key) else {
            num_malformed += 1;
            continue;
        };
        if cur_word.as_deref() != Some(word) {
            if let Some(last) = cur_word.take() {
                if !group.is_empty() {
                    save_group(&mut writer, &last, &mut group, config.max_cooc_per_word)?;
                    num_records += 1;
                    if num_records % 100_000 == 0 {
                        info!(records = num_records, "dividing cooccurrence counts");
                    }
                }
            }
            cur_word = Some(word.to_string());
            cur_word_prob = cached_prob(&mut cache, &word_probs, word)?;
            group.clear();
        }
        let Some(word_prob) = cur_word_prob else {
            continue;
        };
        let Some(cooc_prob) = cached_prob(&mut cache, &word_probs, cooc_word)? else {
            continue;
        };
        let cooc_idf = (-cooc_prob.ln()).min(config.idf_cap);
        let word_count = (word_prob * total as f64).round().max(1.0);
        let count = record.value as f64 / BASE_SCORE as f64;
        let prob = count / word_count;
        let score = prob
            * cooc_idf.powf(config.idf_power)
            * word_weight(
                config.language,
                cooc_word,
                config.numeric_word_weight,
                config.stop_word_weight,
            );
        group.push((cooc_word.to_string(), prob, score));
    }
    if let Some(last) = cur_word {
        if !group.is_empty() {
            save_group(&mut writer, &last, &mut group, config.max_cooc_per_word)?;
            num_records += 1;
        }
    }
    writer.finish()?;
    if num_malformed > 0 {
        info!(records = num_malformed, "skipped malformed pair keys");
    }
    info!(records = num_records, "cooccurrence probability table done");
    Ok(num_records)
}

fn save_group(
    writer: &mut TableWriter,
    word: &str,
    group: &mut Vec<(String, f64, f64)>,
    max_cooc_per_word: usize,
) -> Result<()> {
    group.sort_by(|a, b| b.2.total_cmp(&a.2));
    group.truncate(max_cooc_per_word);
    let value: Vec<(String, f64)> = group
        .drain(..)
        .map(|(cooc_word, prob, _)| (cooc_word, prob))
        .collect();
    writer.insert(word, &value)
}

fn digit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9]").unwrap())
}

/// Decides which n-grams deserve a probability entry: rare phrases are cut
/// by an absolute probability floor (tightened for numeric phrases), and a
/// longer phrase is admitted only when it extends an admitted prefix and
/// retains a minimum ratio of the prefix's count. Stateful, in run key
/// order.
struct GoodPhraseFilter<'a> {
    config: &'a NgramDivideConfig,
    prefixes: HashMap<usize, (String, u64)>,
}

impl<'a> GoodPhraseFilter<'a> {
    fn new(config: &'a NgramDivideConfig) -> Self {
        Self {
            config,
            prefixes: HashMap::new(),
        }
    }

    fn is_good(&mut self, phrase: &str, count: u64, total: u64) -> bool {
        let prob = count as f64 / total as f64;
        let mut min_prob = self.config.min_prob;
        if digit_re().is_match(phrase) {
            min_prob *= self.config.numeric_penalty;
        }
        if prob < min_prob {
            return false;
        }
        let num_tokens = phrase.matches(' ').count() + 1;
        if num_tokens == 1 {
            self.prefixes.insert(1, (format!("{} ", phrase), count));
            return true;
        }
        if let Some((prefix, prefix_count)) = self.prefixes.get(&(num_tokens - 1)) {
            if phrase.starts_with(prefix.as_str()) {
                let ratio = count as f64 / *prefix_count as f64;
                if ratio >= self.config.seq_min_ratio {
                    self.prefixes
                        .insert(num_tokens, (format!("{} ", phrase), count));
                    return true;
                }
            }
        }
        false
    }
}

/// N-gram probability derivation: one counting pass to size the table, one
/// writing pass. Both apply the good-phrase filter in run order.
pub fn derive_ngram_probs(
    phrase_run: &Path,
    dest: &Path,
    config: &NgramDivideConfig,
) -> Result<u64> {
    info!(src = %phrase_run.display(), dest = %dest.display(), "writing phrase probability table");
    let mut reader = RunReader::open(phrase_run)?;
    let total = reader.read_sentinel()?;
    if total == 0 {
        return Err(StatsError::Config(format!(
            "run {} has a zero sentinel total",
            phrase_run.display()
        )));
    }
    let mut filter = GoodPhraseFilter::new(config);
    let mut num_good = 0u64;
    for record in reader {
        let record = record?;
        if filter.is_good(&record.key, record.value, total) {
            num_good += 1;
        }
    }

    let mut reader = RunReader::open(phrase_run)?;
    reader.read_sentinel()?;
    let mut filter = GoodPhraseFilter::new(config);
    let mut writer = TableWriter::create(dest, num_good)?;
    let mut num_records = 0u64;
    for record in reader {
        let record = record?;
        if filter.is_good(&record.key, record.value, total) {
            let prob = record.value as f64 / total as f64;
            writer.insert(&record.key, &prob)?;
            num_records += 1;
            if num_records % 100_000 == 0 {
                info!(records = num_records, "dividing phrase counts");
            }
        }
    }
    writer.finish()?;
    info!(records = num_records, "phrase probability table done");
    Ok(num_records)
}
