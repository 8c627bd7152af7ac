use std::io::BufRead;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use tracing::info;

use crate::accumulator::{flush_min_count, Accumulator};
use crate::config::{CountConfig, DomainConfig, NgramConfig, BASE_SCORE};
use crate::corpus::{Document, DocumentReader};
use crate::error::Result;
use crate::event::{
    split_domain_key, split_pair_key, CoocExtractor, DomainPairExtractor, DomainRecord, Event,
    NgramExtractor,
};
use crate::lang::word_weight;
use crate::merge::RunSet;
use crate::run::RunWriter;

pub fn word_count_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}-word-count.run"))
}

pub fn cooc_count_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}-cooc-count.run"))
}

pub fn phrase_count_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}-phrase-count.run"))
}

pub fn pair_count_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}-pair-count.run"))
}

pub fn word_prob_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}-word-prob.tbl"))
}

pub fn cooc_prob_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}-cooc-prob.tbl"))
}

pub fn phrase_prob_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}-phrase-prob.tbl"))
}

pub fn cooc_score_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}-cooc-score.tbl"))
}

#[derive(Debug)]
pub struct WordCountSummary {
    pub num_documents: u64,
    pub num_sentences: u64,
    pub num_words: u64,
    pub word_count_path: PathBuf,
    pub cooc_count_path: PathBuf,
}

/// The unigram + co-occurrence counting stage: streams documents, counts
/// into two bounded accumulators, and spills sorted runs that the merge
/// schedule folds together behind it.
///
/// The word accumulator doubles as the budget clock; the pair accumulator
/// rides along and is the only one the mid-batch cutoff prunes, since the
/// pair key space is what actually exhausts memory.
pub struct WordCountStage {
    config: CountConfig,
    data_prefix: String,
    extractor: CoocExtractor,
    words: Accumulator,
    pairs: Accumulator,
    word_runs: RunSet,
    cooc_runs: RunSet,
    batch_sentences: u64,
    num_documents: u64,
    num_sentences: u64,
    num_words: u64,
    start: Instant,
}

impl WordCountStage {
    pub fn new(config: CountConfig, data_prefix: &str) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            extractor: CoocExtractor::new(&config),
            words: Accumulator::new(),
            pairs: Accumulator::new(),
            word_runs: RunSet::new(format!("{data_prefix}-word-count"), config.merge_unit),
            cooc_runs: RunSet::new(format!("{data_prefix}-cooc-count"), config.merge_unit),
            data_prefix: data_prefix.to_string(),
            config,
            batch_sentences: 0,
            num_documents: 0,
            num_sentences: 0,
            num_words: 0,
            start: Instant::now(),
        })
    }

    pub fn run<R: BufRead>(mut self, input: R) -> Result<WordCountSummary> {
        let mut reader = DocumentReader::new(input, self.config.max_sentences_per_doc, true);
        for document in reader.by_ref() {
            self.feed(&document?)?;
        }
        if reader.num_skipped > 0 {
            info!(lines = reader.num_skipped, "skipped empty input lines");
        }
        self.finish()
    }

    pub fn feed(&mut self, document: &Document) -> Result<()> {
        let num_words = document.word_count() as u64;
        for event in self.extractor.extract(document) {
            match &event {
                Event::Unigram { token } => self.words.increment(token, 1),
                _ => self.pairs.increment(&event.key(), event.weight()),
            }
        }
        self.words.add_processed(num_words);
        self.batch_sentences += document.sentences.len() as u64;
        self.num_documents += 1;
        self.num_sentences += document.sentences.len() as u64;
        self.num_words += num_words;
        if self.num_documents % 100_000 == 0 {
            info!(
                documents = self.num_documents,
                words = self.num_words,
                elapsed = ?self.start.elapsed(),
                "counting words"
            );
        }
        if self.words.processed() >= self.config.batch_max_words {
            self.flush()?;
        } else if self.words.since_cutoff()
            >= self.config.batch_max_words / self.config.batch_cutoff_freq
        {
            self.cutoff();
        }
        Ok(())
    }

    /// Mid-batch pruning of the pair accumulator. The threshold is the
    /// flush-time minimum scaled down by the cutoff frequency, so a pair
    /// that would be filtered at flush anyway is dropped early.
    fn cutoff(&mut self) {
        let min_weight = (BASE_SCORE as f64 * self.config.min_cooc_count as f64
            / self.config.batch_cutoff_freq as f64)
            .ceil() as u64;
        let language = self.config.language;
        let numeric = self.config.numeric_word_weight;
        let stop = self.config.stop_word_weight;
        let removed = self.pairs.cutoff(min_weight, |key, count| {
            let Some((word, cooc_word)) = split_pair_key(key) else {
                return 0.0;
            };
            count as f64
                * word_weight(language, word, numeric, stop)
                * word_weight(language, cooc_word, numeric, stop)
        });
        self.words.reset_cutoff_clock();
        info!(removed, remaining = self.pairs.len(), "cut off rare pairs");
    }

    fn flush(&mut self) -> Result<()> {
        let fill_ratio = self.words.fill_ratio(self.config.batch_max_words);
        let words = std::mem::take(&mut self.words);
        let pairs = std::mem::take(&mut self.pairs);
        // the pair dump filters against the intact word counts, so it must
        // run before the word accumulator is consumed
        self.dump_pairs(&words, pairs, fill_ratio)?;
        self.dump_words(words, fill_ratio)?;
        self.batch_sentences = 0;
        Ok(())
    }

    fn dump_pairs(&mut self, words: &Accumulator, pairs: Accumulator, fill_ratio: f64) -> Result<()> {
        let min_word_weight = flush_min_count(self.config.min_word_count, fill_ratio) as f64;
        let min_cooc_weight =
            (BASE_SCORE as f64 * self.config.min_cooc_count as f64 * fill_ratio).ceil();
        let language = self.config.language;
        let numeric = self.config.numeric_word_weight;
        let stop = self.config.stop_word_weight;
        let path = self.cooc_runs.next_path();
        info!(
            path = %path.display(),
            entries = pairs.len(),
            fill = fill_ratio,
            "flushing cooccurrence batch"
        );
        let mut writer = RunWriter::create(&path)?;
        writer.write_sentinel(self.batch_sentences)?;
        let mut cur_word: Option<String> = None;
        let mut group: Vec<(String, u64, f64)> = Vec::new();
        for (key, count) in pairs.into_sorted() {
            let Some((word, cooc_word)) = split_pair_key(&key) else {
                continue;
            };
            if cur_word.as_deref() != Some(word) {
                Self::write_pair_group(&mut writer, &mut group, self.config.max_cooc_per_word)?;
                cur_word = Some(word.to_string());
            }
            let word_w = word_weight(language, word, numeric, stop);
            let cooc_w = word_weight(language, cooc_word, numeric, stop);
            if (words.get(word).unwrap_or(0) as f64 * word_w) < min_word_weight {
                continue;
            }
            let cooc_count = words.get(cooc_word).unwrap_or(0);
            if (cooc_count as f64 * cooc_w) < min_word_weight {
                continue;
            }
            if (count as f64 * word_w * cooc_w) < min_cooc_weight {
                continue;
            }
            // rank within the batch by an IDF estimate from batch-local
            // frequencies; the real scoring pass redoes this globally
            let cooc_prob = cooc_count as f64 / self.batch_sentences.max(1) as f64;
            let idf = (-cooc_prob.ln()).min(self.config.idf_cap);
            let score = count as f64 * idf.powf(self.config.idf_power) * word_w * cooc_w;
            group.push((key, count, score));
        }
        Self::write_pair_group(&mut writer, &mut group, self.config.max_cooc_per_word)?;
        info!(records = writer.num_records() - 1, "cooccurrence batch written");
        writer.finish()?;
        self.cooc_runs.note_flush()
    }

    /// Keeps the batch's best `max` pairs of one word and restores key order
    /// before they hit the writer.
    fn write_pair_group(
        writer: &mut RunWriter,
        group: &mut Vec<(String, u64, f64)>,
        max: usize,
    ) -> Result<()> {
        if group.is_empty() {
            return Ok(());
        }
        group.sort_by(|a, b| b.2.total_cmp(&a.2));
        group.truncate(max);
        group.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, count, _) in group.drain(..) {
            writer.append(&key, count)?;
        }
        Ok(())
    }

    fn dump_words(&mut self, words: Accumulator, fill_ratio: f64) -> Result<()> {
        let min_count = flush_min_count(self.config.min_word_count, fill_ratio);
        let path = self.word_runs.next_path();
        info!(
            path = %path.display(),
            entries = words.len(),
            min_count,
            "flushing word batch"
        );
        let mut writer = RunWriter::create(&path)?;
        writer.write_sentinel(self.batch_sentences)?;
        for (key, count) in words.into_sorted() {
            if count >= min_count {
                writer.append(&key, count)?;
            }
        }
        writer.finish()?;
        self.word_runs.note_flush()
    }

    pub fn finish(mut self) -> Result<WordCountSummary> {
        if self.words.processed() > 0 || self.word_runs.num_batches() == 0 {
            self.flush()?;
        }
        let Self {
            word_runs,
            cooc_runs,
            data_prefix,
            num_documents,
            num_sentences,
            num_words,
            start,
            ..
        } = self;
        let word_dest = word_count_path(&data_prefix);
        let cooc_dest = cooc_count_path(&data_prefix);
        word_runs.finalize(&word_dest)?;
        cooc_runs.finalize(&cooc_dest)?;
        info!(
            documents = num_documents,
            sentences = num_sentences,
            words = num_words,
            elapsed = ?start.elapsed(),
            "word counting done"
        );
        Ok(WordCountSummary {
            num_documents,
            num_sentences,
            num_words,
            word_count_path: word_dest,
            cooc_count_path: cooc_dest,
        })
    }
}

#[derive(Debug)]
pub struct NgramCountSummary {
    pub num_documents: u64,
    pub num_sentences: u64,
    pub num_words: u64,
    pub phrase_count_path: PathBuf,
}

/// The n-gram phrase counting stage. Budgets per sentence rather than per
/// document so a single enormous document cannot blow past the batch limit
/// unchecked.
pub struct NgramCountStage {
    config: NgramConfig,
    data_prefix: String,
    extractor: NgramExtractor,
    phrases: Accumulator,
    runs: RunSet,
    batch_sentences: u64,
    num_documents: u64,
    num_sentences: u64,
    num_words: u64,
    start: Instant,
}

impl NgramCountStage {
    pub fn new(config: NgramConfig, data_prefix: &str) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            extractor: NgramExtractor::new(&config),
            phrases: Accumulator::new(),
            runs: RunSet::new(format!("{data_prefix}-phrase-count"), config.merge_unit),
            data_prefix: data_prefix.to_string(),
            config,
            batch_sentences: 0,
            num_documents: 0,
            num_sentences: 0,
            num_words: 0,
            start: Instant::now(),
        })
    }

    /// Case is preserved on input; the extractor folds sentence-initial
    /// capitals itself.
    pub fn run<R: BufRead>(mut self, input: R) -> Result<NgramCountSummary> {
        let mut reader = DocumentReader::new(input, self.config.max_sentences_per_doc, false);
        for document in reader.by_ref() {
            self.feed(&document?)?;
        }
        if reader.num_skipped > 0 {
            info!(lines = reader.num_skipped, "skipped empty input lines");
        }
        self.finish()
    }

    pub fn feed(&mut self, document: &Document) -> Result<()> {
        self.num_documents += 1;
        for sentence in &document.sentences {
            for event in self.extractor.extract_sentence(sentence) {
                self.phrases.increment(&event.key(), 1);
            }
            self.phrases.add_processed(sentence.len() as u64);
            self.batch_sentences += 1;
            self.num_sentences += 1;
            self.num_words += sentence.len() as u64;
            if self.phrases.processed() >= self.config.batch_max_words {
                self.flush()?;
            } else if self.phrases.since_cutoff()
                >= self.config.batch_max_words / self.config.batch_cutoff_freq
            {
                self.cutoff();
            }
        }
        if self.num_documents % 100_000 == 0 {
            info!(
                documents = self.num_documents,
                words = self.num_words,
                elapsed = ?self.start.elapsed(),
                "counting phrases"
            );
        }
        Ok(())
    }

    fn cutoff(&mut self) {
        let min_count = (self.config.min_phrase_count as f64
            / self.config.batch_cutoff_freq as f64)
            .ceil() as u64;
        let removed = self.phrases.cutoff(min_count, |_, count| count as f64);
        info!(removed, remaining = self.phrases.len(), "cut off rare phrases");
    }

    fn flush(&mut self) -> Result<()> {
        let fill_ratio = self.phrases.fill_ratio(self.config.batch_max_words);
        let min_count = flush_min_count(self.config.min_phrase_count, fill_ratio);
        let phrases = std::mem::take(&mut self.phrases);
        let path = self.runs.next_path();
        info!(
            path = %path.display(),
            entries = phrases.len(),
            min_count,
            "flushing phrase batch"
        );
        let mut writer = RunWriter::create(&path)?;
        writer.write_sentinel(self.batch_sentences)?;
        for (key, count) in phrases.into_sorted() {
            if count >= min_count {
                writer.append(&key, count)?;
            }
        }
        writer.finish()?;
        self.runs.note_flush()?;
        self.batch_sentences = 0;
        Ok(())
    }

    pub fn finish(mut self) -> Result<NgramCountSummary> {
        if self.phrases.processed() > 0 || self.runs.num_batches() == 0 {
            self.flush()?;
        }
        let Self {
            runs,
            data_prefix,
            num_documents,
            num_sentences,
            num_words,
            start,
            ..
        } = self;
        let dest = phrase_count_path(&data_prefix);
        runs.finalize(&dest)?;
        info!(
            documents = num_documents,
            sentences = num_sentences,
            words = num_words,
            elapsed = ?start.elapsed(),
            "phrase counting done"
        );
        Ok(NgramCountSummary {
            num_documents,
            num_sentences,
            num_words,
            phrase_count_path: dest,
        })
    }
}

#[derive(Debug)]
pub struct PairCountSummary {
    pub num_domains: u64,
    pub num_records: u64,
    pub pair_count_path: PathBuf,
}

fn symbol_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[!-/:-@\[-`{-~]").unwrap())
}

/// The aligned phrase-pair counting stage over domain-grouped input:
/// `domain<TAB>score<TAB>source<TAB>target` lines, contiguous per domain.
/// Marginal and joint counts share one accumulator; the sentinel carries
/// the number of domains, which is the probability denominator downstream.
pub struct PairCountStage {
    config: DomainConfig,
    data_prefix: String,
    extractor: DomainPairExtractor,
    pairs: Accumulator,
    runs: RunSet,
    batch_domains: u64,
    num_domains: u64,
    num_records: u64,
    num_malformed: u64,
    start: Instant,
}

impl PairCountStage {
    pub fn new(config: DomainConfig, data_prefix: &str) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            extractor: DomainPairExtractor::new(&config),
            pairs: Accumulator::new(),
            runs: RunSet::new(format!("{data_prefix}-pair-count"), config.merge_unit),
            data_prefix: data_prefix.to_string(),
            config,
            batch_domains: 0,
            num_domains: 0,
            num_records: 0,
            num_malformed: 0,
            start: Instant::now(),
        })
    }

    pub fn run<R: BufRead>(mut self, input: R) -> Result<PairCountSummary> {
        let mut cur_domain: Option<String> = None;
        let mut records: Vec<DomainRecord> = Vec::new();
        for line in input.lines() {
            let line = line?;
            let mut fields = line.splitn(4, '\t');
            let (Some(domain), Some(score), Some(source), Some(target)) = (
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
            ) else {
                self.num_malformed += 1;
                continue;
            };
            if cur_domain.as_deref() != Some(domain) {
                if cur_domain.take().is_some() {
                    self.feed_domain(&records)?;
                    records.clear();
                }
                cur_domain = Some(domain.to_string());
            }
            records.push(DomainRecord {
                score: score.parse().unwrap_or(0.0),
                source: source.to_string(),
                target: target.to_string(),
            });
        }
        if cur_domain.is_some() {
            self.feed_domain(&records)?;
        }
        if self.num_malformed > 0 {
            info!(lines = self.num_malformed, "skipped malformed input lines");
        }
        self.finish()
    }

    pub fn feed_domain(&mut self, records: &[DomainRecord]) -> Result<()> {
        for event in self.extractor.extract(records) {
            self.pairs.increment(&event.key(), 1);
        }
        self.pairs.add_processed(records.len() as u64);
        self.batch_domains += 1;
        self.num_domains += 1;
        self.num_records += records.len() as u64;
        if self.num_domains % 10_000 == 0 {
            info!(
                domains = self.num_domains,
                records = self.num_records,
                elapsed = ?self.start.elapsed(),
                "counting phrase pairs"
            );
        }
        if self.pairs.processed() >= self.config.batch_max_sentences {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let fill_ratio = self.pairs.fill_ratio(self.config.batch_max_sentences);
        let min_count = flush_min_count(self.config.min_phrase_count, fill_ratio);
        let pairs = std::mem::take(&mut self.pairs);
        let path = self.runs.next_path();
        info!(
            path = %path.display(),
            entries = pairs.len(),
            min_count,
            "flushing phrase pair batch"
        );
        let mut writer = RunWriter::create(&path)?;
        writer.write_sentinel(self.batch_domains)?;
        let mut cur_source: Option<String> = None;
        let mut joints: Vec<(String, u64)> = Vec::new();
        for (key, count) in pairs.into_sorted() {
            let Some((source, target)) = split_domain_key(&key) else {
                continue;
            };
            if count < min_count {
                continue;
            }
            if symbol_re().is_match(target) {
                continue;
            }
            if cur_source.as_deref() != Some(source) {
                Self::write_joint_group(&mut writer, &mut joints, self.config.max_targets_in_batch)?;
                cur_source = Some(source.to_string());
            }
            // a marginal sorts first within its source group, so it can go
            // straight through while the joints wait for the cap
            if source.is_empty() || target.is_empty() {
                writer.append(&key, count)?;
            } else {
                joints.push((key, count));
            }
        }
        Self::write_joint_group(&mut writer, &mut joints, self.config.max_targets_in_batch)?;
        info!(records = writer.num_records() - 1, "phrase pair batch written");
        writer.finish()?;
        self.runs.note_flush()?;
        self.batch_domains = 0;
        Ok(())
    }

    /// Keeps one source's most frequent joint targets and restores key order.
    fn write_joint_group(
        writer: &mut RunWriter,
        joints: &mut Vec<(String, u64)>,
        max: usize,
    ) -> Result<()> {
        if joints.is_empty() {
            return Ok(());
        }
        joints.sort_by(|a, b| b.1.cmp(&a.1));
        joints.truncate(max);
        joints.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, count) in joints.drain(..) {
            writer.append(&key, count)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<PairCountSummary> {
        if self.pairs.processed() > 0 || self.runs.num_batches() == 0 {
            self.flush()?;
        }
        let Self {
            runs,
            data_prefix,
            num_domains,
            num_records,
            start,
            ..
        } = self;
        let dest = pair_count_path(&data_prefix);
        runs.finalize(&dest)?;
        info!(
            domains = num_domains,
            records = num_records,
            elapsed = ?start.elapsed(),
            "phrase pair counting done"
        );
        Ok(PairCountSummary {
            num_domains,
            num_records,
            pair_count_path: dest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::RunReader;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::path::Path;
    use tempfile::TempDir;

    fn small_count_config() -> CountConfig {
        CountConfig {
            min_word_count: 1,
            min_cooc_count: 1,
            batch_cutoff_freq: 1,
            ..CountConfig::default()
        }
    }

    fn read_run(path: &Path) -> (u64, Vec<(String, u64)>) {
        let mut reader = RunReader::open(path).unwrap();
        let total = reader.read_sentinel().unwrap();
        let entries = reader
            .map(|r| r.unwrap())
            .map(|r| (r.key, r.value))
            .collect();
        (total, entries)
    }

    #[test]
    fn word_stage_counts_and_pairs() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("t").to_string_lossy().into_owned();
        let stage = WordCountStage::new(small_count_config(), &prefix).unwrap();
        let input = "the cat sat\tthe cat ran\na dog ran fast\n";
        let summary = stage.run(Cursor::new(input)).unwrap();
        assert_eq!(summary.num_documents, 2);
        assert_eq!(summary.num_sentences, 3);
        assert_eq!(summary.num_words, 10);

        let (total, entries) = read_run(&summary.word_count_path);
        assert_eq!(total, 3);
        let counts: HashMap<String, u64> = entries.into_iter().collect();
        // per-sentence occurrences, deduplicated within each sentence
        assert_eq!(counts["the"], 2);
        assert_eq!(counts["cat"], 2);
        assert_eq!(counts["ran"], 2);
        assert_eq!(counts["sat"], 1);
        assert_eq!(counts["a"], 1);
        assert_eq!(counts["dog"], 1);
        assert_eq!(counts["fast"], 1);

        let (pair_total, pair_entries) = read_run(&summary.cooc_count_path);
        assert_eq!(pair_total, 3);
        let pairs: HashMap<String, u64> = pair_entries.into_iter().collect();
        // window pairs within a document
        assert!(pairs.contains_key("cat sat"));
        assert!(pairs.contains_key("dog ran"));
        // never across documents
        assert!(!pairs.contains_key("cat dog"));
    }

    #[test]
    fn word_stage_batched_totals_match_unbatched() {
        let dir = TempDir::new().unwrap();
        // adjacent non-stop pairs only, so the fill-scaled flush filters
        // admit the same records whether or not the input is split
        let input = "cat sat\ndog ran\ncat sat\n";

        let prefix_one = dir.path().join("one").to_string_lossy().into_owned();
        let stage = WordCountStage::new(small_count_config(), &prefix_one).unwrap();
        let one = stage.run(Cursor::new(input)).unwrap();

        let prefix_many = dir.path().join("many").to_string_lossy().into_owned();
        let config = CountConfig {
            // forces a flush after every document
            batch_max_words: 2,
            ..small_count_config()
        };
        let stage = WordCountStage::new(config, &prefix_many).unwrap();
        let many = stage.run(Cursor::new(input)).unwrap();

        assert_eq!(read_run(&one.word_count_path), read_run(&many.word_count_path));
        assert_eq!(read_run(&one.cooc_count_path), read_run(&many.cooc_count_path));
    }

    #[test]
    fn word_stage_flush_filter_drops_singletons() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("f").to_string_lossy().into_owned();
        let config = CountConfig {
            min_word_count: 2,
            min_cooc_count: 1,
            batch_cutoff_freq: 1,
            // the fill ratio is tiny here, so the floor of 2 is what holds
            ..CountConfig::default()
        };
        let stage = WordCountStage::new(config, &prefix).unwrap();
        let input = "the cat sat\tthe cat ran\n";
        let summary = stage.run(Cursor::new(input)).unwrap();
        let (_, entries) = read_run(&summary.word_count_path);
        let counts: HashMap<String, u64> = entries.into_iter().collect();
        assert_eq!(counts.get("the"), Some(&2));
        assert_eq!(counts.get("cat"), Some(&2));
        assert_eq!(counts.get("sat"), None);
        assert_eq!(counts.get("ran"), None);
    }

    #[test]
    fn word_stage_empty_input_yields_empty_runs() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("e").to_string_lossy().into_owned();
        let stage = WordCountStage::new(small_count_config(), &prefix).unwrap();
        let summary = stage.run(Cursor::new("")).unwrap();
        let (total, entries) = read_run(&summary.word_count_path);
        assert_eq!(total, 0);
        assert!(entries.is_empty());
    }

    #[test]
    fn ngram_stage_counts_phrases() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("n").to_string_lossy().into_owned();
        let config = NgramConfig {
            min_phrase_count: 1,
            batch_cutoff_freq: 1,
            ..NgramConfig::default()
        };
        let stage = NgramCountStage::new(config, &prefix).unwrap();
        let input = "Red fox runs\nred fox sleeps\n";
        let summary = stage.run(Cursor::new(input)).unwrap();
        let (total, entries) = read_run(&summary.phrase_count_path);
        assert_eq!(total, 2);
        let counts: HashMap<String, u64> = entries.into_iter().collect();
        // the capitalized variant keeps its case and re-emits lowercased
        assert_eq!(counts.get("Red"), Some(&1));
        assert_eq!(counts.get("red"), Some(&2));
        assert_eq!(counts.get("red fox"), Some(&2));
        assert_eq!(counts.get("Red fox runs"), Some(&1));
        assert_eq!(counts.get("red fox runs"), Some(&1));
    }

    #[test]
    fn pair_stage_marginals_and_joints() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("p").to_string_lossy().into_owned();
        let config = DomainConfig {
            min_phrase_count: 1,
            ..DomainConfig::default()
        };
        let stage = PairCountStage::new(config, &prefix).unwrap();
        let input = "fruits\t1.0\tapple pie\tりんご パイ\n\
                     fruits\t0.5\tapple\tりんご\n\
                     animals\t1.0\tdog\t犬\n";
        let summary = stage.run(Cursor::new(input)).unwrap();
        assert_eq!(summary.num_domains, 2);
        assert_eq!(summary.num_records, 3);
        let (total, entries) = read_run(&summary.pair_count_path);
        // sentinel counts domains, not records
        assert_eq!(total, 2);
        let counts: HashMap<String, u64> = entries.into_iter().collect();
        // deduplicated per domain
        assert_eq!(counts.get("apple\t"), Some(&1));
        assert_eq!(counts.get("\tりんご"), Some(&1));
        assert_eq!(counts.get("apple\tりんご"), Some(&1));
        assert_eq!(counts.get("dog\t犬"), Some(&1));
        assert_eq!(counts.get("dog\tりんご"), None);
    }

    #[test]
    fn pair_stage_drops_symbol_targets() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("s").to_string_lossy().into_owned();
        let config = DomainConfig {
            min_phrase_count: 1,
            ..DomainConfig::default()
        };
        let stage = PairCountStage::new(config, &prefix).unwrap();
        let input = "misc\t1.0\tapple\t( りんご\n";
        let summary = stage.run(Cursor::new(input)).unwrap();
        let (_, entries) = read_run(&summary.pair_count_path);
        let counts: HashMap<String, u64> = entries.into_iter().collect();
        assert_eq!(counts.get("apple\t("), None);
        assert_eq!(counts.get("apple\t( りんご"), None);
        assert_eq!(counts.get("apple\tりんご"), Some(&1));
    }

    #[test]
    fn pair_stage_caps_joint_targets() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("c").to_string_lossy().into_owned();
        let config = DomainConfig {
            min_phrase_count: 1,
            max_targets_in_batch: 2,
            ..DomainConfig::default()
        };
        let stage = PairCountStage::new(config, &prefix).unwrap();
        // "apple" pairs with three targets; two domains repeat one of them
        let input = "d1\t1.0\tapple\tひとつ\n\
                     d2\t1.0\tapple\tひとつ\n\
                     d3\t1.0\tapple\tふたつ\n\
                     d4\t1.0\tapple\tみっつ\n";
        let summary = stage.run(Cursor::new(input)).unwrap();
        let (_, entries) = read_run(&summary.pair_count_path);
        let joints: Vec<&(String, u64)> = entries
            .iter()
            .filter(|(k, _)| k.starts_with("apple\t") && *k != "apple\t")
            .collect();
        assert_eq!(joints.len(), 2);
        assert!(joints.iter().any(|(k, c)| k == "apple\tひとつ" && *c == 2));
        // the marginal survives the cap untouched
        let marginal = entries.iter().find(|(k, _)| k == "apple\t").unwrap();
        assert_eq!(marginal.1, 4);
    }
}
