use std::collections::HashSet;
use std::sync::OnceLock;

use indexmap::IndexSet;
use regex::Regex;

use crate::config::{CountConfig, DomainConfig, NgramConfig, BASE_SCORE};
use crate::corpus::Document;

/// A countable event produced by an extractor. The closed set of variants
/// replaces the ad hoc tuples of a looser design: each variant knows its own
/// run key encoding and weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// One word in one sentence (deduplicated per sentence).
    Unigram { token: String },
    /// An ordered co-occurrence pair with a window-scored weight.
    Pair {
        word: String,
        cooc: String,
        weight: u64,
    },
    /// A contiguous 1..N-gram, deduplicated per sentence.
    NGram { phrase: String },
    /// A cross-language phrase pair; either side may be empty to encode the
    /// marginal counts that share the accumulation pass with the joints.
    DomainPair { source: String, target: String },
}

impl Event {
    /// The run key. Pair members are joined by a space (tokens never contain
    /// one); domain pair sides are joined by a tab for the same reason.
    /// Byte-wise ordering of these keys is what run files are sorted by.
    pub fn key(&self) -> String {
        match self {
            Event::Unigram { token } => token.clone(),
            Event::Pair { word, cooc, .. } => format!("{} {}", word, cooc),
            Event::NGram { phrase } => phrase.clone(),
            Event::DomainPair { source, target } => format!("{}\t{}", source, target),
        }
    }

    pub fn weight(&self) -> u64 {
        match self {
            Event::Pair { weight, .. } => *weight,
            _ => 1,
        }
    }
}

/// Splits a pair run key back into its members.
pub fn split_pair_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(' ')
}

/// Splits a domain pair run key into `(source, target)`.
pub fn split_domain_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('\t')
}

/// Unigram and windowed co-occurrence extraction over one document.
pub struct CoocExtractor {
    window_radius: usize,
    score_decay: f64,
    sentence_gap_penalty: f64,
}

impl CoocExtractor {
    pub fn new(config: &CountConfig) -> Self {
        Self {
            window_radius: config.window_radius,
            score_decay: config.score_decay,
            sentence_gap_penalty: config.sentence_gap_penalty,
        }
    }

    /// Emits one `Unigram` per distinct `(word, sentence)` occurrence and one
    /// `Pair` per distinct co-occurring word inside the window around it.
    /// Within a single window the maximum weight per co-word wins, so one
    /// repetitive sentence cannot dominate a pair; each center occurrence in
    /// another sentence emits its own event, and those sum downstream.
    pub fn extract(&self, document: &Document) -> Vec<Event> {
        let words = document.flatten();
        let mut events = Vec::new();
        let mut seen: HashSet<(&str, usize)> = HashSet::new();
        for (word_index, &(word, sentence_index)) in words.iter().enumerate() {
            if !seen.insert((word, sentence_index)) {
                continue;
            }
            let lo = word_index.saturating_sub(self.window_radius);
            let hi = (word_index + self.window_radius).min(words.len().saturating_sub(1));
            // max score per distinct co-word within this window
            let mut scores: indexmap::IndexMap<&str, u64> = indexmap::IndexMap::new();
            for (cooc_index, &(cooc_word, cooc_sentence_index)) in
                words[lo..=hi].iter().enumerate().map(|(i, w)| (lo + i, w))
            {
                if cooc_word == word {
                    continue;
                }
                let gap = word_index.abs_diff(cooc_index) - 1;
                let mut score = BASE_SCORE as f64 * self.score_decay.powi(gap as i32);
                if cooc_sentence_index != sentence_index {
                    score *= self.sentence_gap_penalty;
                }
                let score = score as u64;
                let entry = scores.entry(cooc_word).or_insert(0);
                *entry = (*entry).max(score);
            }
            events.push(Event::Unigram {
                token: word.to_string(),
            });
            for (cooc_word, weight) in scores {
                events.push(Event::Pair {
                    word: word.to_string(),
                    cooc: cooc_word.to_string(),
                    weight,
                });
            }
        }
        events
    }
}

fn capitalized_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\p{Lu}[-\p{Ll}]+$").unwrap())
}

/// Contiguous n-gram extraction over one sentence.
pub struct NgramExtractor {
    num_ngrams: usize,
}

impl NgramExtractor {
    pub fn new(config: &NgramConfig) -> Self {
        Self {
            num_ngrams: config.num_ngrams,
        }
    }

    /// Every contiguous sub-sequence of length 1..N, counted at most once per
    /// sentence. A capitalized sentence-initial token additionally re-emits
    /// its phrase chain in lower case, normalizing sentence-initial
    /// capitalization without losing the cased variant.
    pub fn extract_sentence(&self, words: &[String]) -> Vec<Event> {
        let mut phrases: IndexSet<String> = IndexSet::new();
        for start in 0..words.len() {
            let end = (start + self.num_ngrams).min(words.len());
            if start == 0 && capitalized_re().is_match(&words[0]) {
                let mut phrase = words[0].to_lowercase();
                phrases.insert(phrase.clone());
                for word in &words[1..end] {
                    phrase.push(' ');
                    phrase.push_str(word);
                    phrases.insert(phrase.clone());
                }
            }
            let mut phrase = String::new();
            for word in &words[start..end] {
                if !phrase.is_empty() {
                    phrase.push(' ');
                }
                phrase.push_str(word);
                phrases.insert(phrase.clone());
            }
        }
        phrases
            .into_iter()
            .map(|phrase| Event::NGram { phrase })
            .collect()
    }
}

/// One aligned sentence pair within a domain.
#[derive(Debug, Clone)]
pub struct DomainRecord {
    pub score: f64,
    pub source: String,
    pub target: String,
}

fn latin_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\p{Latin}[-\p{Latin}]*$").unwrap())
}

/// Candidate phrase-pair extraction over one domain's aligned records.
pub struct DomainPairExtractor {
    max_tokens: usize,
    max_sentences_in_domain: usize,
    keywords: HashSet<String>,
}

impl DomainPairExtractor {
    pub fn new(config: &DomainConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            max_sentences_in_domain: config.max_sentences_in_domain,
            keywords: config.keywords.clone(),
        }
    }

    fn accepts(&self, phrase: &str) -> bool {
        self.keywords.is_empty() || self.keywords.contains(&phrase.to_lowercase())
    }

    /// Emits `(src, "")`, `("", trg)` and `(src, trg)` keys, each counted at
    /// most once per domain, so marginal and joint counts come out of a
    /// single accumulation pass. Source candidates are Latin-script unigrams
    /// and bigrams; target candidates are 1..3-grams over the pre-segmented
    /// target side.
    pub fn extract(&self, records: &[DomainRecord]) -> Vec<Event> {
        let mut records: Vec<&DomainRecord> = records.iter().collect();
        if records.len() > self.max_sentences_in_domain {
            records.sort_by(|a, b| b.score.total_cmp(&a.score));
            records.truncate(self.max_sentences_in_domain);
        }
        let mut src_phrases: IndexSet<String> = IndexSet::new();
        let mut trg_phrases: IndexSet<String> = IndexSet::new();
        let mut pairs: IndexSet<(String, String)> = IndexSet::new();
        for record in records {
            let src_tokens: Vec<&str> = record
                .source
                .split_whitespace()
                .take(self.max_tokens)
                .collect();
            let targets = self.target_phrases(&record.target);
            for (i, &src_token) in src_tokens.iter().enumerate() {
                if !latin_phrase_re().is_match(src_token) {
                    continue;
                }
                if self.accepts(src_token) {
                    for target in &targets {
                        src_phrases.insert(src_token.to_string());
                        trg_phrases.insert(target.clone());
                        pairs.insert((src_token.to_string(), target.clone()));
                    }
                }
                if let Some(&second) = src_tokens.get(i + 1) {
                    if latin_phrase_re().is_match(second) {
                        let concat = format!("{} {}", src_token, second);
                        if self.accepts(&concat) {
                            for target in &targets {
                                src_phrases.insert(concat.clone());
                                pairs.insert((concat.clone(), target.clone()));
                            }
                        }
                    }
                }
            }
        }
        let mut events = Vec::with_capacity(src_phrases.len() + trg_phrases.len() + pairs.len());
        for source in src_phrases {
            events.push(Event::DomainPair {
                source,
                target: String::new(),
            });
        }
        for target in trg_phrases {
            events.push(Event::DomainPair {
                source: String::new(),
                target,
            });
        }
        for (source, target) in pairs {
            events.push(Event::DomainPair { source, target });
        }
        events
    }

    /// 1..3-grams anchored at each target token.
    fn target_phrases(&self, target: &str) -> Vec<String> {
        let tokens: Vec<&str> = target.split_whitespace().collect();
        let mut result = Vec::new();
        for (i, &token) in tokens.iter().enumerate() {
            if i > self.max_tokens {
                break;
            }
            result.push(token.to_string());
            if let Some(&second) = tokens.get(i + 1) {
                result.push(format!("{} {}", token, second));
                if let Some(&third) = tokens.get(i + 2) {
                    result.push(format!("{} {} {}", token, second, third));
                }
            }
        }
        result
    }
}
