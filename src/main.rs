use std::collections::HashSet;
use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use corpus_stats::config::{
    CountConfig, DivideConfig, DomainConfig, NgramConfig, NgramDivideConfig, ScoreConfig,
};
use corpus_stats::lang::Language;
use corpus_stats::pipeline::{
    cooc_count_path, cooc_prob_path, cooc_score_path, phrase_count_path, phrase_prob_path,
    word_count_path, word_prob_path, NgramCountStage, PairCountStage, WordCountStage,
};
use corpus_stats::score::require_non_empty;
use corpus_stats::{
    derive_cooc_probs, derive_ngram_probs, derive_word_probs, score_cooccurrences, shard,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        bail!("missing command");
    };
    let rest: Vec<String> = args.collect();
    match command.as_str() {
        "count-words" => count_words(&rest),
        "count-ngrams" => count_ngrams(&rest),
        "count-phrase-pairs" => count_phrase_pairs(&rest),
        "divide-words" => divide_words(&rest),
        "divide-ngrams" => divide_ngrams(&rest),
        "score" => score(&rest),
        "-h" | "--help" => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            bail!("unknown command: {other}");
        }
    }
}

fn print_usage() {
    eprintln!("Usage: corpus-stats <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  count-words         count unigrams and windowed cooccurrences");
    eprintln!("  count-ngrams        count 1..N-gram phrases");
    eprintln!("  count-phrase-pairs  count aligned phrase pairs per domain");
    eprintln!("  divide-words        derive word and cooccurrence probability tables");
    eprintln!("  divide-ngrams       derive the phrase probability table");
    eprintln!("  score               produce the IDF-weighted cooccurrence score table");
    eprintln!();
    eprintln!("Common options:");
    eprintln!("  --data-prefix P     prefix for every run and table file (required)");
    eprintln!("  --language L        corpus language code (en, ja; default en)");
    eprintln!("  --input PATH        input file, '-' for stdin (default '-')");
    eprintln!("  --shard PATH        repeatable; process shard files in parallel");
    eprintln!();
    eprintln!("Every numeric engine knob has a flag named after it; see the");
    eprintln!("per-command parsers for the full list.");
}

fn next_value(args: &mut std::slice::Iter<'_, String>, flag: &str) -> anyhow::Result<String> {
    args.next()
        .cloned()
        .with_context(|| format!("{flag} requires a value"))
}

fn parse_num<T>(value: &str, flag: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|err| anyhow::anyhow!("{flag}: {err}"))
}

fn open_input(path: &str) -> anyhow::Result<Box<dyn BufRead>> {
    if path == "-" {
        Ok(Box::new(io::stdin().lock()))
    } else {
        let file = File::open(path).with_context(|| format!("cannot open {path}"))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

fn require_prefix(prefix: Option<String>) -> anyhow::Result<String> {
    prefix.context("--data-prefix is required")
}

struct CountWordsArgs {
    config: CountConfig,
    prefix: String,
    input: String,
    shards: Vec<PathBuf>,
}

fn parse_count_words(args: &[String]) -> anyhow::Result<CountWordsArgs> {
    let mut config = CountConfig::default();
    let mut prefix = None;
    let mut input = "-".to_string();
    let mut shards: Vec<PathBuf> = Vec::new();
    let mut args = args.iter();
    while let Some(flag) = args.next() {
        let value = |args: &mut std::slice::Iter<'_, String>| next_value(args, flag);
        match flag.as_str() {
            "--data-prefix" => prefix = Some(value(&mut args)?),
            "--language" => config.language = Language::from_code(&value(&mut args)?),
            "--input" => input = value(&mut args)?,
            "--shard" => shards.push(PathBuf::from(value(&mut args)?)),
            "--window" => config.window_radius = parse_num(&value(&mut args)?, flag)?,
            "--score-decay" => config.score_decay = parse_num(&value(&mut args)?, flag)?,
            "--sentence-gap-penalty" => {
                config.sentence_gap_penalty = parse_num(&value(&mut args)?, flag)?
            }
            "--batch-max-words" => config.batch_max_words = parse_num(&value(&mut args)?, flag)?,
            "--cutoff-freq" => config.batch_cutoff_freq = parse_num(&value(&mut args)?, flag)?,
            "--min-word-count" => config.min_word_count = parse_num(&value(&mut args)?, flag)?,
            "--min-cooc-count" => config.min_cooc_count = parse_num(&value(&mut args)?, flag)?,
            "--max-cooc" => config.max_cooc_per_word = parse_num(&value(&mut args)?, flag)?,
            "--merge-unit" => config.merge_unit = parse_num(&value(&mut args)?, flag)?,
            "--idf-cap" => config.idf_cap = parse_num(&value(&mut args)?, flag)?,
            "--idf-power" => config.idf_power = parse_num(&value(&mut args)?, flag)?,
            "--numeric-word-weight" => {
                config.numeric_word_weight = parse_num(&value(&mut args)?, flag)?
            }
            "--stop-word-weight" => config.stop_word_weight = parse_num(&value(&mut args)?, flag)?,
            other => bail!("unknown flag: {other}"),
        }
    }
    Ok(CountWordsArgs {
        config,
        prefix: require_prefix(prefix)?,
        input,
        shards,
    })
}

fn count_words(args: &[String]) -> anyhow::Result<()> {
    let parsed = parse_count_words(args)?;
    if !parsed.shards.is_empty() {
        shard::count_words_sharded(&parsed.config, &parsed.prefix, &parsed.shards)?;
        info!(
            words = %word_count_path(&parsed.prefix).display(),
            cooc = %cooc_count_path(&parsed.prefix).display(),
            "count runs written"
        );
        return Ok(());
    }
    let stage = WordCountStage::new(parsed.config, &parsed.prefix)?;
    let summary = stage.run(open_input(&parsed.input)?)?;
    info!(
        documents = summary.num_documents,
        words = summary.num_words,
        output = %summary.word_count_path.display(),
        "count runs written"
    );
    Ok(())
}

struct CountNgramsArgs {
    config: NgramConfig,
    prefix: String,
    input: String,
    shards: Vec<PathBuf>,
}

fn parse_count_ngrams(args: &[String]) -> anyhow::Result<CountNgramsArgs> {
    let mut config = NgramConfig::default();
    let mut prefix = None;
    let mut input = "-".to_string();
    let mut shards: Vec<PathBuf> = Vec::new();
    let mut args = args.iter();
    while let Some(flag) = args.next() {
        let value = |args: &mut std::slice::Iter<'_, String>| next_value(args, flag);
        match flag.as_str() {
            "--data-prefix" => prefix = Some(value(&mut args)?),
            "--input" => input = value(&mut args)?,
            "--shard" => shards.push(PathBuf::from(value(&mut args)?)),
            "--ngram" => config.num_ngrams = parse_num(&value(&mut args)?, flag)?,
            "--batch-max-words" => config.batch_max_words = parse_num(&value(&mut args)?, flag)?,
            "--cutoff-freq" => config.batch_cutoff_freq = parse_num(&value(&mut args)?, flag)?,
            "--min-phrase-count" => {
                config.min_phrase_count = parse_num(&value(&mut args)?, flag)?
            }
            "--merge-unit" => config.merge_unit = parse_num(&value(&mut args)?, flag)?,
            other => bail!("unknown flag: {other}"),
        }
    }
    Ok(CountNgramsArgs {
        config,
        prefix: require_prefix(prefix)?,
        input,
        shards,
    })
}

fn count_ngrams(args: &[String]) -> anyhow::Result<()> {
    let parsed = parse_count_ngrams(args)?;
    if !parsed.shards.is_empty() {
        shard::count_ngrams_sharded(&parsed.config, &parsed.prefix, &parsed.shards)?;
        info!(output = %phrase_count_path(&parsed.prefix).display(), "count run written");
        return Ok(());
    }
    let stage = NgramCountStage::new(parsed.config, &parsed.prefix)?;
    let summary = stage.run(open_input(&parsed.input)?)?;
    info!(
        sentences = summary.num_sentences,
        output = %summary.phrase_count_path.display(),
        "count run written"
    );
    Ok(())
}

fn load_keywords(path: &str) -> anyhow::Result<HashSet<String>> {
    let file = File::open(path).with_context(|| format!("cannot open {path}"))?;
    let mut keywords = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let word = line.trim();
        if !word.is_empty() {
            keywords.insert(word.to_lowercase());
        }
    }
    Ok(keywords)
}

fn parse_count_phrase_pairs(
    args: &[String],
) -> anyhow::Result<(DomainConfig, String, String)> {
    let mut config = DomainConfig::default();
    let mut prefix = None;
    let mut input = "-".to_string();
    let mut args = args.iter();
    while let Some(flag) = args.next() {
        let value = |args: &mut std::slice::Iter<'_, String>| next_value(args, flag);
        match flag.as_str() {
            "--data-prefix" => prefix = Some(value(&mut args)?),
            "--input" => input = value(&mut args)?,
            "--keyword-file" => config.keywords = load_keywords(&value(&mut args)?)?,
            "--batch-max-sentences" => {
                config.batch_max_sentences = parse_num(&value(&mut args)?, flag)?
            }
            "--min-phrase-count" => {
                config.min_phrase_count = parse_num(&value(&mut args)?, flag)?
            }
            "--max-targets" => config.max_targets_in_batch = parse_num(&value(&mut args)?, flag)?,
            "--merge-unit" => config.merge_unit = parse_num(&value(&mut args)?, flag)?,
            other => bail!("unknown flag: {other}"),
        }
    }
    Ok((config, require_prefix(prefix)?, input))
}

fn count_phrase_pairs(args: &[String]) -> anyhow::Result<()> {
    let (config, prefix, input) = parse_count_phrase_pairs(args)?;
    let stage = PairCountStage::new(config, &prefix)?;
    let summary = stage.run(open_input(&input)?)?;
    info!(
        domains = summary.num_domains,
        output = %summary.pair_count_path.display(),
        "count run written"
    );
    Ok(())
}

fn parse_divide_words(args: &[String]) -> anyhow::Result<(DivideConfig, String)> {
    let mut config = DivideConfig::default();
    let mut prefix = None;
    let mut args = args.iter();
    while let Some(flag) = args.next() {
        let value = |args: &mut std::slice::Iter<'_, String>| next_value(args, flag);
        match flag.as_str() {
            "--data-prefix" => prefix = Some(value(&mut args)?),
            "--language" => config.language = Language::from_code(&value(&mut args)?),
            "--max-cooc" => config.max_cooc_per_word = parse_num(&value(&mut args)?, flag)?,
            "--cache" => config.cache_capacity = parse_num(&value(&mut args)?, flag)?,
            "--idf-cap" => config.idf_cap = parse_num(&value(&mut args)?, flag)?,
            "--idf-power" => config.idf_power = parse_num(&value(&mut args)?, flag)?,
            "--numeric-word-weight" => {
                config.numeric_word_weight = parse_num(&value(&mut args)?, flag)?
            }
            "--stop-word-weight" => config.stop_word_weight = parse_num(&value(&mut args)?, flag)?,
            other => bail!("unknown flag: {other}"),
        }
    }
    Ok((config, require_prefix(prefix)?))
}

fn divide_words(args: &[String]) -> anyhow::Result<()> {
    let (config, prefix) = parse_divide_words(args)?;
    let word_probs = word_prob_path(&prefix);
    derive_word_probs(&word_count_path(&prefix), &word_probs)?;
    derive_cooc_probs(
        &cooc_count_path(&prefix),
        &word_probs,
        &cooc_prob_path(&prefix),
        &config,
    )?;
    info!(output = %cooc_prob_path(&prefix).display(), "probability tables written");
    Ok(())
}

fn parse_divide_ngrams(args: &[String]) -> anyhow::Result<(NgramDivideConfig, String)> {
    let mut config = NgramDivideConfig::default();
    let mut prefix = None;
    let mut args = args.iter();
    while let Some(flag) = args.next() {
        let value = |args: &mut std::slice::Iter<'_, String>| next_value(args, flag);
        match flag.as_str() {
            "--data-prefix" => prefix = Some(value(&mut args)?),
            "--min-prob" => config.min_prob = parse_num(&value(&mut args)?, flag)?,
            "--seq-min-ratio" => config.seq_min_ratio = parse_num(&value(&mut args)?, flag)?,
            "--numeric-penalty" => config.numeric_penalty = parse_num(&value(&mut args)?, flag)?,
            other => bail!("unknown flag: {other}"),
        }
    }
    Ok((config, require_prefix(prefix)?))
}

fn divide_ngrams(args: &[String]) -> anyhow::Result<()> {
    let (config, prefix) = parse_divide_ngrams(args)?;
    derive_ngram_probs(
        &phrase_count_path(&prefix),
        &phrase_prob_path(&prefix),
        &config,
    )?;
    info!(output = %phrase_prob_path(&prefix).display(), "probability table written");
    Ok(())
}

fn parse_score(args: &[String]) -> anyhow::Result<(ScoreConfig, String)> {
    let mut config = ScoreConfig::default();
    let mut prefix = None;
    let mut args = args.iter();
    while let Some(flag) = args.next() {
        let value = |args: &mut std::slice::Iter<'_, String>| next_value(args, flag);
        match flag.as_str() {
            "--data-prefix" => prefix = Some(value(&mut args)?),
            "--language" => config.language = Language::from_code(&value(&mut args)?),
            "--max-cooc" => config.max_cooc_per_word = parse_num(&value(&mut args)?, flag)?,
            "--max-prob" => config.max_prob = parse_num(&value(&mut args)?, flag)?,
            "--cache" => config.cache_capacity = parse_num(&value(&mut args)?, flag)?,
            "--idf-cap" => config.idf_cap = parse_num(&value(&mut args)?, flag)?,
            "--idf-power" => config.idf_power = parse_num(&value(&mut args)?, flag)?,
            "--numeric-word-weight" => {
                config.numeric_word_weight = parse_num(&value(&mut args)?, flag)?
            }
            "--stop-word-weight" => config.stop_word_weight = parse_num(&value(&mut args)?, flag)?,
            other => bail!("unknown flag: {other}"),
        }
    }
    Ok((config, require_prefix(prefix)?))
}

fn score(args: &[String]) -> anyhow::Result<()> {
    let (config, prefix) = parse_score(args)?;
    let word_probs = word_prob_path(&prefix);
    require_non_empty(&word_probs)?;
    score_cooccurrences(
        &word_probs,
        &cooc_prob_path(&prefix),
        &cooc_score_path(&prefix),
        &config,
    )?;
    info!(output = %cooc_score_path(&prefix).display(), "score table written");
    Ok(())
}
