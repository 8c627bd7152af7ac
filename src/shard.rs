use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::info;

use crate::config::{CountConfig, NgramConfig};
use crate::error::{Result, StatsError};
use crate::merge::merge_runs;
use crate::pipeline::{
    cooc_count_path, phrase_count_path, word_count_path, NgramCountStage, WordCountStage,
};

fn shard_prefix(data_prefix: &str, index: usize) -> String {
    format!("{data_prefix}-shard-{index:04}")
}

/// Folds finalized per-shard runs into the stage-level run at `dest`. One
/// extra merge level on top of what each shard already did internally.
fn merge_shard_runs(mut sources: Vec<PathBuf>, dest: &Path, merge_unit: usize) -> Result<()> {
    while sources.len() > 1 {
        let take = sources.len().min(merge_unit);
        let chunk: Vec<PathBuf> = sources.drain(..take).collect();
        let (chunk_dest, chunk_sources) = match chunk.split_last() {
            Some(split) => split,
            None => break,
        };
        merge_runs(chunk_sources, chunk_dest)?;
        sources.insert(0, chunk_dest.clone());
    }
    match sources.pop() {
        Some(last) => {
            fs::rename(&last, dest)?;
            Ok(())
        }
        None => Err(StatsError::Config("no shards given".into())),
    }
}

/// Runs the word counting stage over every shard file in parallel, one
/// independent pipeline per shard, then merges the shard outputs into the
/// canonical stage runs. Equivalent to a single sequential pass for every
/// key whose count cleared the flush filters in each shard.
pub fn count_words_sharded(
    config: &CountConfig,
    data_prefix: &str,
    shards: &[PathBuf],
) -> Result<()> {
    config.validate()?;
    if shards.is_empty() {
        return Err(StatsError::Config("no shards given".into()));
    }
    info!(shards = shards.len(), "counting words over shards");
    let prefixes: Vec<String> = shards
        .par_iter()
        .enumerate()
        .map(|(index, shard)| {
            let prefix = shard_prefix(data_prefix, index);
            let stage = WordCountStage::new(config.clone(), &prefix)?;
            let summary = stage.run(BufReader::new(File::open(shard)?))?;
            info!(
                shard = %shard.display(),
                documents = summary.num_documents,
                words = summary.num_words,
                "shard done"
            );
            Ok(prefix)
        })
        .collect::<Result<Vec<String>>>()?;
    let word_sources = prefixes.iter().map(|p| word_count_path(p)).collect();
    merge_shard_runs(
        word_sources,
        &word_count_path(data_prefix),
        config.merge_unit,
    )?;
    let cooc_sources = prefixes.iter().map(|p| cooc_count_path(p)).collect();
    merge_shard_runs(
        cooc_sources,
        &cooc_count_path(data_prefix),
        config.merge_unit,
    )?;
    info!("shard merge done");
    Ok(())
}

/// Sharded variant of the n-gram counting stage.
pub fn count_ngrams_sharded(
    config: &NgramConfig,
    data_prefix: &str,
    shards: &[PathBuf],
) -> Result<()> {
    config.validate()?;
    if shards.is_empty() {
        return Err(StatsError::Config("no shards given".into()));
    }
    info!(shards = shards.len(), "counting phrases over shards");
    let prefixes: Vec<String> = shards
        .par_iter()
        .enumerate()
        .map(|(index, shard)| {
            let prefix = shard_prefix(data_prefix, index);
            let stage = NgramCountStage::new(config.clone(), &prefix)?;
            let summary = stage.run(BufReader::new(File::open(shard)?))?;
            info!(
                shard = %shard.display(),
                sentences = summary.num_sentences,
                "shard done"
            );
            Ok(prefix)
        })
        .collect::<Result<Vec<String>>>()?;
    let sources = prefixes.iter().map(|p| phrase_count_path(p)).collect();
    merge_shard_runs(
        sources,
        &phrase_count_path(data_prefix),
        config.merge_unit,
    )?;
    info!("shard merge done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::RunReader;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn read_counts(path: &Path) -> (u64, HashMap<String, u64>) {
        let mut reader = RunReader::open(path).unwrap();
        let total = reader.read_sentinel().unwrap();
        let counts = reader
            .map(|r| r.unwrap())
            .map(|r| (r.key, r.value))
            .collect();
        (total, counts)
    }

    #[test]
    fn sharded_word_counts_sum_across_shards() {
        let dir = TempDir::new().unwrap();
        let shard_a = dir.path().join("a.txt");
        let shard_b = dir.path().join("b.txt");
        File::create(&shard_a)
            .unwrap()
            .write_all(b"cat sat\ncat sat\n")
            .unwrap();
        File::create(&shard_b)
            .unwrap()
            .write_all(b"cat sat\ndog ran\n")
            .unwrap();
        let prefix = dir.path().join("w").to_string_lossy().into_owned();
        let config = CountConfig {
            min_word_count: 1,
            min_cooc_count: 1,
            batch_cutoff_freq: 1,
            ..CountConfig::default()
        };
        count_words_sharded(&config, &prefix, &[shard_a, shard_b]).unwrap();

        let (total, counts) = read_counts(&word_count_path(&prefix));
        assert_eq!(total, 4);
        assert_eq!(counts["cat"], 3);
        assert_eq!(counts["sat"], 3);
        assert_eq!(counts["dog"], 1);

        let (_, pairs) = read_counts(&cooc_count_path(&prefix));
        assert_eq!(pairs["cat sat"], 3000);
        assert_eq!(pairs["dog ran"], 1000);
    }

    #[test]
    fn sharded_ngram_counts_sum_across_shards() {
        let dir = TempDir::new().unwrap();
        let shard_a = dir.path().join("a.txt");
        let shard_b = dir.path().join("b.txt");
        File::create(&shard_a)
            .unwrap()
            .write_all(b"red fox\n")
            .unwrap();
        File::create(&shard_b)
            .unwrap()
            .write_all(b"red fox\n")
            .unwrap();
        let prefix = dir.path().join("n").to_string_lossy().into_owned();
        let config = NgramConfig {
            min_phrase_count: 1,
            batch_cutoff_freq: 1,
            ..NgramConfig::default()
        };
        count_ngrams_sharded(&config, &prefix, &[shard_a, shard_b]).unwrap();
        let (total, counts) = read_counts(&phrase_count_path(&prefix));
        assert_eq!(total, 2);
        assert_eq!(counts["red fox"], 2);
    }

    #[test]
    fn empty_shard_list_is_rejected() {
        assert!(matches!(
            count_words_sharded(&CountConfig::default(), "x", &[]),
            Err(StatsError::Config(_))
        ));
    }
}
