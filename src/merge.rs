use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, StatsError};
use crate::run::{Record, RunReader, RunWriter};

/// K-way merge of sorted runs with a sum reducer: duplicate keys across
/// inputs collapse into one record holding the sum. Sentinels are summed the
/// same way, so batch totals add up to the stage total.
///
/// The merge is destructive: `sources` are deleted once the output replaces
/// `dest` (which itself participates as an input when it exists). It is
/// associative and commutative for any key that survived every contributing
/// batch without loss, so the hierarchical schedule is free to group runs
/// however it likes.
pub fn merge_runs(sources: &[PathBuf], dest: &Path) -> Result<u64> {
    let mut readers = Vec::with_capacity(sources.len() + 1);
    for source in sources {
        readers.push(RunReader::open(source)?);
    }
    if dest.is_file() {
        readers.push(RunReader::open(dest)?);
    }
    let mut total = 0;
    for reader in &mut readers {
        total += reader.read_sentinel()?;
    }

    let tmp_path = dest.with_extension("run.tmp");
    let mut writer = RunWriter::create(&tmp_path)?;
    writer.write_sentinel(total)?;

    // (key, reader index) ordering keeps the heap deterministic
    let mut heap: BinaryHeap<Reverse<(String, usize, u64)>> = BinaryHeap::new();
    for (index, reader) in readers.iter_mut().enumerate() {
        if let Some(record) = reader.next() {
            let Record { key, value } = record?;
            heap.push(Reverse((key, index, value)));
        }
    }
    let mut num_records = 0;
    while let Some(Reverse((key, index, value))) = heap.pop() {
        let mut sum = value;
        if let Some(record) = readers[index].next() {
            let Record { key, value } = record?;
            heap.push(Reverse((key, index, value)));
        }
        while let Some(Reverse((next_key, _, _))) = heap.peek() {
            if *next_key != key {
                break;
            }
            let Reverse((_, next_index, next_value)) = heap.pop().expect("peeked");
            sum += next_value;
            if let Some(record) = readers[next_index].next() {
                let Record { key, value } = record?;
                heap.push(Reverse((key, next_index, value)));
            }
        }
        writer.append(&key, sum)?;
        num_records += 1;
    }
    writer.finish()?;
    drop(readers);

    fs::rename(&tmp_path, dest)?;
    for source in sources {
        fs::remove_file(source)?;
    }
    Ok(num_records)
}

/// One family of numbered runs (`{prefix}-{index:08}.run`) plus the
/// hierarchical merge schedule over them.
///
/// After every flush the batch counter advances; whenever it is divisible by
/// `merge_unit^k * merge_unit` for some level, the runs produced since the
/// previous merge at that level collapse into one. N flushes therefore cost
/// O(log N) merge passes while never opening more than `merge_unit` runs at
/// once.
pub struct RunSet {
    prefix: String,
    merge_unit: usize,
    num_batches: usize,
}

impl RunSet {
    pub fn new(prefix: impl Into<String>, merge_unit: usize) -> Self {
        Self {
            prefix: prefix.into(),
            merge_unit,
            num_batches: 0,
        }
    }

    pub fn batch_path(&self, index: usize) -> PathBuf {
        PathBuf::from(format!("{}-{:08}.run", self.prefix, index))
    }

    /// Where the next flush should write its run.
    pub fn next_path(&self) -> PathBuf {
        self.batch_path(self.num_batches)
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    /// Registers a completed flush and performs any merges the schedule now
    /// calls for.
    pub fn note_flush(&mut self) -> Result<()> {
        self.num_batches += 1;
        let mut unit = 1;
        while self.num_batches % (unit * self.merge_unit) == 0 {
            unit *= self.merge_unit;
            self.reduce(unit)?;
        }
        Ok(())
    }

    /// Merges the survivors of the previous level into the newest run.
    fn reduce(&self, unit: usize) -> Result<()> {
        let step = unit / self.merge_unit;
        let dest_index = self.num_batches - 1;
        let mut sources = Vec::new();
        let mut index = self.num_batches - unit + step - 1;
        while index < dest_index {
            sources.push(self.batch_path(index));
            index += step;
        }
        let dest = self.batch_path(dest_index);
        info!(
            dest = %dest.display(),
            sources = sources.len(),
            "merging run files"
        );
        merge_runs(&sources, &dest)?;
        Ok(())
    }

    /// Merges every remaining run down to one and renames it to `dest`.
    /// Chunked by `merge_unit` so the open-handle bound holds here too.
    pub fn finalize(self, dest: &Path) -> Result<()> {
        let mut paths: Vec<PathBuf> = (0..self.num_batches)
            .map(|index| self.batch_path(index))
            .filter(|path| path.is_file())
            .collect();
        if paths.is_empty() {
            return Err(StatsError::Config(format!(
                "no runs produced for {}",
                self.prefix
            )));
        }
        while paths.len() > 1 {
            let take = paths.len().min(self.merge_unit);
            let chunk: Vec<PathBuf> = paths.drain(..take).collect();
            let (chunk_dest, chunk_sources) = chunk.split_last().expect("non-empty chunk");
            info!(
                dest = %chunk_dest.display(),
                sources = chunk_sources.len(),
                "merging run files"
            );
            merge_runs(chunk_sources, chunk_dest)?;
            paths.insert(0, chunk_dest.clone());
        }
        let last = paths.pop().expect("one run left");
        fs::rename(&last, dest)?;
        info!(dest = %dest.display(), "finalized run");
        Ok(())
    }
}
