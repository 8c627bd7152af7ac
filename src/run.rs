use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};

/// One record of a run file. The sentinel record has an empty key and holds
/// stage metadata (the processed total) instead of a count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: u64,
}

/// Writes an immutable, key-sorted, append-only run. Records are CBOR-framed
/// and the writer enforces the two invariants everything downstream assumes:
/// the sentinel comes first and data keys are strictly ascending.
pub struct RunWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    last_key: Option<String>,
    num_records: u64,
}

impl RunWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            last_key: None,
            num_records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the sentinel record. Must be the first write.
    pub fn write_sentinel(&mut self, total: u64) -> Result<()> {
        if self.num_records != 0 {
            return Err(StatsError::KeyOrder {
                path: self.path.clone(),
                prev: self.last_key.clone().unwrap_or_default(),
                next: String::new(),
            });
        }
        self.write_record(&Record {
            key: String::new(),
            value: total,
        })
    }

    /// Appends a data record, rejecting empty keys and order violations.
    pub fn append(&mut self, key: &str, value: u64) -> Result<()> {
        let in_order = match &self.last_key {
            Some(last) => last.as_str() < key,
            // an empty key here would collide with the sentinel position
            None => !key.is_empty(),
        };
        if !in_order || key.is_empty() {
            return Err(StatsError::KeyOrder {
                path: self.path.clone(),
                prev: self.last_key.clone().unwrap_or_default(),
                next: key.to_string(),
            });
        }
        self.write_record(&Record {
            key: key.to_string(),
            value,
        })
    }

    fn write_record(&mut self, record: &Record) -> Result<()> {
        serde_cbor::to_writer(&mut self.writer, record)?;
        self.last_key = Some(record.key.clone());
        self.num_records += 1;
        Ok(())
    }

    pub fn num_records(&self) -> u64 {
        self.num_records
    }

    /// Flushes and closes the run. On failure the partial file is left in
    /// place for inspection.
    pub fn finish(mut self) -> Result<PathBuf> {
        self.writer.flush()?;
        Ok(self.path)
    }
}

type RecordStream =
    serde_cbor::StreamDeserializer<'static, serde_cbor::de::IoRead<BufReader<File>>, Record>;

/// Sequential forward reader over a run, verifying the sort-order invariant
/// as it goes. A violation is fatal: it means the run is corrupted and every
/// downstream assumption is void.
pub struct RunReader {
    path: PathBuf,
    stream: RecordStream,
    last_key: Option<String>,
}

impl RunReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let stream = serde_cbor::Deserializer::from_reader(BufReader::new(file)).into_iter();
        Ok(Self {
            path: path.to_path_buf(),
            stream,
            last_key: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the sentinel, which must be the very first record. A run
    /// without one is corrupted or was assembled out of order; that aborts
    /// the stage.
    pub fn read_sentinel(&mut self) -> Result<u64> {
        if self.last_key.is_some() {
            return Err(StatsError::MissingSentinel {
                path: self.path.clone(),
                found: self.last_key.clone(),
            });
        }
        match self.stream.next() {
            Some(Ok(record)) if record.key.is_empty() => {
                self.last_key = Some(String::new());
                Ok(record.value)
            }
            Some(Ok(record)) => Err(StatsError::MissingSentinel {
                path: self.path.clone(),
                found: Some(record.key),
            }),
            Some(Err(err)) => Err(err.into()),
            None => Err(StatsError::MissingSentinel {
                path: self.path.clone(),
                found: None,
            }),
        }
    }
}

impl Iterator for RunReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.stream.next()? {
            Ok(record) => {
                if let Some(last) = &self.last_key {
                    if record.key.as_str() <= last.as_str() {
                        return Some(Err(StatsError::KeyOrder {
                            path: self.path.clone(),
                            prev: last.clone(),
                            next: record.key,
                        }));
                    }
                }
                self.last_key = Some(record.key.clone());
                Some(Ok(record))
            }
            Err(err) => Some(Err(err.into())),
        }
    }
}

/// Counts data records in a run (sentinel excluded). Used to size the
/// random-access tables before the derivation pass.
pub fn count_records(path: &Path) -> Result<u64> {
    let mut reader = RunReader::open(path)?;
    reader.read_sentinel()?;
    let mut count = 0;
    for record in reader {
        record?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.run");
        let mut writer = RunWriter::create(&path).unwrap();
        writer.write_sentinel(42).unwrap();
        writer.append("apple", 3).unwrap();
        writer.append("banana", 7).unwrap();
        writer.finish().unwrap();

        let mut reader = RunReader::open(&path).unwrap();
        assert_eq!(reader.read_sentinel().unwrap(), 42);
        let records: Vec<Record> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "apple");
        assert_eq!(records[0].value, 3);
        assert_eq!(records[1].key, "banana");
        assert_eq!(records[1].value, 7);
    }

    #[test]
    fn writer_rejects_out_of_order_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.run");
        let mut writer = RunWriter::create(&path).unwrap();
        writer.write_sentinel(1).unwrap();
        writer.append("b", 1).unwrap();
        assert!(matches!(
            writer.append("a", 1),
            Err(StatsError::KeyOrder { .. })
        ));
        assert!(matches!(
            writer.append("b", 1),
            Err(StatsError::KeyOrder { .. })
        ));
    }

    #[test]
    fn writer_rejects_empty_data_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.run");
        let mut writer = RunWriter::create(&path).unwrap();
        writer.write_sentinel(1).unwrap();
        assert!(writer.append("", 1).is_err());
    }

    #[test]
    fn missing_sentinel_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.run");
        let mut writer = RunWriter::create(&path).unwrap();
        // a run written without a sentinel
        writer.append("apple", 3).unwrap();
        writer.finish().unwrap();

        let mut reader = RunReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_sentinel(),
            Err(StatsError::MissingSentinel { found: Some(k), .. }) if k == "apple"
        ));
    }

    #[test]
    fn empty_run_has_no_sentinel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.run");
        RunWriter::create(&path).unwrap().finish().unwrap();
        let mut reader = RunReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_sentinel(),
            Err(StatsError::MissingSentinel { found: None, .. })
        ));
    }

    #[test]
    fn count_records_excludes_sentinel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.run");
        let mut writer = RunWriter::create(&path).unwrap();
        writer.write_sentinel(5).unwrap();
        writer.append("a", 1).unwrap();
        writer.append("b", 2).unwrap();
        writer.append("c", 3).unwrap();
        writer.finish().unwrap();
        assert_eq!(count_records(&path).unwrap(), 3);
    }
}
