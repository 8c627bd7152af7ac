use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StatsError};

const MAGIC: &[u8; 8] = b"CSTB\x01\0\0\0";
const HEADER_LEN: u64 = 24;

/// FNV-1a, fixed as part of the file format so a table hashes identically
/// across processes.
fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Builder for a hash-indexed random-access table file.
///
/// Layout: header (magic, bucket count, record count), bucket array of
/// record offsets, then chained records in insertion order. The bucket
/// count is fixed up front from the expected-record-count hint, so the
/// writer only needs one seek back at close to fill in the index.
/// Values are CBOR-encoded.
pub struct TableWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    buckets: Vec<u64>,
    offset: u64,
    num_records: u64,
}

impl TableWriter {
    pub fn create(path: &Path, expected_records: u64) -> Result<Self> {
        let num_buckets = (expected_records * 2).max(64);
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(MAGIC)?;
        writer.write_all(&num_buckets.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;
        // the bucket array is written at finish; skip over its region
        let records_start = HEADER_LEN + num_buckets * 8;
        writer.seek(SeekFrom::Start(records_start))?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            buckets: vec![0; num_buckets as usize],
            offset: records_start,
            num_records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point insert. Later inserts of the same key shadow earlier ones
    /// (the new record becomes the chain head).
    pub fn insert<V: Serialize>(&mut self, key: &str, value: &V) -> Result<()> {
        let value = serde_cbor::to_vec(value)?;
        let bucket = (fnv1a64(key.as_bytes()) % self.buckets.len() as u64) as usize;
        let next = self.buckets[bucket];
        self.buckets[bucket] = self.offset;
        self.writer.write_all(&next.to_le_bytes())?;
        self.writer.write_all(&(key.len() as u32).to_le_bytes())?;
        self.writer.write_all(&(value.len() as u32).to_le_bytes())?;
        self.writer.write_all(key.as_bytes())?;
        self.writer.write_all(&value)?;
        self.offset += 16 + key.len() as u64 + value.len() as u64;
        self.num_records += 1;
        Ok(())
    }

    pub fn num_records(&self) -> u64 {
        self.num_records
    }

    /// Writes the bucket index and record count, then closes the file.
    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        let mut file = self
            .writer
            .into_inner()
            .map_err(|err| err.into_error())?;
        file.seek(SeekFrom::Start(16))?;
        file.write_all(&self.num_records.to_le_bytes())?;
        let mut index = Vec::with_capacity(self.buckets.len() * 8);
        for offset in &self.buckets {
            index.extend_from_slice(&offset.to_le_bytes());
        }
        file.seek(SeekFrom::Start(HEADER_LEN))?;
        file.write_all(&index)?;
        file.sync_all()?;
        Ok(())
    }
}

/// Read side of the table: point lookups only, plus a sequential iterator
/// for downstream passes that walk the whole table.
pub struct Table {
    file: File,
    path: PathBuf,
    num_buckets: u64,
    num_records: u64,
}

impl Table {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut header = [0u8; HEADER_LEN as usize];
        if file.read_exact(&mut header).is_err() || &header[..8] != MAGIC {
            return Err(StatsError::BadTable {
                path: path.to_path_buf(),
            });
        }
        let num_buckets = u64::from_le_bytes(header[8..16].try_into().expect("sized"));
        let num_records = u64::from_le_bytes(header[16..24].try_into().expect("sized"));
        if num_buckets == 0 {
            return Err(StatsError::BadTable {
                path: path.to_path_buf(),
            });
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            num_buckets,
            num_records,
        })
    }

    pub fn len(&self) -> u64 {
        self.num_records
    }

    pub fn is_empty(&self) -> bool {
        self.num_records == 0
    }

    /// Point lookup, following the bucket chain. `None` is an ordinary
    /// miss, not an error; scoring treats missing keys as "skip the group".
    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        let mut file = &self.file;
        let bucket = fnv1a64(key.as_bytes()) % self.num_buckets;
        file.seek(SeekFrom::Start(HEADER_LEN + bucket * 8))?;
        let mut word = [0u8; 8];
        file.read_exact(&mut word)?;
        let mut offset = u64::from_le_bytes(word);
        while offset != 0 {
            file.seek(SeekFrom::Start(offset))?;
            let mut head = [0u8; 16];
            file.read_exact(&mut head)?;
            let next = u64::from_le_bytes(head[..8].try_into().expect("sized"));
            let key_len = u32::from_le_bytes(head[8..12].try_into().expect("sized")) as usize;
            let value_len = u32::from_le_bytes(head[12..16].try_into().expect("sized")) as usize;
            let mut stored_key = vec![0u8; key_len];
            file.read_exact(&mut stored_key)?;
            if stored_key == key.as_bytes() {
                let mut value = vec![0u8; value_len];
                file.read_exact(&mut value)?;
                return Ok(Some(serde_cbor::from_slice(&value)?));
            }
            offset = next;
        }
        Ok(None)
    }

    /// Sequential scan over all records in insertion order, on a separate
    /// file handle so point lookups stay usable.
    pub fn iter<V: DeserializeOwned>(&self) -> Result<TableIter<V>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(HEADER_LEN + self.num_buckets * 8))?;
        Ok(TableIter {
            reader: BufReader::new(file),
            remaining: self.num_records,
            _marker: PhantomData,
        })
    }
}

pub struct TableIter<V> {
    reader: BufReader<File>,
    remaining: u64,
    _marker: PhantomData<V>,
}

impl<V: DeserializeOwned> Iterator for TableIter<V> {
    type Item = Result<(String, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.read_record())
    }
}

impl<V: DeserializeOwned> TableIter<V> {
    fn read_record(&mut self) -> Result<(String, V)> {
        let mut head = [0u8; 16];
        self.reader.read_exact(&mut head)?;
        let key_len = u32::from_le_bytes(head[8..12].try_into().expect("sized")) as usize;
        let value_len = u32::from_le_bytes(head[12..16].try_into().expect("sized")) as usize;
        let mut key = vec![0u8; key_len];
        self.reader.read_exact(&mut key)?;
        let mut value = vec![0u8; value_len];
        self.reader.read_exact(&mut value)?;
        let key = String::from_utf8(key)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        Ok((key, serde_cbor::from_slice(&value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn insert_and_lookup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("probs.tbl");
        let mut writer = TableWriter::create(&path, 3).unwrap();
        writer.insert("the", &0.5f64).unwrap();
        writer.insert("cat", &0.25f64).unwrap();
        writer.insert("sat", &0.125f64).unwrap();
        writer.finish().unwrap();

        let table = Table::open(&path).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get::<f64>("the").unwrap(), Some(0.5));
        assert_eq!(table.get::<f64>("cat").unwrap(), Some(0.25));
        assert_eq!(table.get::<f64>("dog").unwrap(), None);
    }

    #[test]
    fn handles_collisions_with_tiny_bucket_count() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("many.tbl");
        // 64-bucket floor with 500 keys guarantees chains
        let mut writer = TableWriter::create(&path, 0).unwrap();
        for i in 0..500u64 {
            writer.insert(&format!("key{i}"), &i).unwrap();
        }
        writer.finish().unwrap();

        let table = Table::open(&path).unwrap();
        for i in (0..500u64).step_by(7) {
            assert_eq!(table.get::<u64>(&format!("key{i}")).unwrap(), Some(i));
        }
        assert_eq!(table.get::<u64>("key500").unwrap(), None);
    }

    #[test]
    fn structured_values_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cooc.tbl");
        let related = vec![("cat".to_string(), 0.5f64), ("dog".to_string(), 0.1)];
        let mut writer = TableWriter::create(&path, 1).unwrap();
        writer.insert("the", &related).unwrap();
        writer.finish().unwrap();

        let table = Table::open(&path).unwrap();
        let read: Vec<(String, f64)> = table.get("the").unwrap().unwrap();
        assert_eq!(read, related);
    }

    #[test]
    fn sequential_iteration_in_insertion_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("iter.tbl");
        let mut writer = TableWriter::create(&path, 3).unwrap();
        writer.insert("b", &2u64).unwrap();
        writer.insert("a", &1u64).unwrap();
        writer.insert("c", &3u64).unwrap();
        writer.finish().unwrap();

        let table = Table::open(&path).unwrap();
        let entries: Vec<(String, u64)> = table.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(
            entries,
            vec![
                ("b".to_string(), 2),
                ("a".to_string(), 1),
                ("c".to_string(), 3)
            ]
        );
    }

    #[test]
    fn rejects_non_table_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.tbl");
        std::fs::write(&path, b"not a table").unwrap();
        assert!(matches!(
            Table::open(&path),
            Err(StatsError::BadTable { .. })
        ));
    }
}
