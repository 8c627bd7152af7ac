use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy of the engine.
///
/// Per-record input problems (unsplittable lines, empty documents) are not
/// errors at all: readers skip and count them. Everything here is either an
/// environment failure or the violation of an invariant that downstream
/// passes assume unconditionally, so the variants map one-to-one onto the
/// "abort the stage" cases.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_cbor::Error),

    /// The first record of a run must be the sentinel (empty key) holding
    /// the stage total. Anything else means the run is corrupted or was
    /// written out of order.
    #[error("run {path}: missing sentinel record (first key {found:?})")]
    MissingSentinel { path: PathBuf, found: Option<String> },

    /// Strictly ascending key order is load-bearing for merge and for the
    /// grouped probability scan.
    #[error("run {path}: key order violated ({prev:?} >= {next:?})")]
    KeyOrder {
        path: PathBuf,
        prev: String,
        next: String,
    },

    #[error("table {path}: bad magic or truncated header")]
    BadTable { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StatsError>;
